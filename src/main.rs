//! auth-bridge - token verification and exchange service

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use auth_bridge::{
    cli::{Cli, Command},
    config::Config,
    keyring::SigningKey,
    server,
    service::{AuthService, load_key_ring},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::KeyId { ref pem }) => print_key_id(pem),
        Some(Command::Jwks) => print_jwks(cli.config.as_deref()),
        Some(Command::Serve) | None => return run_server(cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_key_id(path: &Path) -> anyhow::Result<()> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let key = SigningKey::from_pem(&pem).context("Failed to parse signing key")?;
    println!("{}", key.kid());
    Ok(())
}

fn print_jwks(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let keys = load_key_ring(&config).context("Failed to load signing keys")?;
    println!("{}", serde_json::to_string_pretty(keys.public_jwks())?);
    Ok(())
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        issuers = config.issuers.len(),
        environment = %config.environment,
        "Starting auth service"
    );

    let service = match AuthService::from_config(&config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to initialize auth service: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server::serve(&config.server, service).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
