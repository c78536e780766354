//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Token verification and exchange service
#[derive(Parser, Debug)]
#[command(name = "auth-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_BRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTH_BRIDGE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTH_BRIDGE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTH_BRIDGE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_BRIDGE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the auth service (default)
    Serve,

    /// Print the key id of a PKCS#1 PEM signing key
    KeyId {
        /// Path to the PEM file
        #[arg(required = true)]
        pem: PathBuf,
    },

    /// Print the JWKS document for the configured signing keys
    Jwks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["auth-bridge"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn key_id_takes_a_path() {
        let cli = Cli::parse_from(["auth-bridge", "key-id", "/keys/a.pem"]);
        match cli.command {
            Some(Command::KeyId { pem }) => assert_eq!(pem, PathBuf::from("/keys/a.pem")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["auth-bridge", "jwks", "--config", "auth.yaml", "--log-level", "debug"]);
        assert!(matches!(cli.command, Some(Command::Jwks)));
        assert_eq!(cli.config, Some(PathBuf::from("auth.yaml")));
        assert_eq!(cli.log_level, "debug");
    }
}
