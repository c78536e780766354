//! Error types for the auth bridge

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::keyring::KeyRingError;
use crate::salesforce::SalesforceError;
use crate::verifier::CombinedVerifyError;

/// Result type alias for the auth bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Auth bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key loading or signing failed
    #[error(transparent)]
    KeyRing(#[from] KeyRingError),

    /// Every configured issuer rejected the token
    #[error(transparent)]
    CombinedVerify(#[from] CombinedVerifyError),

    /// The resolved account carries a deactivation timestamp
    #[error("user was deactivated")]
    DeactivatedAccount,

    /// Vendor division claim outside the accepted set
    #[error("unexpected student division: {0:?}")]
    UnexpectedDivision(Option<String>),

    /// The resolved user group may not use this operation
    #[error("user group {0} is not allowed")]
    RoleNotAllowed(String),

    /// No API keypair exists for the public key
    #[error("unknown public key")]
    UnknownKey,

    /// HMAC signature did not match the body
    #[error("invalid signature")]
    InvalidSignature,

    /// No organization for the domain name
    #[error("organization not found")]
    OrganizationNotFound,

    /// No user for the username or email
    #[error("username not found")]
    UsernameNotFound,

    /// No user for the authorization lookup
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Fake tokens may not be generated in this environment
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Request is missing a field or carries an unusable value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Salesforce JWT-bearer exchange failed
    #[error(transparent)]
    Salesforce(#[from] SalesforceError),

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Status codes reported at the RPC boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    /// Token could not be verified
    Unauthenticated,
    /// Caller is known but not allowed
    PermissionDenied,
    /// A business rule rejected the request
    FailedPrecondition,
    /// Looked-up entity does not exist
    NotFound,
    /// Malformed request
    InvalidArgument,
    /// An upstream dependency is unreachable
    Unavailable,
    /// Anything else
    Internal,
}

impl Code {
    /// HTTP status used when the code is returned over the JSON transport
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::PermissionDenied => 403,
            Self::FailedPrecondition => 412,
            Self::NotFound => 404,
            Self::InvalidArgument => 400,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl Error {
    /// Map to the RPC status code
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::CombinedVerify(_) => Code::Unauthenticated,
            Self::DeactivatedAccount
            | Self::RoleNotAllowed(_)
            | Self::UnknownKey
            | Self::InvalidSignature => Code::PermissionDenied,
            Self::UnexpectedDivision(_) | Self::UnsupportedEnvironment(_) => {
                Code::FailedPrecondition
            }
            Self::OrganizationNotFound | Self::UsernameNotFound | Self::UserNotFound(_) => {
                Code::NotFound
            }
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Salesforce(e) => e.code(),
            _ => Code::Internal,
        }
    }

    /// Returns `true` for token verification failures
    #[must_use]
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::CombinedVerify(_))
    }
}

/// Error as seen by an RPC caller
///
/// Verification failures collapse to a generic message and both signature
/// failures share one, so callers cannot probe which keys exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Status code
    pub code: Code,
    /// Caller-facing message
    pub message: String,
}

impl Status {
    /// Create a status
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let code = err.code();
        let message = match &err {
            Error::CombinedVerify(_) => "Unauthenticated".to_string(),
            Error::UnknownKey | Error::InvalidSignature => "permission denied".to_string(),
            Error::Store(_) | Error::Io(_) | Error::Internal(_) | Error::KeyRing(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Self { code, message }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifyError;

    #[test]
    fn verification_errors_collapse_to_unauthenticated() {
        // GIVEN: a combined verification failure with a detailed reason
        let err = Error::CombinedVerify(CombinedVerifyError::new(vec![(
            "https://issuer.example".to_string(),
            VerifyError::Expired,
        )]));

        // WHEN: converted to a boundary status
        let status = Status::from(err);

        // THEN: the detail is not exposed
        assert_eq!(status.code, Code::Unauthenticated);
        assert_eq!(status.message, "Unauthenticated");
    }

    #[test]
    fn signature_failures_are_indistinguishable() {
        let unknown = Status::from(Error::UnknownKey);
        let invalid = Status::from(Error::InvalidSignature);

        assert_eq!(unknown, invalid);
        assert_eq!(unknown.code, Code::PermissionDenied);
    }

    #[test]
    fn business_rule_codes() {
        assert_eq!(Error::DeactivatedAccount.code(), Code::PermissionDenied);
        assert_eq!(
            Error::UnexpectedDivision(Some("adult".into())).code(),
            Code::FailedPrecondition
        );
        assert_eq!(Error::OrganizationNotFound.code(), Code::NotFound);
        assert_eq!(Error::UsernameNotFound.code(), Code::NotFound);
    }

    #[test]
    fn not_found_status_keeps_message() {
        let status = Status::from(Error::OrganizationNotFound);
        assert_eq!(status.message, "organization not found");
        assert_eq!(status.code.http_status(), 404);
    }

    #[test]
    fn internal_details_are_hidden() {
        let status = Status::from(Error::Store("connection reset by peer".into()));
        assert_eq!(status.code, Code::Internal);
        assert_eq!(status.message, "internal error");
    }
}
