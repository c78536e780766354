//! Audit events for token exchange and signature checks.
//!
//! Every event is emitted through `tracing` as a JSON blob in the `audit`
//! field.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.exchanged` | A token was issued (exchange or fake) |
//! | `token.denied` | Verification or a business rule refused the exchange |
//! | `signature.verified` | A partner signature matched |
//! | `signature.denied` | Unknown public key or signature mismatch |

use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type, e.g. `"token.exchanged"`.
    pub event: &'static str,
    /// Subject of the external token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Issuer that accepted the external token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Resolved user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Audience of the issued token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant: Option<String>,
    /// API public key (signature events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Organization of the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Denial reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn empty(event: &'static str) -> Self {
        Self {
            event,
            subject: None,
            issuer: None,
            user_id: None,
            applicant: None,
            public_key: None,
            organization_id: None,
            reason: None,
        }
    }

    /// `token.exchanged`
    #[must_use]
    pub fn exchanged(subject: &str, issuer: &str, user_id: &str, applicant: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            issuer: Some(issuer.to_string()),
            user_id: Some(user_id.to_string()),
            applicant: Some(applicant.to_string()),
            ..Self::empty("token.exchanged")
        }
    }

    /// `token.denied`
    #[must_use]
    pub fn denied(subject: Option<&str>, applicant: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.map(str::to_string),
            applicant: applicant.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::empty("token.denied")
        }
    }

    /// `signature.verified`
    #[must_use]
    pub fn signature_verified(public_key: &str, user_id: &str, organization_id: &str) -> Self {
        Self {
            public_key: Some(public_key.to_string()),
            user_id: Some(user_id.to_string()),
            organization_id: Some(organization_id.to_string()),
            ..Self::empty("signature.verified")
        }
    }

    /// `signature.denied`
    #[must_use]
    pub fn signature_denied(public_key: &str, reason: impl Into<String>) -> Self {
        Self {
            public_key: Some(public_key.to_string()),
            reason: Some(reason.into()),
            ..Self::empty("signature.denied")
        }
    }

    fn is_denial(&self) -> bool {
        self.reason.is_some()
    }
}

/// Emit `event`. Denials go out at `warn`, everything else at `info`.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) if event.is_denial() => tracing::warn!(audit = %json, "auth audit"),
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
