//! Federation error types.
//!
//! [`FederationError`] covers configuration, provider selection, metadata
//! and signing failures. Per-request verification failures are carried by
//! [`AuthenticationError`], whose [`AuthenticationErrorKind`] decides what
//! happens to the pending request.

use std::fmt;

use fed_saml::SamlError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a protocol response was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationErrorKind {
    /// The response does not parse as a protocol document.
    MalformedResponse,
    /// The response does not answer the pending request.
    UnsolicitedResponse,
    /// The response arrived over a binding this exchange does not accept.
    BindingMismatch,
    /// No trusted key verifies the response.
    InvalidSignature,
    /// The response or assertion was issued by someone else.
    IssuerMismatch,
    /// Outside the validity window.
    ExpiredOrNotYetValid,
    /// The assertion is not addressed to this service provider.
    AudienceMismatch,
    /// The message id was already consumed.
    ReplayDetected,
    /// The provider answered with a non-success status.
    ProviderRefused,
    /// No usable subject, or a NameID format the provider is not trusted for.
    UnacceptableSubject,
}

impl AuthenticationErrorKind {
    /// Returns true if the pending request survives this failure, so the
    /// browser may submit a corrected response.
    #[must_use]
    pub const fn keeps_pending_request(self) -> bool {
        matches!(self, Self::MalformedResponse | Self::BindingMismatch)
    }

    /// Returns true for failures that are logged as security events.
    #[must_use]
    pub const fn is_security_event(self) -> bool {
        matches!(
            self,
            Self::InvalidSignature | Self::ReplayDetected | Self::IssuerMismatch
        )
    }

    /// Stable name used in logs and result documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedResponse => "malformed_response",
            Self::UnsolicitedResponse => "unsolicited_response",
            Self::BindingMismatch => "binding_mismatch",
            Self::InvalidSignature => "invalid_signature",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::ExpiredOrNotYetValid => "expired_or_not_yet_valid",
            Self::AudienceMismatch => "audience_mismatch",
            Self::ReplayDetected => "replay_detected",
            Self::ProviderRefused => "provider_refused",
            Self::UnacceptableSubject => "unacceptable_subject",
        }
    }
}

impl fmt::Display for AuthenticationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed verification step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct AuthenticationError {
    /// Failure class.
    pub kind: AuthenticationErrorKind,
    /// Diagnostic detail. Never shown to the user.
    pub detail: String,
}

impl AuthenticationError {
    /// Creates an error of the given kind.
    pub fn new(kind: AuthenticationErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::new(AuthenticationErrorKind::MalformedResponse, detail)
    }

    pub(crate) fn unsolicited(detail: impl Into<String>) -> Self {
        Self::new(AuthenticationErrorKind::UnsolicitedResponse, detail)
    }

    pub(crate) fn invalid_signature(detail: impl Into<String>) -> Self {
        Self::new(AuthenticationErrorKind::InvalidSignature, detail)
    }
}

/// Errors raised by the federation layer.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Several providers are configured and the caller did not choose one.
    #[error("Several identity providers are configured; the '{parameter}' parameter must select one")]
    AmbiguousProvider {
        /// Name of the parameter that selects the provider.
        parameter: &'static str,
    },

    /// No trusted provider with this key.
    #[error("Identity provider not found: {0}")]
    ProviderNotFound(String),

    /// Another login is in flight for this session and the policy rejects a new one.
    #[error("A login is already in progress for this session")]
    LoginInProgress,

    /// Metadata could not be fetched, verified or parsed.
    #[error("Metadata fetch failed: {0}")]
    MetadataFetch(String),

    /// A document could not be signed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A protocol message failed verification.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Protocol encoding or decoding error.
    #[error(transparent)]
    Saml(#[from] SamlError),
}

impl FederationError {
    /// Checks if this error is fatal at startup.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Checks if the caller can fix this by choosing differently.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousProvider { .. }
                | Self::ProviderNotFound(_)
                | Self::LoginInProgress
                | Self::Authentication(_)
                | Self::Saml(_)
        )
    }
}

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;
