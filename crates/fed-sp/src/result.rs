//! Outcome of a login attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fed_saml::NameId;
use serde::Serialize;

use crate::error::AuthenticationErrorKind;
use crate::session::PendingAuthnRequest;
use crate::translation::LocalPrincipalMapping;

/// The only failure text shown to users.
pub const USER_FAILURE_MESSAGE: &str = "authentication failed";

/// Identity vouched for by a fully verified response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedAssertion {
    /// Subject of the assertion.
    pub subject: NameId,
    /// Entity ID of the issuing provider.
    pub issuer: String,
    /// Key of the issuing provider.
    pub provider_key: String,
    /// Attribute values by attribute name, in document order.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// When the user authenticated at the provider.
    pub authn_instant: Option<DateTime<Utc>>,
    /// Provider session index, needed for single logout.
    pub session_index: Option<String>,
    /// ID of the consumed response.
    pub response_id: String,
}

/// Final state of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationStatus {
    /// The response was verified and translated.
    Success,
    /// Verification or translation failed.
    Failed,
}

/// Structured result handed back to the UI or API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationResult {
    /// Overall status.
    pub status: AuthenticationStatus,
    /// Request the response answered, when it could be correlated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Provider the request went to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    /// Why verification failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthenticationErrorKind>,
    /// Why translation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_error: Option<String>,
    /// The verified assertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<VerifiedAssertion>,
    /// Local principal produced by translation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<LocalPrincipalMapping>,
    /// Where the browser goes next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    /// Sandbox callback that receives this result instead of a login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_callback: Option<String>,
    /// Registration form offered when the principal is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_form: Option<String>,
}

impl AuthenticationResult {
    /// A verification failure.
    #[must_use]
    pub fn failed(kind: AuthenticationErrorKind, pending: Option<&PendingAuthnRequest>) -> Self {
        Self {
            status: AuthenticationStatus::Failed,
            request_id: pending.map(|p| p.request_id.clone()),
            provider_key: pending.map(|p| p.provider_key.clone()),
            error: Some(kind),
            translation_error: None,
            assertion: None,
            mapping: None,
            return_url: pending.map(|p| p.return_url.clone()),
            sandbox_callback: pending.and_then(|p| p.sandbox_callback.clone()),
            registration_form: None,
        }
    }

    /// A verified assertion and the outcome of its translation.
    #[must_use]
    pub fn verified(
        assertion: VerifiedAssertion,
        translation: Result<LocalPrincipalMapping, String>,
        pending: &PendingAuthnRequest,
        registration_form: Option<String>,
    ) -> Self {
        let (status, mapping, translation_error) = match translation {
            Ok(mapping) => (AuthenticationStatus::Success, Some(mapping), None),
            Err(reason) => (AuthenticationStatus::Failed, None, Some(reason)),
        };
        Self {
            status,
            request_id: Some(pending.request_id.clone()),
            provider_key: Some(pending.provider_key.clone()),
            error: None,
            translation_error,
            assertion: Some(assertion),
            mapping,
            return_url: Some(pending.return_url.clone()),
            sandbox_callback: pending.sandbox_callback.clone(),
            registration_form,
        }
    }

    /// Returns true if the user is authenticated.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == AuthenticationStatus::Success
    }

    /// Returns true if the result goes to a sandbox callback.
    #[must_use]
    pub fn is_sandboxed(&self) -> bool {
        self.sandbox_callback.is_some()
    }

    /// Text safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> Option<&'static str> {
        (!self.is_success()).then_some(USER_FAILURE_MESSAGE)
    }
}
