//! Single logout.
//!
//! SP-initiated logout keeps a [`LogoutContext`] per session index until the
//! provider confirms. IdP-initiated logout requests are verified with the
//! same trust checks as login responses, the local sessions are ended
//! through a [`SessionTerminator`], and the provider is answered over the
//! binding its request used.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fed_saml::bindings::{DecodedMessage, OutboundMessage, SamlMessageType};
use fed_saml::signature::{XmlSignatureValidator, XmlSigner};
use fed_saml::{sub_status_codes, xml, Binding, LogoutRequest, LogoutResponse, NameId, Status};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{
    AuthenticationError, AuthenticationErrorKind, FederationError, FederationResult,
};
use crate::outbound::{self, Outgoing};
use crate::replay::ReplayAttackGuard;
use crate::trust::{TrustSnapshot, TrustedProvider};
use crate::validator::verify_message_signature;

/// Lifetime of an SP-initiated logout request.
const LOGOUT_REQUEST_LIFETIME_MINUTES: i64 = 5;

/// State of an SP-initiated logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutState {
    /// The request was sent to the provider.
    LogoutRequested,
    /// The provider confirmed the logout.
    LogoutConfirmed,
}

/// An SP-initiated logout, keyed by session index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutContext {
    /// Session index of the assertion being logged out.
    pub session_index: String,
    /// ID of the `LogoutRequest`.
    pub request_id: String,
    /// Provider the request went to.
    pub provider_key: String,
    /// Principal being logged out.
    pub name_id: NameId,
    /// Current state.
    pub state: LogoutState,
    /// When the request was sent.
    pub created_at: DateTime<Utc>,
    /// Where to send the browser afterwards.
    pub return_url: Option<String>,
}

/// Sessions a provider asked to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRequest {
    /// Provider that sent the request.
    pub provider_key: String,
    /// Principal to log out.
    pub name_id: NameId,
    /// Session indexes; empty means every session of the principal.
    pub session_indexes: Vec<String>,
    /// Realm the sessions belong to.
    pub realm: String,
}

/// Ends local sessions on behalf of a provider.
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    /// Ends the matching sessions and returns how many were ended.
    async fn terminate(&self, request: &TerminationRequest) -> Result<usize, String>;
}

/// A logout request ready to be sent.
#[derive(Debug, Clone)]
pub struct LogoutInitiation {
    /// The stored context.
    pub context: LogoutContext,
    /// Redirect URL or POST form.
    pub message: OutboundMessage,
}

/// Result of handling a logout message from a provider.
#[derive(Debug, Clone)]
pub enum LogoutOutcome {
    /// The provider confirmed an SP-initiated logout.
    Confirmed(LogoutContext),
    /// The provider asked for a logout and this is the answer.
    Answered {
        /// The `LogoutResponse` for the provider.
        message: OutboundMessage,
        /// Whether the answer reports success.
        success: bool,
        /// Number of local sessions ended.
        terminated: usize,
    },
}

/// Settings of the logout service.
#[derive(Debug, Clone)]
pub struct LogoutSettings {
    /// Entity ID of this SP.
    pub sp_entity_id: String,
    /// Realm whose sessions are ended.
    pub realm: String,
    /// Clock skew tolerance.
    pub clock_skew: Duration,
    /// Lifetime of unconfirmed logout contexts.
    pub context_ttl: Duration,
    /// Sign logout messages unless the provider says otherwise.
    pub sign_by_default: bool,
}

/// Runs both directions of single logout.
pub struct LogoutManager {
    settings: LogoutSettings,
    signer: Option<XmlSigner>,
    replay: Arc<ReplayAttackGuard>,
    terminator: Arc<dyn SessionTerminator>,
    contexts: DashMap<String, LogoutContext>,
    by_request: DashMap<String, String>,
}

impl std::fmt::Debug for LogoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogoutManager")
            .field("settings", &self.settings)
            .field("contexts", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

impl LogoutManager {
    /// Creates the manager.
    pub fn new(
        settings: LogoutSettings,
        signer: Option<XmlSigner>,
        replay: Arc<ReplayAttackGuard>,
        terminator: Arc<dyn SessionTerminator>,
    ) -> Self {
        Self {
            settings,
            signer,
            replay,
            terminator,
            contexts: DashMap::new(),
            by_request: DashMap::new(),
        }
    }

    /// Starts logout of one assertion session at its provider.
    ///
    /// A previous unconfirmed logout of the same session index is replaced.
    ///
    /// # Errors
    ///
    /// - [`FederationError::ProviderNotFound`] if the provider is unknown
    /// - [`FederationError::Configuration`] if it has no browser logout
    ///   endpoint, or signing is required without a credential
    /// - [`FederationError::Signing`] if signing fails
    pub fn initiate_logout(
        &self,
        snapshot: &TrustSnapshot,
        provider_key: &str,
        name_id: NameId,
        session_index: &str,
        return_url: Option<String>,
        now: DateTime<Utc>,
    ) -> FederationResult<LogoutInitiation> {
        let provider = snapshot
            .get(provider_key)
            .ok_or_else(|| FederationError::ProviderNotFound(provider_key.to_string()))?;
        let (binding, endpoint) = provider.front_channel_logout().ok_or_else(|| {
            FederationError::Configuration(format!(
                "identity provider '{provider_key}' has no logout endpoint"
            ))
        })?;
        let signer = self.signer_for(provider)?;

        let request_id = fed_crypto::generate_message_id();
        let mut request = LogoutRequest::new(
            request_id.clone(),
            self.settings.sp_entity_id.clone(),
            name_id.clone(),
        )
        .with_destination(endpoint.location.clone())
        .with_session_index(session_index)
        .not_on_or_after(now + Duration::minutes(LOGOUT_REQUEST_LIFETIME_MINUTES));
        request.issue_instant = now;

        let message = outbound::encode(
            Outgoing {
                xml: request.to_xml(),
                id: &request_id,
                binding,
                destination: &endpoint.location,
                relay_state: None,
                message_type: SamlMessageType::Request,
            },
            signer,
        )?;

        let context = LogoutContext {
            session_index: session_index.to_string(),
            request_id: request_id.clone(),
            provider_key: provider.key.clone(),
            name_id,
            state: LogoutState::LogoutRequested,
            created_at: now,
            return_url,
        };
        if let Some(previous) = self.contexts.insert(session_index.to_string(), context.clone()) {
            self.by_request.remove(&previous.request_id);
        }
        self.by_request.insert(request_id.clone(), session_index.to_string());

        info!(
            request_id = %request_id,
            provider = %provider.key,
            %binding,
            "Sent logout request"
        );
        Ok(LogoutInitiation { context, message })
    }

    /// Handles a logout request or response sent by a provider.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Authentication`] if a response fails
    /// verification, or if a request cannot be attributed to a trusted
    /// provider. Verification failures of attributed requests are answered
    /// with an error status instead.
    pub async fn handle_logout_message(
        &self,
        snapshot: &TrustSnapshot,
        message: &DecodedMessage,
        now: DateTime<Utc>,
    ) -> FederationResult<LogoutOutcome> {
        match message.message_type {
            SamlMessageType::Response => self
                .handle_logout_response(snapshot, message, now)
                .map(LogoutOutcome::Confirmed)
                .map_err(|e| {
                    if e.kind.is_security_event() {
                        warn!(kind = %e.kind, detail = %e.detail, "Rejected logout response");
                    } else {
                        info!(kind = %e.kind, detail = %e.detail, "Rejected logout response");
                    }
                    FederationError::Authentication(e)
                }),
            SamlMessageType::Request => self.handle_logout_request(snapshot, message, now).await,
        }
    }

    fn handle_logout_response(
        &self,
        snapshot: &TrustSnapshot,
        message: &DecodedMessage,
        now: DateTime<Utc>,
    ) -> Result<LogoutContext, AuthenticationError> {
        let root = xml::parse(&message.xml).map_err(malformed)?;
        let response = LogoutResponse::from_element(&root).map_err(malformed)?;

        let request_id = response.in_response_to.as_deref().unwrap_or_default();
        let session_index = self
            .by_request
            .get(request_id)
            .map(|index| index.clone())
            .ok_or_else(|| {
                AuthenticationError::unsolicited("no logout request is waiting for this answer")
            })?;
        let context = self
            .contexts
            .get(&session_index)
            .map(|c| c.clone())
            .ok_or_else(|| AuthenticationError::unsolicited("logout context has expired"))?;

        let provider = snapshot.get(&context.provider_key).ok_or_else(|| {
            AuthenticationError::new(
                AuthenticationErrorKind::IssuerMismatch,
                format!("provider '{}' is no longer trusted", context.provider_key),
            )
        })?;
        check_issuer(&response.issuer, provider)?;
        verify_signature(provider, message, &response.id, root.has_signature())?;

        if !self.replay.check_and_record(&response.id, now).is_accepted() {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ReplayDetected,
                format!("logout response {} was already consumed", response.id),
            ));
        }
        self.by_request.remove(request_id);

        if !response.status.is_success() {
            self.contexts.remove(&session_index);
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ProviderRefused,
                response.status.status_code.most_specific().to_string(),
            ));
        }

        let mut confirmed = context;
        confirmed.state = LogoutState::LogoutConfirmed;
        self.contexts.insert(session_index, confirmed.clone());
        info!(
            request_id = %confirmed.request_id,
            provider = %confirmed.provider_key,
            "Logout confirmed"
        );
        Ok(confirmed)
    }

    async fn handle_logout_request(
        &self,
        snapshot: &TrustSnapshot,
        message: &DecodedMessage,
        now: DateTime<Utc>,
    ) -> FederationResult<LogoutOutcome> {
        let root = xml::parse(&message.xml).map_err(malformed)?;
        let request = LogoutRequest::from_element(&root).map_err(malformed)?;
        let provider = snapshot.find_by_entity_id(&request.issuer).ok_or_else(|| {
            AuthenticationError::new(
                AuthenticationErrorKind::IssuerMismatch,
                format!("logout request from untrusted issuer {}", request.issuer),
            )
        })?;

        let verified =
            self.verify_request(provider, message, &request, root.has_signature(), now);
        let (status, terminated) = match verified {
            Err(e) => {
                warn!(
                    kind = %e.kind,
                    detail = %e.detail,
                    request_id = %request.id,
                    provider = %provider.key,
                    timestamp = %request.issue_instant,
                    "Rejected logout request"
                );
                let status = Status::requester_error(e.kind.as_str())
                    .with_sub_code(sub_status_codes::REQUEST_DENIED);
                (status, 0)
            }
            Ok(()) => {
                let termination = TerminationRequest {
                    provider_key: provider.key.clone(),
                    name_id: request.name_id.clone(),
                    session_indexes: request.session_indexes.clone(),
                    realm: self.settings.realm.clone(),
                };
                match self.terminator.terminate(&termination).await {
                    Ok(count) => {
                        info!(
                            request_id = %request.id,
                            provider = %provider.key,
                            sessions = count,
                            "Ended sessions on provider request"
                        );
                        (Status::success(), count)
                    }
                    Err(reason) => {
                        warn!(
                            request_id = %request.id,
                            provider = %provider.key,
                            %reason,
                            "Session termination failed"
                        );
                        let status = Status::responder_error(reason)
                            .with_sub_code(sub_status_codes::PARTIAL_LOGOUT);
                        (status, 0)
                    }
                }
            }
        };

        let success = status.is_success();
        let message = self.answer(provider, message, &request.id, status, now)?;
        Ok(LogoutOutcome::Answered {
            message,
            success,
            terminated,
        })
    }

    fn verify_request(
        &self,
        provider: &TrustedProvider,
        message: &DecodedMessage,
        request: &LogoutRequest,
        root_signed: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AuthenticationError> {
        verify_signature(provider, message, &request.id, root_signed)?;

        let skew = self.settings.clock_skew;
        if request.issue_instant > now + skew {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ExpiredOrNotYetValid,
                "logout request is issued in the future",
            ));
        }
        if request.not_on_or_after.is_some_and(|until| now - skew >= until) {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ExpiredOrNotYetValid,
                "logout request has expired",
            ));
        }

        if !self.replay.check_and_record(&request.id, now).is_accepted() {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ReplayDetected,
                format!("logout request {} was already processed", request.id),
            ));
        }
        Ok(())
    }

    fn answer(
        &self,
        provider: &TrustedProvider,
        received: &DecodedMessage,
        request_id: &str,
        status: Status,
        now: DateTime<Utc>,
    ) -> FederationResult<OutboundMessage> {
        let (binding, destination) = match received.binding {
            Binding::Soap => (Binding::Soap, None),
            binding => {
                let (binding, endpoint) = provider
                    .logout_endpoint(binding)
                    .map(|endpoint| (binding, endpoint))
                    .or_else(|| provider.front_channel_logout())
                    .ok_or_else(|| {
                        FederationError::Configuration(format!(
                            "identity provider '{}' has no logout endpoint",
                            provider.key
                        ))
                    })?;
                (binding, Some(endpoint.response_url()))
            }
        };

        let id = fed_crypto::generate_message_id();
        let mut response = LogoutResponse::new(
            id.clone(),
            self.settings.sp_entity_id.clone(),
            Some(request_id.to_string()),
            status,
        );
        response.issue_instant = now;
        if let Some(destination) = destination {
            response = response.with_destination(destination);
        }

        outbound::encode(
            Outgoing {
                xml: response.to_xml(),
                id: &id,
                binding,
                destination: destination.unwrap_or_default(),
                relay_state: received.relay_state.as_deref(),
                message_type: SamlMessageType::Response,
            },
            self.signer_for(provider)?,
        )
    }

    fn signer_for(&self, provider: &TrustedProvider) -> FederationResult<Option<&XmlSigner>> {
        match (provider.sign_request.unwrap_or(self.settings.sign_by_default), &self.signer) {
            (true, Some(signer)) => Ok(Some(signer)),
            (true, None) => Err(FederationError::Configuration(format!(
                "identity provider '{}' requires signed messages but no signing credential is configured",
                provider.key
            ))),
            (false, _) => Ok(None),
        }
    }

    /// Returns the logout context of a session index.
    #[must_use]
    pub fn context(&self, session_index: &str) -> Option<LogoutContext> {
        self.contexts.get(session_index).map(|c| c.clone())
    }

    /// Drops contexts older than the configured lifetime.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.settings.context_ttl;
        let before = self.contexts.len();
        self.contexts.retain(|_, context| now - context.created_at < ttl);
        self.by_request
            .retain(|_, session_index| self.contexts.contains_key(session_index.as_str()));
        before.saturating_sub(self.contexts.len())
    }
}

fn malformed(error: fed_saml::SamlError) -> AuthenticationError {
    AuthenticationError::malformed(error.to_string())
}

fn check_issuer(issuer: &str, provider: &TrustedProvider) -> Result<(), AuthenticationError> {
    if issuer == provider.entity_id {
        Ok(())
    } else {
        Err(AuthenticationError::new(
            AuthenticationErrorKind::IssuerMismatch,
            format!("issued by {issuer}, expected {}", provider.entity_id),
        ))
    }
}

fn verify_signature(
    provider: &TrustedProvider,
    message: &DecodedMessage,
    root_id: &str,
    root_signed: bool,
) -> Result<(), AuthenticationError> {
    if !provider.signature_required() {
        return Ok(());
    }
    let validator = XmlSignatureValidator::new(provider.certificates.clone());
    if verify_message_signature(&validator, message, root_id, root_signed)? {
        Ok(())
    } else {
        Err(AuthenticationError::invalid_signature("logout message is not signed"))
    }
}
