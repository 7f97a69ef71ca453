//! Login contexts of browser sessions.
//!
//! Each session owns at most one [`AuthenticationSessionContext`]. It moves
//! `Idle -> RequestSent -> ResponseReceived -> Verified | Failed`. The relay
//! state sent to the provider indexes the owning session, so a response can
//! find its context when it comes back.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fed_saml::Binding;
use serde::Serialize;

use crate::config::InFlightLoginPolicy;
use crate::error::{AuthenticationError, FederationError, FederationResult};
use crate::result::AuthenticationResult;

/// State of a login context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// No login in progress.
    Idle,
    /// A request went to the provider.
    RequestSent,
    /// A response arrived and is being verified.
    ResponseReceived,
    /// The response was verified.
    Verified,
    /// The response was refused.
    Failed,
}

impl LoginState {
    /// Returns true while a request awaits or undergoes verification.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::RequestSent | Self::ResponseReceived)
    }

    /// Returns true once the pending request is resolved.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

/// A request awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthnRequest {
    /// Random request ID.
    pub request_id: String,
    /// Provider the request went to.
    pub provider_key: String,
    /// When the request was built.
    pub issued_at: DateTime<Utc>,
    /// Where the browser returns after login.
    pub return_url: String,
    /// Correlation token round-tripped through the provider.
    pub relay_state: String,
    /// Sandbox callback that receives the result.
    pub sandbox_callback: Option<String>,
    /// Bindings the response may arrive over.
    pub accepted_bindings: Vec<Binding>,
}

/// Login context of one browser session.
#[derive(Debug, Clone)]
pub struct AuthenticationSessionContext {
    /// Current state.
    pub state: LoginState,
    /// Request awaiting a response.
    pub pending: Option<PendingAuthnRequest>,
    /// Result of the last completed attempt.
    pub result: Option<AuthenticationResult>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
}

impl AuthenticationSessionContext {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.updated_at >= ttl
    }
}

/// What a caller polling a session sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginStatus {
    /// No login context.
    NoContext,
    /// Waiting for the provider.
    AwaitingResponse {
        /// Provider the request went to.
        provider_key: String,
        /// Pending request ID.
        request_id: String,
    },
    /// The last attempt finished.
    Completed {
        /// Its result.
        result: Box<AuthenticationResult>,
    },
}

/// Keyed store of login contexts with TTL eviction.
#[derive(Debug)]
pub struct SessionContextStore {
    contexts: DashMap<String, AuthenticationSessionContext>,
    relay_index: DashMap<String, String>,
    ttl: Duration,
    policy: InFlightLoginPolicy,
}

impl SessionContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(ttl: Duration, policy: InFlightLoginPolicy) -> Self {
        Self {
            contexts: DashMap::new(),
            relay_index: DashMap::new(),
            ttl,
            policy,
        }
    }

    /// Moves the session to `RequestSent` for `pending`.
    ///
    /// An unexpired in-flight login is overwritten with a warning, or
    /// refused, depending on the configured policy.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::LoginInProgress`] if the policy refuses.
    pub fn begin(
        &self,
        session_id: &str,
        pending: PendingAuthnRequest,
        now: DateTime<Utc>,
    ) -> FederationResult<()> {
        let relay_state = pending.relay_state.clone();
        let fresh = AuthenticationSessionContext {
            state: LoginState::RequestSent,
            pending: Some(pending),
            result: None,
            updated_at: now,
        };

        match self.contexts.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let context = entry.get_mut();
                if context.state.is_in_flight() && !context.is_expired(now, self.ttl) {
                    let previous = context
                        .pending
                        .as_ref()
                        .map(|p| p.request_id.as_str())
                        .unwrap_or_default();
                    match self.policy {
                        InFlightLoginPolicy::Reject => {
                            tracing::warn!(
                                session = %session_id,
                                request_id = %previous,
                                "Refusing new login while another is in flight"
                            );
                            return Err(FederationError::LoginInProgress);
                        }
                        InFlightLoginPolicy::Replace => {
                            tracing::warn!(
                                session = %session_id,
                                request_id = %previous,
                                "Overwriting in-flight login context"
                            );
                        }
                    }
                }
                if let Some(old) = context.pending.take() {
                    self.relay_index.remove(&old.relay_state);
                }
                *context = fresh;
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }
        self.relay_index.insert(relay_state, session_id.to_string());
        Ok(())
    }

    /// Attaches an arriving response: `RequestSent -> ResponseReceived`.
    ///
    /// Only one caller wins the transition; a concurrent second submit sees
    /// the request already taken.
    ///
    /// # Errors
    ///
    /// Returns an `UnsolicitedResponse` error if the session has no request
    /// awaiting a response.
    pub fn attach_response(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingAuthnRequest, AuthenticationError> {
        let mut context = self
            .contexts
            .get_mut(session_id)
            .ok_or_else(|| AuthenticationError::unsolicited("no login context for session"))?;
        if context.state != LoginState::RequestSent {
            return Err(AuthenticationError::unsolicited(
                "no request is awaiting a response",
            ));
        }
        if context.is_expired(now, self.ttl) {
            if let Some(old) = context.pending.take() {
                self.relay_index.remove(&old.relay_state);
            }
            context.state = LoginState::Idle;
            context.updated_at = now;
            return Err(AuthenticationError::unsolicited("login context expired"));
        }
        let pending = context
            .pending
            .clone()
            .ok_or_else(|| AuthenticationError::unsolicited("no pending request"))?;
        context.state = LoginState::ResponseReceived;
        context.updated_at = now;
        Ok(pending)
    }

    /// Records the verification outcome for `request_id`.
    ///
    /// A failure that keeps the pending request returns the context to
    /// `RequestSent`; any other outcome consumes the request. Nothing
    /// happens if a newer login replaced the context meanwhile.
    pub fn finish(
        &self,
        session_id: &str,
        request_id: &str,
        result: AuthenticationResult,
        now: DateTime<Utc>,
    ) {
        let Some(mut context) = self.contexts.get_mut(session_id) else {
            return;
        };
        let current = context.pending.as_ref().map(|p| p.request_id.as_str());
        if context.state != LoginState::ResponseReceived || current != Some(request_id) {
            return;
        }
        context.updated_at = now;

        if result.error.is_some_and(|kind| kind.keeps_pending_request()) {
            context.state = LoginState::RequestSent;
            return;
        }
        if let Some(old) = context.pending.take() {
            self.relay_index.remove(&old.relay_state);
        }
        context.state = if result.error.is_none() {
            LoginState::Verified
        } else {
            LoginState::Failed
        };
        context.result = Some(result);
    }

    /// Discards an in-flight request without contacting the provider.
    /// Returns true if there was one.
    pub fn cancel(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        let Some(mut context) = self.contexts.get_mut(session_id) else {
            return false;
        };
        if !context.state.is_in_flight() {
            return false;
        }
        if let Some(old) = context.pending.take() {
            self.relay_index.remove(&old.relay_state);
        }
        context.state = LoginState::Idle;
        context.result = None;
        context.updated_at = now;
        true
    }

    /// Returns the state of the session's login.
    #[must_use]
    pub fn status(&self, session_id: &str, now: DateTime<Utc>) -> LoginStatus {
        let Some(context) = self.contexts.get(session_id) else {
            return LoginStatus::NoContext;
        };
        if context.is_expired(now, self.ttl) {
            return LoginStatus::NoContext;
        }
        match (context.state, &context.pending, &context.result) {
            (LoginState::RequestSent | LoginState::ResponseReceived, Some(pending), _) => {
                LoginStatus::AwaitingResponse {
                    provider_key: pending.provider_key.clone(),
                    request_id: pending.request_id.clone(),
                }
            }
            (LoginState::Verified | LoginState::Failed, _, Some(result)) => {
                LoginStatus::Completed {
                    result: Box::new(result.clone()),
                }
            }
            _ => LoginStatus::NoContext,
        }
    }

    /// Returns the state machine position of a session.
    #[must_use]
    pub fn state(&self, session_id: &str) -> LoginState {
        self.contexts
            .get(session_id)
            .map_or(LoginState::Idle, |c| c.state)
    }

    /// Finds the session that sent the request carrying `relay_state`.
    #[must_use]
    pub fn session_for_relay_state(&self, relay_state: &str) -> Option<String> {
        self.relay_index.get(relay_state).map(|s| s.value().clone())
    }

    /// Drops contexts idle for longer than the TTL. Returns how many.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut released = Vec::new();
        let before = self.contexts.len();
        self.contexts.retain(|_, context| {
            let keep = !context.is_expired(now, self.ttl);
            if !keep {
                if let Some(pending) = &context.pending {
                    released.push(pending.relay_state.clone());
                }
            }
            keep
        });
        for relay_state in released {
            self.relay_index.remove(&relay_state);
        }
        before.saturating_sub(self.contexts.len())
    }

    /// Number of contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns true if there is no context.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthenticationErrorKind;

    fn pending(id: &str) -> PendingAuthnRequest {
        PendingAuthnRequest {
            request_id: id.to_string(),
            provider_key: "idp1".to_string(),
            issued_at: Utc::now(),
            return_url: "/return".to_string(),
            relay_state: format!("rs-{id}"),
            sandbox_callback: None,
            accepted_bindings: vec![Binding::HttpPost],
        }
    }

    fn store(policy: InFlightLoginPolicy) -> SessionContextStore {
        SessionContextStore::new(Duration::minutes(10), policy)
    }

    #[test]
    fn walks_the_happy_path() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        assert_eq!(store.state("s1"), LoginState::Idle);

        store.begin("s1", pending("r1"), now).unwrap();
        assert_eq!(store.state("s1"), LoginState::RequestSent);
        assert_eq!(store.session_for_relay_state("rs-r1").as_deref(), Some("s1"));

        let attached = store.attach_response("s1", now).unwrap();
        assert_eq!(attached.request_id, "r1");
        assert_eq!(store.state("s1"), LoginState::ResponseReceived);

        let result = AuthenticationResult::failed(AuthenticationErrorKind::ReplayDetected, Some(&attached));
        store.finish("s1", "r1", result, now);
        assert_eq!(store.state("s1"), LoginState::Failed);
        assert!(store.session_for_relay_state("rs-r1").is_none());
        assert!(matches!(store.status("s1", now), LoginStatus::Completed { .. }));
    }

    #[test]
    fn second_submit_is_unsolicited() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        store.attach_response("s1", now).unwrap();

        let err = store.attach_response("s1", now).unwrap_err();
        assert_eq!(err.kind, AuthenticationErrorKind::UnsolicitedResponse);
    }

    #[test]
    fn malformed_failure_keeps_pending_request() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        let attached = store.attach_response("s1", now).unwrap();

        let result = AuthenticationResult::failed(
            AuthenticationErrorKind::MalformedResponse,
            Some(&attached),
        );
        store.finish("s1", "r1", result, now);
        assert_eq!(store.state("s1"), LoginState::RequestSent);
        assert!(store.attach_response("s1", now).is_ok());
    }

    #[test]
    fn replace_policy_overwrites_in_flight_login() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        store.begin("s1", pending("r2"), now).unwrap();

        assert!(store.session_for_relay_state("rs-r1").is_none());
        assert_eq!(
            store.status("s1", now),
            LoginStatus::AwaitingResponse {
                provider_key: "idp1".to_string(),
                request_id: "r2".to_string(),
            }
        );
    }

    #[test]
    fn reject_policy_refuses_in_flight_login() {
        let store = store(InFlightLoginPolicy::Reject);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        assert!(matches!(
            store.begin("s1", pending("r2"), now),
            Err(FederationError::LoginInProgress)
        ));
        // An expired context no longer blocks.
        assert!(store
            .begin("s1", pending("r3"), now + Duration::minutes(11))
            .is_ok());
    }

    #[test]
    fn cancel_returns_to_idle() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        assert!(store.cancel("s1", now));
        assert_eq!(store.state("s1"), LoginState::Idle);
        assert_eq!(store.status("s1", now), LoginStatus::NoContext);
        assert!(!store.cancel("s1", now));
        assert!(store.attach_response("s1", now).is_err());
    }

    #[test]
    fn stale_finish_is_ignored() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("s1", pending("r1"), now).unwrap();
        let attached = store.attach_response("s1", now).unwrap();
        store.begin("s1", pending("r2"), now).unwrap();

        let result = AuthenticationResult::failed(
            AuthenticationErrorKind::InvalidSignature,
            Some(&attached),
        );
        store.finish("s1", "r1", result, now);
        assert_eq!(store.state("s1"), LoginState::RequestSent);
    }

    #[test]
    fn evicts_expired_contexts() {
        let store = store(InFlightLoginPolicy::Replace);
        let now = Utc::now();
        store.begin("old", pending("r1"), now - Duration::minutes(15)).unwrap();
        store.begin("new", pending("r2"), now).unwrap();

        assert_eq!(store.evict_expired(now), 1);
        assert_eq!(store.len(), 1);
        assert!(store.session_for_relay_state("rs-r1").is_none());
    }
}
