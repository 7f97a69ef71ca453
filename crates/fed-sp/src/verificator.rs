//! The facade a web layer drives: login, response handling, logout and
//! metadata publication over one shared trust store.

use std::sync::Arc;

use chrono::Utc;
use fed_crypto::SigningCredential;
use fed_saml::bindings::{DecodedMessage, OutboundMessage};
use fed_saml::signature::XmlSigner;
use fed_saml::NameId;
use tracing::{info, warn};

use crate::config::{CredentialConfig, SpConfig};
use crate::error::{
    AuthenticationError, AuthenticationErrorKind, FederationError, FederationResult,
};
use crate::metadata_manager::{
    FederationMetadataSource, MetadataFetcher, MetadataManager, UrlMetadataFetcher,
};
use crate::replay::ReplayAttackGuard;
use crate::request::RequestBuilder;
use crate::result::AuthenticationResult;
use crate::session::{LoginStatus, PendingAuthnRequest, SessionContextStore};
use crate::slo::{LogoutInitiation, LogoutManager, LogoutOutcome, LogoutSettings, SessionTerminator};
use crate::sp_metadata::SpMetadataPublisher;
use crate::translation::TranslationEngine;
use crate::trust::{TrustConfigStore, TrustSnapshot, TrustedProvider};
use crate::validator::ResponseValidator;

/// Services the verificator delegates to.
#[derive(Clone)]
pub struct Collaborators {
    /// Maps verified assertions to local principals.
    pub translation: Arc<dyn TranslationEngine>,
    /// Ends local sessions on provider-initiated logout.
    pub terminator: Arc<dyn SessionTerminator>,
    /// Fetches federation metadata. Defaults to HTTP(S) and `file:`.
    pub fetcher: Option<Arc<dyn MetadataFetcher>>,
}

/// A login that was started.
#[derive(Debug, Clone)]
pub struct LoginStart {
    /// Session owning the login; new if the caller had none.
    pub session_id: String,
    /// ID of the authentication request.
    pub request_id: String,
    /// Redirect URL or POST form for the browser.
    pub message: OutboundMessage,
}

/// Remote authentication for one service provider.
pub struct Verificator {
    config: SpConfig,
    store: Arc<TrustConfigStore>,
    replay: Arc<ReplayAttackGuard>,
    sessions: SessionContextStore,
    builder: RequestBuilder,
    validator: ResponseValidator,
    translation: Arc<dyn TranslationEngine>,
    logout: Option<LogoutManager>,
    metadata: Option<SpMetadataPublisher>,
    federations: Vec<MetadataManager>,
}

impl std::fmt::Debug for Verificator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verificator")
            .field("requester_id", &self.config.requester_id)
            .field("providers", &self.store.snapshot().len())
            .field("federations", &self.federations)
            .field("slo", &self.logout.is_some())
            .finish_non_exhaustive()
    }
}

impl Verificator {
    /// Builds the verificator and loads its trust configuration.
    ///
    /// Individually configured providers and federations that fail to
    /// load are logged and left out; the rest stay usable.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if the signing credential
    /// cannot be loaded, or signing is required anywhere without one.
    pub async fn build(config: SpConfig, collaborators: Collaborators) -> FederationResult<Self> {
        let credential = config.credential.as_ref().map(load_credential).transpose()?;
        let signer = credential.as_ref().map(|c| XmlSigner::new(Arc::clone(c)));

        let store = Arc::new(TrustConfigStore::new());
        for idp in &config.trusted_idps {
            match TrustedProvider::from_config(idp).and_then(|p| store.replace_provider(p)) {
                Ok(()) => info!(
                    provider = %idp.key,
                    entity_id = %idp.entity_id,
                    "Trusting identity provider"
                ),
                Err(e) => warn!(provider = %idp.key, error = %e, "Skipping identity provider"),
            }
        }

        let builder = RequestBuilder::new(
            config.requester_id.clone(),
            config.acs_url(),
            signer.clone(),
            config.sign_requests_by_default,
            config.default_requested_name_format.clone(),
        )?;
        let replay = Arc::new(ReplayAttackGuard::new(config.replay_window()));
        let validator = ResponseValidator::new(&config, Arc::clone(&replay));
        let sessions = SessionContextStore::new(config.session_ttl(), config.in_flight_login_policy);
        let metadata = SpMetadataPublisher::from_config(&config, credential.as_ref())?;

        let logout = match (&config.slo.path, &config.slo.realm) {
            (Some(_), Some(realm)) => Some(LogoutManager::new(
                LogoutSettings {
                    sp_entity_id: config.requester_id.clone(),
                    realm: realm.clone(),
                    clock_skew: config.clock_skew(),
                    context_ttl: config.session_ttl(),
                    sign_by_default: config.sign_requests_by_default,
                },
                signer,
                Arc::clone(&replay),
                collaborators.terminator,
            )),
            _ => {
                warn!("Single logout is disabled: both a path and a realm are required");
                None
            }
        };

        let mut federations = Vec::new();
        for federation in &config.trusted_federations {
            let started =
                start_federation(&config, federation, &store, collaborators.fetcher.as_ref()).await;
            match started {
                Ok(manager) => federations.push(manager),
                Err(e) => warn!(
                    federation = %federation.name,
                    error = %e,
                    "Federation is not trusted: its metadata could not be loaded"
                ),
            }
        }

        Ok(Self {
            config,
            store,
            replay,
            sessions,
            builder,
            validator,
            translation: collaborators.translation,
            logout,
            metadata,
            federations,
        })
    }

    /// Starts a login for `session_id`, or for a new session.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::create_request`]; also
    /// [`FederationError::LoginInProgress`] if the session already waits for
    /// a response and the configuration refuses to replace it.
    pub fn start_login(
        &self,
        session_id: Option<&str>,
        provider_key: Option<&str>,
        return_url: &str,
        sandbox_callback: Option<String>,
    ) -> FederationResult<LoginStart> {
        let now = Utc::now();
        let session_id = session_id.map_or_else(fed_crypto::generate_session_id, String::from);
        let built = self.builder.create_request(
            &self.store.snapshot(),
            provider_key,
            return_url,
            sandbox_callback,
            now,
        )?;
        let request_id = built.pending.request_id.clone();
        self.sessions.begin(&session_id, built.pending, now)?;
        Ok(LoginStart {
            session_id,
            request_id,
            message: built.message,
        })
    }

    /// Verifies a response that came back from a provider.
    ///
    /// The relay state locates the login; a session cookie, when the
    /// browser sent one, must belong to the same login. The outcome is
    /// recorded in the session and returned. Failures carry only their
    /// kind; details are logged.
    pub fn handle_response(
        &self,
        session_id: Option<&str>,
        message: &DecodedMessage,
    ) -> AuthenticationResult {
        let now = Utc::now();

        let owner = match self.owning_session(session_id, message.relay_state.as_deref()) {
            Ok(owner) => owner,
            Err(e) => return self.reject(&e, None),
        };
        let pending = match self.sessions.attach_response(&owner, now) {
            Ok(pending) => pending,
            Err(e) => return self.reject(&e, None),
        };

        let result = match self.verify(message, &pending) {
            Ok(result) => result,
            Err(e) => self.reject(&e, Some(&pending)),
        };
        self.sessions.finish(&owner, &pending.request_id, result.clone(), now);
        result
    }

    fn owning_session(
        &self,
        cookie: Option<&str>,
        relay_state: Option<&str>,
    ) -> Result<String, AuthenticationError> {
        let by_relay = relay_state.and_then(|rs| self.sessions.session_for_relay_state(rs));
        match (by_relay, cookie) {
            (Some(owner), Some(cookie)) if owner != cookie => Err(AuthenticationError::new(
                AuthenticationErrorKind::UnsolicitedResponse,
                "relay state belongs to another session",
            )),
            (Some(owner), _) => Ok(owner),
            (None, Some(cookie)) if relay_state.is_none() => Ok(cookie.to_string()),
            _ => Err(AuthenticationError::new(
                AuthenticationErrorKind::UnsolicitedResponse,
                "no login is waiting for this relay state",
            )),
        }
    }

    fn verify(
        &self,
        message: &DecodedMessage,
        pending: &PendingAuthnRequest,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let snapshot = self.store.snapshot();
        let provider = snapshot.get(&pending.provider_key).ok_or_else(|| {
            AuthenticationError::new(
                AuthenticationErrorKind::IssuerMismatch,
                format!("provider '{}' is no longer trusted", pending.provider_key),
            )
        })?;

        let assertion = self
            .validator
            .verify_response(message, pending, provider, Utc::now())?;
        let translation = self
            .translation
            .translate(provider.translation_profile.as_deref(), &assertion)
            .map_err(|e| e.0);
        if let Err(reason) = &translation {
            warn!(
                request_id = %pending.request_id,
                provider = %provider.key,
                %reason,
                "Verified assertion could not be translated"
            );
        } else {
            info!(
                request_id = %pending.request_id,
                provider = %provider.key,
                subject = %assertion.subject.value,
                "Remote authentication verified"
            );
        }
        Ok(AuthenticationResult::verified(
            assertion,
            translation,
            pending,
            provider.registration_form.clone(),
        ))
    }

    fn reject(
        &self,
        error: &AuthenticationError,
        pending: Option<&PendingAuthnRequest>,
    ) -> AuthenticationResult {
        let request_id = pending.map(|p| p.request_id.as_str());
        let provider = pending.map(|p| p.provider_key.as_str());
        if error.kind.is_security_event() {
            warn!(
                kind = %error.kind,
                detail = %error.detail,
                request_id = ?request_id,
                provider = ?provider,
                timestamp = %Utc::now(),
                "Remote authentication failed"
            );
        } else {
            info!(
                kind = %error.kind,
                detail = %error.detail,
                request_id = ?request_id,
                provider = ?provider,
                "Remote authentication failed"
            );
        }
        AuthenticationResult::failed(error.kind, pending)
    }

    /// Finds the session whose login sent `relay_state`.
    #[must_use]
    pub fn session_for_relay_state(&self, relay_state: &str) -> Option<String> {
        self.sessions.session_for_relay_state(relay_state)
    }

    /// Discards the session's unanswered login. Returns true if there was one.
    pub fn cancel_login(&self, session_id: &str) -> bool {
        self.sessions.cancel(session_id, Utc::now())
    }

    /// Reports the state of the session's login.
    #[must_use]
    pub fn login_status(&self, session_id: &str) -> LoginStatus {
        self.sessions.status(session_id, Utc::now())
    }

    /// Starts single logout of one assertion session.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if logout is disabled, or
    /// the errors of [`LogoutManager::initiate_logout`].
    pub fn initiate_logout(
        &self,
        provider_key: &str,
        name_id: NameId,
        session_index: &str,
        return_url: Option<String>,
    ) -> FederationResult<LogoutInitiation> {
        self.logout_manager()?.initiate_logout(
            &self.store.snapshot(),
            provider_key,
            name_id,
            session_index,
            return_url,
            Utc::now(),
        )
    }

    /// Handles a logout request or response from a provider.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if logout is disabled, or
    /// the errors of [`LogoutManager::handle_logout_message`].
    pub async fn handle_logout_message(
        &self,
        message: &DecodedMessage,
    ) -> FederationResult<LogoutOutcome> {
        let snapshot = self.store.snapshot();
        self.logout_manager()?
            .handle_logout_message(&snapshot, message, Utc::now())
            .await
    }

    fn logout_manager(&self) -> FederationResult<&LogoutManager> {
        self.logout
            .as_ref()
            .ok_or_else(|| FederationError::Configuration("single logout is disabled".to_string()))
    }

    /// The metadata publisher, if publishing is on.
    #[must_use]
    pub fn metadata(&self) -> Option<&SpMetadataPublisher> {
        self.metadata.as_ref()
    }

    /// Returns the current trust snapshot.
    #[must_use]
    pub fn providers(&self) -> Arc<TrustSnapshot> {
        self.store.snapshot()
    }

    /// The shared trust store.
    #[must_use]
    pub fn store(&self) -> &Arc<TrustConfigStore> {
        &self.store
    }

    /// Federations whose metadata loaded.
    #[must_use]
    pub fn federations(&self) -> &[MetadataManager] {
        &self.federations
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SpConfig {
        &self.config
    }

    /// Whether single logout is enabled.
    #[must_use]
    pub fn slo_enabled(&self) -> bool {
        self.logout.is_some()
    }

    /// Drops expired login contexts, replay entries and logout contexts.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let logout = self.logout.as_ref().map_or(0, |l| l.evict_expired(now));
        self.sessions.evict_expired(now) + self.replay.evict_expired(now) + logout
    }

    /// Stops every metadata refresh schedule.
    pub fn shutdown(&self) {
        for federation in &self.federations {
            federation.stop();
        }
        info!("Verificator shut down");
    }
}

fn load_credential(config: &CredentialConfig) -> FederationResult<Arc<SigningCredential>> {
    let read = |path: &std::path::Path| {
        std::fs::read_to_string(path).map_err(|e| {
            FederationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })
    };
    let key = read(&config.private_key)?;
    let certificate = config.certificate.as_deref().map(read).transpose()?;
    SigningCredential::from_pem(&key, certificate.as_deref())
        .map(Arc::new)
        .map_err(|e| FederationError::Configuration(format!("signing credential: {e}")))
}

async fn start_federation(
    config: &SpConfig,
    federation: &crate::config::FederationConfig,
    store: &Arc<TrustConfigStore>,
    fetcher: Option<&Arc<dyn MetadataFetcher>>,
) -> FederationResult<MetadataManager> {
    let source = FederationMetadataSource::from_config(federation)?;
    let fetcher = match fetcher {
        Some(fetcher) => Arc::clone(fetcher),
        None => Arc::new(UrlMetadataFetcher::new(
            config.metadata_fetch_timeout(),
            source.truststore_pem.as_deref(),
        )?) as Arc<dyn MetadataFetcher>,
    };
    let manager = MetadataManager::new(
        source,
        Arc::clone(store),
        fetcher,
        config.metadata_fetch_timeout(),
    );
    manager.start().await?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use fed_saml::Binding;

    use super::*;
    use crate::config::{FederationConfig, IdpConfig};
    use crate::slo::TerminationRequest;
    use crate::test_support::{self, federation_document, idp_entity, MockIdp};
    use crate::translation::DirectTranslation;

    struct NoSessions;

    #[async_trait]
    impl SessionTerminator for NoSessions {
        async fn terminate(&self, _request: &TerminationRequest) -> Result<usize, String> {
            Ok(0)
        }
    }

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl MetadataFetcher for MapFetcher {
        async fn fetch(&self, location: &str) -> FederationResult<String> {
            self.0
                .get(location)
                .cloned()
                .ok_or_else(|| FederationError::MetadataFetch(format!("{location}: 404")))
        }
    }

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
    }

    fn idp_config(key: &str, certificate: &str) -> IdpConfig {
        IdpConfig {
            key: key.to_string(),
            entity_id: test_support::entity_id(key),
            display_name: None,
            sso_url: format!("{}/sso", test_support::entity_id(key)),
            binding: Binding::HttpRedirect,
            sign_request: None,
            certificates: vec![fixture(certificate)],
            requested_name_format: None,
            trusted_name_formats: Vec::new(),
            skip_signature_verification: false,
            translation_profile: None,
            registration_form: None,
            logout_endpoints: Default::default(),
        }
    }

    fn federation(name: &str, url: &str) -> FederationConfig {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "url": url,
            "ignore_signature_verification": true
        }))
        .unwrap()
    }

    fn collaborators(documents: &[(&str, String)]) -> Collaborators {
        Collaborators {
            translation: Arc::new(DirectTranslation::new()),
            terminator: Arc::new(NoSessions),
            fetcher: Some(Arc::new(MapFetcher(
                documents
                    .iter()
                    .map(|(url, doc)| ((*url).to_string(), doc.clone()))
                    .collect(),
            ))),
        }
    }

    fn config() -> SpConfig {
        SpConfig::new(test_support::SP_ENTITY_ID, "https://sp.example.com")
    }

    #[tokio::test]
    async fn login_round_trip() {
        let mut config = config();
        config.trusted_idps.push(idp_config("idp1", "idp1.crt"));
        let verificator = Verificator::build(config, collaborators(&[])).await.unwrap();
        let idp = MockIdp::fixture("idp1");

        let start = verificator.start_login(None, None, "/home", None).unwrap();
        let OutboundMessage::Redirect(url) = &start.message else {
            panic!("expected a redirect");
        };
        let relay_state = fed_saml::bindings::HttpRedirectBinding::decode_url(url)
            .unwrap()
            .relay_state
            .unwrap();
        assert!(matches!(
            verificator.login_status(&start.session_id),
            LoginStatus::AwaitingResponse { .. }
        ));

        let mut message = idp.signed_post(&start.request_id, Utc::now());
        message.relay_state = Some(relay_state);
        let result = verificator.handle_response(Some(&start.session_id), &message);
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.mapping.as_ref().unwrap().principal, "alice");
        assert_eq!(result.return_url.as_deref(), Some("/home"));

        let LoginStatus::Completed { result } = verificator.login_status(&start.session_id) else {
            panic!("expected a completed login");
        };
        assert!(result.is_success());

        let again = verificator.handle_response(Some(&start.session_id), &message);
        assert_eq!(again.error, Some(AuthenticationErrorKind::UnsolicitedResponse));
        assert_eq!(again.user_message(), Some(crate::result::USER_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn relay_state_of_another_session_is_unsolicited() {
        let mut config = config();
        config.trusted_idps.push(idp_config("idp1", "idp1.crt"));
        let verificator = Verificator::build(config, collaborators(&[])).await.unwrap();
        let idp = MockIdp::fixture("idp1");

        let start = verificator.start_login(Some("victim"), None, "/", None).unwrap();
        let OutboundMessage::Redirect(url) = &start.message else {
            panic!("expected a redirect");
        };
        let mut message = idp.signed_post(&start.request_id, Utc::now());
        message.relay_state = fed_saml::bindings::HttpRedirectBinding::decode_url(url)
            .unwrap()
            .relay_state;

        let result = verificator.handle_response(Some("attacker"), &message);
        assert_eq!(result.error, Some(AuthenticationErrorKind::UnsolicitedResponse));
        assert!(matches!(
            verificator.login_status("victim"),
            LoginStatus::AwaitingResponse { .. }
        ));

        assert!(verificator.cancel_login("victim"));
        assert_eq!(verificator.login_status("victim"), LoginStatus::NoContext);
    }

    #[tokio::test]
    async fn broken_sources_are_left_out() {
        let mut config = config();
        config.trusted_idps.push(idp_config("idp1", "idp1.crt"));
        config.trusted_idps.push(idp_config("broken", "missing.crt"));
        config
            .trusted_federations
            .push(federation("good", "https://mds.example.org/good.xml"));
        config
            .trusted_federations
            .push(federation("down", "https://mds.example.org/down.xml"));

        let document = federation_document(
            "2099-01-01T00:00:00Z",
            &[idp_entity("https://fed-idp.example.org")],
        );
        let verificator = Verificator::build(
            config,
            collaborators(&[("https://mds.example.org/good.xml", document)]),
        )
        .await
        .unwrap();

        let snapshot = verificator.providers();
        assert!(snapshot.get("idp1").is_some());
        assert!(snapshot.get("broken").is_none());
        assert!(snapshot.get("https://fed-idp.example.org").is_some());
        assert_eq!(verificator.federations().len(), 1);
        assert_eq!(verificator.federations()[0].name(), "good");
        assert!(verificator.federations()[0].is_running());

        verificator.shutdown();
        assert!(!verificator.federations()[0].is_running());
    }

    #[tokio::test]
    async fn federation_provider_can_authenticate() {
        let mut config = config();
        config
            .trusted_federations
            .push(federation("fed", "https://mds.example.org/md.xml"));
        let document = federation_document(
            "2099-01-01T00:00:00Z",
            &[idp_entity("https://fed-idp.example.org")],
        );
        let verificator = Verificator::build(
            config,
            collaborators(&[("https://mds.example.org/md.xml", document)]),
        )
        .await
        .unwrap();
        let idp = MockIdp::fixture("fed-idp");

        let start = verificator
            .start_login(Some("s1"), Some("https://fed-idp.example.org"), "/", None)
            .unwrap();
        let message = idp.signed_post(&start.request_id, Utc::now());
        let result = verificator.handle_response(Some("s1"), &message);
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.provider_key.as_deref(), Some("https://fed-idp.example.org"));
    }

    #[tokio::test]
    async fn unreadable_credential_is_fatal() {
        let mut config = config();
        config.credential = Some(CredentialConfig {
            private_key: fixture("missing.key"),
            certificate: None,
        });
        let err = Verificator::build(config, collaborators(&[])).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn logout_needs_path_and_realm() {
        let mut config = config();
        config.slo.path = Some("/saml/slo".to_string());
        let verificator = Verificator::build(config, collaborators(&[])).await.unwrap();
        assert!(!verificator.slo_enabled());
        let err = verificator
            .initiate_logout("idp1", NameId::new("alice"), "_s", None)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn signed_requests_use_the_configured_credential() {
        let mut config = config();
        config.credential = Some(CredentialConfig {
            private_key: fixture("sp.key"),
            certificate: Some(fixture("sp.crt")),
        });
        config.sign_requests_by_default = true;
        config.trusted_idps.push(idp_config("idp1", "idp1.crt"));
        let verificator = Verificator::build(config, collaborators(&[])).await.unwrap();

        let start = verificator.start_login(None, None, "/", None).unwrap();
        let OutboundMessage::Redirect(url) = &start.message else {
            panic!("expected a redirect");
        };
        assert!(url.contains("Signature="));
    }
}
