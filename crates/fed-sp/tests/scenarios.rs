//! Verification scenarios run against the public API.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use fed_sp::config::FederationConfig;
use fed_sp::metadata_manager::FederationMetadataSource;
use fed_sp::slo::TerminationRequest;
use fed_sp::{
    AuthenticationErrorKind, Collaborators, DirectTranslation, FederationError, FederationResult,
    InFlightLoginPolicy, MetadataFetcher, MetadataManager, ReplayAttackGuard, ReplayCheck,
    RequestBuilder, ResponseValidator, SessionTerminator, TrustConfigStore, TrustedProvider,
    Verificator,
};

use common::{idp_config, sp_config, MockIdp};

struct Setup {
    store: TrustConfigStore,
    builder: RequestBuilder,
    validator: ResponseValidator,
}

fn setup(keys: &[&str]) -> Setup {
    let config = sp_config();
    let store = TrustConfigStore::new();
    for key in keys {
        let provider = TrustedProvider::from_config(&idp_config(key, "idp1.crt")).unwrap();
        store.replace_provider(provider).unwrap();
    }
    let builder = RequestBuilder::new(&config.requester_id, config.acs_url(), None, false, None)
        .unwrap();
    let replay = Arc::new(ReplayAttackGuard::new(config.replay_window()));
    let validator = ResponseValidator::new(&config, replay);
    Setup {
        store,
        builder,
        validator,
    }
}

#[test]
fn verified_once_then_replay_detected() {
    let Setup {
        store,
        builder,
        validator,
    } = setup(&["idp1"]);
    let now = Utc::now();

    let built = builder
        .create_request(&store.snapshot(), Some("idp1"), "/return", None, now)
        .unwrap();
    assert!(!built.pending.request_id.is_empty());
    assert_eq!(built.pending.return_url, "/return");

    let provider = store.get_provider("idp1").unwrap();
    let message = MockIdp::new("idp1", "idp1").signed_post(&built.pending.request_id, "alice", now);

    let verified = validator
        .verify_response(&message, &built.pending, &provider, now)
        .unwrap();
    assert_eq!(verified.subject.value, "alice");
    assert_eq!(verified.provider_key, "idp1");

    let err = validator
        .verify_response(&message, &built.pending, &provider, now)
        .unwrap_err();
    assert_eq!(err.kind, AuthenticationErrorKind::ReplayDetected);
}

#[test]
fn untrusted_signer_is_an_invalid_signature() {
    let Setup {
        store,
        builder,
        validator,
    } = setup(&["idp1"]);
    let now = Utc::now();
    let built = builder
        .create_request(&store.snapshot(), None, "/", None, now)
        .unwrap();
    let provider = store.get_provider("idp1").unwrap();

    // Well-formed and correlated, but signed with a key idp1 never published.
    let message = MockIdp::new("idp1", "rogue").signed_post(&built.pending.request_id, "alice", now);
    let err = validator
        .verify_response(&message, &built.pending, &provider, now)
        .unwrap_err();
    assert_eq!(err.kind, AuthenticationErrorKind::InvalidSignature);
}

#[test]
fn response_to_another_request_is_unsolicited() {
    let Setup {
        store,
        builder,
        validator,
    } = setup(&["idp1"]);
    let now = Utc::now();
    let built = builder
        .create_request(&store.snapshot(), None, "/", None, now)
        .unwrap();
    let provider = store.get_provider("idp1").unwrap();

    let message = MockIdp::new("idp1", "idp1").signed_post("_someone_else", "alice", now);
    let err = validator
        .verify_response(&message, &built.pending, &provider, now)
        .unwrap_err();
    assert_eq!(err.kind, AuthenticationErrorKind::UnsolicitedResponse);
}

#[test]
fn two_providers_need_a_choice() {
    let Setup { store, builder, .. } = setup(&["idp1", "idp2"]);
    let err = builder
        .create_request(&store.snapshot(), None, "/", None, Utc::now())
        .unwrap_err();
    assert!(matches!(
        err,
        FederationError::AmbiguousProvider { parameter: "idp" }
    ));

    let built = builder
        .create_request(&store.snapshot(), Some("idp2"), "/", None, Utc::now())
        .unwrap();
    assert_eq!(built.pending.provider_key, "idp2");
}

#[test]
fn concurrent_checks_accept_exactly_once() {
    const CALLERS: usize = 32;
    let guard = ReplayAttackGuard::new(chrono::Duration::minutes(10));
    let now = Utc::now();

    let accepted = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| scope.spawn(|| guard.check_and_record("_m1", now)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|check| *check == ReplayCheck::Accepted)
            .count()
    });

    assert_eq!(accepted, 1);
    assert_eq!(guard.check_and_record("_m1", now), ReplayCheck::Rejected);
}

struct NoSessions;

#[async_trait]
impl SessionTerminator for NoSessions {
    async fn terminate(&self, _request: &TerminationRequest) -> Result<usize, String> {
        Ok(0)
    }
}

#[tokio::test]
async fn reject_policy_refuses_a_second_login() {
    let mut config = sp_config();
    config.in_flight_login_policy = InFlightLoginPolicy::Reject;
    config.trusted_idps.push(idp_config("idp1", "idp1.crt"));
    let verificator = Verificator::build(
        config,
        Collaborators {
            translation: Arc::new(DirectTranslation::new()),
            terminator: Arc::new(NoSessions),
            fetcher: None,
        },
    )
    .await
    .unwrap();

    let first = verificator.start_login(None, None, "/", None).unwrap();
    let err = verificator
        .start_login(Some(&first.session_id), None, "/", None)
        .unwrap_err();
    assert!(matches!(err, FederationError::LoginInProgress));

    assert!(verificator.cancel_login(&first.session_id));
    verificator
        .start_login(Some(&first.session_id), None, "/", None)
        .unwrap();
}

/// Serves one document until told to fail.
struct FlakyFetcher {
    document: String,
    failing: AtomicBool,
}

#[async_trait]
impl MetadataFetcher for FlakyFetcher {
    async fn fetch(&self, location: &str) -> FederationResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FederationError::MetadataFetch(format!("{location}: connection refused")));
        }
        Ok(self.document.clone())
    }
}

fn federation_document(entity_id: &str) -> String {
    let pem = std::fs::read_to_string(common::fixture("idp1.crt")).unwrap();
    let der = fed_crypto::pem::pem_to_der(&pem, "CERTIFICATE").unwrap();
    let cert = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" ID="_fed" validUntil="2999-01-01T00:00:00Z">
  <md:EntityDescriptor entityID="{entity_id}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
      <md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>
      <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{entity_id}/sso"/>
    </md:IDPSSODescriptor>
  </md:EntityDescriptor>
</md:EntitiesDescriptor>"#
    )
}

#[tokio::test]
async fn failed_refresh_keeps_the_last_good_provider() {
    let entity_id = common::entity_id("fedidp");
    let federation: FederationConfig = serde_json::from_value(serde_json::json!({
        "name": "edugain",
        "url": "https://mds.example.org/metadata.xml",
        "ignore_signature_verification": true,
        "refresh_interval_secs": 60
    }))
    .unwrap();
    let source = FederationMetadataSource::from_config(&federation).unwrap();

    let store = Arc::new(TrustConfigStore::new());
    let fetcher = Arc::new(FlakyFetcher {
        document: federation_document(&entity_id),
        failing: AtomicBool::new(false),
    });
    let manager = MetadataManager::new(
        source,
        Arc::clone(&store),
        Arc::clone(&fetcher) as Arc<dyn MetadataFetcher>,
        Duration::from_secs(5),
    );

    manager.start().await.unwrap();
    let before = store.get_provider(&entity_id).unwrap();
    let fetched_at = manager.last_fetched_at();
    assert!(fetched_at.is_some());

    fetcher.failing.store(true, Ordering::SeqCst);
    let err = manager.refresh_now().await.unwrap_err();
    assert!(matches!(err, FederationError::MetadataFetch(_)));

    let after = store.get_provider(&entity_id).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(manager.last_fetched_at(), fetched_at);

    manager.stop();
    assert!(!manager.is_running());
}
