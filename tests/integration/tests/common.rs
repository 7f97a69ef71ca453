//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use fed_crypto::SigningCredential;
use fed_saml::bindings::{HttpRedirectBinding, SamlMessageType, SoapBinding};
use fed_saml::signature::XmlSigner;
use fed_saml::{
    Assertion, AuthnStatement, Conditions, LogoutRequest, NameId, NameIdFormat, Response, Status,
    Subject, SubjectConfirmation, SubjectConfirmationData, BEARER_METHOD,
};
use fed_server::{LocalSessions, Server, ServerConfig};
use fed_sp::config::IdpConfig;
use fed_sp::SpConfig;
use reqwest::{redirect::Policy, Client};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const SP_ENTITY_ID: &str = "https://sp.example.com";
pub const ACS_URL: &str = "https://sp.example.com/saml/acs";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../fixtures")
        .join(name)
}

pub fn entity_id(key: &str) -> String {
    format!("https://{key}.example.org")
}

/// SP configuration trusting each key in `idps` with the `idp1` certificate.
pub fn sp_config(idps: &[&str]) -> anyhow::Result<SpConfig> {
    let mut config = SpConfig::new(SP_ENTITY_ID, "https://sp.example.com");
    for key in idps {
        let idp: IdpConfig = serde_json::from_value(serde_json::json!({
            "key": key,
            "entity_id": entity_id(key),
            "sso_url": format!("{}/sso", entity_id(key)),
            "certificates": [fixture("idp1.crt")],
        }))?;
        config.trusted_idps.push(idp);
    }
    Ok(config)
}

/// Test environment running the server on an ephemeral port.
pub struct TestEnv {
    /// Base URL of the running server.
    pub base_url: String,
    /// Browser-like client that keeps cookies and does not follow redirects.
    pub client: Client,
    /// Logged-in sessions of the server.
    pub sessions: Arc<LocalSessions>,
    /// Server shutdown signal.
    _shutdown_tx: oneshot::Sender<()>,
}

impl TestEnv {
    /// Starts a server for `sp_config`.
    pub async fn new(sp_config: SpConfig) -> anyhow::Result<Self> {
        // Initialize tracing for tests
        let _ = tracing_subscriber::fmt()
            .with_env_filter("fed_server=debug,fed_sp=debug")
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let server =
            Server::with_sp_config(ServerConfig::for_testing("unused.json"), sp_config).await?;
        let sessions = Arc::clone(&server.state().sessions);

        let (_shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.serve(listener, shutdown).await {
                tracing::error!("Server error: {}", e);
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            base_url,
            client,
            sessions,
            _shutdown_tx,
        })
    }

    /// Returns the absolute URL of `path` on the server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Starts a login and returns the request ID and relay state the
    /// provider received.
    pub async fn start_login(&self, query: &str) -> anyhow::Result<(String, String)> {
        let response = self
            .client
            .get(self.url(&format!("/saml/login{query}")))
            .send()
            .await?;
        anyhow::ensure!(
            response.status().is_redirection(),
            "expected a redirect, got {}",
            response.status()
        );
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow::anyhow!("redirect without location"))?;

        let decoded = HttpRedirectBinding::decode_url(location)?;
        let request_id = fed_saml::xml::parse(&decoded.xml)?
            .id()
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("request without ID"))?;
        let relay_state = decoded
            .relay_state
            .ok_or_else(|| anyhow::anyhow!("request without relay state"))?;
        Ok((request_id, relay_state))
    }

    /// Posts `document` to the assertion consumer.
    pub async fn post_response(
        &self,
        document: &str,
        relay_state: &str,
    ) -> anyhow::Result<reqwest::Response> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(document);
        Ok(self
            .client
            .post(self.url("/saml/acs"))
            .form(&[("SAMLResponse", encoded.as_str()), ("RelayState", relay_state)])
            .send()
            .await?)
    }

    /// Returns the login status of the client's session as JSON.
    pub async fn login_status(&self) -> anyhow::Result<serde_json::Value> {
        let body = self
            .client
            .get(self.url("/saml/login/status"))
            .send()
            .await?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Identity provider signing with a checked-in key pair.
pub struct MockIdp {
    pub key: String,
    signer: XmlSigner,
}

impl MockIdp {
    /// An IdP called `key` signing with `<key_pair>.key`.
    pub fn new(key: &str, key_pair: &str) -> anyhow::Result<Self> {
        let pem = std::fs::read_to_string(fixture(&format!("{key_pair}.key")))?;
        let cert = std::fs::read_to_string(fixture(&format!("{key_pair}.crt")))?;
        let credential = SigningCredential::from_pem(&pem, Some(&cert))?;
        Ok(Self {
            key: key.to_string(),
            signer: XmlSigner::new(Arc::new(credential)),
        })
    }

    pub fn entity_id(&self) -> String {
        entity_id(&self.key)
    }

    /// A response for `alice` answering `request_id`, with a signed assertion.
    pub fn signed_response(&self, request_id: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
        let response = self.response(request_id, now);
        let assertion = &response.assertions[0];
        let signed_assertion = self.signer.sign(&assertion.to_xml(), &assertion.id)?;
        Ok(response.to_xml_with(&[signed_assertion]))
    }

    /// The URL that sends the unsigned response for `request_id` to `acs`
    /// over HTTP-Redirect, signed in the query string.
    pub fn redirect_response(
        &self,
        acs: &str,
        request_id: &str,
        relay_state: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let xml = self.response(request_id, now).to_xml();
        Ok(self
            .signer
            .sign_redirect(&xml, acs, Some(relay_state), SamlMessageType::Response)?)
    }

    fn response(&self, request_id: &str, now: DateTime<Utc>) -> Response {
        let issuer = self.entity_id();
        let assertion = Assertion {
            id: fed_crypto::generate_message_id(),
            issue_instant: now,
            issuer: issuer.clone(),
            subject: Some(Subject {
                name_id: Some(NameId::new("alice").with_format(NameIdFormat::Persistent.uri())),
                confirmations: vec![SubjectConfirmation {
                    method: BEARER_METHOD.to_string(),
                    data: Some(SubjectConfirmationData {
                        not_before: None,
                        not_on_or_after: Some(now + chrono::Duration::minutes(5)),
                        recipient: Some(ACS_URL.to_string()),
                        in_response_to: Some(request_id.to_string()),
                    }),
                }],
            }),
            conditions: Some(Conditions {
                not_before: Some(now - chrono::Duration::minutes(1)),
                not_on_or_after: Some(now + chrono::Duration::minutes(5)),
                audience_restrictions: vec![vec![SP_ENTITY_ID.to_string()]],
            }),
            authn_statements: vec![AuthnStatement {
                authn_instant: now,
                session_index: Some("_session1".to_string()),
                session_not_on_or_after: None,
            }],
            attributes: Vec::new(),
            signed: false,
        };
        Response {
            id: fed_crypto::generate_message_id(),
            in_response_to: Some(request_id.to_string()),
            issue_instant: now,
            destination: Some(ACS_URL.to_string()),
            issuer: Some(issuer),
            status: Status::success(),
            assertions: vec![assertion],
            signed: false,
        }
    }

    /// A signed SOAP `LogoutRequest` for `alice`'s session `_session1`.
    pub fn soap_logout(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut request = LogoutRequest::new(
            fed_crypto::generate_message_id(),
            self.entity_id(),
            NameId::new("alice").with_format(NameIdFormat::Persistent.uri()),
        )
        .with_session_index("_session1")
        .not_on_or_after(now + chrono::Duration::minutes(5));
        request.issue_instant = now;
        let signed = self.signer.sign(&request.to_xml(), &request.id)?;
        Ok(SoapBinding::encode(&signed))
    }
}
