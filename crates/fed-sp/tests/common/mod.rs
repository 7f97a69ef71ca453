//! Shared fixtures: an identity provider signing with a checked-in key.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fed_crypto::SigningCredential;
use fed_saml::bindings::{DecodedMessage, SamlMessageType};
use fed_saml::signature::XmlSigner;
use fed_saml::{
    Assertion, AuthnStatement, Binding, Conditions, NameId, NameIdFormat, Response, Status,
    Subject, SubjectConfirmation, SubjectConfirmationData, BEARER_METHOD,
};
use fed_sp::config::IdpConfig;
use fed_sp::SpConfig;

pub const SP_ENTITY_ID: &str = "https://sp.example.com";
pub const ACS_URL: &str = "https://sp.example.com/saml/acs";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../tests/fixtures")
        .join(name)
}

pub fn entity_id(key: &str) -> String {
    format!("https://{key}.example.org")
}

pub fn sp_config() -> SpConfig {
    SpConfig::new(SP_ENTITY_ID, "https://sp.example.com")
}

/// A provider trusting the certificate in `certificate`.
pub fn idp_config(key: &str, certificate: &str) -> IdpConfig {
    serde_json::from_value(serde_json::json!({
        "key": key,
        "entity_id": entity_id(key),
        "sso_url": format!("{}/sso", entity_id(key)),
        "certificates": [fixture(certificate)],
    }))
    .unwrap()
}

/// Identity provider signing with the key pair `<name>.key`/`<name>.crt`.
pub struct MockIdp {
    pub key: String,
    signer: XmlSigner,
}

impl MockIdp {
    pub fn new(key: &str, key_pair: &str) -> Self {
        let read = |ext: &str| std::fs::read_to_string(fixture(&format!("{key_pair}.{ext}"))).unwrap();
        let credential = SigningCredential::from_pem(&read("key"), Some(&read("crt"))).unwrap();
        Self {
            key: key.to_string(),
            signer: XmlSigner::new(Arc::new(credential)),
        }
    }

    /// A successful response for `subject` answering `request_id`.
    pub fn response(&self, request_id: &str, subject: &str, now: DateTime<Utc>) -> Response {
        let issuer = entity_id(&self.key);
        let assertion = Assertion {
            id: fed_crypto::generate_message_id(),
            issue_instant: now,
            issuer: issuer.clone(),
            subject: Some(Subject {
                name_id: Some(NameId::new(subject).with_format(NameIdFormat::Persistent.uri())),
                confirmations: vec![SubjectConfirmation {
                    method: BEARER_METHOD.to_string(),
                    data: Some(SubjectConfirmationData {
                        not_before: None,
                        not_on_or_after: Some(now + Duration::minutes(5)),
                        recipient: Some(ACS_URL.to_string()),
                        in_response_to: Some(request_id.to_string()),
                    }),
                }],
            }),
            conditions: Some(Conditions {
                not_before: Some(now - Duration::minutes(1)),
                not_on_or_after: Some(now + Duration::minutes(5)),
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

    /// Serializes `response` with every assertion signed.
    pub fn render(&self, response: &Response) -> String {
        let assertions: Vec<String> = response
            .assertions
            .iter()
            .map(|a| self.signer.sign(&a.to_xml(), &a.id).unwrap())
            .collect();
        response.to_xml_with(&assertions)
    }

    /// A signed response delivered over HTTP-POST.
    pub fn signed_post(&self, request_id: &str, subject: &str, now: DateTime<Utc>) -> DecodedMessage {
        post_message(self.render(&self.response(request_id, subject, now)))
    }
}

pub fn post_message(xml: String) -> DecodedMessage {
    DecodedMessage {
        xml,
        message_type: SamlMessageType::Response,
        binding: Binding::HttpPost,
        relay_state: None,
        signature: None,
        sig_alg: None,
        signed_query: None,
    }
}
