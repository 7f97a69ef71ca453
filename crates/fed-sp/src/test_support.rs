//! Fixtures shared by the unit tests: trusted providers and a mock
//! identity provider issuing signed responses.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use fed_crypto::{PublicKey, SigningCredential};
use fed_saml::bindings::{DecodedMessage, HttpRedirectBinding, SamlMessageType};
use fed_saml::signature::XmlSigner;
use fed_saml::{
    Assertion, Attribute, AuthnStatement, Binding, Conditions, NameId, NameIdFormat, Response,
    Status, Subject, SubjectConfirmation, SubjectConfirmationData, BEARER_METHOD,
};

use crate::trust::{ProviderSource, TrustedProvider};

pub const IDP1_CERT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../tests/fixtures/idp1.crt"
));
pub const IDP1_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../tests/fixtures/idp1.key"
));

pub const SP_ENTITY_ID: &str = "https://sp.example.com";
pub const ACS_URL: &str = "https://sp.example.com/saml/acs";

pub fn entity_id(key: &str) -> String {
    format!("https://{key}.example.org")
}

/// A static provider. Without certificates its signatures are not checked.
pub fn provider(key: &str, certificates: Vec<PublicKey>) -> TrustedProvider {
    TrustedProvider {
        key: key.to_string(),
        entity_id: entity_id(key),
        display_name: None,
        skip_signature_verification: certificates.is_empty(),
        certificates,
        trusted_name_formats: Vec::new(),
        requested_name_format: None,
        sign_request: None,
        binding: None,
        binding_endpoints: BTreeMap::from([(
            Binding::HttpRedirect,
            format!("{}/sso", entity_id(key)),
        )]),
        logout_endpoints: BTreeMap::new(),
        translation_profile: None,
        registration_form: None,
        source: ProviderSource::Static,
    }
}

/// Identity provider with its own key pair.
pub struct MockIdp {
    pub key: String,
    pub signer: XmlSigner,
    credential: Arc<SigningCredential>,
}

impl MockIdp {
    pub fn new(key: &str) -> Self {
        Self::with_credential(key, SigningCredential::generate_ecdsa_p256().unwrap())
    }

    /// The fixture IdP whose certificate is published in [`idp_entity`].
    pub fn fixture(key: &str) -> Self {
        Self::with_credential(key, SigningCredential::from_pem(IDP1_KEY, Some(IDP1_CERT)).unwrap())
    }

    fn with_credential(key: &str, credential: SigningCredential) -> Self {
        let credential = Arc::new(credential);
        Self {
            key: key.to_string(),
            signer: XmlSigner::new(Arc::clone(&credential)),
            credential,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.credential.public_key().clone()
    }

    pub fn entity_id(&self) -> String {
        entity_id(&self.key)
    }

    /// The provider entry trusting this IdP's key.
    pub fn trusted(&self) -> TrustedProvider {
        provider(&self.key, vec![self.public_key()])
    }

    /// A successful response for `alice` answering `request_id`.
    pub fn response(&self, request_id: &str, now: DateTime<Utc>) -> Response {
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
            attributes: vec![Attribute {
                name: "mail".to_string(),
                name_format: None,
                friendly_name: None,
                values: vec!["alice@example.org".to_string()],
            }],
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

    /// Serializes `response`, signing the assertions and the response as asked.
    pub fn render(&self, response: &Response, sign_assertion: bool, sign_response: bool) -> String {
        let assertions: Vec<String> = response
            .assertions
            .iter()
            .map(|a| {
                let xml = a.to_xml();
                if sign_assertion {
                    self.signer.sign(&xml, &a.id).unwrap()
                } else {
                    xml
                }
            })
            .collect();
        let document = response.to_xml_with(&assertions);
        if sign_response {
            self.signer.sign(&document, &response.id).unwrap()
        } else {
            document
        }
    }

    /// A signed response, delivered over HTTP-POST.
    pub fn signed_post(&self, request_id: &str, now: DateTime<Utc>) -> DecodedMessage {
        let response = self.response(request_id, now);
        post_message(self.render(&response, true, false), None)
    }

    /// An unsigned response carried over HTTP-Redirect with a query
    /// signature.
    pub fn signed_redirect(&self, request_id: &str, now: DateTime<Utc>) -> DecodedMessage {
        let xml = self.render(&self.response(request_id, now), false, false);
        let url = self
            .signer
            .sign_redirect(&xml, ACS_URL, Some("rs"), SamlMessageType::Response)
            .unwrap();
        HttpRedirectBinding::decode_url(&url).unwrap()
    }
}

/// Wraps a document as if it arrived over HTTP-POST.
pub fn post_message(xml: String, relay_state: Option<&str>) -> DecodedMessage {
    DecodedMessage {
        xml,
        message_type: SamlMessageType::Response,
        binding: Binding::HttpPost,
        relay_state: relay_state.map(String::from),
        signature: None,
        sig_alg: None,
        signed_query: None,
    }
}

/// Metadata entry for an IdP signing with the fixture certificate.
pub fn idp_entity(entity_id: &str) -> String {
    let der = fed_crypto::pem::pem_to_der(IDP1_CERT, "CERTIFICATE").unwrap();
    let cert = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        r#"<md:EntityDescriptor entityID="{entity_id}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>
    <md:NameIDFormat>urn:oasis:names:tc:SAML:2.0:nameid-format:persistent</md:NameIDFormat>
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{entity_id}/slo"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{entity_id}/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
    )
}

/// A federation document listing `entities`.
pub fn federation_document(valid_until: &str, entities: &[String]) -> String {
    format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" ID="_fed" validUntil="{valid_until}">{}</md:EntitiesDescriptor>"#,
        entities.concat()
    )
}
