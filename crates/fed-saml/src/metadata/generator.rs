//! Service provider metadata generation.

use base64::Engine;

use crate::types::{Binding, MD_NS, SAMLP_NS};
use crate::xml::escape;

/// Description of this service provider, rendered as an `EntityDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpMetadata {
    /// Entity ID of the SP.
    pub entity_id: String,
    /// DER certificate advertised for signing.
    pub signing_certificate: Option<Vec<u8>>,
    /// Whether the SP signs its authentication requests.
    pub authn_requests_signed: bool,
    /// Whether the SP requires signed assertions.
    pub want_assertions_signed: bool,
    /// Accepted NameID formats.
    pub name_id_formats: Vec<String>,
    /// Assertion consumer service URL.
    pub acs_url: String,
    /// Single logout URL, when logout is enabled.
    pub slo_url: Option<String>,
    /// SOAP single logout URL, when logout is enabled.
    pub slo_soap_url: Option<String>,
}

impl SpMetadata {
    /// Renders the descriptor with the given document `ID`.
    #[must_use]
    pub fn to_xml(&self, id: &str) -> String {
        let key_descriptor = self
            .signing_certificate
            .as_deref()
            .map(|der| {
                format!(
                    r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
                    base64::engine::general_purpose::STANDARD.encode(der)
                )
            })
            .unwrap_or_default();

        let mut logout = String::new();
        if let Some(slo_url) = &self.slo_url {
            for binding in [Binding::HttpPost, Binding::HttpRedirect] {
                logout.push_str(&format!(
                    r#"
    <md:SingleLogoutService Binding="{}" Location="{}"/>"#,
                    binding.uri(),
                    escape(slo_url)
                ));
            }
        }
        if let Some(soap_url) = &self.slo_soap_url {
            logout.push_str(&format!(
                r#"
    <md:SingleLogoutService Binding="{}" Location="{}"/>"#,
                Binding::Soap.uri(),
                escape(soap_url)
            ));
        }

        let formats: String = self
            .name_id_formats
            .iter()
            .map(|f| format!("\n    <md:NameIDFormat>{}</md:NameIDFormat>", escape(f)))
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="{MD_NS}" ID="{}" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="{}" WantAssertionsSigned="{}" protocolSupportEnumeration="{SAMLP_NS}">{key_descriptor}{logout}{formats}
    <md:AssertionConsumerService Binding="{}" Location="{acs}" index="1" isDefault="true"/>
    <md:AssertionConsumerService Binding="{}" Location="{acs}" index="2"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            escape(id),
            escape(&self.entity_id),
            self.authn_requests_signed,
            self.want_assertions_signed,
            Binding::HttpPost.uri(),
            Binding::HttpRedirect.uri(),
            acs = escape(&self.acs_url),
        )
    }
}
