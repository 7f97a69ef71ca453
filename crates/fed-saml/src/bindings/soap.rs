//! SOAP binding used for back-channel single logout.

use crate::error::{SamlError, SamlResult};
use crate::types::{Binding, SOAP_ENV_NS};
use crate::xml;

use super::{DecodedMessage, SamlMessageType};

/// SOAP 1.1 envelope encoder/decoder.
pub struct SoapBinding;

impl SoapBinding {
    /// Wraps a protocol message in a SOAP envelope.
    #[must_use]
    pub fn encode(xml: &str) -> String {
        format!(
            r#"<soap:Envelope xmlns:soap="{SOAP_ENV_NS}"><soap:Body>{xml}</soap:Body></soap:Envelope>"#
        )
    }

    /// Extracts the protocol message from a SOAP envelope.
    ///
    /// The message is returned byte for byte so that enveloped signatures
    /// inside it still verify.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not an envelope with exactly one
    /// element in its body.
    pub fn decode(envelope: &str) -> SamlResult<DecodedMessage> {
        let root = xml::parse(envelope)?;
        if root.local_name() != "Envelope" {
            return Err(SamlError::InvalidRequest("not a SOAP envelope".to_string()));
        }
        let body = root
            .child("Body")
            .ok_or_else(|| SamlError::MissingElement("Envelope/Body".to_string()))?;
        let [message] = body.children.as_slice() else {
            return Err(SamlError::InvalidRequest(
                "SOAP body must carry exactly one message".to_string(),
            ));
        };
        let message_type = if message.local_name().ends_with("Request") {
            SamlMessageType::Request
        } else {
            SamlMessageType::Response
        };

        let body_span = xml::locate(envelope, |name, _, depth| name == "Body" && depth == 1)?
            .ok_or_else(|| SamlError::MissingElement("Envelope/Body".to_string()))?;
        let inner = envelope
            .get(body_span.inner)
            .ok_or_else(|| SamlError::InvalidRequest("SOAP body out of range".to_string()))?;

        Ok(DecodedMessage {
            xml: inner.trim().to_string(),
            message_type,
            binding: Binding::Soap,
            relay_state: None,
            signature: None,
            sig_alg: None,
            signed_query: None,
        })
    }
}
