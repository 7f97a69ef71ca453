//! HTTP-POST binding.
//!
//! Messages travel base64-encoded in a self-submitting HTML form.

use base64::Engine;

use crate::error::{SamlError, SamlResult};
use crate::types::Binding;
use crate::xml::{escape, MAX_DOCUMENT_SIZE};

use super::{DecodedMessage, SamlMessageType};

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Renders the form that carries `xml` to `destination`.
    #[must_use]
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> String {
        let mut fields = format!(
            r#"<input type="hidden" name="{}" value="{}"/>"#,
            message_type.form_param(),
            base64::engine::general_purpose::STANDARD.encode(xml)
        );
        if let Some(rs) = relay_state {
            fields.push_str(&format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                escape(rs)
            ));
        }

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>Signing in</title></head>
<body onload="document.forms[0].submit()">
<form method="post" action="{}">
{fields}
<noscript><button type="submit">Continue</button></noscript>
</form>
</body>
</html>"#,
            escape(destination)
        )
    }

    /// Decodes a SAML message from HTTP-POST form data.
    ///
    /// Line breaks inside the base64 payload are tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if neither parameter is present, the payload is
    /// too large, or it is not base64-encoded UTF-8.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<DecodedMessage> {
        let (encoded, message_type) = if let Some(req) = saml_request {
            (req, SamlMessageType::Request)
        } else if let Some(resp) = saml_response {
            (resp, SamlMessageType::Response)
        } else {
            return Err(SamlError::InvalidRequest(
                "No SAMLRequest or SAMLResponse parameter".to_string(),
            ));
        };

        if encoded.len() > MAX_DOCUMENT_SIZE * 4 / 3 + 4 {
            return Err(SamlError::InvalidRequest("message too large".to_string()));
        }

        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = base64::engine::general_purpose::STANDARD.decode(compact)?;

        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            binding: Binding::HttpPost,
            relay_state: relay_state.map(String::from),
            signature: None,
            sig_alg: None,
            signed_query: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_value<'a>(html: &'a str, name: &str) -> &'a str {
        let marker = format!("name=\"{name}\" value=\"");
        let start = html.find(&marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        &html[start..start + end]
    }

    #[test]
    fn encode_and_decode_request() {
        let xml = r#"<samlp:AuthnRequest>test</samlp:AuthnRequest>"#;
        let html = HttpPostBinding::encode(
            xml,
            "https://idp.example.com",
            Some("state123"),
            SamlMessageType::Request,
        );

        assert!(html.contains("https://idp.example.com"));
        assert_eq!(form_value(&html, "RelayState"), "state123");

        let encoded = form_value(&html, "SAMLRequest");
        let decoded = HttpPostBinding::decode(Some(encoded), None, Some("state123")).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.binding, Binding::HttpPost);
        assert_eq!(decoded.relay_state.as_deref(), Some("state123"));
    }

    #[test]
    fn decode_tolerates_folded_base64() {
        let xml = "<samlp:Response>folded payload for line wrapping</samlp:Response>";
        let encoded = base64::engine::general_purpose::STANDARD.encode(xml);
        let folded = format!("{}\r\n{}", &encoded[..20], &encoded[20..]);
        let decoded = HttpPostBinding::decode(None, Some(&folded), None).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Response);
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert!(matches!(
            HttpPostBinding::decode(None, None, None),
            Err(SamlError::InvalidRequest(_))
        ));
        assert!(matches!(
            HttpPostBinding::decode(None, Some("%%%"), None),
            Err(SamlError::Base64Decode(_))
        ));
    }

    #[test]
    fn destination_is_escaped() {
        let html = HttpPostBinding::encode(
            "<x/>",
            r#""><script>alert(1)</script>"#,
            None,
            SamlMessageType::Request,
        );
        assert!(!html.contains("<script>alert"));
    }
}
