//! HTTP-Redirect Binding implementation.
//!
//! Implements the SAML 2.0 HTTP-Redirect binding for sending SAML messages
//! via URL query parameters with DEFLATE compression. Signatures are
//! detached and computed over the query string.

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{SamlError, SamlResult};
use crate::types::Binding;
use crate::xml::MAX_DOCUMENT_SIZE;

use super::{DecodedMessage, SamlMessageType};

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes a SAML message for HTTP-Redirect binding.
    ///
    /// Returns a URL with the encoded message in query parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        let query = Self::message_query(xml, relay_state, message_type)?;
        Ok(append_query(destination, &query))
    }

    /// Encodes a signed SAML message for HTTP-Redirect binding.
    ///
    /// `sign` receives the octets of the query string up to and including
    /// `SigAlg` and returns the raw signature.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or signing fails.
    pub fn encode_signed<F>(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
        sig_alg: &str,
        sign: F,
    ) -> SamlResult<String>
    where
        F: FnOnce(&[u8]) -> SamlResult<Vec<u8>>,
    {
        let mut query = Self::message_query(xml, relay_state, message_type)?;
        query.push_str(&format!("&SigAlg={}", urlencoding::encode(sig_alg)));

        let signature = sign(query.as_bytes())?;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature);
        query.push_str(&format!("&Signature={}", urlencoding::encode(&signature_b64)));

        Ok(append_query(destination, &query))
    }

    fn message_query(
        xml: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        let compressed = deflate_compress(xml.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);

        let mut query = format!(
            "{}={}",
            message_type.form_param(),
            urlencoding::encode(&encoded)
        );
        if let Some(rs) = relay_state {
            query.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }
        Ok(query)
    }

    /// Decodes a SAML message from a raw (still percent-encoded) query string.
    ///
    /// When a `SigAlg` is present, the signed octets are rebuilt from the
    /// parameters exactly as they were encoded by the sender.
    ///
    /// # Errors
    ///
    /// Returns an error if no message parameter is present or the payload
    /// cannot be decoded.
    pub fn decode_query(raw_query: &str) -> SamlResult<DecodedMessage> {
        let mut message: Option<(&str, &str, SamlMessageType)> = None;
        let mut relay_state = None;
        let mut signature = None;
        let mut sig_alg = None;

        for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "SAMLRequest" if message.is_none() => {
                    message = Some((key, value, SamlMessageType::Request));
                }
                "SAMLResponse" if message.is_none() => {
                    message = Some((key, value, SamlMessageType::Response));
                }
                "SAMLRequest" | "SAMLResponse" => {
                    return Err(SamlError::InvalidRequest(
                        "more than one SAML message parameter".to_string(),
                    ));
                }
                "RelayState" => relay_state = Some(value),
                "Signature" => signature = Some(value),
                "SigAlg" => sig_alg = Some(value),
                _ => {}
            }
        }

        let (key, raw_message, message_type) = message.ok_or_else(|| {
            SamlError::InvalidRequest("No SAMLRequest or SAMLResponse parameter".to_string())
        })?;

        let signed_query = sig_alg.map(|alg| {
            let mut signed = format!("{key}={raw_message}");
            if let Some(rs) = relay_state {
                signed.push_str(&format!("&RelayState={rs}"));
            }
            signed.push_str(&format!("&SigAlg={alg}"));
            signed
        });

        let b64 = form_decode(raw_message)?;
        let compact: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
        let compressed = base64::engine::general_purpose::STANDARD.decode(compact)?;
        let xml_bytes = deflate_decompress(&compressed)?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            binding: Binding::HttpRedirect,
            relay_state: relay_state.map(form_decode).transpose()?,
            signature: signature.map(form_decode).transpose()?,
            sig_alg: sig_alg.map(form_decode).transpose()?,
            signed_query,
        })
    }

    /// Decodes a message from a full URL.
    ///
    /// # Errors
    ///
    /// See [`HttpRedirectBinding::decode_query`].
    pub fn decode_url(url: &str) -> SamlResult<DecodedMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid URL: {e}")))?;
        Self::decode_query(parsed.query().unwrap_or_default())
    }
}

fn append_query(destination: &str, query: &str) -> String {
    let separator = if destination.contains('?') { '&' } else { '?' };
    format!("{destination}{separator}{query}")
}

fn form_decode(value: &str) -> SamlResult<String> {
    urlencoding::decode(&value.replace('+', " "))
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| SamlError::InvalidRequest(format!("URL decode error: {e}")))
}

/// Compresses data using DEFLATE (raw, no zlib header).
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SamlError::Deflate(format!("Compression error: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SamlError::Deflate(format!("Compression finish error: {e}")))
}

/// Decompresses DEFLATE data, refusing output beyond the document limit.
fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let limit = u64::try_from(MAX_DOCUMENT_SIZE).unwrap_or(u64::MAX);
    let mut decoder = DeflateDecoder::new(data).take(limit + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SamlError::Deflate(format!("Decompression error: {e}")))?;
    if decompressed.len() > MAX_DOCUMENT_SIZE {
        return Err(SamlError::Deflate("decompressed message too large".to_string()));
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_request() {
        let xml = r#"<samlp:AuthnRequest>test content here</samlp:AuthnRequest>"#;
        let url = HttpRedirectBinding::encode(
            xml,
            "https://idp.example.com/sso",
            Some("state 123"),
            SamlMessageType::Request,
        )
        .unwrap();

        assert!(url.starts_with("https://idp.example.com/sso?SAMLRequest="));
        assert!(url.contains("RelayState=state%20123"));

        let decoded = HttpRedirectBinding::decode_url(&url).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.binding, Binding::HttpRedirect);
        assert_eq!(decoded.relay_state.as_deref(), Some("state 123"));
        assert!(decoded.signed_query.is_none());
    }

    #[test]
    fn signed_query_covers_parameters_up_to_sig_alg() {
        let mut signed_octets = Vec::new();
        let url = HttpRedirectBinding::encode_signed(
            "<samlp:LogoutResponse/>",
            "https://idp.example.com/slo",
            Some("rs"),
            SamlMessageType::Response,
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            |data| {
                signed_octets = data.to_vec();
                Ok(vec![1, 2, 3])
            },
        )
        .unwrap();

        let decoded = HttpRedirectBinding::decode_url(&url).unwrap();
        let signed_query = decoded.signed_query.unwrap();
        assert_eq!(signed_query.as_bytes(), signed_octets.as_slice());
        assert!(signed_query.starts_with("SAMLResponse="));
        assert!(signed_query.ends_with("&SigAlg=http%3A%2F%2Fwww.w3.org%2F2001%2F04%2Fxmldsig-more%23rsa-sha256"));
        assert_eq!(decoded.signature.as_deref(), Some("AQID"));
        assert_eq!(
            decoded.sig_alg.as_deref(),
            Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
        );
    }

    #[test]
    fn signed_query_preserves_sender_encoding() {
        let compressed = deflate_compress(b"<x/>").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(compressed);
        let query = format!(
            "SAMLRequest={}&RelayState=a+b&SigAlg=alg%2dx&Signature=c2ln",
            urlencoding::encode(&b64)
        );
        let decoded = HttpRedirectBinding::decode_query(&query).unwrap();
        assert_eq!(
            decoded.signed_query.as_deref(),
            Some(format!("SAMLRequest={}&RelayState=a+b&SigAlg=alg%2dx", urlencoding::encode(&b64)).as_str())
        );
        assert_eq!(decoded.relay_state.as_deref(), Some("a b"));
        assert_eq!(decoded.sig_alg.as_deref(), Some("alg-x"));
    }

    #[test]
    fn rejects_duplicate_message_parameters() {
        assert!(HttpRedirectBinding::decode_query("SAMLRequest=a&SAMLResponse=b").is_err());
        assert!(HttpRedirectBinding::decode_query("RelayState=x").is_err());
    }

    #[test]
    fn refuses_oversized_inflation() {
        let bomb = vec![b'a'; MAX_DOCUMENT_SIZE + 10];
        let compressed = deflate_compress(&bomb).unwrap();
        assert!(matches!(
            deflate_decompress(&compressed),
            Err(SamlError::Deflate(_))
        ));
    }

    #[test]
    fn url_with_existing_query() {
        let url = HttpRedirectBinding::encode(
            "<Test/>",
            "https://idp.example.com/sso?existing=param",
            None,
            SamlMessageType::Request,
        )
        .unwrap();
        assert!(url.contains("?existing=param&SAMLRequest="));
    }
}
