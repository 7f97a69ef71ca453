//! XML Signature creation.
//!
//! Provides functionality for signing SAML documents using XML-DSig.

use std::sync::Arc;

use base64::Engine;
use fed_crypto::{SignatureAlgorithm, SigningCredential};

use crate::bindings::{HttpRedirectBinding, SamlMessageType};
use crate::error::{SamlError, SamlResult};
use crate::types::{canonicalization_algorithms, XMLDSIG_NS};
use crate::xml;

use super::{algorithm_uri, canonicalize, digest_uri};

/// XML document signer.
///
/// Signs SAML documents with the SP's credential.
#[derive(Debug, Clone)]
pub struct XmlSigner {
    credential: Arc<SigningCredential>,
    algorithm: SignatureAlgorithm,
    include_certificate: bool,
}

impl XmlSigner {
    /// Creates a signer using the credential's default algorithm.
    #[must_use]
    pub fn new(credential: Arc<SigningCredential>) -> Self {
        let algorithm = credential.default_algorithm();
        Self {
            credential,
            algorithm,
            include_certificate: true,
        }
    }

    /// Selects the signature algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm does not fit the credential's key.
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> SamlResult<Self> {
        if !self.credential.public_key().kind().supports(algorithm) {
            return Err(SamlError::SignatureCreation(format!(
                "{} cannot be used with this key",
                algorithm.jwa_name()
            )));
        }
        self.algorithm = algorithm;
        Ok(self)
    }

    /// Controls whether the certificate is embedded in `KeyInfo`.
    #[must_use]
    pub const fn include_certificate(mut self, include: bool) -> Self {
        self.include_certificate = include;
        self
    }

    /// Returns the signature algorithm in use.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Signs the element with the given `ID`.
    ///
    /// The `<ds:Signature>` element is inserted right after the element's
    /// `Issuer` child, or first if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be found or signing fails.
    pub fn sign(&self, document: &str, reference_id: &str) -> SamlResult<String> {
        let span = xml::locate(document, |_, id, _| id == Some(reference_id))?.ok_or_else(|| {
            SamlError::SignatureCreation(format!("Element with ID '{reference_id}' not found"))
        })?;
        let element = &document[span.outer.clone()];

        let relative_insert = match xml::locate(element, |name, _, depth| {
            name == "Issuer" && depth == 1
        })? {
            Some(issuer) => issuer.outer.end,
            None => span.inner.start - span.outer.start,
        };

        let canonical = canonicalize(document, span.outer.clone(), None)?;
        let digest = fed_crypto::digest(self.algorithm.digest(), canonical.as_bytes());
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);

        let signed_info = self.build_signed_info(reference_id, &digest_b64);
        let canonical_signed_info = canonicalize(&signed_info, 0..signed_info.len(), None)?;
        let signature_value = self.sign_data(canonical_signed_info.as_bytes())?;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature_value);
        let signature_element = self.build_signature_element(&signed_info, &signature_b64);

        let insert_at = span.outer.start + relative_insert;
        Ok(format!(
            "{}{}{}",
            &document[..insert_at],
            signature_element,
            &document[insert_at..]
        ))
    }

    /// Encodes a message for the HTTP-Redirect binding with a detached
    /// query signature.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or signing fails.
    pub fn sign_redirect(
        &self,
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        HttpRedirectBinding::encode_signed(
            xml,
            destination,
            relay_state,
            message_type,
            algorithm_uri(self.algorithm),
            |data| self.sign_data(data),
        )
    }

    fn sign_data(&self, data: &[u8]) -> SamlResult<Vec<u8>> {
        self.credential
            .sign(self.algorithm, data)
            .map_err(|e| SamlError::SignatureCreation(e.to_string()))
    }

    fn build_signed_info(&self, reference_id: &str, digest_b64: &str) -> String {
        format!(
            r##"<ds:SignedInfo xmlns:ds="{XMLDSIG_NS}"><ds:CanonicalizationMethod Algorithm="{c14n}"/><ds:SignatureMethod Algorithm="{}"/><ds:Reference URI="#{}"><ds:Transforms><ds:Transform Algorithm="{}"/><ds:Transform Algorithm="{c14n}"/></ds:Transforms><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
            algorithm_uri(self.algorithm),
            xml::escape(reference_id),
            canonicalization_algorithms::ENVELOPED_SIGNATURE,
            digest_uri(self.algorithm.digest()),
            c14n = canonicalization_algorithms::EXCLUSIVE_C14N,
        )
    }

    fn build_signature_element(&self, signed_info: &str, signature_b64: &str) -> String {
        let key_info = match self.credential.certificate_der() {
            Some(cert) if self.include_certificate => format!(
                "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
                base64::engine::general_purpose::STANDARD.encode(cert)
            ),
            _ => String::new(),
        };
        format!(
            r#"<ds:Signature xmlns:ds="{XMLDSIG_NS}">{signed_info}<ds:SignatureValue>{signature_b64}</ds:SignatureValue>{key_info}</ds:Signature>"#
        )
    }
}
