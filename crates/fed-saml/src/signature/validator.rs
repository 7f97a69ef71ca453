//! XML Signature validation.
//!
//! Validates enveloped XML-DSig signatures and redirect-binding query
//! signatures against a fixed set of trusted public keys. Certificates
//! embedded in `KeyInfo` are ignored; only the configured keys count.

use base64::Engine;
use fed_crypto::pem::decode_folded_base64;
use fed_crypto::PublicKey;

use crate::error::{SamlError, SamlResult};
use crate::types::canonicalization_algorithms;
use crate::xml::{self, Element};

use super::{algorithm_from_uri, canonicalize, digest_from_uri};

/// Validates signatures against trusted keys.
#[derive(Debug, Clone)]
pub struct XmlSignatureValidator {
    keys: Vec<PublicKey>,
}

impl XmlSignatureValidator {
    /// Creates a validator trusting the given keys.
    #[must_use]
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self { keys }
    }

    /// Returns true if there is no key to validate against.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validates the enveloped signature of the element with `ID` equal to
    /// `element_id`.
    ///
    /// The signature must be a direct child of that element and its single
    /// reference must point at it. Returns the key that verified it.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::SignatureInvalid`] if the element is unsigned,
    /// the reference or digest does not match, or no trusted key verifies
    /// the signature value.
    pub fn validate_enveloped(&self, document: &str, element_id: &str) -> SamlResult<&PublicKey> {
        let span = xml::locate(document, |_, id, _| id == Some(element_id))?.ok_or_else(|| {
            SamlError::SignatureInvalid(format!("no element with ID '{element_id}'"))
        })?;
        let element = &document[span.outer.clone()];

        let signature_span = xml::locate(element, |name, _, depth| {
            name == "Signature" && depth == 1
        })?
        .ok_or_else(|| SamlError::SignatureInvalid(format!("element '{element_id}' is not signed")))?;
        let signature_xml = &element[signature_span.outer.clone()];
        let signature = xml::parse(signature_xml)?;

        let signed_info = signature
            .child("SignedInfo")
            .ok_or_else(|| SamlError::SignatureInvalid("missing SignedInfo".to_string()))?;
        let algorithm = algorithm_from_uri(method(signed_info, "SignatureMethod")?)?;
        let c14n = method(signed_info, "CanonicalizationMethod")?;
        if c14n != canonicalization_algorithms::EXCLUSIVE_C14N {
            return Err(SamlError::SignatureInvalid(format!(
                "unsupported canonicalization {c14n}"
            )));
        }

        let mut references = signed_info.children_named("Reference");
        let reference = references
            .next()
            .ok_or_else(|| SamlError::SignatureInvalid("missing Reference".to_string()))?;
        if references.next().is_some() {
            return Err(SamlError::SignatureInvalid(
                "multiple references are not supported".to_string(),
            ));
        }
        let expected_uri = format!("#{element_id}");
        if reference.attr("URI") != Some(expected_uri.as_str()) {
            return Err(SamlError::SignatureInvalid(format!(
                "signature does not reference '{element_id}'"
            )));
        }
        check_transforms(reference)?;

        let digest_algorithm = digest_from_uri(method(reference, "DigestMethod")?)?;
        let expected_digest = reference
            .child_text("DigestValue")
            .and_then(decode_folded_base64)
            .ok_or_else(|| SamlError::SignatureInvalid("invalid DigestValue".to_string()))?;

        let base = span.outer.start;
        let signature_range =
            base + signature_span.outer.start..base + signature_span.outer.end;
        let canonical = canonicalize(document, span.outer.clone(), Some(signature_range.clone()))?;
        let digest = fed_crypto::digest(digest_algorithm, canonical.as_bytes());
        if digest != expected_digest {
            return Err(SamlError::SignatureInvalid("digest mismatch".to_string()));
        }

        let signed_info_span = xml::locate(signature_xml, |name, _, depth| {
            name == "SignedInfo" && depth == 1
        })?
        .ok_or_else(|| SamlError::SignatureInvalid("missing SignedInfo".to_string()))?;
        let signed_info_start = signature_range.start + signed_info_span.outer.start;
        let canonical_signed_info = canonicalize(
            document,
            signed_info_start..signed_info_start + signed_info_span.outer.len(),
            None,
        )?;

        let signature_value = signature
            .child_text("SignatureValue")
            .and_then(decode_folded_base64)
            .ok_or_else(|| SamlError::SignatureInvalid("invalid SignatureValue".to_string()))?;

        self.keys
            .iter()
            .filter(|key| key.kind().supports(algorithm))
            .find(|key| {
                key.verify(algorithm, canonical_signed_info.as_bytes(), &signature_value)
                    .is_ok()
            })
            .ok_or_else(|| {
                SamlError::SignatureInvalid("no trusted key verifies the signature".to_string())
            })
    }

    /// Validates a detached HTTP-Redirect signature.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::SignatureInvalid`] if the algorithm is refused
    /// or no trusted key verifies the signature.
    pub fn validate_detached(
        &self,
        signed_query: &str,
        signature_b64: &str,
        sig_alg: &str,
    ) -> SamlResult<&PublicKey> {
        let algorithm = algorithm_from_uri(sig_alg)?;
        let compact: String = signature_b64.chars().filter(|c| !c.is_whitespace()).collect();
        let signature = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| SamlError::SignatureInvalid(format!("invalid signature encoding: {e}")))?;

        self.keys
            .iter()
            .filter(|key| key.kind().supports(algorithm))
            .find(|key| key.verify(algorithm, signed_query.as_bytes(), &signature).is_ok())
            .ok_or_else(|| {
                SamlError::SignatureInvalid("no trusted key verifies the signature".to_string())
            })
    }
}

fn method<'a>(parent: &'a Element, child: &str) -> SamlResult<&'a str> {
    parent
        .child(child)
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| SamlError::SignatureInvalid(format!("missing {child}")))
}

fn check_transforms(reference: &Element) -> SamlResult<()> {
    let Some(transforms) = reference.child("Transforms") else {
        return Ok(());
    };
    for transform in transforms.children_named("Transform") {
        match transform.attr("Algorithm") {
            Some(
                canonicalization_algorithms::ENVELOPED_SIGNATURE
                | canonicalization_algorithms::EXCLUSIVE_C14N,
            ) => {}
            other => {
                return Err(SamlError::SignatureInvalid(format!(
                    "unsupported transform {}",
                    other.unwrap_or("<none>")
                )))
            }
        }
    }
    Ok(())
}
