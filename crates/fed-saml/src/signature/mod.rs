//! XML Signature support for SAML.
//!
//! This module provides XML Digital Signature (XML-DSig) support for
//! signing and validating SAML messages, assertions and metadata, plus the
//! detached signatures of the HTTP-Redirect binding.
//!
//! # Signing Algorithms
//!
//! - RSA-SHA256, RSA-SHA384, RSA-SHA512
//! - ECDSA-SHA256 (P-256), ECDSA-SHA384 (P-384)
//!
//! SHA-1 based algorithms are refused in both directions.
//!
//! # Canonicalization
//!
//! Exclusive XML canonicalization without comments. References are
//! digested over the referenced element with its enveloped signature
//! removed, in the namespace context of its document. `SignedInfo` is
//! canonicalized the same way before the signature value is computed.

mod c14n;
mod signer;
mod validator;

pub(crate) use c14n::canonicalize;

pub use signer::*;
pub use validator::*;

use fed_crypto::{DigestAlgorithm, SignatureAlgorithm};

use crate::error::{SamlError, SamlResult};
use crate::types::{digest_algorithms, signature_algorithms};

/// Returns the XML-DSig URI of a signature algorithm.
#[must_use]
pub const fn algorithm_uri(algorithm: SignatureAlgorithm) -> &'static str {
    match algorithm {
        SignatureAlgorithm::Rs256 => signature_algorithms::RSA_SHA256,
        SignatureAlgorithm::Rs384 => signature_algorithms::RSA_SHA384,
        SignatureAlgorithm::Rs512 => signature_algorithms::RSA_SHA512,
        SignatureAlgorithm::Es256 => signature_algorithms::ECDSA_SHA256,
        SignatureAlgorithm::Es384 => signature_algorithms::ECDSA_SHA384,
    }
}

/// Parses a signature algorithm URI.
///
/// # Errors
///
/// Returns [`SamlError::SignatureInvalid`] for unknown or SHA-1 algorithms.
pub fn algorithm_from_uri(uri: &str) -> SamlResult<SignatureAlgorithm> {
    match uri {
        signature_algorithms::RSA_SHA256 => Ok(SignatureAlgorithm::Rs256),
        signature_algorithms::RSA_SHA384 => Ok(SignatureAlgorithm::Rs384),
        signature_algorithms::RSA_SHA512 => Ok(SignatureAlgorithm::Rs512),
        signature_algorithms::ECDSA_SHA256 => Ok(SignatureAlgorithm::Es256),
        signature_algorithms::ECDSA_SHA384 => Ok(SignatureAlgorithm::Es384),
        signature_algorithms::RSA_SHA1 => Err(SamlError::SignatureInvalid(
            "SHA-1 signatures are not accepted".to_string(),
        )),
        other => Err(SamlError::SignatureInvalid(format!(
            "unsupported signature algorithm {other}"
        ))),
    }
}

/// Returns the XML-DSig URI of a digest algorithm.
#[must_use]
pub const fn digest_uri(algorithm: DigestAlgorithm) -> &'static str {
    match algorithm {
        DigestAlgorithm::Sha256 => digest_algorithms::SHA256,
        DigestAlgorithm::Sha384 => digest_algorithms::SHA384,
        DigestAlgorithm::Sha512 => digest_algorithms::SHA512,
    }
}

/// Parses a digest algorithm URI.
///
/// # Errors
///
/// Returns [`SamlError::SignatureInvalid`] for unknown or SHA-1 digests.
pub fn digest_from_uri(uri: &str) -> SamlResult<DigestAlgorithm> {
    match uri {
        digest_algorithms::SHA256 => Ok(DigestAlgorithm::Sha256),
        digest_algorithms::SHA384 => Ok(DigestAlgorithm::Sha384),
        digest_algorithms::SHA512 => Ok(DigestAlgorithm::Sha512),
        other => Err(SamlError::SignatureInvalid(format!(
            "unsupported digest algorithm {other}"
        ))),
    }
}
