//! Signature error type.

use thiserror::Error;

/// Error type for signature and key operations.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Verification failed.
    #[error("signature verification failed")]
    Verification,

    /// Invalid key format.
    #[error("invalid key format: {0}")]
    InvalidKey(String),

    /// Invalid certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Algorithm not usable with the given key.
    #[error("algorithm not supported: {0}")]
    UnsupportedAlgorithm(String),
}
