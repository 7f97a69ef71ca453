//! Cryptographic algorithm definitions.

/// Digest algorithms usable for signature references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Returns the output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Returns the algorithm name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// Signature algorithms supported for protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256.
    Rs256,
    /// RSA PKCS#1 v1.5 with SHA-384.
    Rs384,
    /// RSA PKCS#1 v1.5 with SHA-512.
    Rs512,
    /// ECDSA on P-256 with SHA-256 (ASN.1 DER signature).
    Es256,
    /// ECDSA on P-384 with SHA-384 (ASN.1 DER signature).
    Es384,
}

impl SignatureAlgorithm {
    /// Returns the JWA algorithm name.
    #[must_use]
    pub const fn jwa_name(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
        }
    }

    /// Returns the digest used by this algorithm.
    #[must_use]
    pub const fn digest(self) -> DigestAlgorithm {
        match self {
            Self::Rs256 | Self::Es256 => DigestAlgorithm::Sha256,
            Self::Rs384 | Self::Es384 => DigestAlgorithm::Sha384,
            Self::Rs512 => DigestAlgorithm::Sha512,
        }
    }

    /// Returns true if this is an RSA algorithm.
    #[must_use]
    pub const fn is_rsa(self) -> bool {
        matches!(self, Self::Rs256 | Self::Rs384 | Self::Rs512)
    }

    /// Returns true if this is an ECDSA algorithm.
    #[must_use]
    pub const fn is_ecdsa(self) -> bool {
        matches!(self, Self::Es256 | Self::Es384)
    }
}
