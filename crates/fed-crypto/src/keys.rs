//! Signing credentials and public-key trust anchors.
//!
//! A [`SigningCredential`] is the SP's own private key (with an optional
//! certificate to advertise in metadata and `KeyInfo`). A [`PublicKey`] is
//! what the SP trusts on the other side: it is extracted from the
//! certificates found in metadata or configuration and compared by value,
//! so certificate validity dates and chains play no role in SAML trust.
//!
//! ## Supported keys
//!
//! - RSA (2048 to 8192 bits), PKCS#1 v1.5 with SHA-256/384/512
//! - ECDSA P-256 with SHA-256 and P-384 with SHA-384, with signatures in the
//!   fixed-width `r || s` form XML-DSig uses

use std::fmt;

use aws_lc_rs::{
    rand::SystemRandom,
    signature::{
        self, EcdsaKeyPair, KeyPair, RsaKeyPair, UnparsedPublicKey,
        ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED,
        ECDSA_P384_SHA384_FIXED_SIGNING, RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA384,
        RSA_PKCS1_2048_8192_SHA512,
    },
};
use base64::Engine;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey as ParsedPublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::algorithm::SignatureAlgorithm;
use crate::hash::sha256;
use crate::pem::{pem_blocks, pem_to_der};
use crate::signature::SignatureError;

/// Key family of a credential or trust anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// RSA key.
    Rsa,
    /// EC key on the P-256 curve.
    EcP256,
    /// EC key on the P-384 curve.
    EcP384,
}

impl KeyKind {
    /// Returns true if signatures of `algorithm` can be produced with this key.
    #[must_use]
    pub const fn supports(self, algorithm: SignatureAlgorithm) -> bool {
        match self {
            Self::Rsa => algorithm.is_rsa(),
            Self::EcP256 => matches!(algorithm, SignatureAlgorithm::Es256),
            Self::EcP384 => matches!(algorithm, SignatureAlgorithm::Es384),
        }
    }

    /// Returns the algorithm used when the caller does not pick one.
    #[must_use]
    pub const fn default_algorithm(self) -> SignatureAlgorithm {
        match self {
            Self::Rsa => SignatureAlgorithm::Rs256,
            Self::EcP256 => SignatureAlgorithm::Es256,
            Self::EcP384 => SignatureAlgorithm::Es384,
        }
    }
}

/// A trusted public key.
///
/// RSA keys hold the PKCS#1 `RSAPublicKey` DER, EC keys the uncompressed
/// curve point, which is what aws-lc-rs expects for verification.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Creates a public key from its raw encoding.
    #[must_use]
    pub fn new(kind: KeyKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// Extracts the public key of a DER-encoded X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed or carries an
    /// unsupported key type.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, SignatureError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| SignatureError::InvalidCertificate(format!("{e}")))?;
        Self::from_spki(cert.public_key())
    }

    /// Extracts the public keys of every certificate in a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle contains no certificate or one of them
    /// is unusable.
    pub fn from_certificate_pem(pem: &str) -> Result<Vec<Self>, SignatureError> {
        let blocks = pem_blocks(pem, "CERTIFICATE");
        if blocks.is_empty() {
            return Err(SignatureError::InvalidCertificate(
                "no certificate found in PEM data".to_string(),
            ));
        }
        blocks.iter().map(|der| Self::from_certificate_der(der)).collect()
    }

    /// Parses a DER-encoded `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the structure is invalid or the key type is not
    /// supported.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, SignatureError> {
        let (_, spki) = SubjectPublicKeyInfo::from_der(der)
            .map_err(|e| SignatureError::InvalidKey(format!("{e}")))?;
        Self::from_spki(&spki)
    }

    fn from_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<Self, SignatureError> {
        let raw = spki.subject_public_key.data.to_vec();
        match spki.parsed() {
            Ok(ParsedPublicKey::RSA(_)) => Ok(Self::new(KeyKind::Rsa, raw)),
            Ok(ParsedPublicKey::EC(_)) => match raw.len() {
                65 => Ok(Self::new(KeyKind::EcP256, raw)),
                97 => Ok(Self::new(KeyKind::EcP384, raw)),
                len => Err(SignatureError::InvalidKey(format!(
                    "unsupported EC point length {len}"
                ))),
            },
            Ok(_) => Err(SignatureError::InvalidKey(
                "unsupported public key type".to_string(),
            )),
            Err(e) => Err(SignatureError::InvalidKey(format!("{e}"))),
        }
    }

    /// Returns the key family.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Returns the raw key encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns a short fingerprint for log output.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = sha256(&self.bytes);
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(&digest[..12])
    }

    /// Verifies `sig` over `data`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::UnsupportedAlgorithm`] if the algorithm does
    /// not fit the key and [`SignatureError::Verification`] if the signature
    /// is wrong.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        sig: &[u8],
    ) -> Result<(), SignatureError> {
        if !self.kind.supports(algorithm) {
            return Err(SignatureError::UnsupportedAlgorithm(format!(
                "{} with {:?} key",
                algorithm.jwa_name(),
                self.kind
            )));
        }

        let verification_alg: &'static dyn signature::VerificationAlgorithm = match algorithm {
            SignatureAlgorithm::Rs256 => &RSA_PKCS1_2048_8192_SHA256,
            SignatureAlgorithm::Rs384 => &RSA_PKCS1_2048_8192_SHA384,
            SignatureAlgorithm::Rs512 => &RSA_PKCS1_2048_8192_SHA512,
            SignatureAlgorithm::Es256 => &ECDSA_P256_SHA256_FIXED,
            SignatureAlgorithm::Es384 => &ECDSA_P384_SHA384_FIXED,
        };

        UnparsedPublicKey::new(verification_alg, &self.bytes)
            .verify(data, sig)
            .map_err(|_| SignatureError::Verification)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

enum KeyMaterial {
    Rsa(RsaKeyPair),
    Ecdsa(EcdsaKeyPair, KeyKind),
}

/// The SP's private signing key.
pub struct SigningCredential {
    material: KeyMaterial,
    public_key: PublicKey,
    certificate_der: Option<Vec<u8>>,
}

impl SigningCredential {
    /// Loads a PKCS#8 DER private key.
    ///
    /// If a certificate is given it must certify the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not RSA, P-256 or P-384, or if the
    /// certificate belongs to another key.
    pub fn from_pkcs8_der(
        pkcs8_der: &[u8],
        certificate_der: Option<Vec<u8>>,
    ) -> Result<Self, SignatureError> {
        let material = if let Ok(pair) = RsaKeyPair::from_pkcs8(pkcs8_der) {
            KeyMaterial::Rsa(pair)
        } else if let Ok(pair) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8_der)
        {
            KeyMaterial::Ecdsa(pair, KeyKind::EcP256)
        } else if let Ok(pair) = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, pkcs8_der)
        {
            KeyMaterial::Ecdsa(pair, KeyKind::EcP384)
        } else {
            return Err(SignatureError::InvalidKey(
                "unsupported or malformed PKCS#8 key".to_string(),
            ));
        };

        Self::assemble(material, certificate_der)
    }

    /// Loads a PEM private key (`PRIVATE KEY` or `RSA PRIVATE KEY`) and an
    /// optional PEM certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data holds no usable key.
    pub fn from_pem(
        private_key_pem: &str,
        certificate_pem: Option<&str>,
    ) -> Result<Self, SignatureError> {
        let certificate_der = match certificate_pem {
            Some(pem) => Some(pem_to_der(pem, "CERTIFICATE").ok_or_else(|| {
                SignatureError::InvalidCertificate("no certificate found in PEM data".to_string())
            })?),
            None => None,
        };

        if let Some(der) = pem_to_der(private_key_pem, "PRIVATE KEY") {
            return Self::from_pkcs8_der(&der, certificate_der);
        }

        let der = pem_to_der(private_key_pem, "RSA PRIVATE KEY")
            .ok_or_else(|| SignatureError::InvalidKey("no private key found in PEM data".to_string()))?;
        let pair = RsaKeyPair::from_der(&der)
            .map_err(|e| SignatureError::InvalidKey(format!("Invalid RSA DER key: {e}")))?;
        Self::assemble(KeyMaterial::Rsa(pair), certificate_der)
    }

    /// Generates a fresh P-256 key without certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn generate_ecdsa_p256() -> Result<Self, SignatureError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| SignatureError::KeyGeneration(format!("{e}")))?;
        Self::from_pkcs8_der(pkcs8.as_ref(), None)
    }

    fn assemble(
        material: KeyMaterial,
        certificate_der: Option<Vec<u8>>,
    ) -> Result<Self, SignatureError> {
        let public_key = match &material {
            KeyMaterial::Rsa(pair) => PublicKey::new(KeyKind::Rsa, pair.public_key().as_ref().to_vec()),
            KeyMaterial::Ecdsa(pair, kind) => {
                PublicKey::new(*kind, pair.public_key().as_ref().to_vec())
            }
        };

        if let Some(der) = &certificate_der {
            let certified = PublicKey::from_certificate_der(der)?;
            if certified != public_key {
                return Err(SignatureError::InvalidKey(
                    "certificate does not match the private key".to_string(),
                ));
            }
        }

        Ok(Self {
            material,
            public_key,
            certificate_der,
        })
    }

    /// Returns the public half of the credential.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Returns the DER certificate, if one was configured.
    #[must_use]
    pub fn certificate_der(&self) -> Option<&[u8]> {
        self.certificate_der.as_deref()
    }

    /// Returns the algorithm used when none is requested.
    #[must_use]
    pub const fn default_algorithm(&self) -> SignatureAlgorithm {
        self.public_key.kind.default_algorithm()
    }

    /// Signs `data` with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm does not fit the key or signing fails.
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        if !self.public_key.kind.supports(algorithm) {
            return Err(SignatureError::UnsupportedAlgorithm(format!(
                "{} with {:?} key",
                algorithm.jwa_name(),
                self.public_key.kind
            )));
        }

        let rng = SystemRandom::new();
        match &self.material {
            KeyMaterial::Rsa(pair) => {
                let padding: &'static dyn signature::RsaEncoding = match algorithm {
                    SignatureAlgorithm::Rs384 => &signature::RSA_PKCS1_SHA384,
                    SignatureAlgorithm::Rs512 => &signature::RSA_PKCS1_SHA512,
                    _ => &signature::RSA_PKCS1_SHA256,
                };
                let mut sig = vec![0u8; pair.public_modulus_len()];
                pair.sign(padding, &rng, data, &mut sig)
                    .map_err(|e| SignatureError::Signing(format!("RSA signing failed: {e}")))?;
                Ok(sig)
            }
            KeyMaterial::Ecdsa(pair, _) => pair
                .sign(&rng, data)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|e| SignatureError::Signing(format!("ECDSA signing failed: {e}"))),
        }
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("public_key", &self.public_key)
            .field("has_certificate", &self.certificate_der.is_some())
            .finish_non_exhaustive()
    }
}
