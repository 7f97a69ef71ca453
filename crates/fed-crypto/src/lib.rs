//! # fed-crypto
//!
//! Cryptographic building blocks for the federation service provider,
//! implemented on top of aws-lc-rs.
//!
//! ## Contents
//!
//! - [`hash`] - SHA-2 digests used by XML-DSig references
//! - [`keys`] - signing credentials and public-key trust anchors
//! - [`pem`] - PEM armour decoding
//! - [`random`] - protocol message identifiers and correlation tokens
//!
//! ## Algorithms
//!
//! SAML deployments in the wild still sign with SHA-256, so unlike a
//! token service this crate accepts RS256 and ES256 next to the stronger
//! variants. SHA-1 is never accepted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod algorithm;
pub mod hash;
pub mod keys;
pub mod pem;
pub mod random;
pub mod signature;

pub use algorithm::{DigestAlgorithm, SignatureAlgorithm};
pub use hash::{digest, sha256, sha384, sha512};
pub use keys::{KeyKind, PublicKey, SigningCredential};
pub use random::{generate_message_id, generate_relay_state, generate_session_id};
pub use signature::SignatureError;
