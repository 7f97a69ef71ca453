//! Cryptographically secure random identifiers.
//!
//! Protocol message identifiers double as correlation keys between an
//! outgoing request and the response to it, so they must be unguessable.
//! Every generator here yields well over 128 bits of entropy.

use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;

/// Generates a cryptographically secure random byte array.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a cryptographically secure alphanumeric string.
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    Alphanumeric.sample_string(&mut rng, len)
}

/// Generates a SAML message identifier.
///
/// The value starts with an underscore because `xs:ID` must not begin
/// with a digit. The 32 alphanumeric characters carry about 190 bits of
/// entropy.
#[must_use]
pub fn generate_message_id() -> String {
    format!("_{}", random_alphanumeric(32))
}

/// Generates an opaque relay state token.
#[must_use]
pub fn generate_relay_state() -> String {
    random_alphanumeric(32)
}

/// Generates a browser session identifier.
#[must_use]
pub fn generate_session_id() -> String {
    random_alphanumeric(40)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_bytes_has_requested_length() {
        assert_eq!(random_bytes(16).len(), 16);
        assert!(random_bytes(0).is_empty());
    }

    #[test]
    fn message_id_is_valid_xs_id() {
        let id = generate_message_id();
        assert_eq!(id.len(), 33);
        assert!(id.starts_with('_'));
        assert!(id[1..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn identifiers_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_message_id()).collect();
        assert_eq!(ids.len(), 1000);

        let states: HashSet<_> = (0..1000).map(|_| generate_relay_state()).collect();
        assert_eq!(states.len(), 1000);
    }

    #[test]
    fn session_id_is_alphanumeric() {
        let id = generate_session_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
