//! PEM armour decoding.

use base64::Engine;

/// Extracts the DER payload of the first PEM block with the given label.
#[must_use]
pub fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    pem_blocks(pem, label).into_iter().next()
}

/// Extracts the DER payloads of all PEM blocks with the given label.
///
/// Blocks whose body is not valid base64 are skipped.
#[must_use]
pub fn pem_blocks(pem: &str, label: &str) -> Vec<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(&begin) {
        let body_start = start + begin.len();
        let Some(end_offset) = rest[body_start..].find(&end) else {
            break;
        };

        let b64_data: String = rest[body_start..body_start + end_offset]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if let Ok(der) = base64::engine::general_purpose::STANDARD.decode(&b64_data) {
            blocks.push(der);
        }

        rest = &rest[body_start + end_offset + end.len()..];
    }
    blocks
}

/// Decodes base64 that may contain line breaks, as found in XML documents.
#[must_use]
pub fn decode_folded_base64(value: &str) -> Option<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(compact).ok()
}
