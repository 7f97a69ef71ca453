//! SAML error types.
//!
//! Errors raised while decoding, parsing, signing or verifying SAML
//! messages and metadata.

use thiserror::Error;

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Invalid or incomplete binding parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A message that parsed as XML but is not a valid protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// XML signature validation failed.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// XML signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    /// Missing required element or attribute.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// Unknown or unsupported binding.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// Deflate compression or decompression error.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Metadata document error.
    #[error("invalid metadata: {0}")]
    Metadata(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl SamlError {
    /// Returns the SAML status code for this error.
    ///
    /// Used when the SP has to answer a request it could not process, such
    /// as an IdP-initiated logout.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidMessage(_)
            | Self::XmlParse(_)
            | Self::MissingElement(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_)
            | Self::SignatureInvalid(_)
            | Self::UnsupportedBinding(_) => crate::types::status_codes::REQUESTER,
            _ => crate::types::status_codes::RESPONDER,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidMessage(_)
            | Self::MissingElement(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_)
            | Self::XmlParse(_)
            | Self::UnsupportedBinding(_) => 400,
            Self::SignatureInvalid(_) => 401,
            _ => 500,
        }
    }

    /// Returns true if the error comes from the shape of the input rather
    /// than from a failed security check.
    #[must_use]
    pub const fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InvalidMessage(_)
                | Self::MissingElement(_)
                | Self::Base64Decode(_)
                | Self::Deflate(_)
                | Self::XmlParse(_)
        )
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64Decode(err.to_string())
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        Self::Deflate(err.to_string())
    }
}

impl From<fed_crypto::SignatureError> for SamlError {
    fn from(err: fed_crypto::SignatureError) -> Self {
        Self::Crypto(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let err = SamlError::InvalidRequest("test".to_string());
        assert_eq!(err.status_code(), "urn:oasis:names:tc:SAML:2.0:status:Requester");
        assert_eq!(err.http_status(), 400);

        let err = SamlError::SignatureInvalid("test".to_string());
        assert_eq!(err.http_status(), 401);

        let err = SamlError::Crypto("test".to_string());
        assert_eq!(err.status_code(), "urn:oasis:names:tc:SAML:2.0:status:Responder");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn malformed_input_classification() {
        assert!(SamlError::XmlParse("x".to_string()).is_malformed_input());
        assert!(SamlError::Base64Decode("x".to_string()).is_malformed_input());
        assert!(!SamlError::SignatureInvalid("x".to_string()).is_malformed_input());
    }
}
