//! SAML Status types.
//!
//! Status information returned in SAML protocol responses.

use serde::{Deserialize, Serialize};

use super::status_codes;
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code.
    pub status_code: StatusCode,

    /// Optional status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::SUCCESS),
            status_message: None,
        }
    }

    /// Creates a requester error status.
    #[must_use]
    pub fn requester_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::REQUESTER),
            status_message: Some(message.into()),
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER),
            status_message: Some(message.into()),
        }
    }

    /// Returns true if this status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.value == status_codes::SUCCESS
    }

    /// Sets the second-level status code.
    #[must_use]
    pub fn with_sub_code(mut self, value: impl Into<String>) -> Self {
        self.status_code.sub_code = Some(Box::new(StatusCode::new(value)));
        self
    }

    /// Reads a `Status` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the mandatory `StatusCode` is missing.
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        let code = element
            .child("StatusCode")
            .ok_or_else(|| SamlError::MissingElement("StatusCode".to_string()))?;
        Ok(Self {
            status_code: StatusCode::from_element(code)?,
            status_message: element.child_text("StatusMessage").map(String::from),
        })
    }

    /// Serializes as a `samlp:Status` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let message = self
            .status_message
            .as_deref()
            .map(|m| format!("<samlp:StatusMessage>{}</samlp:StatusMessage>", escape(m)))
            .unwrap_or_default();
        format!("<samlp:Status>{}{message}</samlp:Status>", self.status_code.to_xml())
    }
}

/// SAML status code, possibly nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// The status code URI.
    pub value: String,

    /// Optional nested status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a status code without sub-code.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            sub_code: None,
        }
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        let value = super::required_attr(element, "Value")?.to_string();
        let sub_code = match element.child("StatusCode") {
            Some(nested) => Some(Box::new(Self::from_element(nested)?)),
            None => None,
        };
        Ok(Self { value, sub_code })
    }

    fn to_xml(&self) -> String {
        match &self.sub_code {
            Some(sub) => format!(
                r#"<samlp:StatusCode Value="{}">{}</samlp:StatusCode>"#,
                escape(&self.value),
                sub.to_xml()
            ),
            None => format!(r#"<samlp:StatusCode Value="{}"/>"#, escape(&self.value)),
        }
    }

    /// Returns the innermost status code value.
    #[must_use]
    pub fn most_specific(&self) -> &str {
        self.sub_code
            .as_deref()
            .map_or(self.value.as_str(), StatusCode::most_specific)
    }
}
