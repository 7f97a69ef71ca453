//! SAML Name ID types.
//!
//! Name identifiers are used to identify subjects in SAML assertions.

use serde::{Deserialize, Serialize};

use crate::xml::{escape, Element};

/// SAML Name ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The actual identifier value.
    pub value: String,

    /// The format of the name identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The security or administrative domain that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// The service provider's entity ID that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a new name ID with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
        }
    }

    /// Sets the format URI.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Reads a `NameID` element.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        Self {
            value: element.trimmed_text().to_string(),
            format: element.attr("Format").map(String::from),
            name_qualifier: element.attr("NameQualifier").map(String::from),
            sp_name_qualifier: element.attr("SPNameQualifier").map(String::from),
        }
    }

    /// Serializes as a `saml:NameID` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut attrs = String::new();
        if let Some(format) = &self.format {
            attrs.push_str(&format!(r#" Format="{}""#, escape(format)));
        }
        if let Some(qualifier) = &self.name_qualifier {
            attrs.push_str(&format!(r#" NameQualifier="{}""#, escape(qualifier)));
        }
        if let Some(qualifier) = &self.sp_name_qualifier {
            attrs.push_str(&format!(r#" SPNameQualifier="{}""#, escape(qualifier)));
        }
        format!("<saml:NameID{attrs}>{}</saml:NameID>", escape(&self.value))
    }
}
