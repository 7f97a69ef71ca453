//! Hand-off of verified assertions to the local identity mapping.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::result::VerifiedAssertion;

/// Local principal produced from a verified assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalPrincipalMapping {
    /// Local principal identifier.
    pub principal: String,
    /// Attributes carried over to the local principal.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Profile that produced the mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// The mapping could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("translation failed: {0}")]
pub struct TranslationError(pub String);

/// Maps a verified assertion to a local principal.
///
/// Implementations must be pure: the same profile and assertion always
/// give the same mapping.
pub trait TranslationEngine: Send + Sync {
    /// Translates `assertion` using the named profile.
    ///
    /// # Errors
    ///
    /// Returns a [`TranslationError`] if no principal can be derived.
    fn translate(
        &self,
        profile: Option<&str>,
        assertion: &VerifiedAssertion,
    ) -> Result<LocalPrincipalMapping, TranslationError>;
}

/// Uses the NameID, or one attribute, as the principal and copies every
/// attribute.
#[derive(Debug, Clone, Default)]
pub struct DirectTranslation {
    principal_attribute: Option<String>,
}

impl DirectTranslation {
    /// Maps the NameID value to the principal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the principal from the first value of `attribute` instead.
    #[must_use]
    pub fn principal_from(mut self, attribute: impl Into<String>) -> Self {
        self.principal_attribute = Some(attribute.into());
        self
    }
}

impl TranslationEngine for DirectTranslation {
    fn translate(
        &self,
        profile: Option<&str>,
        assertion: &VerifiedAssertion,
    ) -> Result<LocalPrincipalMapping, TranslationError> {
        let principal = match &self.principal_attribute {
            Some(name) => assertion
                .attributes
                .get(name)
                .and_then(|values| values.first())
                .cloned()
                .ok_or_else(|| TranslationError(format!("attribute '{name}' is missing")))?,
            None => assertion.subject.value.clone(),
        };
        if principal.is_empty() {
            return Err(TranslationError("empty principal".to_string()));
        }
        Ok(LocalPrincipalMapping {
            principal,
            attributes: assertion.attributes.clone(),
            profile: profile.map(String::from),
        })
    }
}
