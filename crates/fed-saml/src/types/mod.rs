//! SAML 2.0 protocol types.

mod assertion;
mod authn_request;
mod constants;
mod logout;
mod name_id;
mod response;
mod status;

pub use assertion::*;
pub use authn_request::*;
pub use constants::*;
pub use logout::*;
pub use name_id::*;
pub use response::*;
pub use status::*;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{SamlError, SamlResult};
use crate::xml::Element;

/// Formats an instant the way SAML expects (`xs:dateTime` in UTC).
#[must_use]
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses an `xs:dateTime` value.
///
/// # Errors
///
/// Returns [`SamlError::InvalidMessage`] if the value is not RFC 3339.
pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::InvalidMessage(format!("invalid timestamp '{value}': {e}")))
}

/// Reads an optional timestamp attribute.
pub(crate) fn instant_attr(element: &Element, name: &str) -> SamlResult<Option<DateTime<Utc>>> {
    element.attr(name).map(parse_instant).transpose()
}

/// Reads a mandatory attribute.
pub(crate) fn required_attr<'a>(element: &'a Element, name: &str) -> SamlResult<&'a str> {
    element.attr(name).ok_or_else(|| {
        SamlError::MissingElement(format!("{}@{name}", element.local_name()))
    })
}

/// Checks the `Version` attribute of a protocol message.
pub(crate) fn check_version(element: &Element) -> SamlResult<()> {
    match element.attr("Version") {
        Some("2.0") => Ok(()),
        Some(other) => Err(SamlError::InvalidMessage(format!(
            "unsupported SAML version {other}"
        ))),
        None => Err(SamlError::MissingElement(format!(
            "{}@Version",
            element.local_name()
        ))),
    }
}
