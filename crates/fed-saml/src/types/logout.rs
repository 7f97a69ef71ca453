//! SAML Single Logout messages.

use chrono::{DateTime, Utc};

use super::{check_version, format_instant, instant_attr, required_attr, NameId, Status};
use super::{SAMLP_NS, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{self, escape, Element};

/// SAML Logout Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the issuer.
    pub issuer: String,

    /// The URL this request is sent to.
    pub destination: Option<String>,

    /// The principal being logged out.
    pub name_id: NameId,

    /// Session indexes to terminate; empty means all sessions.
    pub session_indexes: Vec<String>,

    /// Time after which the request is stale.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Reason URI.
    pub reason: Option<String>,
}

impl LogoutRequest {
    /// Creates a logout request for a principal.
    #[must_use]
    pub fn new(id: impl Into<String>, issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            id: id.into(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            name_id,
            session_indexes: Vec::new(),
            not_on_or_after: None,
            reason: None,
        }
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the expiry instant.
    #[must_use]
    pub const fn not_on_or_after(mut self, instant: DateTime<Utc>) -> Self {
        self.not_on_or_after = Some(instant);
        self
    }

    /// Parses a logout request document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a well-formed `LogoutRequest`.
    pub fn parse(document: &str) -> SamlResult<Self> {
        Self::from_element(&xml::parse(document)?)
    }

    /// Reads a `LogoutRequest` element.
    ///
    /// # Errors
    ///
    /// See [`LogoutRequest::parse`].
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        expect_root(element, "LogoutRequest")?;
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: instant_attr(element, "IssueInstant")?.ok_or_else(|| {
                SamlError::MissingElement("LogoutRequest@IssueInstant".to_string())
            })?,
            issuer: element
                .child_text("Issuer")
                .ok_or_else(|| SamlError::MissingElement("LogoutRequest/Issuer".to_string()))?
                .to_string(),
            destination: element.attr("Destination").map(String::from),
            name_id: element
                .child("NameID")
                .map(NameId::from_element)
                .ok_or_else(|| SamlError::MissingElement("LogoutRequest/NameID".to_string()))?,
            session_indexes: element
                .children_named("SessionIndex")
                .map(|e| e.trimmed_text().to_string())
                .collect(),
            not_on_or_after: instant_attr(element, "NotOnOrAfter")?,
            reason: element.attr("Reason").map(String::from),
        })
    }

    /// Serializes the request without a signature.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut attrs = format!(
            r#" ID="{}" Version="2.0" IssueInstant="{}""#,
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        if let Some(destination) = &self.destination {
            attrs.push_str(&format!(r#" Destination="{}""#, escape(destination)));
        }
        if let Some(instant) = self.not_on_or_after {
            attrs.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(instant)));
        }
        if let Some(reason) = &self.reason {
            attrs.push_str(&format!(r#" Reason="{}""#, escape(reason)));
        }
        let indexes: String = self
            .session_indexes
            .iter()
            .map(|i| format!("<samlp:SessionIndex>{}</samlp:SessionIndex>", escape(i)))
            .collect();
        format!(
            r#"<samlp:LogoutRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}"{attrs}><saml:Issuer>{}</saml:Issuer>{}{indexes}</samlp:LogoutRequest>"#,
            escape(&self.issuer),
            self.name_id.to_xml()
        )
    }
}

/// SAML Logout Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutResponse {
    /// Unique identifier for this response.
    pub id: String,

    /// The ID of the logout request this responds to.
    pub in_response_to: Option<String>,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the issuer.
    pub issuer: String,

    /// The URL this response is sent to.
    pub destination: Option<String>,

    /// Outcome of the logout.
    pub status: Status,
}

impl LogoutResponse {
    /// Creates a logout response.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        issuer: impl Into<String>,
        in_response_to: Option<String>,
        status: Status,
    ) -> Self {
        Self {
            id: id.into(),
            in_response_to,
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            status,
        }
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Parses a logout response document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a well-formed `LogoutResponse`.
    pub fn parse(document: &str) -> SamlResult<Self> {
        Self::from_element(&xml::parse(document)?)
    }

    /// Reads a `LogoutResponse` element.
    ///
    /// # Errors
    ///
    /// See [`LogoutResponse::parse`].
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        expect_root(element, "LogoutResponse")?;
        let status = element
            .child("Status")
            .ok_or_else(|| SamlError::MissingElement("LogoutResponse/Status".to_string()))?;
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            in_response_to: element.attr("InResponseTo").map(String::from),
            issue_instant: instant_attr(element, "IssueInstant")?.ok_or_else(|| {
                SamlError::MissingElement("LogoutResponse@IssueInstant".to_string())
            })?,
            issuer: element
                .child_text("Issuer")
                .ok_or_else(|| SamlError::MissingElement("LogoutResponse/Issuer".to_string()))?
                .to_string(),
            destination: element.attr("Destination").map(String::from),
            status: Status::from_element(status)?,
        })
    }

    /// Serializes the response without a signature.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut attrs = format!(
            r#" ID="{}" Version="2.0" IssueInstant="{}""#,
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        if let Some(in_response_to) = &self.in_response_to {
            attrs.push_str(&format!(r#" InResponseTo="{}""#, escape(in_response_to)));
        }
        if let Some(destination) = &self.destination {
            attrs.push_str(&format!(r#" Destination="{}""#, escape(destination)));
        }
        format!(
            r#"<samlp:LogoutResponse xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}"{attrs}><saml:Issuer>{}</saml:Issuer>{}</samlp:LogoutResponse>"#,
            escape(&self.issuer),
            self.status.to_xml()
        )
    }
}

fn expect_root(element: &Element, name: &str) -> SamlResult<()> {
    if element.local_name() != name {
        return Err(SamlError::InvalidMessage(format!(
            "expected {name}, found {}",
            element.local_name()
        )));
    }
    check_version(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{sub_status_codes, NameIdFormat};

    #[test]
    fn logout_request_reads_back() {
        let request = LogoutRequest::new(
            "_lo1",
            "https://sp.example.com",
            NameId::new("alice").with_format(NameIdFormat::Persistent.uri()),
        )
        .with_destination("https://idp.example.org/slo")
        .with_session_index("s-1")
        .with_session_index("s-2");

        let parsed = LogoutRequest::parse(&request.to_xml()).unwrap();
        assert_eq!(parsed.id, "_lo1");
        assert_eq!(parsed.session_indexes, vec!["s-1", "s-2"]);
        assert_eq!(parsed.name_id.value, "alice");
        assert_eq!(parsed.destination.as_deref(), Some("https://idp.example.org/slo"));
    }

    #[test]
    fn logout_request_requires_name_id() {
        let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x" Version="2.0" IssueInstant="2024-05-01T12:00:00Z"><Issuer>idp</Issuer></samlp:LogoutRequest>"#;
        assert!(matches!(
            LogoutRequest::parse(xml),
            Err(SamlError::MissingElement(_))
        ));
    }

    #[test]
    fn logout_response_reads_back() {
        let response = LogoutResponse::new(
            "_lr1",
            "https://idp.example.org",
            Some("_lo1".to_string()),
            Status::success().with_sub_code(sub_status_codes::PARTIAL_LOGOUT),
        );
        let parsed = LogoutResponse::parse(&response.to_xml()).unwrap();
        assert_eq!(parsed.in_response_to.as_deref(), Some("_lo1"));
        assert!(parsed.status.is_success());
        assert_eq!(parsed.status.status_code.most_specific(), sub_status_codes::PARTIAL_LOGOUT);
    }

    #[test]
    fn logout_response_is_not_a_request() {
        let response = LogoutResponse::new("_lr", "idp", None, Status::success());
        assert!(LogoutRequest::parse(&response.to_xml()).is_err());
    }
}
