//! SAML Response types.

use chrono::{DateTime, Utc};

use super::{check_version, format_instant, instant_attr, required_attr, Assertion, Status};
use super::{SAMLP_NS, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{self, escape, Element};

/// SAML Response to an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// The ID of the request this responds to.
    pub in_response_to: Option<String>,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The URL this response was sent to.
    pub destination: Option<String>,

    /// The entity ID of the issuer.
    pub issuer: Option<String>,

    /// Response status.
    pub status: Status,

    /// Plain assertions carried in the response.
    pub assertions: Vec<Assertion>,

    /// Whether the response element carries its own enveloped signature.
    pub signed: bool,
}

impl Response {
    /// Parses a response document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not well-formed, is not a
    /// `Response`, or lacks mandatory parts. Encrypted assertions are
    /// refused.
    pub fn parse(document: &str) -> SamlResult<Self> {
        let root = xml::parse(document)?;
        Self::from_element(&root)
    }

    /// Reads a `Response` element.
    ///
    /// # Errors
    ///
    /// See [`Response::parse`].
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        if element.local_name() != "Response" {
            return Err(SamlError::InvalidMessage(format!(
                "expected Response, found {}",
                element.local_name()
            )));
        }
        check_version(element)?;
        if element.child("EncryptedAssertion").is_some() {
            return Err(SamlError::InvalidMessage(
                "encrypted assertions are not supported".to_string(),
            ));
        }

        let status = element
            .child("Status")
            .ok_or_else(|| SamlError::MissingElement("Response/Status".to_string()))?;

        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            in_response_to: element.attr("InResponseTo").map(String::from),
            issue_instant: instant_attr(element, "IssueInstant")?
                .ok_or_else(|| SamlError::MissingElement("Response@IssueInstant".to_string()))?,
            destination: element.attr("Destination").map(String::from),
            issuer: element.child_text("Issuer").map(String::from),
            status: Status::from_element(status)?,
            assertions: element
                .children_named("Assertion")
                .map(Assertion::from_element)
                .collect::<SamlResult<Vec<_>>>()?,
            signed: element.has_signature(),
        })
    }

    /// Returns the first assertion.
    #[must_use]
    pub fn assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Returns the issuer of the response, falling back to the assertion's.
    #[must_use]
    pub fn effective_issuer(&self) -> Option<&str> {
        self.issuer
            .as_deref()
            .or_else(|| self.assertion().map(|a| a.issuer.as_str()))
    }

    /// Serializes the response without a signature on the response element.
    ///
    /// Assertions are embedded as given in `assertion_xml`, which lets the
    /// caller sign them first.
    #[must_use]
    pub fn to_xml_with(&self, assertion_xml: &[String]) -> String {
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
        let issuer = self
            .issuer
            .as_deref()
            .map(|i| format!("<saml:Issuer>{}</saml:Issuer>", escape(i)))
            .unwrap_or_default();
        format!(
            r#"<samlp:Response xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}"{attrs}>{issuer}{}{}</samlp:Response>"#,
            self.status.to_xml(),
            assertion_xml.concat()
        )
    }

    /// Serializes the response and its assertions without signatures.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let assertions: Vec<String> = self.assertions.iter().map(Assertion::to_xml).collect();
        self.to_xml_with(&assertions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NameId, Subject};
    use chrono::TimeZone;

    fn sample() -> Response {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Response {
            id: "_resp".to_string(),
            in_response_to: Some("_req".to_string()),
            issue_instant: instant,
            destination: Some("https://sp.example.com/saml/acs".to_string()),
            issuer: Some("https://idp.example.org".to_string()),
            status: Status::success(),
            assertions: vec![Assertion {
                id: "_assert".to_string(),
                issue_instant: instant,
                issuer: "https://idp.example.org".to_string(),
                subject: Some(Subject {
                    name_id: Some(NameId::new("alice")),
                    confirmations: Vec::new(),
                }),
                conditions: None,
                authn_statements: Vec::new(),
                attributes: Vec::new(),
                signed: false,
            }],
            signed: false,
        }
    }

    #[test]
    fn parses_serialized_response() {
        let response = sample();
        let parsed = Response::parse(&response.to_xml()).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.assertion().unwrap().name_id().unwrap().value, "alice");
        assert_eq!(parsed.effective_issuer(), Some("https://idp.example.org"));
    }

    #[test]
    fn issuer_falls_back_to_assertion() {
        let mut response = sample();
        response.issuer = None;
        let parsed = Response::parse(&response.to_xml()).unwrap();
        assert_eq!(parsed.effective_issuer(), Some("https://idp.example.org"));
    }

    #[test]
    fn rejects_other_root_elements() {
        let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x" Version="2.0"/>"#;
        assert!(matches!(Response::parse(xml), Err(SamlError::InvalidMessage(_))));
    }

    #[test]
    fn rejects_encrypted_assertions() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r" Version="2.0" IssueInstant="2024-05-01T12:00:00Z"><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status><saml:EncryptedAssertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"/></samlp:Response>"#;
        assert!(matches!(Response::parse(xml), Err(SamlError::InvalidMessage(_))));
    }

    #[test]
    fn rejects_wrong_version() {
        let xml = r#"<Response ID="_r" Version="1.1" IssueInstant="2024-05-01T12:00:00Z"><Status><StatusCode Value="x"/></Status></Response>"#;
        assert!(Response::parse(xml).is_err());
    }
}
