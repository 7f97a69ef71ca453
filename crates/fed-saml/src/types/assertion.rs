//! SAML Assertion types.
//!
//! Assertions contain statements about a subject made by an issuer. The SP
//! only ever reads them, so these types are built from parsed XML.

use chrono::{DateTime, Duration, Utc};

use super::{check_version, format_instant, instant_attr, required_attr, NameId, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// Bearer subject confirmation method.
pub const BEARER_METHOD: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// SAML Assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// Timestamp when this assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the identity provider that issued this assertion.
    pub issuer: String,

    /// The subject of this assertion.
    pub subject: Option<Subject>,

    /// Conditions that must be evaluated for the assertion to be valid.
    pub conditions: Option<Conditions>,

    /// Authentication statements.
    pub authn_statements: Vec<AuthnStatement>,

    /// Attributes from all attribute statements, in document order.
    pub attributes: Vec<Attribute>,

    /// Whether this assertion carries its own enveloped signature.
    pub signed: bool,
}

impl Assertion {
    /// Reads an `Assertion` element.
    ///
    /// # Errors
    ///
    /// Returns an error if mandatory parts are missing or malformed.
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        check_version(element)?;
        let id = required_attr(element, "ID")?.to_string();
        let issue_instant = instant_attr(element, "IssueInstant")?
            .ok_or_else(|| SamlError::MissingElement("Assertion@IssueInstant".to_string()))?;
        let issuer = element
            .child_text("Issuer")
            .ok_or_else(|| SamlError::MissingElement("Assertion/Issuer".to_string()))?
            .to_string();

        let subject = element.child("Subject").map(Subject::from_element).transpose()?;
        let conditions = element
            .child("Conditions")
            .map(Conditions::from_element)
            .transpose()?;
        let authn_statements = element
            .children_named("AuthnStatement")
            .map(AuthnStatement::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        let attributes = element
            .children_named("AttributeStatement")
            .flat_map(|statement| statement.children_named("Attribute"))
            .map(Attribute::from_element)
            .collect::<SamlResult<Vec<_>>>()?;

        Ok(Self {
            id,
            issue_instant,
            issuer,
            subject,
            conditions,
            authn_statements,
            attributes,
            signed: element.has_signature(),
        })
    }

    /// Returns the subject's NameID, if any.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.subject.as_ref().and_then(|s| s.name_id.as_ref())
    }

    /// Returns the first authentication statement.
    #[must_use]
    pub fn authn_statement(&self) -> Option<&AuthnStatement> {
        self.authn_statements.first()
    }

    /// Serializes the assertion without a signature.
    ///
    /// The SP never issues assertions; this exists for test identity
    /// providers and sandbox tooling.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut body = format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer));
        if let Some(subject) = &self.subject {
            body.push_str(&subject.to_xml());
        }
        if let Some(conditions) = &self.conditions {
            body.push_str(&conditions.to_xml());
        }
        for statement in &self.authn_statements {
            body.push_str(&statement.to_xml());
        }
        if !self.attributes.is_empty() {
            body.push_str("<saml:AttributeStatement>");
            for attribute in &self.attributes {
                body.push_str(&attribute.to_xml());
            }
            body.push_str("</saml:AttributeStatement>");
        }
        format!(
            r#"<saml:Assertion xmlns:saml="{SAML_NS}" ID="{}" Version="2.0" IssueInstant="{}">{body}</saml:Assertion>"#,
            escape(&self.id),
            format_instant(self.issue_instant)
        )
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// The subject's name identifier.
    pub name_id: Option<NameId>,

    /// Subject confirmations.
    pub confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    fn from_element(element: &Element) -> SamlResult<Self> {
        let confirmations = element
            .children_named("SubjectConfirmation")
            .map(SubjectConfirmation::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self {
            name_id: element.child("NameID").map(NameId::from_element),
            confirmations,
        })
    }

    /// Returns the bearer confirmations.
    pub fn bearer_confirmations(&self) -> impl Iterator<Item = &SubjectConfirmation> {
        self.confirmations.iter().filter(|c| c.method == BEARER_METHOD)
    }

    fn to_xml(&self) -> String {
        let mut body = self.name_id.as_ref().map(NameId::to_xml).unwrap_or_default();
        for confirmation in &self.confirmations {
            body.push_str(&confirmation.to_xml());
        }
        format!("<saml:Subject>{body}</saml:Subject>")
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfirmation {
    /// The confirmation method URI.
    pub method: String,

    /// Confirmation data.
    pub data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            method: required_attr(element, "Method")?.to_string(),
            data: element
                .child("SubjectConfirmationData")
                .map(SubjectConfirmationData::from_element)
                .transpose()?,
        })
    }

    fn to_xml(&self) -> String {
        let data = self
            .data
            .as_ref()
            .map(SubjectConfirmationData::to_xml)
            .unwrap_or_default();
        format!(
            r#"<saml:SubjectConfirmation Method="{}">{data}</saml:SubjectConfirmation>"#,
            escape(&self.method)
        )
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfirmationData {
    /// Time before which the subject cannot be confirmed.
    pub not_before: Option<DateTime<Utc>>,

    /// Time at which the subject can no longer be confirmed.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// The URL to which the assertion may be delivered.
    pub recipient: Option<String>,

    /// The ID of the request this confirms.
    pub in_response_to: Option<String>,
}

impl SubjectConfirmationData {
    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            not_before: instant_attr(element, "NotBefore")?,
            not_on_or_after: instant_attr(element, "NotOnOrAfter")?,
            recipient: element.attr("Recipient").map(String::from),
            in_response_to: element.attr("InResponseTo").map(String::from),
        })
    }

    fn to_xml(&self) -> String {
        let mut attrs = String::new();
        if let Some(not_before) = self.not_before {
            attrs.push_str(&format!(r#" NotBefore="{}""#, format_instant(not_before)));
        }
        if let Some(not_on_or_after) = self.not_on_or_after {
            attrs.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(not_on_or_after)));
        }
        if let Some(recipient) = &self.recipient {
            attrs.push_str(&format!(r#" Recipient="{}""#, escape(recipient)));
        }
        if let Some(in_response_to) = &self.in_response_to {
            attrs.push_str(&format!(r#" InResponseTo="{}""#, escape(in_response_to)));
        }
        format!("<saml:SubjectConfirmationData{attrs}/>")
    }
}

/// Conditions on assertion validity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conditions {
    /// Time before which the assertion is not valid.
    pub not_before: Option<DateTime<Utc>>,

    /// Time at which the assertion expires.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Audience restrictions; each inner list is one restriction element.
    pub audience_restrictions: Vec<Vec<String>>,
}

impl Conditions {
    fn from_element(element: &Element) -> SamlResult<Self> {
        let audience_restrictions = element
            .children_named("AudienceRestriction")
            .map(|restriction| {
                restriction
                    .children_named("Audience")
                    .map(|a| a.trimmed_text().to_string())
                    .collect()
            })
            .collect();
        Ok(Self {
            not_before: instant_attr(element, "NotBefore")?,
            not_on_or_after: instant_attr(element, "NotOnOrAfter")?,
            audience_restrictions,
        })
    }

    /// Returns true if `now` lies in the validity window widened by `skew`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        within_window(self.not_before, self.not_on_or_after, now, skew)
    }

    /// Returns true if every audience restriction admits `audience`.
    #[must_use]
    pub fn admits_audience(&self, audience: &str) -> bool {
        self.audience_restrictions
            .iter()
            .all(|restriction| restriction.iter().any(|a| a == audience))
    }

    fn to_xml(&self) -> String {
        let mut attrs = String::new();
        if let Some(not_before) = self.not_before {
            attrs.push_str(&format!(r#" NotBefore="{}""#, format_instant(not_before)));
        }
        if let Some(not_on_or_after) = self.not_on_or_after {
            attrs.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(not_on_or_after)));
        }
        let mut body = String::new();
        for restriction in &self.audience_restrictions {
            body.push_str("<saml:AudienceRestriction>");
            for audience in restriction {
                body.push_str(&format!("<saml:Audience>{}</saml:Audience>", escape(audience)));
            }
            body.push_str("</saml:AudienceRestriction>");
        }
        format!("<saml:Conditions{attrs}>{body}</saml:Conditions>")
    }
}

/// Returns true if `now` is inside `[not_before - skew, not_on_or_after + skew)`.
#[must_use]
pub fn within_window(
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    skew: Duration,
) -> bool {
    if let Some(not_before) = not_before {
        if now + skew < not_before {
            return false;
        }
    }
    if let Some(not_on_or_after) = not_on_or_after {
        if now - skew >= not_on_or_after {
            return false;
        }
    }
    true
}

/// Authentication statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnStatement {
    /// When the authentication took place.
    pub authn_instant: DateTime<Utc>,

    /// Session index at the IdP, needed for single logout.
    pub session_index: Option<String>,

    /// When the IdP session ends.
    pub session_not_on_or_after: Option<DateTime<Utc>>,
}

impl AuthnStatement {
    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            authn_instant: instant_attr(element, "AuthnInstant")?
                .ok_or_else(|| SamlError::MissingElement("AuthnStatement@AuthnInstant".to_string()))?,
            session_index: element.attr("SessionIndex").map(String::from),
            session_not_on_or_after: instant_attr(element, "SessionNotOnOrAfter")?,
        })
    }

    fn to_xml(&self) -> String {
        let mut attrs = format!(r#" AuthnInstant="{}""#, format_instant(self.authn_instant));
        if let Some(index) = &self.session_index {
            attrs.push_str(&format!(r#" SessionIndex="{}""#, escape(index)));
        }
        if let Some(end) = self.session_not_on_or_after {
            attrs.push_str(&format!(r#" SessionNotOnOrAfter="{}""#, format_instant(end)));
        }
        format!(
            "<saml:AuthnStatement{attrs}><saml:AuthnContext><saml:AuthnContextClassRef>\
             urn:oasis:names:tc:SAML:2.0:ac:classes:unspecified\
             </saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"
        )
    }
}

/// SAML attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,

    /// Name format URI.
    pub name_format: Option<String>,

    /// Human-friendly name.
    pub friendly_name: Option<String>,

    /// Values in document order.
    pub values: Vec<String>,
}

impl Attribute {
    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            name: required_attr(element, "Name")?.to_string(),
            name_format: element.attr("NameFormat").map(String::from),
            friendly_name: element.attr("FriendlyName").map(String::from),
            values: element
                .children_named("AttributeValue")
                .map(|v| v.trimmed_text().to_string())
                .collect(),
        })
    }

    fn to_xml(&self) -> String {
        let mut attrs = format!(r#" Name="{}""#, escape(&self.name));
        if let Some(format) = &self.name_format {
            attrs.push_str(&format!(r#" NameFormat="{}""#, escape(format)));
        }
        if let Some(friendly) = &self.friendly_name {
            attrs.push_str(&format!(r#" FriendlyName="{}""#, escape(friendly)));
        }
        let values: String = self
            .values
            .iter()
            .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", escape(v)))
            .collect();
        format!("<saml:Attribute{attrs}>{values}</saml:Attribute>")
    }
}
