//! SAML AuthnRequest types.
//!
//! Authentication request message sent by this service provider to an
//! identity provider.

use chrono::{DateTime, Utc};

use super::{format_instant, Binding, SAMLP_NS, SAML_NS};
use crate::xml::escape;

/// SAML Authentication Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the service provider issuing the request.
    pub issuer: String,

    /// The IdP endpoint the request is addressed to.
    pub destination: Option<String>,

    /// The URL where the response should be sent.
    pub assertion_consumer_service_url: Option<String>,

    /// Binding the IdP should use for the response.
    pub protocol_binding: Option<Binding>,

    /// Requested NameID format.
    pub name_id_format: Option<String>,

    /// Whether the IdP may create a new identifier for the principal.
    pub allow_create: bool,

    /// Whether the IdP must authenticate the user directly.
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    pub is_passive: bool,
}

impl AuthnRequest {
    /// Creates a request with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            protocol_binding: None,
            name_id_format: None,
            allow_create: true,
            force_authn: false,
            is_passive: false,
        }
    }

    /// Sets the issue instant.
    #[must_use]
    pub const fn issued_at(mut self, instant: DateTime<Utc>) -> Self {
        self.issue_instant = instant;
        self
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the protocol binding for the response.
    #[must_use]
    pub const fn with_binding(mut self, binding: Binding) -> Self {
        self.protocol_binding = Some(binding);
        self
    }

    /// Sets the requested NameID format.
    #[must_use]
    pub fn with_name_id_format(mut self, format: impl Into<String>) -> Self {
        self.name_id_format = Some(format.into());
        self
    }

    /// Sets force authentication.
    #[must_use]
    pub const fn force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets passive authentication.
    #[must_use]
    pub const fn is_passive(mut self, passive: bool) -> Self {
        self.is_passive = passive;
        self
    }

    /// Serializes the request as an unsigned XML document.
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
        if let Some(acs) = &self.assertion_consumer_service_url {
            attrs.push_str(&format!(
                r#" AssertionConsumerServiceURL="{}""#,
                escape(acs)
            ));
        }
        if let Some(binding) = self.protocol_binding {
            attrs.push_str(&format!(r#" ProtocolBinding="{}""#, binding.uri()));
        }
        if self.force_authn {
            attrs.push_str(r#" ForceAuthn="true""#);
        }
        if self.is_passive {
            attrs.push_str(r#" IsPassive="true""#);
        }

        let name_id_policy = match &self.name_id_format {
            Some(format) => format!(
                r#"<samlp:NameIDPolicy Format="{}" AllowCreate="{}"/>"#,
                escape(format),
                self.allow_create
            ),
            None => format!(r#"<samlp:NameIDPolicy AllowCreate="{}"/>"#, self.allow_create),
        };

        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}"{attrs}><saml:Issuer>{}</saml:Issuer>{name_id_policy}</samlp:AuthnRequest>"#,
            escape(&self.issuer)
        )
    }
}
