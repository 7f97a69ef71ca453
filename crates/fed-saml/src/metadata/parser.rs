//! Metadata document parsing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fed_crypto::pem::decode_folded_base64;
use fed_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::{parse_instant, Binding, SAMLP_NS};
use crate::xml::{self, Element};

/// A logout endpoint of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutEndpoint {
    /// Where logout requests are sent.
    pub location: String,
    /// Where logout responses are sent, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_location: Option<String>,
}

impl LogoutEndpoint {
    /// Returns the address for logout responses.
    #[must_use]
    pub fn response_url(&self) -> &str {
        self.response_location.as_deref().unwrap_or(&self.location)
    }
}

/// Identity provider described by metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpDescriptor {
    /// Entity ID.
    pub entity_id: String,
    /// Human readable name, when the metadata carries one.
    pub display_name: Option<String>,
    /// Keys the IdP signs with.
    pub signing_keys: Vec<PublicKey>,
    /// Single sign-on endpoints by binding.
    pub sso_endpoints: BTreeMap<Binding, String>,
    /// Single logout endpoints by binding.
    pub slo_endpoints: BTreeMap<Binding, LogoutEndpoint>,
    /// NameID formats the IdP supports.
    pub name_id_formats: Vec<String>,
    /// Whether the IdP wants signed authentication requests.
    pub want_authn_requests_signed: bool,
}

/// An entity that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    /// Entity ID, if it could be read.
    pub entity_id: Option<String>,
    /// Why the entity was skipped.
    pub reason: String,
}

/// Result of parsing a metadata document.
#[derive(Debug, Clone, Default)]
pub struct ParsedMetadata {
    /// `ID` of the root element, used to check its signature.
    pub root_id: Option<String>,
    /// Whether the root element carries an enveloped signature.
    pub signed: bool,
    /// `validUntil` of the root element.
    pub valid_until: Option<DateTime<Utc>>,
    /// Usable identity providers, in document order.
    pub providers: Vec<IdpDescriptor>,
    /// Entries that were skipped.
    pub skipped: Vec<SkippedEntity>,
}

/// Parses an `EntityDescriptor` or `EntitiesDescriptor` document.
///
/// Entities without an identity provider role are ignored. A malformed
/// identity provider entry is reported in [`ParsedMetadata::skipped`]
/// and does not affect the others.
///
/// # Errors
///
/// Returns an error only if the document as a whole cannot be read.
pub fn parse_metadata(document: &str) -> SamlResult<ParsedMetadata> {
    let root = xml::parse(document)?;
    let mut parsed = ParsedMetadata {
        root_id: root.id().map(String::from),
        signed: root.has_signature(),
        valid_until: root.attr("validUntil").map(parse_instant).transpose()?,
        ..ParsedMetadata::default()
    };

    match root.local_name() {
        "EntitiesDescriptor" => collect_entities(&root, &mut parsed),
        "EntityDescriptor" => collect_entity(&root, &mut parsed),
        other => {
            return Err(SamlError::Metadata(format!(
                "unexpected metadata root element {other}"
            )))
        }
    }
    Ok(parsed)
}

fn collect_entities(group: &Element, parsed: &mut ParsedMetadata) {
    for child in &group.children {
        match child.local_name() {
            "EntitiesDescriptor" => collect_entities(child, parsed),
            "EntityDescriptor" => collect_entity(child, parsed),
            _ => {}
        }
    }
}

fn collect_entity(entity: &Element, parsed: &mut ParsedMetadata) {
    let Some(role) = entity.child("IDPSSODescriptor") else {
        return;
    };
    match read_idp(entity, role) {
        Ok(descriptor) => parsed.providers.push(descriptor),
        Err(e) => {
            tracing::debug!(entity_id = ?entity.attr("entityID"), error = %e, "skipping metadata entry");
            parsed.skipped.push(SkippedEntity {
                entity_id: entity.attr("entityID").map(String::from),
                reason: e.to_string(),
            });
        }
    }
}

fn read_idp(entity: &Element, role: &Element) -> SamlResult<IdpDescriptor> {
    let entity_id = entity
        .attr("entityID")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SamlError::Metadata("missing entityID".to_string()))?;

    let protocols = role.attr("protocolSupportEnumeration").unwrap_or_default();
    if !protocols.split_whitespace().any(|p| p == SAMLP_NS) {
        return Err(SamlError::Metadata("IdP does not support SAML 2.0".to_string()));
    }

    let mut signing_keys = Vec::new();
    for descriptor in role.children_named("KeyDescriptor") {
        if !matches!(descriptor.attr("use"), None | Some("signing")) {
            continue;
        }
        let Some(certificate) = descriptor.descendant("X509Certificate") else {
            continue;
        };
        let der = decode_folded_base64(certificate.trimmed_text())
            .ok_or_else(|| SamlError::Metadata("certificate is not base64".to_string()))?;
        let key = PublicKey::from_certificate_der(&der)
            .map_err(|e| SamlError::Metadata(format!("unusable certificate: {e}")))?;
        if !signing_keys.contains(&key) {
            signing_keys.push(key);
        }
    }
    if signing_keys.is_empty() {
        return Err(SamlError::Metadata("no signing certificate".to_string()));
    }

    let mut sso_endpoints = BTreeMap::new();
    for service in role.children_named("SingleSignOnService") {
        if let (Some(binding), Some(location)) = (
            service.attr("Binding").and_then(Binding::from_uri),
            service.attr("Location"),
        ) {
            sso_endpoints.entry(binding).or_insert_with(|| location.to_string());
        }
    }
    sso_endpoints.remove(&Binding::Soap);
    if sso_endpoints.is_empty() {
        return Err(SamlError::Metadata(
            "no single sign-on endpoint with a supported binding".to_string(),
        ));
    }

    let mut slo_endpoints = BTreeMap::new();
    for service in role.children_named("SingleLogoutService") {
        if let (Some(binding), Some(location)) = (
            service.attr("Binding").and_then(Binding::from_uri),
            service.attr("Location"),
        ) {
            slo_endpoints.entry(binding).or_insert_with(|| LogoutEndpoint {
                location: location.to_string(),
                response_location: service.attr("ResponseLocation").map(String::from),
            });
        }
    }

    Ok(IdpDescriptor {
        entity_id: entity_id.to_string(),
        display_name: display_name(entity, role),
        signing_keys,
        sso_endpoints,
        slo_endpoints,
        name_id_formats: role
            .children_named("NameIDFormat")
            .map(|f| f.trimmed_text().to_string())
            .collect(),
        want_authn_requests_signed: role.attr("WantAuthnRequestsSigned") == Some("true"),
    })
}

fn display_name(entity: &Element, role: &Element) -> Option<String> {
    role.child("Extensions")
        .and_then(|ext| ext.descendant("DisplayName"))
        .or_else(|| {
            entity
                .child("Organization")
                .and_then(|org| org.child("OrganizationDisplayName"))
        })
        .map(|e| e.trimmed_text().to_string())
        .filter(|name| !name.is_empty())
}
