//! Service provider configuration.
//!
//! The configuration is a JSON document. Every optional setting has a
//! default applied through `serde(default = ...)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fed_saml::metadata::LogoutEndpoint;
use fed_saml::Binding;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult};

/// Settings of a remote-authentication verificator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpConfig {
    /// Entity ID of this service provider.
    pub requester_id: String,

    /// Public base URL, used to build endpoint addresses.
    pub base_url: String,

    /// Path of the assertion consumer service.
    #[serde(default = "default_acs_path")]
    pub acs_path: String,

    /// Signing credential.
    #[serde(default)]
    pub credential: Option<CredentialConfig>,

    /// Whether requests are signed when the provider does not say.
    #[serde(default)]
    pub sign_requests_by_default: bool,

    /// NameID format requested when the provider does not specify one.
    #[serde(default)]
    pub default_requested_name_format: Option<String>,

    /// NameID formats accepted from every provider.
    #[serde(default)]
    pub accepted_name_formats: Vec<String>,

    /// Whether the assertion itself must be signed.
    #[serde(default)]
    pub require_signed_assertion: bool,

    /// Tolerated clock difference, in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Length of the replay window, in seconds.
    #[serde(default = "default_replay_window")]
    pub replay_window_secs: u64,

    /// Lifetime of an unanswered login context, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Upper bound of a metadata download, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub metadata_fetch_timeout_secs: u64,

    /// What happens when a login starts while another is in flight.
    #[serde(default)]
    pub in_flight_login_policy: InFlightLoginPolicy,

    /// Federations whose metadata is imported.
    #[serde(default)]
    pub trusted_federations: Vec<FederationConfig>,

    /// Individually configured identity providers.
    #[serde(default)]
    pub trusted_idps: Vec<IdpConfig>,

    /// Publication of this SP's own metadata.
    #[serde(default)]
    pub metadata_publishing: MetadataPublishingConfig,

    /// Single logout settings.
    #[serde(default)]
    pub slo: SloConfig,
}

/// PEM files of the signing credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// PKCS#8 private key.
    pub private_key: PathBuf,
    /// Certificate matching the key.
    #[serde(default)]
    pub certificate: Option<PathBuf>,
}

/// A federation metadata source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Name of the federation, used in logs.
    pub name: String,

    /// `http(s)://` or `file:` address of the metadata document.
    pub url: String,

    /// PEM bundle of additional trusted TLS roots.
    #[serde(default)]
    pub https_truststore: Option<PathBuf>,

    /// Accept the document without checking its signature.
    #[serde(default)]
    pub ignore_signature_verification: bool,

    /// Certificate the document must be signed with.
    #[serde(default)]
    pub signature_verification_certificate: Option<PathBuf>,

    /// Seconds between refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Translation profile applied to this federation's providers.
    #[serde(default)]
    pub translation_profile: Option<String>,

    /// Registration form offered to unknown users.
    #[serde(default)]
    pub registration_form: Option<String>,

    /// Whether requests to this federation's providers are signed.
    #[serde(default)]
    pub sign_requests: Option<bool>,

    /// Preferred request binding.
    #[serde(default)]
    pub binding: Option<Binding>,

    /// NameID format requested from this federation's providers.
    #[serde(default)]
    pub requested_name_format: Option<String>,
}

/// An individually configured identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Key used to select the provider.
    pub key: String,

    /// Entity ID of the provider.
    pub entity_id: String,

    /// Name shown to users.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Single sign-on service address.
    pub sso_url: String,

    /// Binding of the single sign-on service.
    #[serde(default = "default_idp_binding")]
    pub binding: Binding,

    /// Whether requests are signed. Falls back to the instance default.
    #[serde(default)]
    pub sign_request: Option<bool>,

    /// PEM certificates whose keys may sign responses.
    #[serde(default)]
    pub certificates: Vec<PathBuf>,

    /// NameID format to request.
    #[serde(default)]
    pub requested_name_format: Option<String>,

    /// NameID formats this provider may assert.
    #[serde(default)]
    pub trusted_name_formats: Vec<String>,

    /// Accept unsigned responses from this provider.
    #[serde(default)]
    pub skip_signature_verification: bool,

    /// Translation profile for this provider's assertions.
    #[serde(default)]
    pub translation_profile: Option<String>,

    /// Registration form offered to unknown users.
    #[serde(default)]
    pub registration_form: Option<String>,

    /// Logout endpoints per binding.
    #[serde(default)]
    pub logout_endpoints: BTreeMap<Binding, LogoutEndpoint>,
}

/// Publication of the SP's metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPublishingConfig {
    /// Whether the document is served at all.
    #[serde(default)]
    pub publish: bool,

    /// Path the document is served at.
    #[serde(default = "default_metadata_path")]
    pub path: String,

    /// Whether the document is signed.
    #[serde(default)]
    pub sign: bool,

    /// Generate the document when no file is configured.
    #[serde(default = "default_true")]
    pub auto_generate: bool,

    /// Static metadata document.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for MetadataPublishingConfig {
    fn default() -> Self {
        Self {
            publish: false,
            path: default_metadata_path(),
            sign: false,
            auto_generate: true,
            file: None,
        }
    }
}

/// Single logout settings. Logout is enabled only when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SloConfig {
    /// Path of the single logout service.
    #[serde(default)]
    pub path: Option<String>,
    /// Realm whose sessions are terminated.
    #[serde(default)]
    pub realm: Option<String>,
}

/// Behaviour when a login starts while another one is unanswered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightLoginPolicy {
    /// Discard the old context and log a warning.
    #[default]
    Replace,
    /// Refuse the new attempt.
    Reject,
}

impl SpConfig {
    /// Creates a configuration with defaults for everything but the
    /// identity of the SP.
    #[must_use]
    pub fn new(requester_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            base_url: base_url.into(),
            acs_path: default_acs_path(),
            credential: None,
            sign_requests_by_default: false,
            default_requested_name_format: None,
            accepted_name_formats: Vec::new(),
            require_signed_assertion: false,
            clock_skew_secs: default_clock_skew(),
            replay_window_secs: default_replay_window(),
            session_ttl_secs: default_session_ttl(),
            metadata_fetch_timeout_secs: default_fetch_timeout(),
            in_flight_login_policy: InFlightLoginPolicy::default(),
            trusted_federations: Vec::new(),
            trusted_idps: Vec::new(),
            metadata_publishing: MetadataPublishingConfig::default(),
            slo: SloConfig::default(),
        }
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if the document is invalid.
    pub fn from_json(json: &str) -> FederationResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FederationError::Configuration(format!("invalid configuration: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if the file cannot be read
    /// or is invalid.
    pub fn from_file(path: &Path) -> FederationResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            FederationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn check(&self) -> FederationResult<()> {
        if self.requester_id.trim().is_empty() {
            return Err(FederationError::Configuration(
                "requester_id must not be empty".to_string(),
            ));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            FederationError::Configuration(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        Ok(())
    }

    /// Address of the assertion consumer service.
    #[must_use]
    pub fn acs_url(&self) -> String {
        join_url(&self.base_url, &self.acs_path)
    }

    /// Address of the single logout service, when logout is enabled.
    #[must_use]
    pub fn slo_url(&self) -> Option<String> {
        self.slo_enabled()
            .then(|| self.slo.path.as_deref().map(|path| join_url(&self.base_url, path)))
            .flatten()
    }

    /// Address of the SOAP single logout service, when logout is enabled.
    #[must_use]
    pub fn slo_soap_url(&self) -> Option<String> {
        self.slo_url().map(|url| format!("{url}/soap"))
    }

    /// Returns true if both the logout path and realm are set.
    #[must_use]
    pub fn slo_enabled(&self) -> bool {
        self.slo.path.is_some() && self.slo.realm.is_some()
    }

    /// Returns the clock skew tolerance.
    #[must_use]
    pub fn clock_skew(&self) -> chrono::Duration {
        seconds(self.clock_skew_secs)
    }

    /// Returns the replay window.
    #[must_use]
    pub fn replay_window(&self) -> chrono::Duration {
        seconds(self.replay_window_secs)
    }

    /// Returns the login context lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        seconds(self.session_ttl_secs)
    }

    /// Returns the metadata fetch timeout.
    #[must_use]
    pub const fn metadata_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_fetch_timeout_secs)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn default_acs_path() -> String {
    "/saml/acs".to_string()
}

fn default_metadata_path() -> String {
    "/saml/metadata".to_string()
}

const fn default_clock_skew() -> u64 {
    120
}

const fn default_replay_window() -> u64 {
    600
}

const fn default_session_ttl() -> u64 {
    600
}

const fn default_fetch_timeout() -> u64 {
    30
}

const fn default_refresh_interval() -> u64 {
    3600
}

const fn default_idp_binding() -> Binding {
    Binding::HttpRedirect
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config = SpConfig::from_json(
            r#"{
                "requester_id": "https://sp.example.com",
                "base_url": "https://sp.example.com/",
                "trusted_idps": [{
                    "key": "idp1",
                    "entity_id": "https://idp1.example.org",
                    "sso_url": "https://idp1.example.org/sso"
                }],
                "trusted_federations": [{
                    "name": "edu",
                    "url": "file:/etc/federation.xml"
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.acs_url(), "https://sp.example.com/saml/acs");
        assert_eq!(config.clock_skew(), chrono::Duration::seconds(120));
        assert_eq!(config.replay_window(), chrono::Duration::minutes(10));
        assert_eq!(config.session_ttl(), chrono::Duration::minutes(10));
        assert_eq!(config.metadata_fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.in_flight_login_policy, InFlightLoginPolicy::Replace);
        assert_eq!(config.trusted_idps[0].binding, Binding::HttpRedirect);
        assert_eq!(config.trusted_federations[0].refresh_interval_secs, 3600);
        assert!(config.metadata_publishing.auto_generate);
        assert_eq!(config.metadata_publishing.path, "/saml/metadata");
        assert!(!config.slo_enabled());
        assert_eq!(config.slo_url(), None);
    }

    #[test]
    fn logout_needs_path_and_realm() {
        let mut config = SpConfig::new("sp", "https://sp.example.com");
        config.slo.path = Some("/saml/slo".to_string());
        assert!(!config.slo_enabled());

        config.slo.realm = Some("main".to_string());
        assert_eq!(config.slo_url().as_deref(), Some("https://sp.example.com/saml/slo"));
        assert_eq!(
            config.slo_soap_url().as_deref(),
            Some("https://sp.example.com/saml/slo/soap")
        );
    }

    #[test]
    fn parses_bindings_and_policy() {
        let config = SpConfig::from_json(
            r#"{
                "requester_id": "sp",
                "base_url": "http://localhost:8080",
                "in_flight_login_policy": "reject",
                "trusted_idps": [{
                    "key": "idp1",
                    "entity_id": "idp",
                    "sso_url": "http://idp/sso",
                    "binding": "post",
                    "logout_endpoints": {
                        "soap": { "location": "http://idp/slo/soap" }
                    }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.in_flight_login_policy, InFlightLoginPolicy::Reject);
        let idp = &config.trusted_idps[0];
        assert_eq!(idp.binding, Binding::HttpPost);
        assert_eq!(
            idp.logout_endpoints[&Binding::Soap].location,
            "http://idp/slo/soap"
        );
    }

    #[test]
    fn rejects_invalid_documents() {
        assert!(SpConfig::from_json("{}").unwrap_err().is_configuration());
        assert!(SpConfig::from_json(r#"{"requester_id": " ", "base_url": "http://x"}"#).is_err());
        assert!(SpConfig::from_json(r#"{"requester_id": "sp", "base_url": "not a url"}"#).is_err());
    }
}
