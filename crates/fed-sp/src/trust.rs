//! Trusted identity providers.
//!
//! The [`TrustConfigStore`] holds an immutable [`TrustSnapshot`] behind an
//! `Arc`. Writers build a new snapshot and swap it in; readers clone the
//! `Arc` and keep validating against the configuration they started with,
//! whatever refresh completes meanwhile.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use fed_crypto::PublicKey;
use fed_saml::metadata::{IdpDescriptor, LogoutEndpoint};
use fed_saml::Binding;
use parking_lot::RwLock;

use crate::config::IdpConfig;
use crate::error::{FederationError, FederationResult};

/// Where a provider entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderSource {
    /// Configured individually.
    Static,
    /// Imported from the named federation's metadata.
    Federation(String),
}

/// Settings a federation applies to every provider it imports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderDefaults {
    /// Translation profile name.
    pub translation_profile: Option<String>,
    /// Registration form name.
    pub registration_form: Option<String>,
    /// Whether requests are signed.
    pub sign_request: Option<bool>,
    /// Preferred request binding.
    pub binding: Option<Binding>,
    /// NameID format to request.
    pub requested_name_format: Option<String>,
}

/// An identity provider this SP accepts assertions from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedProvider {
    /// Selection key.
    pub key: String,
    /// Entity ID, unique within a store.
    pub entity_id: String,
    /// Name shown to users.
    pub display_name: Option<String>,
    /// Keys that may sign this provider's messages.
    pub certificates: Vec<PublicKey>,
    /// NameID formats the provider may assert.
    pub trusted_name_formats: Vec<String>,
    /// NameID format to request.
    pub requested_name_format: Option<String>,
    /// Whether requests are signed. `None` defers to the instance default.
    pub sign_request: Option<bool>,
    /// Accept messages without verifying their signature.
    pub skip_signature_verification: bool,
    /// Preferred request binding.
    pub binding: Option<Binding>,
    /// Single sign-on endpoints.
    pub binding_endpoints: BTreeMap<Binding, String>,
    /// Single logout endpoints.
    pub logout_endpoints: BTreeMap<Binding, LogoutEndpoint>,
    /// Translation profile name.
    pub translation_profile: Option<String>,
    /// Registration form name.
    pub registration_form: Option<String>,
    /// Origin of the entry.
    pub source: ProviderSource,
}

impl TrustedProvider {
    /// Builds a provider from its configuration, reading certificate files.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if a certificate cannot be
    /// read or the resulting provider is invalid.
    pub fn from_config(config: &IdpConfig) -> FederationResult<Self> {
        let certificates = load_certificates(&config.certificates)?;
        let provider = Self {
            key: config.key.clone(),
            entity_id: config.entity_id.clone(),
            display_name: config.display_name.clone(),
            certificates,
            trusted_name_formats: config.trusted_name_formats.clone(),
            requested_name_format: config.requested_name_format.clone(),
            sign_request: config.sign_request,
            skip_signature_verification: config.skip_signature_verification,
            binding: Some(config.binding),
            binding_endpoints: BTreeMap::from([(config.binding, config.sso_url.clone())]),
            logout_endpoints: config.logout_endpoints.clone(),
            translation_profile: config.translation_profile.clone(),
            registration_form: config.registration_form.clone(),
            source: ProviderSource::Static,
        };
        provider.validate()?;
        Ok(provider)
    }

    /// Builds a provider from a metadata entry. The entity ID is the key.
    #[must_use]
    pub fn from_descriptor(
        descriptor: IdpDescriptor,
        defaults: &ProviderDefaults,
        federation: &str,
    ) -> Self {
        Self {
            key: descriptor.entity_id.clone(),
            entity_id: descriptor.entity_id,
            display_name: descriptor.display_name,
            certificates: descriptor.signing_keys,
            trusted_name_formats: descriptor.name_id_formats,
            requested_name_format: defaults.requested_name_format.clone(),
            sign_request: defaults
                .sign_request
                .or(descriptor.want_authn_requests_signed.then_some(true)),
            skip_signature_verification: false,
            binding: defaults.binding,
            binding_endpoints: descriptor.sso_endpoints,
            logout_endpoints: descriptor.slo_endpoints,
            translation_profile: defaults.translation_profile.clone(),
            registration_form: defaults.registration_form.clone(),
            source: ProviderSource::Federation(federation.to_string()),
        }
    }

    /// Checks that the provider is usable.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] naming the first violation.
    pub fn validate(&self) -> FederationResult<()> {
        if self.key.is_empty() || self.entity_id.is_empty() {
            return Err(FederationError::Configuration(
                "identity provider key and entity id must not be empty".to_string(),
            ));
        }
        if self.signature_required() && self.certificates.is_empty() {
            return Err(FederationError::Configuration(format!(
                "identity provider '{}' requires signatures but has no certificate",
                self.key
            )));
        }
        if self.sso_endpoint().is_none() {
            return Err(FederationError::Configuration(format!(
                "identity provider '{}' has no usable single sign-on endpoint",
                self.key
            )));
        }
        Ok(())
    }

    /// Returns true if this provider's signatures are checked.
    #[must_use]
    pub const fn signature_required(&self) -> bool {
        !self.skip_signature_verification
    }

    /// Picks the single sign-on endpoint: the preferred binding if the
    /// provider offers it, then Redirect, then POST.
    #[must_use]
    pub fn sso_endpoint(&self) -> Option<(Binding, &str)> {
        self.binding
            .into_iter()
            .chain([Binding::HttpRedirect, Binding::HttpPost])
            .filter(Binding::is_front_channel)
            .find_map(|binding| {
                self.binding_endpoints
                    .get(&binding)
                    .map(|url| (binding, url.as_str()))
            })
    }

    /// Returns the logout endpoint for a binding.
    #[must_use]
    pub fn logout_endpoint(&self, binding: Binding) -> Option<&LogoutEndpoint> {
        self.logout_endpoints.get(&binding)
    }

    /// Picks the browser logout endpoint, Redirect first.
    #[must_use]
    pub fn front_channel_logout(&self) -> Option<(Binding, &LogoutEndpoint)> {
        [Binding::HttpRedirect, Binding::HttpPost]
            .into_iter()
            .find_map(|binding| self.logout_endpoint(binding).map(|ep| (binding, ep)))
    }
}

/// Reads every certificate from a list of PEM files.
///
/// # Errors
///
/// Returns [`FederationError::Configuration`] if a file cannot be read or
/// holds no usable certificate.
pub fn load_certificates(paths: &[PathBuf]) -> FederationResult<Vec<PublicKey>> {
    let mut keys = Vec::new();
    for path in paths {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            FederationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let found = PublicKey::from_certificate_pem(&pem).map_err(|e| {
            FederationError::Configuration(format!("invalid certificate {}: {e}", path.display()))
        })?;
        if found.is_empty() {
            return Err(FederationError::Configuration(format!(
                "no certificate in {}",
                path.display()
            )));
        }
        keys.extend(found);
    }
    Ok(keys)
}

/// An immutable view of the trusted providers.
#[derive(Debug, Clone, Default)]
pub struct TrustSnapshot {
    providers: BTreeMap<String, Arc<TrustedProvider>>,
    by_entity: HashMap<String, String>,
}

impl TrustSnapshot {
    /// Looks a provider up by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<TrustedProvider>> {
        self.providers.get(key)
    }

    /// Looks a provider up by entity ID.
    #[must_use]
    pub fn find_by_entity_id(&self, entity_id: &str) -> Option<&Arc<TrustedProvider>> {
        self.by_entity
            .get(entity_id)
            .and_then(|key| self.providers.get(key))
    }

    /// Returns the only provider, if exactly one is configured.
    #[must_use]
    pub fn sole_provider(&self) -> Option<&Arc<TrustedProvider>> {
        let mut providers = self.providers.values();
        match (providers.next(), providers.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Iterates over the providers in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TrustedProvider>> {
        self.providers.values()
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn insert(&mut self, provider: TrustedProvider) {
        self.by_entity
            .insert(provider.entity_id.clone(), provider.key.clone());
        self.providers.insert(provider.key.clone(), Arc::new(provider));
    }

    fn remove(&mut self, key: &str) -> Option<Arc<TrustedProvider>> {
        let removed = self.providers.remove(key)?;
        self.by_entity.remove(&removed.entity_id);
        Some(removed)
    }

    /// Returns why `provider` cannot join this snapshot, if it cannot.
    fn conflict(&self, provider: &TrustedProvider) -> Option<String> {
        if let Some(existing) = self.providers.get(&provider.key) {
            if existing.source != provider.source {
                return Some(format!("key '{}' is already taken", provider.key));
            }
        }
        match self.by_entity.get(&provider.entity_id) {
            Some(owner) if *owner != provider.key => Some(format!(
                "entity id '{}' is already trusted as '{owner}'",
                provider.entity_id
            )),
            _ => None,
        }
    }
}

/// Outcome of replacing a federation's providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceUpdate {
    /// Providers now trusted from the source.
    pub applied: usize,
    /// Providers that were not applied, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Process-wide store of trusted providers.
#[derive(Debug, Default)]
pub struct TrustConfigStore {
    current: RwLock<Arc<TrustSnapshot>>,
}

impl TrustConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrustSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Looks a provider up by key in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::ProviderNotFound`] if there is none.
    pub fn get_provider(&self, key: &str) -> FederationResult<Arc<TrustedProvider>> {
        self.snapshot()
            .get(key)
            .cloned()
            .ok_or_else(|| FederationError::ProviderNotFound(key.to_string()))
    }

    /// Adds or replaces a provider.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if the provider is invalid
    /// or its entity ID is trusted under another key.
    pub fn replace_provider(&self, provider: TrustedProvider) -> FederationResult<()> {
        provider.validate()?;
        let mut current = self.current.write();
        let mut next = TrustSnapshot::clone(&current);
        if let Some(reason) = next.conflict(&provider) {
            return Err(FederationError::Configuration(reason));
        }
        next.remove(&provider.key);
        next.insert(provider);
        *current = Arc::new(next);
        Ok(())
    }

    /// Removes a provider. Returns true if it was present.
    pub fn remove_provider(&self, key: &str) -> bool {
        let mut current = self.current.write();
        if current.get(key).is_none() {
            return false;
        }
        let mut next = TrustSnapshot::clone(&current);
        next.remove(key);
        *current = Arc::new(next);
        true
    }

    /// Replaces every provider imported from `source` in one swap.
    ///
    /// Entries that collide with a provider from another source are
    /// skipped, so individually configured providers always win over
    /// federation entries.
    pub fn replace_source(
        &self,
        source: &ProviderSource,
        providers: Vec<TrustedProvider>,
    ) -> SourceUpdate {
        let mut update = SourceUpdate::default();
        let mut current = self.current.write();
        let mut next = TrustSnapshot::clone(&current);

        let stale: Vec<String> = next
            .iter()
            .filter(|p| p.source == *source)
            .map(|p| p.key.clone())
            .collect();
        for key in &stale {
            next.remove(key);
        }

        for provider in providers {
            let outcome = if provider.source == *source {
                provider
                    .validate()
                    .map_err(|e| e.to_string())
                    .and_then(|()| next.conflict(&provider).map_or(Ok(()), Err))
                    .and_then(|()| {
                        if next.get(&provider.key).is_some() {
                            Err(format!("duplicate entry '{}'", provider.key))
                        } else {
                            Ok(())
                        }
                    })
            } else {
                Err("entry does not belong to this source".to_string())
            };
            match outcome {
                Ok(()) => {
                    next.insert(provider);
                    update.applied += 1;
                }
                Err(reason) => {
                    tracing::debug!(provider = %provider.key, %reason, "Skipping provider entry");
                    update.skipped.push((provider.key, reason));
                }
            }
        }

        *current = Arc::new(next);
        update
    }
}
