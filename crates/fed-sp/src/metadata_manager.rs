//! Federation metadata loading and periodic refresh.
//!
//! Each configured federation gets a [`MetadataManager`]. The first load
//! happens in [`MetadataManager::start`] and must succeed; afterwards a
//! background task refreshes remote documents on a fixed interval. A
//! failed refresh keeps the previously trusted providers in place.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fed_crypto::PublicKey;
use fed_saml::metadata::parse_metadata;
use fed_saml::signature::XmlSignatureValidator;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FederationConfig;
use crate::error::{FederationError, FederationResult};
use crate::trust::{
    load_certificates, ProviderDefaults, ProviderSource, SourceUpdate, TrustConfigStore,
    TrustedProvider,
};

/// Retrieves metadata documents.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Returns the document at `location`.
    async fn fetch(&self, location: &str) -> FederationResult<String>;
}

/// Fetches `http(s)://` and `file:` locations.
#[derive(Debug, Clone)]
pub struct UrlMetadataFetcher {
    client: reqwest::Client,
}

impl UrlMetadataFetcher {
    /// Creates a fetcher. `extra_roots_pem` adds TLS trust anchors to the
    /// system ones.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if a root certificate is
    /// invalid or the client cannot be built.
    pub fn new(timeout: Duration, extra_roots_pem: Option<&str>) -> FederationResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = extra_roots_pem {
            let roots = fed_crypto::pem::pem_blocks(pem, "CERTIFICATE");
            if roots.is_empty() {
                return Err(FederationError::Configuration(
                    "truststore holds no certificates".to_string(),
                ));
            }
            for der in roots {
                let certificate = reqwest::Certificate::from_der(&der).map_err(|e| {
                    FederationError::Configuration(format!("invalid truststore certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }
        let client = builder
            .build()
            .map_err(|e| FederationError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataFetcher for UrlMetadataFetcher {
    async fn fetch(&self, location: &str) -> FederationResult<String> {
        if let Some(path) = location.strip_prefix("file:") {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| FederationError::MetadataFetch(format!("{path}: {e}")));
        }

        let response = self
            .client
            .get(location)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FederationError::MetadataFetch(format!("{location}: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| FederationError::MetadataFetch(format!("{location}: {e}")))
    }
}

/// Where a federation's document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSourceKind {
    /// Local file, loaded once at start.
    StaticFile(PathBuf),
    /// Remote document, refreshed periodically.
    RemoteUrl(String),
}

/// A configured federation.
#[derive(Debug, Clone)]
pub struct FederationMetadataSource {
    /// Federation name.
    pub name: String,
    /// Document location.
    pub kind: MetadataSourceKind,
    /// Time between refreshes of a remote document.
    pub refresh_interval: Duration,
    /// Keys the document must be signed with. `None` skips the check.
    pub verification_keys: Option<Vec<PublicKey>>,
    /// Settings applied to every imported provider.
    pub defaults: ProviderDefaults,
    /// PEM bundle of extra TLS roots.
    pub truststore_pem: Option<String>,
}

impl FederationMetadataSource {
    /// Builds a source from configuration, reading certificate files.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] for an unsupported URL,
    /// a zero refresh interval, a missing verification certificate, or
    /// unreadable certificate files.
    pub fn from_config(config: &FederationConfig) -> FederationResult<Self> {
        let kind = if let Some(path) = config.url.strip_prefix("file:") {
            MetadataSourceKind::StaticFile(PathBuf::from(path))
        } else if config.url.starts_with("https://") || config.url.starts_with("http://") {
            MetadataSourceKind::RemoteUrl(config.url.clone())
        } else {
            return Err(FederationError::Configuration(format!(
                "federation '{}': unsupported metadata location '{}'",
                config.name, config.url
            )));
        };

        if config.refresh_interval_secs == 0 {
            return Err(FederationError::Configuration(format!(
                "federation '{}': refresh interval must be positive",
                config.name
            )));
        }

        let verification_keys = if config.ignore_signature_verification {
            None
        } else {
            let path = config.signature_verification_certificate.as_ref().ok_or_else(|| {
                FederationError::Configuration(format!(
                    "federation '{}': a signature verification certificate is required",
                    config.name
                ))
            })?;
            Some(load_certificates(std::slice::from_ref(path))?)
        };

        let truststore_pem = config
            .https_truststore
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|e| {
                    FederationError::Configuration(format!("truststore {}: {e}", path.display()))
                })
            })
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            kind,
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
            verification_keys,
            defaults: ProviderDefaults {
                translation_profile: config.translation_profile.clone(),
                registration_form: config.registration_form.clone(),
                sign_request: config.sign_requests,
                binding: config.binding,
                requested_name_format: config.requested_name_format.clone(),
            },
            truststore_pem,
        })
    }

    fn provider_source(&self) -> ProviderSource {
        ProviderSource::Federation(self.name.clone())
    }
}

/// Result of a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The document was loaded and its providers swapped in.
    Applied(SourceUpdate),
    /// Another refresh of the same source was still running.
    Skipped,
}

struct Inner {
    source: FederationMetadataSource,
    store: Arc<TrustConfigStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    fetch_timeout: Duration,
    refreshing: AtomicBool,
    last_fetched_at: Mutex<Option<DateTime<Utc>>>,
}

struct Schedule {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps one federation's providers in the trust store current.
pub struct MetadataManager {
    inner: Arc<Inner>,
    schedule: Mutex<Option<Schedule>>,
}

impl std::fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataManager")
            .field("federation", &self.inner.source.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MetadataManager {
    /// Creates a stopped manager.
    pub fn new(
        source: FederationMetadataSource,
        store: Arc<TrustConfigStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                fetcher,
                fetch_timeout,
                refreshing: AtomicBool::new(false),
                last_fetched_at: Mutex::new(None),
            }),
            schedule: Mutex::new(None),
        }
    }

    /// Federation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.source.name
    }

    /// Loads the document and, for remote sources, schedules refreshes.
    ///
    /// Calling it on a running manager does nothing.
    ///
    /// # Errors
    ///
    /// Returns the error of the initial load; nothing is scheduled then.
    pub async fn start(&self) -> FederationResult<()> {
        if self.is_running() {
            return Ok(());
        }

        self.inner.refresh().await?;

        let MetadataSourceKind::RemoteUrl(_) = &self.inner.source.kind else {
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });

        let mut schedule = self.schedule.lock();
        if let Some(previous) = schedule.replace(Schedule { cancel, handle }) {
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Cancels scheduled refreshes. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(schedule) = self.schedule.lock().take() {
            schedule.cancel.cancel();
            debug!(federation = %self.inner.source.name, "Metadata refresh stopped");
            drop(schedule.handle);
        }
    }

    /// Whether refreshes are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .as_ref()
            .is_some_and(|s| !s.cancel.is_cancelled() && !s.handle.is_finished())
    }

    /// Refreshes immediately, outside the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::MetadataFetch`] if the document cannot be
    /// loaded or verified. The trust store is unchanged then.
    pub async fn refresh_now(&self) -> FederationResult<RefreshOutcome> {
        self.inner.refresh().await
    }

    /// Time of the last applied document.
    #[must_use]
    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_fetched_at.lock()
    }
}

impl Drop for MetadataManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the in-progress flag when a refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    async fn run(&self, token: CancellationToken) {
        let period = self.source.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        outcome = self.refresh() => match outcome {
                            Ok(RefreshOutcome::Applied(_)) => {}
                            Ok(RefreshOutcome::Skipped) => {
                                debug!(federation = %self.source.name, "Refresh already running, skipped");
                            }
                            Err(e) => {
                                warn!(
                                    federation = %self.source.name,
                                    error = %e,
                                    "Metadata refresh failed, keeping previously trusted providers"
                                );
                            }
                        },
                    }
                }
            }
        }
    }

    async fn refresh(&self) -> FederationResult<RefreshOutcome> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let document = self.load().await?;
        let providers = self.verify_and_parse(&document, Utc::now())?;
        let update = self.store.replace_source(&self.source.provider_source(), providers);

        *self.last_fetched_at.lock() = Some(Utc::now());
        info!(
            federation = %self.source.name,
            applied = update.applied,
            skipped = update.skipped.len(),
            "Federation metadata applied"
        );
        Ok(RefreshOutcome::Applied(update))
    }

    async fn load(&self) -> FederationResult<String> {
        match &self.source.kind {
            MetadataSourceKind::StaticFile(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| FederationError::MetadataFetch(format!("{}: {e}", path.display()))),
            MetadataSourceKind::RemoteUrl(url) => {
                tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
                    .await
                    .map_err(|_| FederationError::MetadataFetch(format!("{url}: timed out")))?
            }
        }
    }

    fn verify_and_parse(
        &self,
        document: &str,
        now: DateTime<Utc>,
    ) -> FederationResult<Vec<TrustedProvider>> {
        let parsed = parse_metadata(document)
            .map_err(|e| FederationError::MetadataFetch(format!("unreadable document: {e}")))?;

        if let Some(keys) = &self.source.verification_keys {
            let root_id = match (&parsed.root_id, parsed.signed) {
                (Some(id), true) => id,
                _ => {
                    return Err(FederationError::MetadataFetch(
                        "document is not signed".to_string(),
                    ))
                }
            };
            XmlSignatureValidator::new(keys.clone())
                .validate_enveloped(document, root_id)
                .map_err(|e| FederationError::MetadataFetch(format!("signature: {e}")))?;
        }

        if parsed.valid_until.is_some_and(|until| until <= now) {
            return Err(FederationError::MetadataFetch("document has expired".to_string()));
        }

        for entry in &parsed.skipped {
            debug!(
                federation = %self.source.name,
                entity_id = ?entry.entity_id,
                reason = %entry.reason,
                "Ignoring metadata entry"
            );
        }

        Ok(parsed
            .providers
            .into_iter()
            .map(|d| TrustedProvider::from_descriptor(d, &self.source.defaults, &self.source.name))
            .collect())
    }
}
