//! # fed-server
//!
//! HTTP surface of a SAML service provider.
//!
//! This crate serves the endpoints a browser and an identity provider talk to:
//! - Login start, status and cancel
//! - Assertion consumer (HTTP-POST and HTTP-Redirect bindings)
//! - Single logout (HTTP-POST, HTTP-Redirect and SOAP bindings)
//! - The SP's own metadata document
//! - Health checks
//!
//! ## Usage
//!
//! ```ignore
//! use fed_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::from_env()?;
//! let server = Server::new(config).await?;
//! server.run().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod handlers;
pub mod pages;
pub mod router;
pub mod state;

pub use config::ServerConfig;
pub use router::create_router;
pub use state::{AppState, LocalSession, LocalSessions};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use fed_sp::{Collaborators, DirectTranslation, SessionTerminator, SpConfig, Verificator};
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The service provider server.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Creates a new server instance from the SP configuration file.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let sp_config = SpConfig::from_file(&config.sp_config)?;
        Self::with_sp_config(config, sp_config).await
    }

    /// Creates a new server instance for an already loaded SP configuration.
    ///
    /// This builds the verificator, which loads every trusted provider and
    /// starts the federation metadata schedules.
    pub async fn with_sp_config(config: ServerConfig, mut sp_config: SpConfig) -> anyhow::Result<Self> {
        if let Some(base_url) = &config.base_url {
            sp_config.base_url.clone_from(base_url);
        }
        router::validate_paths(&sp_config)?;

        let sessions = Arc::new(LocalSessions::new());
        let verificator = Verificator::build(
            sp_config,
            Collaborators {
                translation: Arc::new(DirectTranslation::new()),
                terminator: Arc::clone(&sessions) as Arc<dyn SessionTerminator>,
                fetcher: None,
            },
        )
        .await?;

        info!(
            entity_id = %verificator.config().requester_id,
            providers = verificator.providers().len(),
            federations = verificator.federations().len(),
            slo = verificator.slo_enabled(),
            "Service provider ready"
        );

        let state = AppState::new(config.clone(), Arc::new(verificator), sessions);
        Ok(Self { config, state })
    }

    /// Runs the server.
    ///
    /// This starts the HTTP server and blocks until it receives a shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves requests on `listener` until `shutdown` completes.
    ///
    /// Expired contexts are evicted periodically while serving; metadata
    /// schedules are stopped afterwards.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!("Server listening on http://{}", addr);

        let cancel = CancellationToken::new();
        let eviction = tokio::spawn(evict_periodically(
            Arc::clone(&self.state.verificator),
            self.config.eviction_interval,
            cancel.clone(),
        ));

        let app = create_router(self.state.clone());
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        cancel.cancel();
        if let Err(e) = eviction.await {
            error!(error = %e, "Eviction task failed");
        }
        self.state.verificator.shutdown();
        served?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the shared application state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Creates a router without starting the server.
    ///
    /// This is useful for integration testing.
    pub fn test_router(&self) -> Router {
        create_router(self.state.clone())
    }
}

async fn evict_periodically(
    verificator: Arc<Verificator>,
    period: Duration,
    cancel: CancellationToken,
) {
    let period = period.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = verificator.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "Dropped expired login and logout contexts");
                }
            }
        }
    }
}

/// Waits for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
