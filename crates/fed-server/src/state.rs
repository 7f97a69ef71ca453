//! Application state management.
//!
//! This module defines the shared state that is passed to all request handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fed_saml::NameId;
use fed_sp::{SessionTerminator, TerminationRequest, Verificator};
use serde::Serialize;
use tracing::info;

use crate::config::ServerConfig;

/// A browser session that completed a remote login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSession {
    /// Local principal.
    pub principal: String,
    /// Provider that authenticated the user.
    pub provider_key: String,
    /// Subject as the provider named it.
    pub name_id: NameId,
    /// Provider session index, needed for single logout.
    pub session_index: Option<String>,
    /// When the login completed.
    pub established_at: DateTime<Utc>,
}

/// Logged-in browser sessions, keyed by session cookie.
#[derive(Debug, Default)]
pub struct LocalSessions {
    sessions: DashMap<String, LocalSession>,
}

impl LocalSessions {
    /// Creates an empty session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed login, replacing any earlier one.
    pub fn establish(&self, session_id: &str, session: LocalSession) {
        self.sessions.insert(session_id.to_string(), session);
    }

    /// Returns the session's login.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<LocalSession> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Ends the session's login.
    pub fn remove(&self, session_id: &str) -> Option<LocalSession> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    /// Number of logged-in sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionTerminator for LocalSessions {
    async fn terminate(&self, request: &TerminationRequest) -> Result<usize, String> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let same_subject = session.provider_key == request.provider_key
                && session.name_id.value == request.name_id.value;
            let same_index = request.session_indexes.is_empty()
                || session
                    .session_index
                    .as_ref()
                    .is_some_and(|index| request.session_indexes.contains(index));
            !(same_subject && same_index)
        });
        let ended = before.saturating_sub(self.sessions.len());
        info!(
            provider = %request.provider_key,
            realm = %request.realm,
            ended,
            "Ended local sessions on provider request"
        );
        Ok(ended)
    }
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,

    /// Remote authentication.
    pub verificator: Arc<Verificator>,

    /// Logged-in browser sessions.
    pub sessions: Arc<LocalSessions>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        config: ServerConfig,
        verificator: Arc<Verificator>,
        sessions: Arc<LocalSessions>,
    ) -> Self {
        Self {
            config,
            verificator,
            sessions,
        }
    }

    /// Returns the verificator.
    pub fn verificator(&self) -> &Verificator {
        &self.verificator
    }

    /// Returns the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }
}
