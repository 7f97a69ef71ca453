//! Remote SAML authentication for a relying party.
//!
//! This crate verifies users against trusted identity providers:
//!
//! - **Trust** - [`TrustConfigStore`] holds the trusted providers as an
//!   atomically swapped snapshot
//! - **Metadata** - [`MetadataManager`] keeps federation entries current;
//!   [`SpMetadataPublisher`] serves this SP's own metadata
//! - **Login** - [`RequestBuilder`] creates authentication requests,
//!   [`ResponseValidator`] verifies the answers and [`ReplayAttackGuard`]
//!   rejects reused messages
//! - **Sessions** - [`SessionContextStore`] tracks each browser session's
//!   login state machine
//! - **Logout** - [`LogoutManager`] runs single logout in both directions
//!
//! [`Verificator`] wires these together from an [`SpConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use fed_sp::{Collaborators, DirectTranslation, SpConfig, Verificator};
//!
//! let config = SpConfig::from_file("sp.json".as_ref())?;
//! let verificator = Verificator::build(config, Collaborators {
//!     translation: Arc::new(DirectTranslation::new()),
//!     terminator,
//!     fetcher: None,
//! }).await?;
//!
//! let login = verificator.start_login(None, Some("idp1"), "/home", None)?;
//! // redirect the browser with login.message, then on return:
//! let result = verificator.handle_response(Some(&login.session_id), &decoded);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod metadata_manager;
pub mod replay;
pub mod request;
pub mod result;
pub mod session;
pub mod slo;
pub mod sp_metadata;
pub mod translation;
pub mod trust;
pub mod validator;
pub mod verificator;

mod outbound;
#[cfg(test)]
mod test_support;

pub use config::{InFlightLoginPolicy, SpConfig};
pub use error::{AuthenticationError, AuthenticationErrorKind, FederationError, FederationResult};
pub use metadata_manager::{MetadataFetcher, MetadataManager, RefreshOutcome};
pub use replay::{ReplayAttackGuard, ReplayCheck};
pub use request::{BuiltRequest, RequestBuilder, ACS_BINDINGS, PROVIDER_PARAMETER};
pub use result::{AuthenticationResult, AuthenticationStatus, VerifiedAssertion};
pub use session::{LoginState, LoginStatus, PendingAuthnRequest, SessionContextStore};
pub use slo::{LogoutManager, LogoutOutcome, SessionTerminator, TerminationRequest};
pub use sp_metadata::SpMetadataPublisher;
pub use translation::{DirectTranslation, LocalPrincipalMapping, TranslationEngine};
pub use trust::{TrustConfigStore, TrustSnapshot, TrustedProvider};
pub use validator::ResponseValidator;
pub use verificator::{Collaborators, LoginStart, Verificator};
