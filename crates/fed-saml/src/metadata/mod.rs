//! SAML 2.0 metadata.
//!
//! - [`parse_metadata`] reads federation or single-entity documents and
//!   extracts the identity providers they describe
//! - [`SpMetadata`] renders this service provider's own descriptor

mod generator;
mod parser;

pub use generator::*;
pub use parser::*;
