//! SAML 2.0 service-provider wire layer.
//!
//! This crate provides what a relying party needs to talk SAML 2.0:
//!
//! - **Protocol messages** - AuthnRequest, Response/Assertion, LogoutRequest and LogoutResponse
//! - **XML signature** - Enveloped XML-DSig and detached HTTP-Redirect signatures
//! - **Bindings** - HTTP-POST, HTTP-Redirect and SOAP
//! - **Metadata** - Federation metadata parsing and SP metadata generation
//!
//! # Architecture
//!
//! - [`types`] - Core SAML types and data structures
//! - [`xml`] - Hardened XML element tree and element location
//! - [`signature`] - XML signature signing and validation
//! - [`bindings`] - Binding encoders and decoders
//! - [`metadata`] - Metadata documents
//! - [`error`] - Error types for SAML operations
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [SAML 2.0 Metadata](https://docs.oasis-open.org/security/saml/v2.0/saml-metadata-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod error;
pub mod metadata;
pub mod signature;
pub mod types;
pub mod xml;

pub use error::{SamlError, SamlResult};
pub use types::*;
