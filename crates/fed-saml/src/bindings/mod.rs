//! SAML bindings implementation.
//!
//! This module implements the SAML 2.0 bindings for message transport:
//!
//! - **HTTP-POST Binding** - Messages are base64-encoded and sent in HTML forms
//! - **HTTP-Redirect Binding** - Messages are deflated, base64-encoded, and URL-encoded
//! - **SOAP Binding** - Messages travel in a SOAP 1.1 envelope over a back channel
//!
//! # Usage
//!
//! ```rust,ignore
//! use fed_saml::bindings::{HttpPostBinding, HttpRedirectBinding, SamlMessageType};
//!
//! let html = HttpPostBinding::encode(&request_xml, "https://idp.example.org/sso", Some("rs"), SamlMessageType::Request);
//! let url = HttpRedirectBinding::encode(&request_xml, "https://idp.example.org/sso", Some("rs"), SamlMessageType::Request)?;
//! ```

mod post;
mod redirect;
mod soap;

pub use post::*;
pub use redirect::*;
pub use soap::*;

use crate::types::Binding;

/// SAML message type for binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// Request message (`AuthnRequest`, `LogoutRequest`).
    Request,
    /// Response message (`Response`, `LogoutResponse`).
    Response,
}

impl SamlMessageType {
    /// Returns the form parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// Decoded SAML binding message.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The decoded XML message.
    pub xml: String,
    /// The message type (request or response).
    pub message_type: SamlMessageType,
    /// The binding the message arrived over.
    pub binding: Binding,
    /// The RelayState if present.
    pub relay_state: Option<String>,
    /// Detached signature (redirect binding), base64.
    pub signature: Option<String>,
    /// Detached signature algorithm URI (redirect binding).
    pub sig_alg: Option<String>,
    /// The octets covered by a detached signature, exactly as received.
    pub signed_query: Option<String>,
}

/// A protocol message ready to be delivered to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Redirect the browser to this URL.
    Redirect(String),
    /// Serve this auto-submitting HTML form to the browser.
    PostForm(String),
    /// Return this SOAP envelope on the back channel.
    Soap(String),
}

impl OutboundMessage {
    /// Returns the binding used by this message.
    #[must_use]
    pub const fn binding(&self) -> Binding {
        match self {
            Self::Redirect(_) => Binding::HttpRedirect,
            Self::PostForm(_) => Binding::HttpPost,
            Self::Soap(_) => Binding::Soap,
        }
    }
}
