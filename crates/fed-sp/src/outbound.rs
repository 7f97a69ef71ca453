//! Encoding of outgoing protocol messages.

use fed_saml::bindings::{
    HttpPostBinding, HttpRedirectBinding, OutboundMessage, SamlMessageType, SoapBinding,
};
use fed_saml::signature::XmlSigner;
use fed_saml::Binding;

use crate::error::{FederationError, FederationResult};

/// A message about to leave the SP.
pub(crate) struct Outgoing<'a> {
    pub xml: String,
    pub id: &'a str,
    pub binding: Binding,
    pub destination: &'a str,
    pub relay_state: Option<&'a str>,
    pub message_type: SamlMessageType,
}

/// Encodes `message` for its binding, signing it when `signer` is given.
///
/// Redirect messages get a detached query signature; POST and SOAP
/// messages an enveloped one.
pub(crate) fn encode(message: Outgoing<'_>, signer: Option<&XmlSigner>) -> FederationResult<OutboundMessage> {
    let Outgoing {
        xml,
        id,
        binding,
        destination,
        relay_state,
        message_type,
    } = message;

    let sign_enveloped = |xml: String| -> FederationResult<String> {
        match signer {
            Some(signer) => signer
                .sign(&xml, id)
                .map_err(|e| FederationError::Signing(e.to_string())),
            None => Ok(xml),
        }
    };

    match binding {
        Binding::HttpRedirect => {
            let url = match signer {
                Some(signer) => signer
                    .sign_redirect(&xml, destination, relay_state, message_type)
                    .map_err(|e| FederationError::Signing(e.to_string()))?,
                None => HttpRedirectBinding::encode(&xml, destination, relay_state, message_type)?,
            };
            Ok(OutboundMessage::Redirect(url))
        }
        Binding::HttpPost => {
            let xml = sign_enveloped(xml)?;
            Ok(OutboundMessage::PostForm(HttpPostBinding::encode(
                &xml,
                destination,
                relay_state,
                message_type,
            )))
        }
        Binding::Soap => {
            let xml = sign_enveloped(xml)?;
            Ok(OutboundMessage::Soap(SoapBinding::encode(&xml)))
        }
    }
}
