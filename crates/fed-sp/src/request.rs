//! Authentication request building.

use chrono::{DateTime, Utc};
use fed_saml::bindings::{OutboundMessage, SamlMessageType};
use fed_saml::signature::XmlSigner;
use fed_saml::{AuthnRequest, Binding};

use crate::error::{FederationError, FederationResult};
use crate::outbound::{self, Outgoing};
use crate::session::PendingAuthnRequest;
use crate::trust::{TrustSnapshot, TrustedProvider};

/// Bindings the assertion consumer accepts responses over.
pub const ACS_BINDINGS: [Binding; 2] = [Binding::HttpPost, Binding::HttpRedirect];

/// Name of the parameter that selects a provider.
pub const PROVIDER_PARAMETER: &str = "idp";

/// A built request and the message that carries it to the provider.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    /// State to store in the session before redirecting.
    pub pending: PendingAuthnRequest,
    /// Redirect URL or POST form.
    pub message: OutboundMessage,
}

/// Builds `AuthnRequest` messages for trusted providers.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    sp_entity_id: String,
    acs_url: String,
    signer: Option<XmlSigner>,
    sign_by_default: bool,
    default_name_format: Option<String>,
}

impl RequestBuilder {
    /// Creates a builder.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if requests are signed by
    /// default but there is no signer.
    pub fn new(
        sp_entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        signer: Option<XmlSigner>,
        sign_by_default: bool,
        default_name_format: Option<String>,
    ) -> FederationResult<Self> {
        if sign_by_default && signer.is_none() {
            return Err(FederationError::Configuration(
                "requests are signed by default but no signing credential is configured"
                    .to_string(),
            ));
        }
        Ok(Self {
            sp_entity_id: sp_entity_id.into(),
            acs_url: acs_url.into(),
            signer,
            sign_by_default,
            default_name_format,
        })
    }

    /// Builds a request for the selected provider.
    ///
    /// Without `provider_key` the sole configured provider is used; with
    /// several configured the caller has to choose.
    ///
    /// # Errors
    ///
    /// - [`FederationError::AmbiguousProvider`] if no provider was chosen and
    ///   more than one is configured
    /// - [`FederationError::ProviderNotFound`] if the chosen provider is unknown
    /// - [`FederationError::Configuration`] if signing is required without a
    ///   credential, or the provider has no usable endpoint
    /// - [`FederationError::Signing`] if signing fails
    pub fn create_request(
        &self,
        snapshot: &TrustSnapshot,
        provider_key: Option<&str>,
        return_url: &str,
        sandbox_callback: Option<String>,
        now: DateTime<Utc>,
    ) -> FederationResult<BuiltRequest> {
        let provider = select_provider(snapshot, provider_key)?;

        let sign = provider.sign_request.unwrap_or(self.sign_by_default);
        let signer = match (sign, &self.signer) {
            (true, Some(signer)) => Some(signer),
            (true, None) => {
                return Err(FederationError::Configuration(format!(
                    "identity provider '{}' requires signed requests but no signing credential is configured",
                    provider.key
                )))
            }
            (false, _) => None,
        };

        let (binding, destination) = provider.sso_endpoint().ok_or_else(|| {
            FederationError::Configuration(format!(
                "identity provider '{}' has no usable single sign-on endpoint",
                provider.key
            ))
        })?;

        let request_id = fed_crypto::generate_message_id();
        let relay_state = fed_crypto::generate_relay_state();

        let mut request = AuthnRequest::new(request_id.clone(), self.sp_entity_id.clone())
            .issued_at(now)
            .with_destination(destination)
            .with_acs_url(self.acs_url.clone())
            .with_binding(Binding::HttpPost);
        if let Some(format) = provider
            .requested_name_format
            .as_ref()
            .or(self.default_name_format.as_ref())
        {
            request = request.with_name_id_format(format.clone());
        }

        let message = outbound::encode(
            Outgoing {
                xml: request.to_xml(),
                id: &request_id,
                binding,
                destination,
                relay_state: Some(&relay_state),
                message_type: SamlMessageType::Request,
            },
            signer,
        )?;

        tracing::debug!(
            request_id = %request_id,
            provider = %provider.key,
            %binding,
            signed = signer.is_some(),
            "Built authentication request"
        );

        Ok(BuiltRequest {
            pending: PendingAuthnRequest {
                request_id,
                provider_key: provider.key.clone(),
                issued_at: now,
                return_url: return_url.to_string(),
                relay_state,
                sandbox_callback,
                accepted_bindings: ACS_BINDINGS.to_vec(),
            },
            message,
        })
    }
}

fn select_provider<'a>(
    snapshot: &'a TrustSnapshot,
    provider_key: Option<&str>,
) -> FederationResult<&'a TrustedProvider> {
    match provider_key {
        Some(key) => snapshot
            .get(key)
            .map(|p| &**p)
            .ok_or_else(|| FederationError::ProviderNotFound(key.to_string())),
        None if snapshot.len() > 1 => Err(FederationError::AmbiguousProvider {
            parameter: PROVIDER_PARAMETER,
        }),
        None => snapshot.sole_provider().map(|p| &**p).ok_or_else(|| {
            FederationError::Configuration("no identity provider is configured".to_string())
        }),
    }
}
