//! Publication of this service provider's own metadata.

use std::path::PathBuf;
use std::sync::Arc;

use fed_crypto::SigningCredential;
use fed_saml::metadata::SpMetadata;
use fed_saml::signature::XmlSigner;

use crate::config::SpConfig;
use crate::error::{FederationError, FederationResult};

/// Where the published document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpMetadataSource {
    /// An administrator-provided file, read on every request.
    StaticFile(PathBuf),
    /// Rendered from the SP configuration.
    Generated(SpMetadata),
}

/// Serves the SP metadata document, signed if configured.
#[derive(Debug, Clone)]
pub struct SpMetadataPublisher {
    path: String,
    source: SpMetadataSource,
    signer: Option<XmlSigner>,
}

impl SpMetadataPublisher {
    /// Builds the publisher. Returns `None` when publishing is off.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if signing is requested
    /// without a credential, or there is neither a file nor generation.
    pub fn from_config(
        config: &SpConfig,
        credential: Option<&Arc<SigningCredential>>,
    ) -> FederationResult<Option<Self>> {
        let publishing = &config.metadata_publishing;
        if !publishing.publish {
            return Ok(None);
        }

        let signer = match (publishing.sign, credential) {
            (true, Some(credential)) => Some(XmlSigner::new(Arc::clone(credential))),
            (true, None) => {
                return Err(FederationError::Configuration(
                    "metadata signing is enabled but no signing credential is configured"
                        .to_string(),
                ))
            }
            (false, _) => None,
        };

        let source = match (&publishing.file, publishing.auto_generate) {
            (Some(file), _) => SpMetadataSource::StaticFile(file.clone()),
            (None, true) => SpMetadataSource::Generated(SpMetadata {
                entity_id: config.requester_id.clone(),
                signing_certificate: credential
                    .and_then(|c| c.certificate_der())
                    .map(<[u8]>::to_vec),
                authn_requests_signed: config.sign_requests_by_default,
                want_assertions_signed: config.require_signed_assertion,
                name_id_formats: config.accepted_name_formats.clone(),
                acs_url: config.acs_url(),
                slo_url: config.slo_url(),
                slo_soap_url: config.slo_soap_url(),
            }),
            (None, false) => {
                return Err(FederationError::Configuration(
                    "metadata publishing needs a file or auto generation".to_string(),
                ))
            }
        };

        Ok(Some(Self {
            path: publishing.path.clone(),
            source,
            signer,
        }))
    }

    /// Path the document is served at.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Produces the document.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Configuration`] if the static file cannot
    /// be read and [`FederationError::Signing`] if signing fails.
    pub async fn document(&self) -> FederationResult<String> {
        let (document, id) = match &self.source {
            SpMetadataSource::StaticFile(path) => {
                let document = tokio::fs::read_to_string(path).await.map_err(|e| {
                    FederationError::Configuration(format!("metadata file {}: {e}", path.display()))
                })?;
                (document, None)
            }
            SpMetadataSource::Generated(metadata) => {
                let id = fed_crypto::generate_message_id();
                (metadata.to_xml(&id), Some(id))
            }
        };

        let Some(signer) = &self.signer else {
            return Ok(document);
        };
        let id = match id {
            Some(id) => id,
            None => fed_saml::xml::parse(&document)
                .ok()
                .and_then(|root| root.id().map(String::from))
                .ok_or_else(|| {
                    FederationError::Signing("metadata document has no ID to sign".to_string())
                })?,
        };
        signer
            .sign(&document, &id)
            .map_err(|e| FederationError::Signing(e.to_string()))
    }
}
