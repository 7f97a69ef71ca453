//! Response verification.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. the document is a well-formed `Response`
//! 2. it answers the pending request
//! 3. it arrived over a binding the assertion consumer accepts
//! 4. a trusted key signed it, and the provider issued it
//! 5. it is inside its validity window, and addressed to this SP
//! 6. its ID was not consumed before
//! 7. it carries a usable subject

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fed_saml::bindings::{DecodedMessage, SamlMessageType};
use fed_saml::signature::XmlSignatureValidator;
use fed_saml::{within_window, Assertion, Binding, NameIdFormat, Response};

use crate::config::SpConfig;
use crate::error::{AuthenticationError, AuthenticationErrorKind};
use crate::replay::ReplayAttackGuard;
use crate::result::VerifiedAssertion;
use crate::session::PendingAuthnRequest;
use crate::trust::TrustedProvider;

/// Verifies responses to pending authentication requests.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    sp_entity_id: String,
    acs_url: String,
    clock_skew: Duration,
    require_signed_assertion: bool,
    accepted_name_formats: Vec<String>,
    replay: Arc<ReplayAttackGuard>,
}

impl ResponseValidator {
    /// Creates a validator for the configured SP.
    #[must_use]
    pub fn new(config: &SpConfig, replay: Arc<ReplayAttackGuard>) -> Self {
        Self {
            sp_entity_id: config.requester_id.clone(),
            acs_url: config.acs_url(),
            clock_skew: config.clock_skew(),
            require_signed_assertion: config.require_signed_assertion,
            accepted_name_formats: config.accepted_name_formats.clone(),
            replay,
        }
    }

    /// Verifies `message` against the request it claims to answer and the
    /// provider snapshot the request was sent to.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as an [`AuthenticationError`].
    pub fn verify_response(
        &self,
        message: &DecodedMessage,
        pending: &PendingAuthnRequest,
        provider: &TrustedProvider,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAssertion, AuthenticationError> {
        let response = parse(message)?;
        let assertion = response.assertion();

        check_correlation(&response, assertion, &pending.request_id)?;

        if !pending.accepted_bindings.contains(&message.binding) {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::BindingMismatch,
                format!("response arrived over {}, which is not accepted here", message.binding),
            ));
        }

        self.check_signatures(message, &response, provider)?;
        check_issuer(&response, provider)?;
        self.check_timing(&response, now)?;
        self.check_audience(&response)?;

        if !self.replay.check_and_record(&response.id, now).is_accepted() {
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ReplayDetected,
                format!("response {} was already consumed", response.id),
            ));
        }

        self.extract(&response, provider)
    }

    fn check_signatures(
        &self,
        message: &DecodedMessage,
        response: &Response,
        provider: &TrustedProvider,
    ) -> Result<(), AuthenticationError> {
        if !provider.signature_required() {
            return Ok(());
        }
        if message.binding == Binding::HttpRedirect && message.signature.is_none() {
            return Err(AuthenticationError::invalid_signature(
                "redirect-bound response without query signature",
            ));
        }
        let validator = XmlSignatureValidator::new(provider.certificates.clone());

        let mut message_signed =
            verify_message_signature(&validator, message, &response.id, response.signed)?;

        let assertion = response.assertion();
        let mut assertion_signed = false;
        if let Some(assertion) = assertion.filter(|a| a.signed) {
            validator
                .validate_enveloped(&message.xml, &assertion.id)
                .map_err(|e| AuthenticationError::invalid_signature(e.to_string()))?;
            assertion_signed = true;
        }

        if self.require_signed_assertion && assertion.is_some() {
            message_signed = false;
        }
        if message_signed || assertion_signed {
            Ok(())
        } else if assertion.is_some() && self.require_signed_assertion {
            Err(AuthenticationError::invalid_signature("assertion is not signed"))
        } else {
            Err(AuthenticationError::invalid_signature("response is not signed"))
        }
    }

    fn check_timing(&self, response: &Response, now: DateTime<Utc>) -> Result<(), AuthenticationError> {
        let expired = |detail: &str| {
            AuthenticationError::new(AuthenticationErrorKind::ExpiredOrNotYetValid, detail)
        };
        if response.issue_instant > now + self.clock_skew {
            return Err(expired("response is issued in the future"));
        }
        let Some(assertion) = response.assertion() else {
            return Ok(());
        };
        if assertion.issue_instant > now + self.clock_skew {
            return Err(expired("assertion is issued in the future"));
        }
        if let Some(conditions) = &assertion.conditions {
            if !conditions.is_valid_at(now, self.clock_skew) {
                return Err(expired("assertion conditions are not met at this time"));
            }
        }
        for data in bearer_data(assertion) {
            if !within_window(data.not_before, data.not_on_or_after, now, self.clock_skew) {
                return Err(expired("subject confirmation is not valid at this time"));
            }
        }
        Ok(())
    }

    fn check_audience(&self, response: &Response) -> Result<(), AuthenticationError> {
        let mismatch = |detail: String| {
            AuthenticationError::new(AuthenticationErrorKind::AudienceMismatch, detail)
        };
        if let Some(destination) = &response.destination {
            if *destination != self.acs_url {
                return Err(mismatch(format!("response is destined to {destination}")));
            }
        }
        let Some(assertion) = response.assertion() else {
            return Ok(());
        };
        if let Some(conditions) = &assertion.conditions {
            if !conditions.admits_audience(&self.sp_entity_id) {
                return Err(mismatch(format!(
                    "audience restriction excludes {}",
                    self.sp_entity_id
                )));
            }
        }
        for data in bearer_data(assertion) {
            if let Some(recipient) = &data.recipient {
                if *recipient != self.acs_url {
                    return Err(mismatch(format!("subject confirmation recipient is {recipient}")));
                }
            }
        }
        Ok(())
    }

    fn extract(
        &self,
        response: &Response,
        provider: &TrustedProvider,
    ) -> Result<VerifiedAssertion, AuthenticationError> {
        if !response.status.is_success() {
            let detail = match &response.status.status_message {
                Some(message) => format!(
                    "{} ({message})",
                    response.status.status_code.most_specific()
                ),
                None => response.status.status_code.most_specific().to_string(),
            };
            return Err(AuthenticationError::new(
                AuthenticationErrorKind::ProviderRefused,
                detail,
            ));
        }

        let unacceptable = |detail: &str| {
            AuthenticationError::new(AuthenticationErrorKind::UnacceptableSubject, detail)
        };
        let assertion = response
            .assertion()
            .ok_or_else(|| unacceptable("response carries no assertion"))?;
        let subject = assertion
            .subject
            .as_ref()
            .ok_or_else(|| unacceptable("assertion has no subject"))?;
        if subject.bearer_confirmations().next().is_none() {
            return Err(unacceptable("subject has no bearer confirmation"));
        }
        let name_id = subject
            .name_id
            .clone()
            .ok_or_else(|| unacceptable("subject has no NameID"))?;

        let format = name_id
            .format
            .as_deref()
            .unwrap_or(NameIdFormat::Unspecified.uri());
        let mut allowed = provider
            .trusted_name_formats
            .iter()
            .chain(&self.accepted_name_formats)
            .peekable();
        if allowed.peek().is_some() && !allowed.any(|f| f == format) {
            return Err(unacceptable(
                format!("NameID format {format} is not accepted").as_str(),
            ));
        }

        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for attribute in &assertion.attributes {
            attributes
                .entry(attribute.name.clone())
                .or_default()
                .extend(attribute.values.iter().cloned());
        }
        let statement = assertion.authn_statement();

        Ok(VerifiedAssertion {
            subject: name_id,
            issuer: provider.entity_id.clone(),
            provider_key: provider.key.clone(),
            attributes,
            authn_instant: statement.map(|s| s.authn_instant),
            session_index: statement.and_then(|s| s.session_index.clone()),
            response_id: response.id.clone(),
        })
    }
}

fn parse(message: &DecodedMessage) -> Result<Response, AuthenticationError> {
    if message.message_type != SamlMessageType::Response {
        return Err(AuthenticationError::malformed("expected a SAMLResponse"));
    }
    let response =
        Response::parse(&message.xml).map_err(|e| AuthenticationError::malformed(e.to_string()))?;
    if response.assertions.len() > 1 {
        return Err(AuthenticationError::malformed(
            "responses with several assertions are not accepted",
        ));
    }
    Ok(response)
}

fn check_correlation(
    response: &Response,
    assertion: Option<&Assertion>,
    request_id: &str,
) -> Result<(), AuthenticationError> {
    if response.in_response_to.as_deref() != Some(request_id) {
        return Err(AuthenticationError::unsolicited(format!(
            "InResponseTo {:?} does not match the pending request",
            response.in_response_to
        )));
    }
    if let Some(assertion) = assertion {
        for data in bearer_data(assertion) {
            if data.in_response_to.as_deref().is_some_and(|id| id != request_id) {
                return Err(AuthenticationError::unsolicited(
                    "subject confirmation answers another request",
                ));
            }
        }
    }
    Ok(())
}

fn check_issuer(response: &Response, provider: &TrustedProvider) -> Result<(), AuthenticationError> {
    let mismatch = |issuer: &str| {
        AuthenticationError::new(
            AuthenticationErrorKind::IssuerMismatch,
            format!("issued by {issuer}, expected {}", provider.entity_id),
        )
    };
    match (&response.issuer, response.assertion()) {
        (None, None) => return Err(mismatch("nobody")),
        (Some(issuer), _) if *issuer != provider.entity_id => return Err(mismatch(issuer.as_str())),
        _ => {}
    }
    match response.assertion() {
        Some(assertion) if assertion.issuer != provider.entity_id => Err(mismatch(assertion.issuer.as_str())),
        _ => Ok(()),
    }
}

fn bearer_data(assertion: &Assertion) -> impl Iterator<Item = &fed_saml::SubjectConfirmationData> {
    assertion
        .subject
        .iter()
        .flat_map(|s| s.bearer_confirmations())
        .filter_map(|c| c.data.as_ref())
}

/// Verifies the enveloped signature of the root element, if it has one,
/// and the detached redirect signature, if there is one.
///
/// Returns whether at least one of them covered the message.
pub(crate) fn verify_message_signature(
    validator: &XmlSignatureValidator,
    message: &DecodedMessage,
    root_id: &str,
    root_signed: bool,
) -> Result<bool, AuthenticationError> {
    let mut covered = false;
    if root_signed {
        validator
            .validate_enveloped(&message.xml, root_id)
            .map_err(|e| AuthenticationError::invalid_signature(e.to_string()))?;
        covered = true;
    }
    match (&message.signature, &message.sig_alg, &message.signed_query) {
        (Some(signature), Some(sig_alg), Some(signed_query)) => {
            validator
                .validate_detached(signed_query, signature, sig_alg)
                .map_err(|e| AuthenticationError::invalid_signature(e.to_string()))?;
            covered = true;
        }
        (None, None, _) => {}
        _ => {
            return Err(AuthenticationError::invalid_signature(
                "incomplete detached signature",
            ))
        }
    }
    Ok(covered)
}
