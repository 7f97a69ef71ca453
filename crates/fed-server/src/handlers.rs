//! Endpoint handlers of the service provider.
//!
//! The handlers decode the binding, hand the message to the
//! [`Verificator`](fed_sp::Verificator) and turn the outcome into a page,
//! a redirect or a protocol message.

use axum::{
    extract::{Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    Form,
};
use chrono::Utc;
use fed_saml::bindings::{DecodedMessage, HttpPostBinding, HttpRedirectBinding, SoapBinding};
use fed_saml::SamlResult;
use fed_sp::result::USER_FAILURE_MESSAGE;
use fed_sp::{FederationError, LoginStatus, LogoutOutcome};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::pages::{self, error_page, METADATA_CONTENT_TYPE};
use crate::state::{AppState, LocalSession};

/// Query parameters of the login endpoint.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    /// Key of the identity provider. Required when several are trusted.
    pub idp: Option<String>,

    /// Local path to return to after login.
    pub return_url: Option<String>,

    /// Callback that receives the result instead of a login.
    pub sandbox: Option<String>,
}

/// Form data of the assertion consumer (HTTP-POST binding).
#[derive(Debug, Deserialize)]
pub struct AcsForm {
    /// The SAML response (base64-encoded).
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,

    /// Relay state.
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Form data of the logout service (HTTP-POST binding).
#[derive(Debug, Deserialize)]
pub struct SloForm {
    /// The SAML request (base64-encoded).
    #[serde(rename = "SAMLRequest")]
    pub saml_request: Option<String>,

    /// The SAML response (base64-encoded).
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,

    /// Relay state.
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Query parameters of the logout endpoint.
#[derive(Debug, Deserialize)]
pub struct LogoutParams {
    /// Local path to return to after logout.
    pub return_url: Option<String>,
}

/// Answer of the cancel endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Whether an unanswered login was discarded.
    pub cancelled: bool,
}

/// GET handler starting a login at an identity provider.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Response {
    let return_url = match local_return_url(params.return_url) {
        Ok(url) => url,
        Err(response) => return response,
    };
    let cookie = session_cookie(&headers, &state.config.session_cookie);

    match state.verificator.start_login(
        cookie.as_deref(),
        params.idp.as_deref(),
        &return_url,
        params.sandbox,
    ) {
        Ok(start) => {
            info!(
                session = %start.session_id,
                request_id = %start.request_id,
                "Sending authentication request"
            );
            let mut response = pages::outbound(start.message);
            set_session_cookie(&mut response, &state.config.session_cookie, &start.session_id);
            response
        }
        Err(e) => federation_error(&e),
    }
}

/// POST handler of the assertion consumer (HTTP-POST binding).
pub async fn acs_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AcsForm>,
) -> Response {
    let message = HttpPostBinding::decode(
        None,
        form.saml_response.as_deref(),
        form.relay_state.as_deref(),
    );
    consume_response(&state, &headers, message)
}

/// GET handler of the assertion consumer (HTTP-Redirect binding).
pub async fn acs_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let message = HttpRedirectBinding::decode_query(query.as_deref().unwrap_or_default());
    consume_response(&state, &headers, message)
}

fn consume_response(
    state: &AppState,
    headers: &HeaderMap,
    message: SamlResult<DecodedMessage>,
) -> Response {
    let message = match message {
        Ok(message) => message,
        Err(e) => {
            warn!(kind = "MalformedResponse", error = %e, "Undecodable response");
            return error_page(StatusCode::BAD_REQUEST, USER_FAILURE_MESSAGE, None);
        }
    };
    if message.message_type != fed_saml::bindings::SamlMessageType::Response {
        warn!(kind = "MalformedResponse", "Request sent to the assertion consumer");
        return error_page(StatusCode::BAD_REQUEST, USER_FAILURE_MESSAGE, None);
    }

    let cookie = session_cookie(headers, &state.config.session_cookie);
    let owner = message
        .relay_state
        .as_deref()
        .and_then(|rs| state.verificator.session_for_relay_state(rs))
        .or_else(|| cookie.clone());
    let result = state.verificator.handle_response(cookie.as_deref(), &message);

    if let Some(callback) = &result.sandbox_callback {
        return pages::sandbox_delivery(callback, &result);
    }
    if !result.is_success() {
        let text = result.user_message().unwrap_or(USER_FAILURE_MESSAGE);
        return error_page(StatusCode::UNAUTHORIZED, text, None);
    }

    let (Some(owner), Some(assertion), Some(mapping)) =
        (owner, &result.assertion, &result.mapping)
    else {
        error!("Successful result without session, assertion or mapping");
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None);
    };
    state.sessions.establish(
        &owner,
        LocalSession {
            principal: mapping.principal.clone(),
            provider_key: assertion.provider_key.clone(),
            name_id: assertion.subject.clone(),
            session_index: assertion.session_index.clone(),
            established_at: Utc::now(),
        },
    );

    let target = result.return_url.as_deref().unwrap_or("/");
    let mut response = Redirect::to(target).into_response();
    set_session_cookie(&mut response, &state.config.session_cookie, &owner);
    response
}

/// GET handler reporting the state of the session's login.
pub async fn login_status(State(state): State<AppState>, headers: HeaderMap) -> Json<LoginStatus> {
    let status = session_cookie(&headers, &state.config.session_cookie)
        .map_or(LoginStatus::NoContext, |id| state.verificator.login_status(&id));
    Json(status)
}

/// POST handler discarding the session's unanswered login.
pub async fn cancel_login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<CancelResponse> {
    let cancelled = session_cookie(&headers, &state.config.session_cookie)
        .is_some_and(|id| state.verificator.cancel_login(&id));
    Json(CancelResponse { cancelled })
}

/// GET handler logging the session out, at the provider too when possible.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LogoutParams>,
) -> Response {
    let return_url = match params.return_url.map(|url| local_return_url(Some(url))).transpose() {
        Ok(url) => url,
        Err(response) => return response,
    };
    let done = |return_url: Option<String>| match return_url {
        Some(url) => Redirect::to(&url).into_response(),
        None => pages::logged_out_page(),
    };

    let Some(session) = session_cookie(&headers, &state.config.session_cookie)
        .and_then(|id| state.sessions.remove(&id))
    else {
        return done(return_url);
    };
    let Some(session_index) = session.session_index.as_deref() else {
        return done(return_url);
    };
    if !state.verificator.slo_enabled() {
        return done(return_url);
    }

    match state.verificator.initiate_logout(
        &session.provider_key,
        session.name_id.clone(),
        session_index,
        return_url.clone(),
    ) {
        Ok(initiation) => {
            info!(
                provider = %session.provider_key,
                request_id = %initiation.context.request_id,
                "Sending logout request"
            );
            pages::outbound(initiation.message)
        }
        Err(e) => {
            warn!(
                provider = %session.provider_key,
                error = %e,
                "Logged out locally only"
            );
            done(return_url)
        }
    }
}

/// POST handler of the logout service (HTTP-POST binding).
pub async fn slo_post(State(state): State<AppState>, Form(form): Form<SloForm>) -> Response {
    let message = HttpPostBinding::decode(
        form.saml_request.as_deref(),
        form.saml_response.as_deref(),
        form.relay_state.as_deref(),
    );
    logout_message(&state, message).await
}

/// GET handler of the logout service (HTTP-Redirect binding).
pub async fn slo_redirect(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let message = HttpRedirectBinding::decode_query(query.as_deref().unwrap_or_default());
    logout_message(&state, message).await
}

/// POST handler of the logout service (SOAP binding).
pub async fn slo_soap(State(state): State<AppState>, body: String) -> Response {
    logout_message(&state, SoapBinding::decode(&body)).await
}

async fn logout_message(state: &AppState, message: SamlResult<DecodedMessage>) -> Response {
    let message = match message {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Undecodable logout message");
            return error_page(StatusCode::BAD_REQUEST, "malformed logout message", None);
        }
    };

    match state.verificator.handle_logout_message(&message).await {
        Ok(LogoutOutcome::Confirmed(context)) => {
            info!(
                provider = %context.provider_key,
                request_id = %context.request_id,
                "Logout confirmed by provider"
            );
            match context.return_url {
                Some(url) => Redirect::to(&url).into_response(),
                None => pages::logged_out_page(),
            }
        }
        Ok(LogoutOutcome::Answered { message, .. }) => pages::outbound(message),
        Err(e) => federation_error(&e),
    }
}

/// GET handler serving this SP's metadata.
pub async fn metadata(State(state): State<AppState>) -> Response {
    let Some(publisher) = state.verificator.metadata() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match publisher.document().await {
        Ok(document) => ([(header::CONTENT_TYPE, METADATA_CONTENT_TYPE)], document).into_response(),
        Err(e) => {
            error!(error = %e, "Cannot produce metadata");
            error_page(StatusCode::INTERNAL_SERVER_ERROR, "metadata unavailable", None)
        }
    }
}

/// Maps a federation error to an error page.
pub fn federation_error(err: &FederationError) -> Response {
    let status = match err {
        FederationError::AmbiguousProvider { .. }
        | FederationError::Authentication(_)
        | FederationError::Saml(_) => StatusCode::BAD_REQUEST,
        FederationError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
        FederationError::LoginInProgress => StatusCode::CONFLICT,
        FederationError::MetadataFetch(_) => StatusCode::BAD_GATEWAY,
        FederationError::Configuration(_) | FederationError::Signing(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
        return error_page(status, "internal error", None);
    }
    if let FederationError::Authentication(e) = err {
        warn!(kind = %e.kind, detail = %e.detail, "Rejected protocol message");
        return error_page(status, USER_FAILURE_MESSAGE, None);
    }
    error_page(status, &err.to_string(), None)
}

/// Accepts only paths on this server as return addresses.
fn local_return_url(url: Option<String>) -> Result<String, Response> {
    match url {
        None => Ok("/".to_string()),
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => {
            Ok(url)
        }
        Some(url) => {
            warn!(return_url = %url, "Refusing non-local return address");
            Err(error_page(
                StatusCode::BAD_REQUEST,
                "return_url must be a path on this server",
                None,
            ))
        }
    }
}

/// Reads the session cookie.
fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn set_session_cookie(response: &mut Response, name: &str, session_id: &str) {
    let cookie = format!("{name}={session_id}; Path=/; HttpOnly; SameSite=Lax");
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => error!(error = %e, "Session cookie is not a valid header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; FEDSESSION=abc123; lang=en"),
        );
        assert_eq!(session_cookie(&headers, "FEDSESSION").as_deref(), Some("abc123"));
        assert_eq!(session_cookie(&headers, "OTHER"), None);
    }

    #[test]
    fn empty_session_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("FEDSESSION="));
        assert_eq!(session_cookie(&headers, "FEDSESSION"), None);
    }

    #[test]
    fn only_local_return_addresses() {
        assert_eq!(local_return_url(None).unwrap(), "/");
        assert_eq!(local_return_url(Some("/home?x=1".into())).unwrap(), "/home?x=1");
        assert!(local_return_url(Some("https://evil.example".into())).is_err());
        assert!(local_return_url(Some("//evil.example".into())).is_err());
    }

    #[test]
    fn ambiguous_provider_is_a_client_error_naming_the_parameter() {
        let response = federation_error(&FederationError::AmbiguousProvider { parameter: "idp" });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signing_failure_is_a_server_error() {
        let response = federation_error(&FederationError::Signing("no key".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
