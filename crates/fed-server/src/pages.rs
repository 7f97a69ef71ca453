//! HTML pages and protocol message rendering.

use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use fed_saml::bindings::OutboundMessage;
use fed_saml::xml::escape;
use fed_sp::AuthenticationResult;

/// Content type of SAML metadata documents.
pub const METADATA_CONTENT_TYPE: &str = "application/samlmetadata+xml";

/// Content type of SOAP 1.1 envelopes.
pub const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Delivers an outgoing protocol message to the browser or back channel.
pub fn outbound(message: OutboundMessage) -> Response {
    match message {
        OutboundMessage::Redirect(url) => Redirect::to(&url).into_response(),
        OutboundMessage::PostForm(html) => Html(html).into_response(),
        OutboundMessage::Soap(envelope) => {
            ([(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)], envelope).into_response()
        }
    }
}

/// Renders an error page.
pub fn error_page(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Sign-in error</title>
    <style>
        body {{ font-family: sans-serif; text-align: center; padding: 50px; }}
        .error {{ color: #d32f2f; }}
    </style>
</head>
<body>
    <h1>Sign-in error</h1>
    <p class="error">{}</p>
    {}
</body>
</html>"#,
        escape(error),
        description
            .map(|d| format!("<p>{}</p>", escape(d)))
            .unwrap_or_default()
    );

    (status, Html(html)).into_response()
}

/// Posts the result of a sandboxed login to its callback.
///
/// The result travels as JSON in the `result` form field.
pub fn sandbox_delivery(callback: &str, result: &AuthenticationResult) -> Response {
    let json = match serde_json::to_string(result) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Cannot serialize sandbox result");
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None);
        }
    };
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Sandbox result</title>
</head>
<body onload="document.forms[0].submit()">
    <form method="post" action="{}">
        <input type="hidden" name="result" value="{}"/>
        <noscript><button type="submit">Continue</button></noscript>
    </form>
</body>
</html>"#,
        escape(callback),
        escape(&json)
    );
    Html(html).into_response()
}

/// Page shown after a logout that has nowhere else to go.
pub fn logged_out_page() -> Response {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Logged out</title>
</head>
<body>
    <h1>Logged out</h1>
    <p>You have been successfully logged out.</p>
</body>
</html>"#,
    )
    .into_response()
}
