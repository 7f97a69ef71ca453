//! Login tests: request, response and correlation over HTTP.

use chrono::Utc;

use crate::common::{sp_config, MockIdp, TestEnv};

#[tokio::test]
async fn test_login_round_trip() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("?return_url=/home").await?;
    let status = env.login_status().await?;
    assert_eq!(status["state"], "awaiting_response");
    assert_eq!(status["request_id"], request_id.as_str());

    let document = idp.signed_response(&request_id, Utc::now())?;
    let response = env.post_response(&document, &relay_state).await?;
    assert_eq!(response.status(), 303);
    assert_eq!(
        response.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/home")
    );

    let status = env.login_status().await?;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["result"]["status"], "success");
    assert_eq!(status["result"]["mapping"]["principal"], "alice");
    assert_eq!(env.sessions.len(), 1);

    // The same document again is refused.
    let again = env.post_response(&document, &relay_state).await?;
    assert_eq!(again.status(), 401);
    assert!(again.text().await?.contains("authentication failed"));

    Ok(())
}

#[tokio::test]
async fn test_login_over_redirect_binding() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("?return_url=/inbox").await?;
    let url = idp.redirect_response(&env.url("/saml/acs"), &request_id, &relay_state, Utc::now())?;
    let response = env.client.get(&url).send().await?;
    assert_eq!(response.status(), 303);
    assert_eq!(
        response.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/inbox")
    );

    let status = env.login_status().await?;
    assert_eq!(status["result"]["status"], "success");
    assert_eq!(env.sessions.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_redirect_binding_without_query_signature_fails() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("").await?;
    let url = idp.redirect_response(&env.url("/saml/acs"), &request_id, &relay_state, Utc::now())?;
    let unsigned = url
        .split("&SigAlg=")
        .next()
        .ok_or_else(|| anyhow::anyhow!("no query"))?;
    let response = env.client.get(unsigned).send().await?;
    assert_eq!(response.status(), 401);

    let status = env.login_status().await?;
    assert_eq!(status["result"]["error"], "invalid_signature");
    assert!(env.sessions.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_untrusted_signature_fails() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let rogue = MockIdp::new("idp1", "rogue")?;

    let (request_id, relay_state) = env.start_login("").await?;
    let document = rogue.signed_response(&request_id, Utc::now())?;
    let response = env.post_response(&document, &relay_state).await?;
    assert_eq!(response.status(), 401);

    let status = env.login_status().await?;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["result"]["status"], "failed");
    assert_eq!(status["result"]["error"], "invalid_signature");
    assert!(env.sessions.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_unknown_relay_state_is_refused() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, _) = env.start_login("").await?;
    let document = idp.signed_response(&request_id, Utc::now())?;
    let response = env.post_response(&document, "forged-relay-state").await?;
    assert_eq!(response.status(), 401);

    // The real login is still waiting.
    let status = env.login_status().await?;
    assert_eq!(status["state"], "awaiting_response");

    Ok(())
}

#[tokio::test]
async fn test_two_providers_need_a_choice() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1", "idp2"])?).await?;

    let response = env.client.get(env.url("/saml/login")).send().await?;
    assert_eq!(response.status(), 400);
    let body = response.text().await?;
    assert!(body.contains("idp"));
    assert!(body.contains("parameter must select one"));

    let (request_id, _) = env.start_login("?idp=idp2").await?;
    assert!(!request_id.is_empty());

    let unknown = env.client.get(env.url("/saml/login?idp=nope")).send().await?;
    assert_eq!(unknown.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_external_return_url_is_refused() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let response = env
        .client
        .get(env.url("/saml/login?return_url=https://evil.example.org/"))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_cancel_login() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("").await?;
    let cancel = env.client.post(env.url("/saml/login/cancel")).send().await?;
    let body: serde_json::Value = serde_json::from_str(&cancel.text().await?)?;
    assert_eq!(body["cancelled"], true);
    assert_eq!(env.login_status().await?["state"], "no_context");

    // A late answer to the cancelled request is unsolicited.
    let document = idp.signed_response(&request_id, Utc::now())?;
    let response = env.post_response(&document, &relay_state).await?;
    assert_eq!(response.status(), 401);

    Ok(())
}
