//! Single logout tests over the SOAP back channel.

use chrono::Utc;

use crate::common::{sp_config, MockIdp, TestEnv};

#[tokio::test]
async fn test_idp_initiated_soap_logout() -> anyhow::Result<()> {
    let mut config = sp_config(&["idp1"])?;
    config.slo.path = Some("/saml/slo".to_string());
    config.slo.realm = Some("main".to_string());
    let env = TestEnv::new(config).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("").await?;
    let document = idp.signed_response(&request_id, Utc::now())?;
    let login = env.post_response(&document, &relay_state).await?;
    assert_eq!(login.status(), 303);
    assert_eq!(env.sessions.len(), 1);

    let envelope = idp.soap_logout(Utc::now())?;
    let response = env
        .client
        .post(env.url("/saml/slo/soap"))
        .header("content-type", "text/xml")
        .body(envelope.clone())
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body = response.text().await?;
    assert!(body.contains("LogoutResponse"));
    assert!(body.contains("urn:oasis:names:tc:SAML:2.0:status:Success"));
    assert!(env.sessions.is_empty());

    // Replaying the request is denied.
    let replay = env
        .client
        .post(env.url("/saml/slo/soap"))
        .body(envelope)
        .send()
        .await?;
    let body = replay.text().await?;
    assert!(body.contains("urn:oasis:names:tc:SAML:2.0:status:RequestDenied"));

    Ok(())
}

#[tokio::test]
async fn test_slo_disabled_without_realm() -> anyhow::Result<()> {
    let mut config = sp_config(&["idp1"])?;
    config.slo.path = Some("/saml/slo".to_string());
    let env = TestEnv::new(config).await?;

    let response = env
        .client
        .post(env.url("/saml/slo/soap"))
        .body("<soap:Envelope/>")
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[tokio::test]
async fn test_local_logout_without_provider_endpoint() -> anyhow::Result<()> {
    let mut config = sp_config(&["idp1"])?;
    config.slo.path = Some("/saml/slo".to_string());
    config.slo.realm = Some("main".to_string());
    let env = TestEnv::new(config).await?;
    let idp = MockIdp::new("idp1", "idp1")?;

    let (request_id, relay_state) = env.start_login("").await?;
    let document = idp.signed_response(&request_id, Utc::now())?;
    env.post_response(&document, &relay_state).await?;
    assert_eq!(env.sessions.len(), 1);

    // idp1 publishes no logout endpoint, so only the local session ends.
    let response = env.client.get(env.url("/saml/logout")).send().await?;
    assert_eq!(response.status(), 200);
    assert!(response.text().await?.contains("logged out"));
    assert!(env.sessions.is_empty());

    Ok(())
}
