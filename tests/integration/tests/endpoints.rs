//! Health and metadata endpoint tests.

use crate::common::{sp_config, TestEnv, SP_ENTITY_ID};

#[tokio::test]
async fn test_health_endpoints() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;

    let response = env.client.get(env.url("/health")).send().await?;
    assert!(response.status().is_success());
    let body: serde_json::Value = serde_json::from_str(&response.text().await?)?;
    assert_eq!(body["status"], "healthy");

    let live = env.client.get(env.url("/health/live")).send().await?;
    assert_eq!(live.status(), 200);
    let ready = env.client.get(env.url("/health/ready")).send().await?;
    assert_eq!(ready.status(), 200);

    Ok(())
}

#[tokio::test]
async fn test_not_ready_without_providers() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&[])?).await?;
    let ready = env.client.get(env.url("/health/ready")).send().await?;
    assert_eq!(ready.status(), 503);
    Ok(())
}

#[tokio::test]
async fn test_sp_metadata_endpoint() -> anyhow::Result<()> {
    let mut config = sp_config(&["idp1"])?;
    config.metadata_publishing.publish = true;
    config.slo.path = Some("/saml/slo".to_string());
    config.slo.realm = Some("main".to_string());
    let env = TestEnv::new(config).await?;

    let response = env.client.get(env.url("/saml/metadata")).send().await?;
    assert!(
        response.status().is_success(),
        "Expected success status, got {}",
        response.status()
    );

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert_eq!(content_type, "application/samlmetadata+xml");

    let body = response.text().await?;
    let root = fed_saml::xml::parse(&body)?;
    assert_eq!(root.attr("entityID"), Some(SP_ENTITY_ID));
    assert!(body.contains("SPSSODescriptor"));
    assert!(body.contains("AssertionConsumerService"));
    assert!(body.contains("SingleLogoutService"));

    Ok(())
}

#[tokio::test]
async fn test_metadata_not_published_by_default() -> anyhow::Result<()> {
    let env = TestEnv::new(sp_config(&["idp1"])?).await?;
    let response = env.client.get(env.url("/saml/metadata")).send().await?;
    assert_eq!(response.status(), 404);
    Ok(())
}
