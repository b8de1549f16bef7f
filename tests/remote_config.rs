//! Remote configuration overlay behavior against a mock config endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use solmate::config::CompanionConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn overlay_overrides_present_fields_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "apiEndpoints": { "chat": "https://api.example.com/v2/chat" },
            "maxMessageLength": 280,
            "updateIntervals": { "price": 60000 },
            "wsUrl": "wss://stream.example.com/tps"
        })))
        .mount(&server)
        .await;

    let mut config = CompanionConfig::default();
    config.endpoints.config = format!("{}/config", server.uri());
    config.merge_remote(&reqwest::Client::new()).await;

    assert_eq!(config.endpoints.chat, "https://api.example.com/v2/chat");
    assert_eq!(config.endpoints.tts, "/api/tts", "absent field untouched");
    assert_eq!(config.limits.max_message_length, 280);
    assert_eq!(config.update_intervals.price_ms, 60_000);
    assert_eq!(config.update_intervals.tps_ms, 10_000);
    assert_eq!(config.ws_url.as_deref(), Some("wss://stream.example.com/tps"));
}

#[tokio::test]
async fn server_failure_keeps_local_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = CompanionConfig::default();
    config.endpoints.config = format!("{}/config", server.uri());
    let before = format!("{config:?}");
    config.merge_remote(&reqwest::Client::new()).await;
    assert_eq!(before, format!("{config:?}"));
}

#[tokio::test]
async fn malformed_body_keeps_local_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let mut config = CompanionConfig::default();
    config.endpoints.config = format!("{}/config", server.uri());
    config.merge_remote(&reqwest::Client::new()).await;
    assert_eq!(config.limits.max_message_length, 500);
}
