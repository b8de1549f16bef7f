//! Live network metrics: asset price and transactions per second.
//!
//! Price and TPS are polled over HTTP on the coordinator's timers. When a
//! WebSocket URL is configured, TPS comes from a streaming task instead; the
//! stream reconnects with exponential backoff and the backoff resets once a
//! connection is established. All readings flow back over a channel and are
//! applied on the engine tick.

use crate::error::{CompanionError, Result};
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// One reading delivered to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricsUpdate {
    Price(f64),
    Tps(f64),
}

/// Base delay for WebSocket reconnects.
const RECONNECT_BASE: Duration = Duration::from_secs(5);
/// Reconnect delay ceiling.
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Fetch the current asset price in USD.
///
/// The endpoint nests the price under an asset id, as either `usdPrice` or
/// `price`; a top-level `price` field is accepted too.
///
/// # Errors
///
/// Returns `Transport` on network failure or an unrecognized body shape.
pub async fn fetch_price(client: &reqwest::Client, url: &str) -> Result<f64> {
    let body: Value = get_json(client, url).await?;
    if let Some(price) = body.get("price").and_then(Value::as_f64) {
        return Ok(price);
    }
    if let Some(object) = body.as_object() {
        for entry in object.values() {
            if let Some(price) = entry
                .get("usdPrice")
                .or_else(|| entry.get("price"))
                .and_then(Value::as_f64)
            {
                return Ok(price);
            }
        }
    }
    Err(CompanionError::Transport(
        "price body has no usdPrice/price field".to_owned(),
    ))
}

/// Fetch the current network TPS.
///
/// # Errors
///
/// Returns `Transport` on network failure or a body without a `tps` field.
pub async fn fetch_tps(client: &reqwest::Client, url: &str) -> Result<f64> {
    let body: Value = get_json(client, url).await?;
    body.get("tps")
        .and_then(Value::as_f64)
        .ok_or_else(|| CompanionError::Transport("tps body has no tps field".to_owned()))
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let response = tokio::time::timeout(Duration::from_secs(10), client.get(url).send())
        .await
        .map_err(|_| CompanionError::Transport(format!("{url}: timed out")))?
        .map_err(|e| CompanionError::Transport(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(CompanionError::Transport(format!(
            "{url}: returned {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| CompanionError::Transport(format!("{url}: malformed body: {e}")))
}

/// Run the TPS WebSocket stream, delivering readings until the receiver is
/// dropped. Frames are JSON objects carrying a `tps` field; anything else is
/// ignored. Reconnect delay doubles per failed attempt up to the ceiling and
/// resets after a successful open.
pub async fn run_tps_stream(url: String, tx: mpsc::UnboundedSender<MetricsUpdate>) {
    let mut attempts: u32 = 0;
    loop {
        match connect_async(&url).await {
            Ok((mut stream, _)) => {
                info!("tps stream connected: {url}");
                attempts = 0;
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                continue;
                            };
                            if let Some(tps) = value.get("tps").and_then(Value::as_f64) {
                                if tx.send(MetricsUpdate::Tps(tps)).is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("tps stream error: {e}");
                            break;
                        }
                    }
                }
                debug!("tps stream disconnected");
            }
            Err(e) => {
                warn!("tps stream connect failed: {e}");
            }
        }

        if tx.is_closed() {
            return;
        }
        let delay = RECONNECT_BASE
            .saturating_mul(2u32.saturating_pow(attempts))
            .min(RECONNECT_MAX);
        attempts = attempts.saturating_add(1);
        debug!("tps stream reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn price_parses_nested_usd_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "solana": { "usdPrice": 142.37 }
            })))
            .mount(&server)
            .await;

        let price = fetch_price(&reqwest::Client::new(), &format!("{}/price", server.uri()))
            .await
            .unwrap();
        assert!((price - 142.37).abs() < 1e-9);
    }

    #[tokio::test]
    async fn price_parses_nested_and_flat_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nested"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sol": { "price": 99.5 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "price": 12.0 })),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let nested = fetch_price(&client, &format!("{}/nested", server.uri()))
            .await
            .unwrap();
        let flat = fetch_price(&client, &format!("{}/flat", server.uri()))
            .await
            .unwrap();
        assert!((nested - 99.5).abs() < 1e-9);
        assert!((flat - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn price_rejects_unknown_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": 1 })),
            )
            .mount(&server)
            .await;

        let result =
            fetch_price(&reqwest::Client::new(), &format!("{}/price", server.uri())).await;
        assert!(matches!(result, Err(CompanionError::Transport(_))));
    }

    #[tokio::test]
    async fn tps_parses_reading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tps"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "tps": 2843.0 })),
            )
            .mount(&server)
            .await;

        let tps = fetch_tps(&reqwest::Client::new(), &format!("{}/tps", server.uri()))
            .await
            .unwrap();
        assert!((tps - 2843.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn http_failure_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tps"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = fetch_tps(&reqwest::Client::new(), &format!("{}/tps", server.uri())).await;
        assert!(matches!(result, Err(CompanionError::Transport(_))));
    }

    #[test]
    fn reconnect_delay_doubles_to_the_ceiling() {
        let delays: Vec<Duration> = (0..6)
            .map(|attempts: u32| {
                RECONNECT_BASE
                    .saturating_mul(2u32.saturating_pow(attempts))
                    .min(RECONNECT_MAX)
            })
            .collect();
        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[1], Duration::from_secs(10));
        assert_eq!(delays[2], Duration::from_secs(20));
        assert_eq!(delays[3], Duration::from_secs(40));
        assert_eq!(delays[4], Duration::from_secs(60));
        assert_eq!(delays[5], Duration::from_secs(60), "capped");
    }
}
