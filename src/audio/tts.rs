//! TTS synthesis client.
//!
//! Posts `{text, voice, rate, pitch, volume}` to the synthesis endpoint and
//! returns the audio blob. Each attempt is bounded by a deadline; failures
//! retry with a fixed backoff, serialized so at most one request is in flight
//! per item. A response carrying `X-TTS-Fallback: browser` routes the item to
//! the local speech fallback instead.

use crate::config::AudioConfig;
use crate::error::{CompanionError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Response header the server sets to force the fallback path.
pub const FALLBACK_HEADER: &str = "x-tts-fallback";
/// Header value selecting the local fallback.
pub const FALLBACK_VALUE: &str = "browser";

/// Synthesis request body.
#[derive(Debug, Clone, Serialize)]
pub struct TtsRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// What the endpoint decided for one item.
#[derive(Debug, Clone)]
pub enum SynthOutcome {
    /// Synthesized 16-bit mono PCM.
    Audio(Bytes),
    /// Server instructed the client to use its local speech path.
    UseFallback,
}

/// HTTP client for the synthesis endpoint with bounded retries.
#[derive(Debug, Clone)]
pub struct TtsClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl TtsClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: String, config: &AudioConfig) -> Self {
        Self {
            client,
            endpoint,
            timeout: Duration::from_secs(config.tts_timeout_secs),
            attempts: config.tts_retries.max(1),
            backoff: Duration::from_millis(config.tts_retry_backoff_ms),
        }
    }

    /// Synthesize one request, retrying on failure.
    ///
    /// Returns the outcome together with the number of attempts used.
    ///
    /// # Errors
    ///
    /// Returns `Tts` once every attempt has failed or timed out.
    pub async fn synthesize(&self, request: &TtsRequest<'_>) -> (Result<SynthOutcome>, u32) {
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.backoff).await;
            }
            match self.attempt(request).await {
                Ok(outcome) => {
                    debug!("synthesized {} chars on attempt {attempt}", request.text.len());
                    return (Ok(outcome), attempt);
                }
                Err(e) => {
                    warn!("TTS attempt {attempt}/{} failed: {e}", self.attempts);
                    last_error = e.to_string();
                }
            }
        }
        (
            Err(CompanionError::Tts(format!(
                "synthesis failed after {} attempts: {last_error}",
                self.attempts
            ))),
            self.attempts,
        )
    }

    async fn attempt(&self, request: &TtsRequest<'_>) -> Result<SynthOutcome> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.endpoint).json(request).send(),
        )
        .await
        .map_err(|_| CompanionError::Tts("request timed out".to_owned()))?
        .map_err(|e| CompanionError::Tts(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CompanionError::Tts(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let wants_fallback = response
            .headers()
            .get(FALLBACK_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case(FALLBACK_VALUE));
        if wants_fallback {
            return Ok(SynthOutcome::UseFallback);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CompanionError::Tts(format!("body read failed: {e}")))?;
        if bytes.is_empty() {
            return Err(CompanionError::Tts("endpoint returned empty audio".to_owned()));
        }
        Ok(SynthOutcome::Audio(bytes))
    }
}
