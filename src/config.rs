//! Configuration types for the companion engine.
//!
//! Compile-time defaults live in the `Default` impls. A local TOML file can
//! override them, and a remote configuration document (all fields optional)
//! is merged on top at startup. Remote fetch failure is tolerated: the engine
//! keeps whatever it already has.

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Top-level configuration for the companion engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// External endpoint URLs.
    pub endpoints: EndpointConfig,
    /// Input/transcript/queue size limits.
    pub limits: LimitConfig,
    /// Periodic metrics refresh intervals.
    pub update_intervals: UpdateIntervalConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Avatar asset sources and load behavior.
    pub avatar: AvatarConfig,
    /// Fixed utterances (welcome line, chat-failure apology).
    pub speech: SpeechLinesConfig,
    /// System prompt prepended to every chat request.
    pub system_prompt: String,
    /// Optional WebSocket URL for the live TPS stream.
    pub ws_url: Option<String>,
}

/// External endpoint URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Chat completion endpoint.
    pub chat: String,
    /// TTS synthesis endpoint.
    pub tts: String,
    /// Asset price endpoint.
    pub price: String,
    /// Network TPS endpoint.
    pub tps: String,
    /// Remote configuration document.
    pub config: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            chat: "/api/chat".to_owned(),
            tts: "/api/tts".to_owned(),
            price: "/api/price".to_owned(),
            tps: "/api/tps".to_owned(),
            config: "/api/config".to_owned(),
        }
    }
}

/// Size limits enforced client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum user message length; longer input is rejected.
    pub max_message_length: usize,
    /// Maximum transcript length in turns; oldest turns are dropped.
    pub max_conversation_size: usize,
    /// Speech queue capacity; overflow drops the oldest item.
    pub max_audio_queue_size: usize,
    /// Synthesized-audio cache capacity in entries.
    pub audio_cache_size: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_message_length: 500,
            max_conversation_size: 50,
            max_audio_queue_size: 10,
            audio_cache_size: 50,
        }
    }
}

/// Periodic metrics refresh intervals in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateIntervalConfig {
    /// Price poll interval.
    pub price_ms: u64,
    /// TPS poll interval (used when no WebSocket stream is configured).
    pub tps_ms: u64,
}

impl Default for UpdateIntervalConfig {
    fn default() -> Self {
        Self {
            price_ms: 30_000,
            tps_ms: 10_000,
        }
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Playback sample rate in Hz. The TTS endpoint returns 16-bit
    /// little-endian mono PCM at this rate.
    pub sample_rate: u32,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Preferred TTS voice name sent with each synthesis request.
    pub voice: String,
    /// Timeout for a single TTS synthesis request.
    pub tts_timeout_secs: u64,
    /// Number of TTS retries before falling back to local speech.
    pub tts_retries: u32,
    /// Fixed backoff between TTS retries in milliseconds.
    pub tts_retry_backoff_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            output_device: None,
            voice: "nova".to_owned(),
            tts_timeout_secs: 30,
            tts_retries: 3,
            tts_retry_backoff_ms: 1_000,
        }
    }
}

/// Avatar asset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Asset sources tried in order (URLs or local paths).
    pub sources: Vec<String>,
    /// Per-source load deadline in seconds.
    pub load_timeout_secs: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            sources: vec!["assets/companion.vrm".to_owned()],
            load_timeout_secs: 30,
        }
    }
}

/// Fixed utterances spoken by the companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechLinesConfig {
    /// Spoken shortly after startup.
    pub welcome: String,
    /// Spoken when the chat endpoint fails.
    pub chat_failure: String,
}

impl Default for SpeechLinesConfig {
    fn default() -> Self {
        Self {
            welcome: "Hey there! Great to see you. What would you like to talk about?".to_owned(),
            chat_failure: "Sorry, I'm having trouble thinking right now. Give me a moment and try again.".to_owned(),
        }
    }
}

impl CompanionConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| CompanionError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Fetch the remote configuration overlay and merge it over `self`.
    ///
    /// Any failure (network, non-2xx, malformed body) is tolerated: the
    /// current configuration is kept and a warning is logged.
    pub async fn merge_remote(&mut self, client: &reqwest::Client) {
        let url = self.endpoints.config.clone();
        match fetch_overlay(client, &url).await {
            Ok(overlay) => {
                self.apply(overlay);
                info!("remote config merged from {url}");
            }
            Err(e) => warn!("remote config unavailable ({e}), keeping defaults"),
        }
    }

    /// Apply a partial overlay: only present fields override.
    pub fn apply(&mut self, mut overlay: ConfigOverlay) {
        if let Some(endpoints) = overlay.take_endpoints() {
            if let Some(v) = endpoints.chat {
                self.endpoints.chat = v;
            }
            if let Some(v) = endpoints.tts {
                self.endpoints.tts = v;
            }
            if let Some(v) = endpoints.price {
                self.endpoints.price = v;
            }
            if let Some(v) = endpoints.tps {
                self.endpoints.tps = v;
            }
            if let Some(v) = endpoints.config {
                self.endpoints.config = v;
            }
        }
        if let Some(v) = overlay.max_message_length {
            self.limits.max_message_length = v;
        }
        if let Some(v) = overlay.max_conversation_size {
            self.limits.max_conversation_size = v;
        }
        if let Some(v) = overlay.max_audio_queue_size {
            self.limits.max_audio_queue_size = v;
        }
        if let Some(intervals) = overlay.update_intervals {
            if let Some(v) = intervals.price {
                self.update_intervals.price_ms = v;
            }
            if let Some(v) = intervals.tps {
                self.update_intervals.tps_ms = v;
            }
        }
        if let Some(v) = overlay.system_prompt {
            self.system_prompt = v;
        }
        if let Some(v) = overlay.ws_url {
            self.ws_url = Some(v);
        }
    }

    /// Per-source avatar load deadline.
    #[must_use]
    pub fn avatar_load_timeout(&self) -> Duration {
        Duration::from_secs(self.avatar.load_timeout_secs)
    }
}

/// Remote configuration document. Every field is optional; absent fields
/// leave the current value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigOverlay {
    pub api_endpoints: Option<EndpointOverlay>,
    pub max_message_length: Option<usize>,
    pub max_conversation_size: Option<usize>,
    pub max_audio_queue_size: Option<usize>,
    pub update_intervals: Option<IntervalOverlay>,
    pub system_prompt: Option<String>,
    pub ws_url: Option<String>,
    // Older servers send `endpoints` instead of `apiEndpoints`.
    pub endpoints: Option<EndpointOverlay>,
}

impl ConfigOverlay {
    /// Endpoint overlay, preferring the `apiEndpoints` spelling.
    fn take_endpoints(&mut self) -> Option<EndpointOverlay> {
        self.api_endpoints.take().or_else(|| self.endpoints.take())
    }
}

/// Partial endpoint overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointOverlay {
    pub chat: Option<String>,
    pub tts: Option<String>,
    pub price: Option<String>,
    pub tps: Option<String>,
    pub config: Option<String>,
}

/// Partial interval overrides in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntervalOverlay {
    pub price: Option<u64>,
    pub tps: Option<u64>,
}

async fn fetch_overlay(client: &reqwest::Client, url: &str) -> Result<ConfigOverlay> {
    let response = tokio::time::timeout(Duration::from_secs(10), client.get(url).send())
        .await
        .map_err(|_| CompanionError::Config("config fetch timed out".to_owned()))?
        .map_err(|e| CompanionError::Config(format!("config fetch failed: {e}")))?;
    if !response.status().is_success() {
        return Err(CompanionError::Config(format!(
            "config fetch returned {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| CompanionError::Config(format!("malformed config body: {e}")))
}
