//! Avatar asset loading.
//!
//! Sources are tried in order; each attempt is bounded by a deadline. HTTP(S)
//! sources go through `reqwest`, anything else is read from the local
//! filesystem. When every source is exhausted the caller installs the
//! placeholder rig and keeps running.

use super::humanoid::LoadedRig;
use crate::error::{CompanionError, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::{info, warn};

/// Multi-source avatar loader with a per-source deadline.
#[derive(Debug, Clone)]
pub struct AvatarLoader {
    client: reqwest::Client,
    timeout: Duration,
}

impl AvatarLoader {
    #[must_use]
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Try each source in order and build a rig from the first that loads.
    ///
    /// # Errors
    ///
    /// Returns `AssetLoad` once every source has failed or timed out.
    pub async fn load(&self, sources: &[String]) -> Result<LoadedRig> {
        if sources.is_empty() {
            return Err(CompanionError::AssetLoad("no avatar sources configured".to_owned()));
        }

        let mut failures = Vec::with_capacity(sources.len());
        for source in sources {
            match tokio::time::timeout(self.timeout, self.fetch(source)).await {
                Ok(Ok(bytes)) => match LoadedRig::from_bytes(&display_name(source), &bytes) {
                    Ok(rig) => {
                        info!("avatar loaded from {source} ({} bytes)", bytes.len());
                        return Ok(rig);
                    }
                    Err(e) => {
                        warn!("avatar source {source} unusable: {e}");
                        failures.push(format!("{source}: {e}"));
                    }
                },
                Ok(Err(e)) => {
                    warn!("avatar source {source} failed: {e}");
                    failures.push(format!("{source}: {e}"));
                }
                Err(_) => {
                    warn!("avatar source {source} timed out after {:?}", self.timeout);
                    failures.push(format!("{source}: deadline exceeded"));
                }
            }
        }

        Err(CompanionError::AssetLoad(format!(
            "all {} sources failed: {}",
            sources.len(),
            failures.join("; ")
        )))
    }

    async fn fetch(&self, source: &str) -> Result<Bytes> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .client
                .get(source)
                .send()
                .await
                .map_err(|e| CompanionError::AssetLoad(format!("fetch failed: {e}")))?;
            if !response.status().is_success() {
                return Err(CompanionError::AssetLoad(format!(
                    "fetch returned {}",
                    response.status()
                )));
            }
            response
                .bytes()
                .await
                .map_err(|e| CompanionError::AssetLoad(format!("body read failed: {e}")))
        } else {
            let bytes = tokio::fs::read(source).await?;
            Ok(Bytes::from(bytes))
        }
    }
}

/// Filename stem of a source path/URL, for rig display names.
fn display_name(source: &str) -> String {
    source
        .rsplit('/')
        .next()
        .unwrap_or(source)
        .split('.')
        .next()
        .unwrap_or(source)
        .to_owned()
}
