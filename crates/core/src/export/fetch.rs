use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::{assets::MusicTrack, decode::decode_async, PcmBuffer, Result, StudioError};

/// Retrieves intro and outro audio.
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// Fetches and decodes `track`. Every failure is a [`StudioError::Fetch`].
    async fn fetch(&self, track: &MusicTrack) -> Result<PcmBuffer>;
}

/// Downloads tracks over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTrackFetcher {
    client: Client,
}

impl HttpTrackFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudioError::msg(format!("could not build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrackFetcher for HttpTrackFetcher {
    async fn fetch(&self, track: &MusicTrack) -> Result<PcmBuffer> {
        let url = track.audio_url.as_str();
        debug!(track = %track.id, url, "fetching music track");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                StudioError::fetch(url, reason)
            })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StudioError::fetch(url, e))?;

        let name = url.rsplit('/').next().unwrap_or(url).to_string();
        let decoded = decode_async(name, bytes.to_vec())
            .await
            .map_err(|e| StudioError::fetch(url, e))?;
        Ok(decoded.buffer)
    }
}
