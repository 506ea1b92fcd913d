// ==========================================
// STREAM ENDPOINTS
// ==========================================
// Two JSON endpoints back the live stream:
//   resolution: {success, stream_url?, error?}
//   metadata:   {success, data?, error?}
// Transport failures and `success: false` are network errors; a body
// that does not decode is a parse error.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::{PlayerError, Result};
use crate::stream::metadata::MetadataSnapshot;

#[async_trait]
pub trait StreamEndpoints: Send + Sync {
    /// Asks the server for a fresh, playable stream URL
    async fn resolve_stream_url(&self) -> Result<String>;

    async fn fetch_metadata(&self) -> Result<MetadataSnapshot>;
}

#[derive(Debug, Deserialize)]
struct StreamUrlResponse {
    success: bool,
    #[serde(default)]
    stream_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    success: bool,
    #[serde(default)]
    data: Option<MetadataSnapshot>,
    #[serde(default)]
    error: Option<String>,
}

/// Decodes a stream-resolution response body
pub fn parse_stream_url(body: &str) -> Result<String> {
    let response: StreamUrlResponse =
        serde_json::from_str(body).map_err(|e| PlayerError::parse(format!("stream url response: {}", e)))?;

    if !response.success {
        return Err(PlayerError::network(
            response.error.unwrap_or_else(|| "stream URL unavailable".to_string()),
        ));
    }

    match response.stream_url {
        Some(url) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        _ => Err(PlayerError::parse("stream url response has no stream_url")),
    }
}

/// Decodes a metadata response body
pub fn parse_metadata(body: &str) -> Result<MetadataSnapshot> {
    let response: MetadataResponse =
        serde_json::from_str(body).map_err(|e| PlayerError::parse(format!("metadata response: {}", e)))?;

    if !response.success {
        return Err(PlayerError::network(
            response.error.unwrap_or_else(|| "metadata unavailable".to_string()),
        ));
    }

    response
        .data
        .ok_or_else(|| PlayerError::parse("metadata response has no data"))
}

pub struct HttpStreamApi {
    client: reqwest::Client,
    stream_url_endpoint: String,
    metadata_endpoint: String,
    timeout: Duration,
}

impl HttpStreamApi {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("podplay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpStreamApi {
            client,
            stream_url_endpoint: config.stream_url_endpoint.clone(),
            metadata_endpoint: config.metadata_endpoint.clone(),
            timeout: config.request_timeout(),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PlayerError::network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlayerError::network(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        response.text().await.map_err(|e| PlayerError::network(e.to_string()))
    }
}

#[async_trait]
impl StreamEndpoints for HttpStreamApi {
    async fn resolve_stream_url(&self) -> Result<String> {
        let body = self.get_text(&self.stream_url_endpoint).await?;
        parse_stream_url(&body)
    }

    async fn fetch_metadata(&self) -> Result<MetadataSnapshot> {
        let body = self.get_text(&self.metadata_endpoint).await?;
        parse_metadata(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_success() {
        let url = parse_stream_url(r#"{"success": true, "stream_url": "https://radio.test/live.mp3"}"#).unwrap();
        assert_eq!(url, "https://radio.test/live.mp3");
    }

    #[test]
    fn stream_url_failure_is_network_error() {
        let err = parse_stream_url(r#"{"success": false, "error": "off air"}"#).unwrap_err();
        assert!(matches!(err, PlayerError::Network(ref msg) if msg == "off air"));
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert!(matches!(parse_stream_url("<html>"), Err(PlayerError::Parse(_))));
        assert!(matches!(parse_stream_url(r#"{"success": true}"#), Err(PlayerError::Parse(_))));
        assert!(matches!(parse_metadata(r#"{"success": true}"#), Err(PlayerError::Parse(_))));
    }

    #[test]
    fn metadata_success() {
        let body = r#"{"success": true, "data": {"current": {"title": "Song A"}}}"#;
        assert_eq!(parse_metadata(body).unwrap().current.title, "Song A");
    }
}
