//! HTTP client for the external embedding-extraction service.
//!
//! Every failure mode (transport error, timeout, non-2xx status, malformed
//! payload) collapses into `None`, or `false` for the health probe. The
//! client never returns an error, so call sites can run unconditionally and
//! decide for themselves whether a missing vector matters.

use crate::config::RecognitionConfig;
use serde::Deserialize;
use std::time::Duration;

/// Seam for the embedding service so orchestration and ingest can be tested
/// without the network.
pub trait EmbeddingProvider: Send + Sync {
    fn extract_from_buffer(&self, image: &[u8], content_type: &str) -> Option<Vec<f32>>;
    fn extract_from_url(&self, url: &str) -> Option<Vec<f32>>;
    fn is_available(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    embedding: Option<Vec<f32>>,
}

pub struct EmbeddingClient {
    api_url: String,
    dimensions: usize,
    extract_timeout: Duration,
    download_timeout: Duration,
    health_timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(config: &RecognitionConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            dimensions: config.dimensions,
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        }
    }

    fn client(timeout: Duration) -> Option<reqwest::blocking::Client> {
        match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(err) => {
                log::error!("failed to build http client: {err}");
                None
            }
        }
    }

    fn post_extract(&self, image: &[u8], content_type: &str) -> anyhow::Result<ExtractResponse> {
        let part = reqwest::blocking::multipart::Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str(content_type)
            .unwrap_or_else(|_| {
                reqwest::blocking::multipart::Part::bytes(image.to_vec()).file_name("image.jpg")
            });

        let form = reqwest::blocking::multipart::Form::new().part("file", part);

        let client = Self::client(self.extract_timeout)
            .ok_or_else(|| anyhow::anyhow!("http client init failed"))?;

        let response = client
            .post(format!("{}/api/v1/embeddings/extract", self.api_url))
            .multipart(form)
            .send()?
            .error_for_status()?;

        Ok(response.json::<ExtractResponse>()?)
    }
}

impl EmbeddingProvider for EmbeddingClient {
    fn extract_from_buffer(&self, image: &[u8], content_type: &str) -> Option<Vec<f32>> {
        log::debug!("extracting embedding from buffer ({} bytes)", image.len());

        let response = match self.post_extract(image, content_type) {
            Ok(response) => response,
            Err(err) => {
                log::error!("embedding extraction failed: {err}");
                return None;
            }
        };

        let embedding = match response.embedding {
            Some(embedding) if !embedding.is_empty() => embedding,
            _ => {
                log::error!("embedding service returned no usable vector");
                return None;
            }
        };

        if embedding.len() != self.dimensions {
            log::warn!(
                "embedding has unexpected dimensionality: {} (expected {})",
                embedding.len(),
                self.dimensions
            );
        }

        log::debug!("embedding extracted (dimension {})", embedding.len());
        Some(embedding)
    }

    fn extract_from_url(&self, url: &str) -> Option<Vec<f32>> {
        log::debug!("downloading image for extraction: {url}");

        let client = Self::client(self.download_timeout)?;

        let response = match client.get(url).send().and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(err) => {
                log::error!("failed to download image {url}: {err}");
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = match response.bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("failed to read image body from {url}: {err}");
                return None;
            }
        };

        self.extract_from_buffer(&bytes, &content_type)
    }

    fn is_available(&self) -> bool {
        let Some(client) = Self::client(self.health_timeout) else {
            return false;
        };

        match client.get(format!("{}/health", self.api_url)).send() {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::warn!(
                    "embedding service health probe returned {}",
                    response.status()
                );
                false
            }
            Err(_) => {
                log::warn!("embedding service unavailable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 127.0.0.1:1 refuses connections immediately, so these tests exercise
    // the failure paths without waiting on timeouts.
    fn unreachable_client() -> EmbeddingClient {
        let config = RecognitionConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            extract_timeout_secs: 2,
            download_timeout_secs: 2,
            health_timeout_secs: 2,
            ..Default::default()
        };
        EmbeddingClient::new(&config)
    }

    #[test]
    fn test_extract_from_buffer_unreachable_returns_none() {
        let client = unreachable_client();
        assert!(client.extract_from_buffer(b"not an image", "image/jpeg").is_none());
    }

    #[test]
    fn test_extract_from_url_unreachable_returns_none() {
        let client = unreachable_client();
        assert!(client.extract_from_url("http://127.0.0.1:1/face.jpg").is_none());
    }

    #[test]
    fn test_is_available_unreachable_returns_false() {
        let client = unreachable_client();
        assert!(!client.is_available());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = RecognitionConfig {
            api_url: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config);
        assert_eq!(client.api_url, "http://127.0.0.1:1");
    }

    #[test]
    fn test_extract_response_parses_embedding() {
        let parsed: ExtractResponse =
            serde_json::from_str(r#"{"embedding": [0.1, 0.2, 0.3]}"#).unwrap();
        assert_eq!(parsed.embedding, Some(vec![0.1, 0.2, 0.3]));

        let missing: ExtractResponse = serde_json::from_str("{}").unwrap();
        assert!(missing.embedding.is_none());
    }
}
