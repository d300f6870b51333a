use crate::traits::ImageSource;
use crate::types::{Result, VerifierError, VerifyConfig};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Downloads submitted photos so they can be fingerprinted.
pub struct ImageFetcher {
    client: Client,
    max_image_size_mb: usize,
}

impl ImageFetcher {
    pub fn new(config: &VerifyConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            max_image_size_mb: config.max_image_size_mb,
        })
    }

    fn max_bytes(&self) -> usize {
        self.max_image_size_mb * 1024 * 1024
    }
}

#[async_trait]
impl ImageSource for ImageFetcher {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(VerifierError::Validation(format!(
                "Unsupported image URL scheme: {}",
                parsed.scheme()
            )));
        }

        debug!("Fetching image: {}", url);
        let mut response = self.client.get(parsed).send().await?;
        let status = response.status();

        if !status.is_success() {
            warn!("Image fetch failed for {}: HTTP {}", url, status);
            return Err(VerifierError::Upstream(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let max_bytes = self.max_bytes();
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(VerifierError::ImageTooLarge {
                    size_mb: content_length as usize / (1024 * 1024),
                });
            }
        }

        // Content-Length is optional, so the body is capped while it streams in
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > max_bytes {
                warn!("Image {} exceeded {}MB while downloading", url, self.max_image_size_mb);
                return Err(VerifierError::ImageTooLarge {
                    size_mb: (bytes.len() + chunk.len()) / (1024 * 1024),
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        info!(
            "Fetched image {} ({} bytes, {}ms)",
            url,
            bytes.len(),
            start_time.elapsed().as_millis()
        );
        Ok(bytes)
    }
}

/// In-memory image source for tests and offline runs.
#[derive(Default)]
pub struct StaticImageSource {
    images: HashMap<String, Vec<u8>>,
}

impl StaticImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.images.insert(url.to_string(), bytes.into());
        self
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| VerifierError::Upstream(format!("HTTP 404 Not Found: {}", url)))
    }
}
