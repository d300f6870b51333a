use crate::traits::LabelProvider;
use crate::types::{ImageRef, Label, LabelSet, Result, VerifierError, VerifyConfig};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How the Vision client authenticates.
#[derive(Clone)]
pub enum VisionCredentials {
    /// Sent as the `key` query parameter.
    ApiKey(String),
    /// OAuth access token, sent as a bearer header.
    AccessToken(String),
}

impl std::fmt::Debug for VisionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisionCredentials::ApiKey(_) => f.write_str("ApiKey(***)"),
            VisionCredentials::AccessToken(_) => f.write_str("AccessToken(***)"),
        }
    }
}

// Google Cloud Vision `images:annotate` wire types

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: VisionImage,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct VisionImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<VisionImageSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisionImageSource {
    image_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    feature_type: &'static str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<EntityAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Label provider backed by the Google Cloud Vision REST API.
pub struct VisionLabeler {
    client: Client,
    endpoint: String,
    max_labels: u32,
    credentials: Option<VisionCredentials>,
}

impl VisionLabeler {
    /// Build the client. Missing credentials are not an error here: every call
    /// then fails upstream, so nothing is ever accepted without a real check.
    pub fn new(config: &VerifyConfig, credentials: Option<VisionCredentials>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.label_timeout_seconds))
            .gzip(true)
            .build()?;

        if credentials.is_none() {
            warn!("Vision credentials not set; every labeling call will fail");
        }

        Ok(Self {
            client,
            endpoint: config.vision_endpoint.clone(),
            max_labels: config.max_labels,
            credentials,
        })
    }

    fn build_request(&self, image: &ImageRef) -> AnnotateRequest {
        let vision_image = match image {
            ImageRef::Url(url) => VisionImage {
                content: None,
                source: Some(VisionImageSource {
                    image_uri: url.clone(),
                }),
            },
            ImageRef::Bytes(bytes) => VisionImage {
                content: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                source: None,
            },
        };

        AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: vision_image,
                features: vec![Feature {
                    feature_type: "LABEL_DETECTION",
                    max_results: self.max_labels,
                }],
            }],
        }
    }
}

#[async_trait]
impl LabelProvider for VisionLabeler {
    fn provider_name(&self) -> String {
        "google-cloud-vision".to_string()
    }

    async fn labels(&self, image: &ImageRef) -> Result<LabelSet> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| VerifierError::Upstream("Vision credentials not set".to_string()))?;

        let start_time = Instant::now();
        let body = self.build_request(image);

        let mut request = self.client.post(&self.endpoint).json(&body);
        request = match credentials {
            VisionCredentials::ApiKey(key) => request.query(&[("key", key.as_str())]),
            VisionCredentials::AccessToken(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(VerifierError::Upstream(format!(
                "HTTP {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let labels = parse_annotate_response(&text)?;
        info!(
            "Vision returned {} labels in {}ms",
            labels.len(),
            start_time.elapsed().as_millis()
        );
        Ok(labels)
    }
}

/// Parse an `images:annotate` response body into a label set.
///
/// A response with no `labelAnnotations` is a successful empty set. A per-image
/// `error` payload or a body without any response entry is an upstream failure.
pub fn parse_annotate_response(body: &str) -> Result<LabelSet> {
    let parsed: AnnotateResponse = serde_json::from_str(body)
        .map_err(|e| VerifierError::Upstream(format!("Malformed Vision response: {}", e)))?;

    let first = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| VerifierError::Upstream("Vision response contained no results".to_string()))?;

    if let Some(status) = first.error {
        return Err(VerifierError::Upstream(format!(
            "Vision error {}: {}",
            status.code, status.message
        )));
    }

    let labels = first
        .label_annotations
        .into_iter()
        .map(|a| Label::new(a.description.to_lowercase(), a.score))
        .collect();

    Ok(LabelSet::new(labels))
}

#[derive(Debug, Clone)]
enum MockBehavior {
    Labels(LabelSet),
    Fail(String),
}

/// Mock label provider for development and testing
pub struct MockLabeler {
    name: String,
    response_delay_ms: u64,
    behavior: MockBehavior,
    by_url: HashMap<String, LabelSet>,
    by_image: HashMap<Vec<u8>, LabelSet>,
    calls: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ImageRef>>>,
}

impl MockLabeler {
    pub fn new(name: String) -> Self {
        Self {
            name,
            response_delay_ms: 0,
            behavior: MockBehavior::Labels(LabelSet::default()),
            by_url: HashMap::new(),
            by_image: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer with these label descriptions
    pub fn with_labels<I, S>(mut self, descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behavior = MockBehavior::Labels(LabelSet::from_descriptions(descriptions));
        self
    }

    /// Answer differently for one URL reference
    pub fn with_labels_for_url<I, S>(mut self, url: &str, descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_url
            .insert(url.to_string(), LabelSet::from_descriptions(descriptions));
        self
    }

    /// Answer differently for inline image bytes
    pub fn with_labels_for_image<I, S>(mut self, image: &[u8], descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_image
            .insert(image.to_vec(), LabelSet::from_descriptions(descriptions));
        self
    }

    /// Fail every call with an upstream error
    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = MockBehavior::Fail(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    /// Number of `labels` calls made so far, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared counter, readable after the mock has been moved into an orchestrator
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Every image reference passed to `labels`, in call order
    pub fn received_images(&self) -> Arc<Mutex<Vec<ImageRef>>> {
        self.received.clone()
    }

    async fn simulate_processing(&self) {
        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
    }
}

#[async_trait]
impl LabelProvider for MockLabeler {
    fn provider_name(&self) -> String {
        format!("Mock Labeler ({})", self.name)
    }

    async fn labels(&self, image: &ImageRef) -> Result<LabelSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.push(image.clone());
        self.simulate_processing().await;

        let keyed = match image {
            ImageRef::Url(url) => self.by_url.get(url),
            ImageRef::Bytes(bytes) => self.by_image.get(bytes),
        };
        if let Some(labels) = keyed {
            debug!("Mock labeler answering for a keyed image");
            return Ok(labels.clone());
        }

        match &self.behavior {
            MockBehavior::Labels(labels) => Ok(labels.clone()),
            MockBehavior::Fail(message) => Err(VerifierError::Upstream(message.clone())),
        }
    }
}
