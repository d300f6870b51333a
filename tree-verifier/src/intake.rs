use crate::orchestrator::VerificationOrchestrator;
use crate::traits::ImageSource;
use crate::types::{Result, Submission, SubmissionMetadata, Verdict, VerifierError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Body of a verification request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default, alias = "imageUrl")]
    pub image_ref: Option<String>,
    #[serde(flatten)]
    pub metadata: SubmissionMetadata,
}

/// JSON body returned to the submitter. `success` carries the verdict
/// regardless of the transport status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    fn failure(message: &str, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            verdict: None,
            labels: None,
            matched_keywords: None,
            error,
        }
    }
}

impl From<&Verdict> for VerifyResponse {
    fn from(verdict: &Verdict) -> Self {
        let (matched_keywords, error) = match verdict {
            Verdict::Accepted {
                matched_keywords, ..
            } => (Some(matched_keywords.clone()), None),
            Verdict::RejectedUpstreamError { cause } => (None, Some(cause.clone())),
            _ => (None, None),
        };

        Self {
            success: verdict.is_accepted(),
            message: verdict.message().to_string(),
            verdict: Some(verdict.kind().to_string()),
            labels: verdict.labels().map(|l| l.to_vec()),
            matched_keywords,
            error,
        }
    }
}

/// Status code plus body, ready for whatever transport sits in front.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeResponse {
    pub status: u16,
    pub body: VerifyResponse,
}

impl IntakeResponse {
    pub fn bad_request(message: &str, error: Option<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            body: VerifyResponse::failure(message, error),
        }
    }

    pub fn internal_error(message: &str, error: Option<String>) -> Self {
        Self {
            status: STATUS_INTERNAL_ERROR,
            body: VerifyResponse::failure(message, error),
        }
    }

    /// Upstream failures are 500; every other verdict is 200 with `success`
    /// telling accept from reject.
    pub fn from_verdict(verdict: &Verdict) -> Self {
        let status = match verdict {
            Verdict::RejectedUpstreamError { .. } => STATUS_INTERNAL_ERROR,
            _ => STATUS_OK,
        };
        Self {
            status,
            body: VerifyResponse::from(verdict),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

/// Submission intake: validates the request, fetches the photo and hands it
/// to the orchestrator.
pub struct IntakeHandler {
    orchestrator: Arc<VerificationOrchestrator>,
    images: Arc<dyn ImageSource>,
}

impl IntakeHandler {
    pub fn new(orchestrator: Arc<VerificationOrchestrator>, images: Arc<dyn ImageSource>) -> Self {
        Self {
            orchestrator,
            images,
        }
    }

    /// Handle a raw JSON request body.
    pub async fn handle_body(&self, body: &[u8]) -> IntakeResponse {
        self.handle_body_with_cancel(body, CancellationToken::new())
            .await
    }

    pub async fn handle_body_with_cancel(
        &self,
        body: &[u8],
        cancel: CancellationToken,
    ) -> IntakeResponse {
        match serde_json::from_slice::<VerifyRequest>(body) {
            Ok(request) => self.handle_with_cancel(request, cancel).await,
            Err(e) => {
                warn!("Rejecting malformed request body: {}", e);
                IntakeResponse::bad_request("Malformed request body", Some(e.to_string()))
            }
        }
    }

    pub async fn handle(&self, request: VerifyRequest) -> IntakeResponse {
        self.handle_with_cancel(request, CancellationToken::new())
            .await
    }

    pub async fn handle_with_cancel(
        &self,
        request: VerifyRequest,
        cancel: CancellationToken,
    ) -> IntakeResponse {
        let image_url = match validate_request(&request) {
            Ok(url) => url,
            Err(e) => {
                warn!("Rejecting invalid request: {}", e);
                let message = match request.image_ref.as_deref().map(str::trim) {
                    None | Some("") => "No image URL provided",
                    Some(_) => "Invalid request",
                };
                return IntakeResponse::bad_request(message, Some(e.to_string()));
            }
        };

        let image = match self.images.fetch_image(image_url.as_str()).await {
            Ok(bytes) => bytes,
            Err(e @ (VerifierError::Validation(_) | VerifierError::ImageTooLarge { .. })) => {
                return IntakeResponse::bad_request("Image could not be accepted", Some(e.to_string()));
            }
            Err(e) => {
                warn!("Failed to fetch image {}: {}", image_url, e);
                return IntakeResponse::internal_error("Failed to fetch image", Some(e.to_string()));
            }
        };

        let submission = Submission::from_fetched(image_url.as_str(), image).with_metadata(request.metadata);
        info!(
            "Verifying submission {} for {}",
            submission.submission_id, image_url
        );

        match self
            .orchestrator
            .verify_with_cancel(submission, cancel)
            .await
        {
            Ok(verdict) => IntakeResponse::from_verdict(&verdict),
            Err(VerifierError::Cancelled) => {
                IntakeResponse::internal_error("Verification cancelled", None)
            }
            Err(e) => IntakeResponse::internal_error("Verification failed", Some(e.to_string())),
        }
    }
}

/// Check the caller-supplied fields and return the parsed image URL.
pub fn validate_request(request: &VerifyRequest) -> Result<Url> {
    let raw = request
        .image_ref
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VerifierError::Validation("imageRef is required".to_string()))?;

    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(VerifierError::Validation(format!(
            "imageRef must be an http(s) URL, got scheme '{}'",
            url.scheme()
        )));
    }

    if let Some(location) = request.metadata.location {
        if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
            return Err(VerifierError::Validation(format!(
                "location out of range: ({}, {})",
                location.lat, location.lng
            )));
        }
    }

    if let Some(species) = &request.metadata.species {
        if species.trim().is_empty() {
            return Err(VerifierError::Validation("species must not be blank".to_string()));
        }
    }

    Ok(url)
}
