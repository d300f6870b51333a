use crate::fingerprint::Fingerprint;
use crate::traits::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
// Shared definitions live in the interfaces crate
pub use interfaces::defs::{GeoPoint, ImageRef, Label, LabelSet, SubmissionMetadata};

/// One photo submitted as proof of a planted tree.
#[derive(Debug, Clone)]
pub struct Submission {
    pub submission_id: Uuid,
    pub image: Vec<u8>,
    pub image_ref: ImageRef,
    /// Where the photo was downloaded from, kept for the accepted record.
    pub source_url: Option<String>,
    pub metadata: SubmissionMetadata,
}

impl Submission {
    /// A submission whose labels are requested by URL.
    pub fn from_url(url: impl Into<String>, image: Vec<u8>) -> Self {
        let url = url.into();
        Self {
            submission_id: Uuid::new_v4(),
            image,
            image_ref: ImageRef::Url(url.clone()),
            source_url: Some(url),
            metadata: SubmissionMetadata::default(),
        }
    }

    /// A photo already downloaded from `url`. Labels are requested for these
    /// exact bytes, so the fingerprint and the classification describe the same image.
    pub fn from_fetched(url: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            source_url: Some(url.into()),
            ..Self::from_bytes(image)
        }
    }

    /// A submission whose labels are requested with the bytes inline.
    pub fn from_bytes(image: Vec<u8>) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            image_ref: ImageRef::Bytes(image.clone()),
            image,
            source_url: None,
            metadata: SubmissionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: SubmissionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Row persisted for every accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedSubmission {
    pub fingerprint: Fingerprint,
    pub submission_id: Uuid,
    pub image_url: Option<String>,
    pub user_id: Option<String>,
    pub species: Option<String>,
    pub planted_on: Option<chrono::NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub matched_keywords: Vec<String>,
    pub accepted_at: DateTime<Utc>,
}

impl AcceptedSubmission {
    pub fn new(fingerprint: Fingerprint, submission: &Submission, matched_keywords: Vec<String>) -> Self {
        let meta = &submission.metadata;
        Self {
            fingerprint,
            submission_id: submission.submission_id,
            image_url: submission.source_url.clone(),
            user_id: meta.user_id.clone(),
            species: meta.species.clone(),
            planted_on: meta.planted_on,
            latitude: meta.location.map(|p| p.lat),
            longitude: meta.location.map(|p| p.lng),
            matched_keywords,
            accepted_at: Utc::now(),
        }
    }
}

/// Terminal outcome of one verification. Exactly one variant per submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted {
        matched_keywords: Vec<String>,
        labels: Vec<String>,
    },
    RejectedDuplicate {
        fingerprint: Fingerprint,
    },
    RejectedArtificial {
        labels: Vec<String>,
    },
    RejectedNoMatch {
        labels: Vec<String>,
    },
    RejectedUpstreamError {
        cause: String,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    /// Short machine-friendly name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "accepted",
            Verdict::RejectedDuplicate { .. } => "rejected_duplicate",
            Verdict::RejectedArtificial { .. } => "rejected_artificial",
            Verdict::RejectedNoMatch { .. } => "rejected_no_match",
            Verdict::RejectedUpstreamError { .. } => "rejected_upstream_error",
        }
    }

    /// Human-readable explanation shown to the submitter.
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "Tree/plant detected",
            Verdict::RejectedDuplicate { .. } => "Duplicate image detected! Already submitted.",
            Verdict::RejectedArtificial { .. } => {
                "Image appears to be artificial (drawing/toy/illustration)"
            }
            Verdict::RejectedNoMatch { .. } => "No tree or plant detected",
            Verdict::RejectedUpstreamError { .. } => "Vision API error",
        }
    }

    /// Labels that justified the decision, if the pipeline got that far.
    pub fn labels(&self) -> Option<&[String]> {
        match self {
            Verdict::Accepted { labels, .. }
            | Verdict::RejectedArtificial { labels }
            | Verdict::RejectedNoMatch { labels } => Some(labels),
            _ => None,
        }
    }
}

/// Pipeline position of a submission, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Fingerprinting,
    CheckingDuplicate,
    AcquiringLabels,
    Classifying,
    Recording,
    Terminal,
}

impl std::fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerificationStage::Fingerprinting => "fingerprinting",
            VerificationStage::CheckingDuplicate => "checking_duplicate",
            VerificationStage::AcquiringLabels => "acquiring_labels",
            VerificationStage::Classifying => "classifying",
            VerificationStage::Recording => "recording",
            VerificationStage::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub user_agent: String,
    pub label_timeout_seconds: u64,
    pub max_labels: u32,
    pub max_image_size_mb: usize,
    pub fetch_timeout_seconds: u64,
    pub vision_endpoint: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            user_agent: "Tree-Verifier/1.0".to_string(),
            label_timeout_seconds: 15,
            max_labels: 20,
            max_image_size_mb: 10,
            fetch_timeout_seconds: 30,
            vision_endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Image size exceeds limit: {size_mb}MB")]
    ImageTooLarge { size_mb: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Verification cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VerifierError {
    /// Whether the failure came from an external collaborator rather than the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            VerifierError::Http(_)
                | VerifierError::Upstream(_)
                | VerifierError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VerifierError>;
