use crate::fingerprint::Fingerprint;
use crate::types::{AcceptedSubmission, ImageRef, LabelSet, Result};
use async_trait::async_trait;

/// Trait for external services that turn an image into textual labels
#[async_trait]
pub trait LabelProvider: Send + Sync {
    /// Human-readable name for this provider
    fn provider_name(&self) -> String;

    /// Request labels for an image.
    /// A successful empty set is a valid answer; transport, auth and
    /// malformed-response failures must come back as errors.
    async fn labels(&self, image: &ImageRef) -> Result<LabelSet>;
}

/// Persisted fingerprints of previously accepted submissions
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Exact equality lookup on the fingerprint column
    async fn exists(&self, fingerprint: &Fingerprint) -> std::result::Result<bool, StoreError>;

    /// Record an accepted submission. Fails with `StoreError::DuplicateKey`
    /// if the fingerprint is already present.
    async fn insert(&self, record: &AcceptedSubmission) -> std::result::Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Fingerprint already recorded: {fingerprint}")]
    DuplicateKey { fingerprint: Fingerprint },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where image bytes for a URL reference come from
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}
