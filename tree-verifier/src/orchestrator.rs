use crate::classifier::{classify, Classification, KeywordPolicy};
use crate::duplicate_gate::is_duplicate;
use crate::fingerprint::fingerprint;
use crate::traits::{FingerprintStore, LabelProvider, StoreError};
use crate::types::{
    AcceptedSubmission, LabelSet, Result, Submission, Verdict, VerificationStage, VerifierError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs one submission through fingerprinting, the duplicate gate, labeling
/// and classification.
///
/// Holds no per-request state; clone the `Arc`s and call `verify` from as many
/// tasks as needed.
pub struct VerificationOrchestrator {
    labeler: Arc<dyn LabelProvider>,
    store: Arc<dyn FingerprintStore>,
    policy: Arc<KeywordPolicy>,
    label_timeout: Duration,
}

impl VerificationOrchestrator {
    pub fn new(
        labeler: Arc<dyn LabelProvider>,
        store: Arc<dyn FingerprintStore>,
        policy: Arc<KeywordPolicy>,
        label_timeout: Duration,
    ) -> Self {
        info!(
            "Verification orchestrator using {} with {}ms label timeout",
            labeler.provider_name(),
            label_timeout.as_millis()
        );
        Self {
            labeler,
            store,
            policy,
            label_timeout,
        }
    }

    pub fn policy(&self) -> &KeywordPolicy {
        &self.policy
    }

    /// Verify a submission that cannot be cancelled from outside.
    pub async fn verify(&self, submission: Submission) -> Result<Verdict> {
        self.verify_with_cancel(submission, CancellationToken::new())
            .await
    }

    /// Verify a submission, giving up if `cancel` fires while labels are pending.
    ///
    /// Policy rejections and duplicates are `Ok` verdicts. `Err` is reserved for
    /// store failures and cancellation; cancellation never leaves a record behind.
    pub async fn verify_with_cancel(
        &self,
        submission: Submission,
        cancel: CancellationToken,
    ) -> Result<Verdict> {
        let id = submission.submission_id;

        transition(id, VerificationStage::Fingerprinting);
        let digest = fingerprint(&submission.image);
        debug!("Submission {} fingerprint {}", id, digest);

        transition(id, VerificationStage::CheckingDuplicate);
        if is_duplicate(&digest, self.store.as_ref()).await? {
            info!("Submission {} is a duplicate of an accepted image", id);
            return Ok(finish(id, Verdict::RejectedDuplicate { fingerprint: digest }));
        }

        transition(id, VerificationStage::AcquiringLabels);
        let labels = match self.acquire_labels(&submission, &cancel).await {
            Ok(labels) => labels,
            Err(VerifierError::Cancelled) => {
                warn!("Submission {} cancelled while awaiting labels", id);
                return Err(VerifierError::Cancelled);
            }
            Err(e) => {
                error!("Label acquisition failed for {}: {}", id, e);
                return Ok(finish(
                    id,
                    Verdict::RejectedUpstreamError {
                        cause: e.to_string(),
                    },
                ));
            }
        };

        transition(id, VerificationStage::Classifying);
        let report = classify(&labels, &self.policy);

        let matched_keywords = match report.classification {
            Classification::Accept { matched_keywords } => matched_keywords,
            Classification::RejectArtificial => {
                return Ok(finish(id, Verdict::RejectedArtificial { labels: report.labels }));
            }
            Classification::RejectNoMatch => {
                return Ok(finish(id, Verdict::RejectedNoMatch { labels: report.labels }));
            }
        };

        if cancel.is_cancelled() {
            warn!("Submission {} cancelled before its acceptance was recorded", id);
            return Err(VerifierError::Cancelled);
        }

        transition(id, VerificationStage::Recording);
        let record = AcceptedSubmission::new(digest.clone(), &submission, matched_keywords.clone());
        match self.store.insert(&record).await {
            Ok(()) => Ok(finish(
                id,
                Verdict::Accepted {
                    matched_keywords,
                    labels: report.labels,
                },
            )),
            Err(StoreError::DuplicateKey { .. }) => {
                // Lost the race against an identical submission
                info!("Submission {} lost insert race for {}", id, digest);
                Ok(finish(id, Verdict::RejectedDuplicate { fingerprint: digest }))
            }
            Err(e) => {
                error!("Failed to record accepted submission {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    async fn acquire_labels(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<LabelSet> {
        let call = tokio::time::timeout(self.label_timeout, self.labeler.labels(&submission.image_ref));

        tokio::select! {
            _ = cancel.cancelled() => Err(VerifierError::Cancelled),
            outcome = call => match outcome {
                Ok(labels) => labels,
                Err(_) => Err(VerifierError::Timeout {
                    millis: self.label_timeout.as_millis() as u64,
                }),
            },
        }
    }
}

fn transition(id: uuid::Uuid, stage: VerificationStage) {
    debug!("Submission {} -> {}", id, stage);
}

fn finish(id: uuid::Uuid, verdict: Verdict) -> Verdict {
    info!(
        "Submission {} -> {}: {}",
        id,
        VerificationStage::Terminal,
        verdict.kind()
    );
    verdict
}
