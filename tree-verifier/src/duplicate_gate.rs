use crate::fingerprint::Fingerprint;
use crate::traits::{FingerprintStore, StoreError};
use tracing::debug;

/// Whether `fingerprint` belongs to a previously accepted submission.
///
/// Read-only. Rejected submissions are never stored, so they can be resubmitted.
/// This is a check-then-act gate: two identical submissions racing each other can
/// both pass, and the unique index on the store settles it at insert time.
pub async fn is_duplicate(
    fingerprint: &Fingerprint,
    store: &dyn FingerprintStore,
) -> Result<bool, StoreError> {
    let exists = store.exists(fingerprint).await?;
    debug!("Duplicate gate for {}: {}", fingerprint, exists);
    Ok(exists)
}
