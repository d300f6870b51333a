use crate::fingerprint::Fingerprint;
use crate::traits::{FingerprintStore, StoreError};
use crate::types::{AcceptedSubmission, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Pool, Postgres};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const UNIQUE_VIOLATION: &str = "23505";

/// Duplicate-gate lookup. `$1` is bound as TEXT, matching the column type so
/// the planner can use `accepted_submissions_fingerprint_key`.
pub const FINGERPRINT_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM accepted_submissions WHERE fingerprint = $1)";

/// Accepted-submission fingerprints in PostgreSQL.
///
/// The unique index on `fingerprint` (see `migrations/`) is what makes `insert`
/// authoritative when identical submissions race past the duplicate gate.
pub struct PgFingerprintStore {
    db: Pool<Postgres>,
}

impl PgFingerprintStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Fingerprint store migrations applied");
        Ok(())
    }

    pub async fn accepted_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accepted_submissions")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl FingerprintStore for PgFingerprintStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> std::result::Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(FINGERPRINT_EXISTS_SQL)
            .bind(fingerprint.as_str())
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    async fn insert(&self, record: &AcceptedSubmission) -> std::result::Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accepted_submissions
                (fingerprint, submission_id, image_url, user_id, species, planted_on,
                 latitude, longitude, matched_keywords, accepted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.fingerprint.as_str())
        .bind(record.submission_id)
        .bind(&record.image_url)
        .bind(&record.user_id)
        .bind(&record.species)
        .bind(record.planted_on)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.matched_keywords)
        .bind(record.accepted_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                debug!("Recorded accepted submission {}", record.submission_id);
                Ok(())
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                warn!("Unique violation on fingerprint {}", record.fingerprint);
                Err(StoreError::DuplicateKey {
                    fingerprint: record.fingerprint.clone(),
                })
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

/// Process-local store with the same uniqueness contract. Used when no
/// database is configured and throughout the tests.
#[derive(Default)]
pub struct InMemoryFingerprintStore {
    records: RwLock<HashMap<Fingerprint, AcceptedSubmission>>,
}

impl InMemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<AcceptedSubmission> {
        self.records.read().await.get(fingerprint).cloned()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> std::result::Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(fingerprint))
    }

    async fn insert(&self, record: &AcceptedSubmission) -> std::result::Result<(), StoreError> {
        // Check and insert under one write lock
        let mut records = self.records.write().await;
        if records.contains_key(&record.fingerprint) {
            return Err(StoreError::DuplicateKey {
                fingerprint: record.fingerprint.clone(),
            });
        }
        records.insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }
}
