pub mod types;
pub mod traits;
pub mod fingerprint;
pub mod duplicate_gate;
pub mod classifier;
pub mod labeler;
pub mod fetcher;
pub mod store;
pub mod orchestrator;
pub mod intake;
pub mod config;

pub use types::*;
pub use traits::{FingerprintStore, ImageSource, LabelProvider, StoreError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use duplicate_gate::is_duplicate;
pub use classifier::{classify, Classification, ClassificationReport, KeywordPolicy};
pub use labeler::{MockLabeler, VisionCredentials, VisionLabeler};
pub use fetcher::{ImageFetcher, StaticImageSource};
pub use store::{InMemoryFingerprintStore, PgFingerprintStore};
pub use orchestrator::VerificationOrchestrator;
pub use intake::{IntakeHandler, IntakeResponse, VerifyRequest, VerifyResponse};
pub use config::VerifierConfig;
