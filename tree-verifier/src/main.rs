use anyhow::Context;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tree_verifier::config::mask_database_url;
use tree_verifier::intake::STATUS_INTERNAL_ERROR;
use tree_verifier::{
    classify, fingerprint, Classification, FingerprintStore, GeoPoint, ImageFetcher,
    InMemoryFingerprintStore, IntakeHandler, IntakeResponse, LabelProvider, LabelSet, MockLabeler,
    PgFingerprintStore, Submission, SubmissionMetadata, VerificationOrchestrator, VerifierConfig,
    VerifierError, VerifyRequest, VisionLabeler,
};

#[derive(Parser)]
#[command(name = "tree-verifier", version, about = "Verify photographic proof of planted trees")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Answer with these comma-separated labels instead of calling Vision
    #[arg(long, global = true, value_name = "LABELS")]
    mock_labels: Option<String>,

    /// Retry upstream failures this many times with exponential backoff
    #[arg(long, global = true, default_value_t = 0)]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify an image by URL, as the HTTP intake would
    Verify {
        image_url: String,
        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Verify a local image file, sending its bytes inline
    VerifyFile {
        path: PathBuf,
        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Apply the keyword policy to labels without touching any service
    Classify { labels: Vec<String> },
    /// Print the content fingerprint of a file
    Fingerprint { path: PathBuf },
}

#[derive(Args, Clone, Default)]
struct MetadataArgs {
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    species: Option<String>,
    /// Planting date, YYYY-MM-DD
    #[arg(long)]
    planted_on: Option<NaiveDate>,
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lng: Option<f64>,
}

impl From<MetadataArgs> for SubmissionMetadata {
    fn from(args: MetadataArgs) -> Self {
        let location = match (args.lat, args.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        };
        Self {
            user_id: args.user_id,
            species: args.species,
            planted_on: args.planted_on,
            location,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = VerifierConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
        config.database_url = Some(url.to_string());
    }

    match cli.command {
        Command::Classify { labels } => {
            let report = classify(&LabelSet::from_descriptions(labels), &config.policy);
            let verdict = match &report.classification {
                Classification::Accept { matched_keywords } => {
                    format!("accept (matched: {})", matched_keywords.join(", "))
                }
                Classification::RejectArtificial => "reject: artificial".to_string(),
                Classification::RejectNoMatch => "reject: no match".to_string(),
            };
            println!("{}", verdict);
            Ok(if matches!(report.classification, Classification::Accept { .. }) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Command::Fingerprint { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("{}  {}", fingerprint(&bytes), path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { image_url, metadata } => {
            let orchestrator = build_orchestrator(&config, cli.mock_labels.as_deref()).await?;
            let images = Arc::new(ImageFetcher::new(&config.verify)?);
            let handler = IntakeHandler::new(orchestrator, images);
            let cancel = cancel_on_ctrl_c();

            let request = VerifyRequest {
                image_ref: Some(image_url),
                metadata: metadata.into(),
            };
            let response = with_retries(cli.retries, &cancel, || {
                handler.handle_with_cancel(request.clone(), cancel.clone())
            })
            .await;
            print_response(&response)
        }
        Command::VerifyFile { path, metadata } => {
            let orchestrator = build_orchestrator(&config, cli.mock_labels.as_deref()).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let cancel = cancel_on_ctrl_c();
            let metadata: SubmissionMetadata = metadata.into();

            let response = with_retries(cli.retries, &cancel, || {
                let submission = Submission::from_bytes(bytes.clone()).with_metadata(metadata.clone());
                let orchestrator = orchestrator.clone();
                let cancel = cancel.clone();
                async move {
                    match orchestrator.verify_with_cancel(submission, cancel).await {
                        Ok(verdict) => IntakeResponse::from_verdict(&verdict),
                        Err(e) => failure_response(e),
                    }
                }
            })
            .await;
            print_response(&response)
        }
    }
}

/// Construct collaborators. The entry point owns their lifecycle.
async fn build_orchestrator(
    config: &VerifierConfig,
    mock_labels: Option<&str>,
) -> anyhow::Result<Arc<VerificationOrchestrator>> {
    let labeler: Arc<dyn LabelProvider> = match mock_labels {
        Some(labels) => {
            warn!("Using mock labels instead of the Vision API");
            Arc::new(MockLabeler::new("cli".to_string()).with_labels(labels.split(',').map(str::trim)))
        }
        None => Arc::new(VisionLabeler::new(&config.verify, config.credentials.clone())?),
    };

    let store: Arc<dyn FingerprintStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to fingerprint store: {}", mask_database_url(url));
            let store = PgFingerprintStore::new(url).await.map_err(|e| {
                error!("Failed to connect to database: {}", mask_database_url(url));
                e
            })?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; duplicates are only tracked for this process");
            Arc::new(InMemoryFingerprintStore::new())
        }
    };

    Ok(Arc::new(VerificationOrchestrator::new(
        labeler,
        store,
        Arc::new(config.policy.clone()),
        Duration::from_secs(config.verify.label_timeout_seconds),
    )))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling verification");
            child.cancel();
        }
    });
    token
}

/// Re-run `attempt` while it reports a server-side failure. Retrying is the
/// caller's call; the pipeline itself never retries.
async fn with_retries<F, Fut>(retries: u32, cancel: &CancellationToken, mut attempt: F) -> IntakeResponse
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IntakeResponse>,
{
    let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
        current_interval: Duration::from_secs(1),
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(32),
        multiplier: 2.0,
        max_elapsed_time: Some(Duration::from_secs(120)),
        ..Default::default()
    };

    let mut tries = 0;
    loop {
        let response = attempt().await;
        if response.status != STATUS_INTERNAL_ERROR || tries >= retries || cancel.is_cancelled() {
            return response;
        }
        match backoff.next_backoff() {
            Some(delay) => {
                tries += 1;
                warn!("Attempt {} failed, retrying in {:?}", tries, delay);
                tokio::time::sleep(delay).await;
            }
            None => return response,
        }
    }
}

fn failure_response(error: VerifierError) -> IntakeResponse {
    match error {
        VerifierError::Cancelled => IntakeResponse::internal_error("Verification cancelled", None),
        e => IntakeResponse::internal_error("Verification failed", Some(e.to_string())),
    }
}

fn print_response(response: &IntakeResponse) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(match (response.status, response.body.success) {
        (_, true) => ExitCode::SUCCESS,
        (200, false) => ExitCode::from(2),
        _ => ExitCode::from(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn database_url_flag_reads_environment() {
        let command = Cli::command();
        command.clone().debug_assert();

        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "database_url")
            .expect("database_url argument");
        assert_eq!(arg.get_env(), Some(std::ffi::OsStr::new("DATABASE_URL")));
    }

    #[test]
    fn explicit_database_url_wins() {
        let cli = Cli::try_parse_from([
            "tree-verifier",
            "--database-url",
            "postgresql://tree@localhost/trees",
            "classify",
            "tree",
        ])
        .expect("arguments parse");
        assert_eq!(cli.database_url.as_deref(), Some("postgresql://tree@localhost/trees"));
    }
}
