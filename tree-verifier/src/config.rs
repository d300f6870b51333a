use crate::classifier::{KeywordPolicy, DEFAULT_POSITIVE_KEYWORDS, DEFAULT_STRONG_NEGATIVE_KEYWORDS};
use crate::labeler::VisionCredentials;
use crate::types::{Result, VerifierError, VerifyConfig};
use std::env;
use std::str::FromStr;
use tracing::{debug, info};
use url::Url;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_VISION_API_KEY: &str = "GOOGLE_VISION_API_KEY";
pub const ENV_VISION_ACCESS_TOKEN: &str = "GOOGLE_VISION_ACCESS_TOKEN";
pub const ENV_VISION_ENDPOINT: &str = "VISION_ENDPOINT";
pub const ENV_LABEL_TIMEOUT: &str = "LABEL_TIMEOUT_SECONDS";
pub const ENV_FETCH_TIMEOUT: &str = "FETCH_TIMEOUT_SECONDS";
pub const ENV_MAX_LABELS: &str = "MAX_LABELS";
pub const ENV_MAX_IMAGE_SIZE: &str = "MAX_IMAGE_SIZE_MB";
pub const ENV_USER_AGENT: &str = "USER_AGENT";
pub const ENV_POSITIVE_KEYWORDS: &str = "TREE_POSITIVE_KEYWORDS";
pub const ENV_NEGATIVE_KEYWORDS: &str = "TREE_NEGATIVE_KEYWORDS";

/// Process-wide settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// No URL means the in-memory store.
    pub database_url: Option<String>,
    pub credentials: Option<VisionCredentials>,
    pub verify: VerifyConfig,
    pub policy: KeywordPolicy,
}

impl VerifierConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = VerifyConfig::default();
        let verify = VerifyConfig {
            user_agent: get(ENV_USER_AGENT).unwrap_or(defaults.user_agent),
            label_timeout_seconds: parse_or(get(ENV_LABEL_TIMEOUT), ENV_LABEL_TIMEOUT, defaults.label_timeout_seconds)?,
            fetch_timeout_seconds: parse_or(get(ENV_FETCH_TIMEOUT), ENV_FETCH_TIMEOUT, defaults.fetch_timeout_seconds)?,
            max_labels: parse_or(get(ENV_MAX_LABELS), ENV_MAX_LABELS, defaults.max_labels)?,
            max_image_size_mb: parse_or(get(ENV_MAX_IMAGE_SIZE), ENV_MAX_IMAGE_SIZE, defaults.max_image_size_mb)?,
            vision_endpoint: get(ENV_VISION_ENDPOINT).unwrap_or(defaults.vision_endpoint),
        };

        if verify.label_timeout_seconds == 0 {
            return Err(VerifierError::Config(format!("{} must be positive", ENV_LABEL_TIMEOUT)));
        }
        Url::parse(&verify.vision_endpoint)
            .map_err(|e| VerifierError::Config(format!("{}: {}", ENV_VISION_ENDPOINT, e)))?;

        // An API key wins over an access token when both are set
        let credentials = match (get(ENV_VISION_API_KEY), get(ENV_VISION_ACCESS_TOKEN)) {
            (Some(key), _) => Some(VisionCredentials::ApiKey(key)),
            (None, Some(token)) => Some(VisionCredentials::AccessToken(token)),
            (None, None) => None,
        };

        let policy = match (get(ENV_POSITIVE_KEYWORDS), get(ENV_NEGATIVE_KEYWORDS)) {
            (None, None) => KeywordPolicy::default(),
            (positive, negative) => {
                let positive = positive
                    .map(|v| split_keywords(&v))
                    .unwrap_or_else(|| DEFAULT_POSITIVE_KEYWORDS.iter().map(|k| k.to_string()).collect());
                let negative = negative
                    .map(|v| split_keywords(&v))
                    .unwrap_or_else(|| {
                        DEFAULT_STRONG_NEGATIVE_KEYWORDS.iter().map(|k| k.to_string()).collect()
                    });
                KeywordPolicy::new(positive, negative)?
            }
        };

        let config = Self {
            database_url: get(ENV_DATABASE_URL),
            credentials,
            verify,
            policy,
        };
        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        info!(
            "Configuration: store={}, credentials={}, {} positive / {} negative keywords",
            self.database_url
                .as_deref()
                .map(mask_database_url)
                .unwrap_or_else(|| "in-memory".to_string()),
            if self.credentials.is_some() { "set" } else { "missing" },
            self.policy.positive_keywords().len(),
            self.policy.strong_negative_keywords().len()
        );
        debug!("Verify settings: {:?}", self.verify);
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| VerifierError::Config(format!("{} is not a valid number: '{}'", key, v))),
        None => Ok(default),
    }
}

fn split_keywords(value: &str) -> Vec<String> {
    value.split(',').map(|k| k.to_string()).collect()
}

/// Hide the password in a connection string before it reaches the logs.
pub fn mask_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_ok() {
                url.to_string()
            } else {
                "<unprintable database url>".to_string()
            }
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable database url>".to_string(),
    }
}
