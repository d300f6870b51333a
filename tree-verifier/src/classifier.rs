use crate::types::{LabelSet, Result, VerifierError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_POSITIVE_KEYWORDS: &[&str] = &[
    "tree", "sapling", "seedling", "plant", "woody", "houseplant", "bonsai", "perennial",
    "potted", "stem", "leaf", "foliage", "flora", "botanical", "shrub", "bush", "herb",
];

pub const DEFAULT_STRONG_NEGATIVE_KEYWORDS: &[&str] = &[
    "toy", "drawing", "painting", "illustration", "cartoon", "screenshot", "poster", "logo",
    "clipart",
];

/// Substring lists that drive classification.
///
/// Both lists hold trimmed, lower-case, non-empty keywords and never share an entry.
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "KeywordLists")]
pub struct KeywordPolicy {
    positive_keywords: Vec<String>,
    strong_negative_keywords: Vec<String>,
}

/// Unvalidated wire form of a `KeywordPolicy`.
#[derive(Debug, Deserialize)]
struct KeywordLists {
    positive_keywords: Vec<String>,
    #[serde(default)]
    strong_negative_keywords: Vec<String>,
}

impl TryFrom<KeywordLists> for KeywordPolicy {
    type Error = VerifierError;

    fn try_from(lists: KeywordLists) -> Result<Self> {
        KeywordPolicy::new(lists.positive_keywords, lists.strong_negative_keywords)
    }
}

impl KeywordPolicy {
    pub fn new<P, N>(positive: P, strong_negative: N) -> Result<Self>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let positive_keywords = normalize_keywords(positive);
        let strong_negative_keywords = normalize_keywords(strong_negative);

        if positive_keywords.is_empty() {
            return Err(VerifierError::Config(
                "positive keyword list must not be empty".to_string(),
            ));
        }

        if let Some(shared) = positive_keywords
            .iter()
            .find(|k| strong_negative_keywords.contains(k))
        {
            return Err(VerifierError::Config(format!(
                "keyword '{}' appears in both positive and negative lists",
                shared
            )));
        }

        Ok(Self {
            positive_keywords,
            strong_negative_keywords,
        })
    }

    pub fn positive_keywords(&self) -> &[String] {
        &self.positive_keywords
    }

    pub fn strong_negative_keywords(&self) -> &[String] {
        &self.strong_negative_keywords
    }
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self {
            positive_keywords: DEFAULT_POSITIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            strong_negative_keywords: DEFAULT_STRONG_NEGATIVE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

fn normalize_keywords<I>(keywords: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for keyword in keywords {
        let k = keyword.as_ref().trim().to_lowercase();
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

/// Outcome of applying a `KeywordPolicy` to a label set.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Accept { matched_keywords: Vec<String> },
    RejectArtificial,
    RejectNoMatch,
}

/// Classification plus the evidence collected on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classification: Classification,
    /// Every label, lower-cased, in input order.
    pub labels: Vec<String>,
    pub has_positive: bool,
    pub has_strong_negative: bool,
}

pub fn classify(labels: &LabelSet, policy: &KeywordPolicy) -> ClassificationReport {
    let normalized: Vec<String> = labels
        .labels
        .iter()
        .map(|l| l.description.trim().to_lowercase())
        .collect();

    // Every label is checked against both lists; no early exit.
    let mut matched_keywords: Vec<String> = Vec::new();
    let mut has_strong_negative = false;

    for label in &normalized {
        let positive = policy
            .positive_keywords
            .iter()
            .any(|k| label.contains(k.as_str()));
        if positive && !matched_keywords.contains(label) {
            matched_keywords.push(label.clone());
        }

        if policy
            .strong_negative_keywords
            .iter()
            .any(|k| label.contains(k.as_str()))
        {
            has_strong_negative = true;
        }
    }

    let has_positive = !matched_keywords.is_empty();

    debug!(
        "Classified {} labels: has_positive={}, has_strong_negative={}, matched={:?}",
        normalized.len(),
        has_positive,
        has_strong_negative,
        matched_keywords
    );

    let classification = if has_positive && !has_strong_negative {
        Classification::Accept { matched_keywords }
    } else if has_strong_negative {
        Classification::RejectArtificial
    } else {
        Classification::RejectNoMatch
    };

    ClassificationReport {
        classification,
        labels: normalized,
        has_positive,
        has_strong_negative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejects_overlapping_lists() {
        let err = KeywordPolicy::new(["tree", "Toy"], ["toy"]).unwrap_err();
        assert!(matches!(err, VerifierError::Config(_)));
    }

    #[test]
    fn policy_normalizes_and_dedups() {
        let policy = KeywordPolicy::new([" Tree ", "tree", ""], ["LOGO"]).unwrap();
        assert_eq!(policy.positive_keywords(), &["tree".to_string()]);
        assert_eq!(policy.strong_negative_keywords(), &["logo".to_string()]);
    }

    #[test]
    fn default_lists_are_disjoint() {
        let policy = KeywordPolicy::default();
        assert!(KeywordPolicy::new(policy.positive_keywords(), policy.strong_negative_keywords()).is_ok());
    }

    #[test]
    fn deserialized_policy_is_validated() {
        let overlapping = r#"{"positive_keywords":["tree","toy"],"strong_negative_keywords":["toy"]}"#;
        assert!(serde_json::from_str::<KeywordPolicy>(overlapping).is_err());

        let empty = r#"{"positive_keywords":[" "],"strong_negative_keywords":[]}"#;
        assert!(serde_json::from_str::<KeywordPolicy>(empty).is_err());

        let policy: KeywordPolicy =
            serde_json::from_str(r#"{"positive_keywords":["Fern","fern"]}"#).unwrap();
        assert_eq!(policy.positive_keywords(), &["fern".to_string()]);
        assert!(policy.strong_negative_keywords().is_empty());

        let round_trip: KeywordPolicy =
            serde_json::from_str(&serde_json::to_string(&KeywordPolicy::default()).unwrap()).unwrap();
        assert_eq!(round_trip, KeywordPolicy::default());
    }
}
