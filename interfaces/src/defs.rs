use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single machine-generated label for an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub description: String,
    pub confidence: f32,
}

impl Label {
    pub fn new(description: impl Into<String>, confidence: f32) -> Self {
        Self {
            description: description.into(),
            confidence,
        }
    }
}

/// Ordered labels returned by a labeling service for one image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    pub labels: Vec<Label>,
}

impl LabelSet {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Builds a set from bare descriptions, all with full confidence.
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: descriptions
                .into_iter()
                .map(|d| Label::new(d, 1.0))
                .collect(),
        }
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.description.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

/// What the labeling collaborator is handed: a fetchable URL or inline bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageRef {
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Url(url) => Some(url),
            ImageRef::Bytes(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

// Submission details that ride along with the photo. None of it affects the
// verdict; it is stored with the fingerprint once a submission is accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMetadata {
    pub user_id: Option<String>,
    pub species: Option<String>,
    pub planted_on: Option<NaiveDate>,
    pub location: Option<GeoPoint>,
}
