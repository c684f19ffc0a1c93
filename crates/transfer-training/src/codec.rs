//! Bidirectional mapping between string labels and dense integer keys.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use transfer_core::{Error, Result};

/// Label vocabulary fitted once from the training labels.
///
/// Keys are `0..len()` in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelCodec {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelCodec {
    /// Builds the vocabulary from every training label
    pub fn fit<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = Vec::new();
        let mut index = HashMap::new();
        for label in labels {
            let label = label.as_ref();
            if !index.contains_key(label) {
                index.insert(label.to_string(), vocabulary.len());
                vocabulary.push(label.to_string());
            }
        }

        if vocabulary.is_empty() {
            return Err(Error::InvalidArgument(
                "Cannot fit a label vocabulary without labels".to_string(),
            ));
        }

        Ok(Self {
            labels: vocabulary,
            index,
        })
    }

    /// Restores a codec from an ordered vocabulary
    pub fn from_vocabulary(labels: Vec<String>) -> Result<Self> {
        let codec = Self::fit(&labels)?;
        if codec.len() != labels.len() {
            return Err(Error::InvalidArgument(
                "Vocabulary contains duplicate labels".to_string(),
            ));
        }
        Ok(codec)
    }

    pub fn encode(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| Error::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, key: usize) -> Result<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .ok_or(Error::UnknownKey(key))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels ordered by key
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for LabelCodec {
    type Error = Error;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::from_vocabulary(labels)
    }
}

impl From<LabelCodec> for Vec<String> {
    fn from(codec: LabelCodec) -> Self {
        codec.labels
    }
}
