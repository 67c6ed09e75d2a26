//! Canonical topic lists per subject, with a fallback merge when the list is
//! too short to spread questions across.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use crate::seeds::fallback_topics;

/// Below this many canonical topics the fallback list is merged in.
pub const MIN_TOPICS: usize = 5;

#[async_trait]
pub trait TopicCatalog: Send + Sync {
    async fn topics(&self, subject: &str) -> Vec<String>;
}

/// Topic lists from configuration, merged with fallbacks.
pub struct ConfigTopicCatalog {
    canonical: HashMap<String, Vec<String>>,
    fallback: HashMap<String, Vec<String>>,
}

impl ConfigTopicCatalog {
    pub fn new(canonical: HashMap<String, Vec<String>>, fallback: HashMap<String, Vec<String>>) -> Self {
        let lower = |m: HashMap<String, Vec<String>>| {
            m.into_iter().map(|(k, v)| (k.trim().to_lowercase(), v)).collect()
        };
        Self { canonical: lower(canonical), fallback: lower(fallback) }
    }
}

#[async_trait]
impl TopicCatalog for ConfigTopicCatalog {
    async fn topics(&self, subject: &str) -> Vec<String> {
        let key = subject.trim().to_lowercase();
        let canonical = self.canonical.get(&key).cloned().unwrap_or_default();
        if canonical.len() >= MIN_TOPICS {
            return dedup_topics(canonical);
        }
        let fallback = match self.fallback.get(&key) {
            Some(list) => list.clone(),
            None => fallback_topics(&key),
        };
        debug!(target: "generation", %subject, canonical = canonical.len(), fallback = fallback.len(), "Merging fallback topics");
        dedup_topics(canonical.into_iter().chain(fallback))
    }
}

/// Trim, drop blanks, and drop case-insensitive duplicates keeping first occurrence.
pub fn dedup_topics(topics: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}
