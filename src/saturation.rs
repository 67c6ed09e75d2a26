//! Topic saturation: which topics of a subject/level lack inventory.
//!
//! A topic is underserved when it has fewer than `target` rows (any status).
//! Underserved topics come back sorted by ascending count; topics sharing a
//! count are shuffled so a stable alphabetic order never biases generation.

use std::collections::{BTreeMap, HashMap};

use rand::{seq::SliceRandom, Rng};
use tracing::{debug, instrument};

use crate::bank::QuestionBank;
use crate::domain::Level;
use crate::error::BankError;
use crate::topics::TopicCatalog;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Saturation {
    /// The topic catalog returned nothing for the subject.
    NoTopics,
    /// Every topic has reached the target.
    Saturated,
    Underserved(Vec<TopicCount>),
}

#[instrument(level = "debug", skip(bank, catalog), fields(%subject, %level))]
pub async fn analyze(
    bank: &dyn QuestionBank,
    catalog: &dyn TopicCatalog,
    subject: &str,
    level: Level,
    target: usize,
) -> Result<Saturation, BankError> {
    let topics = catalog.topics(subject).await;
    if topics.is_empty() {
        return Ok(Saturation::NoTopics);
    }
    let counts = bank.count_by_topic(subject, level).await?;
    let ranked = rank_underserved(&topics, &counts, target, &mut rand::thread_rng());
    debug!(target: "generation", %subject, %level, topics = topics.len(), underserved = ranked.len(), "Saturation analyzed");
    Ok(if ranked.is_empty() {
        Saturation::Saturated
    } else {
        Saturation::Underserved(ranked)
    })
}

/// `counts` is keyed by lowercase topic, as returned by `QuestionBank::count_by_topic`.
pub fn rank_underserved<R: Rng + ?Sized>(
    topics: &[String],
    counts: &HashMap<String, usize>,
    target: usize,
    rng: &mut R,
) -> Vec<TopicCount> {
    let mut tiers: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for topic in topics {
        let count = counts.get(&topic.to_lowercase()).copied().unwrap_or(0);
        if count < target {
            tiers.entry(count).or_default().push(topic.clone());
        }
    }
    let mut out = Vec::new();
    for (count, mut tier) in tiers {
        tier.shuffle(rng);
        out.extend(tier.into_iter().map(|topic| TopicCount { topic, count }));
    }
    out
}
