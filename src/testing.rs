//! Test doubles shared by the unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::domain::QuestionContent;
use crate::error::GenerationError;
use crate::generator::{GenerationRequest, QuestionGenerator};
use crate::topics::TopicCatalog;

pub fn content(question: &str, topic: &str) -> QuestionContent {
    QuestionContent {
        question: question.to_string(),
        answer: format!("answer to {question}"),
        topic: topic.to_string(),
    }
}

pub struct FixedTopics(pub Vec<String>);

#[async_trait]
impl TopicCatalog for FixedTopics {
    async fn topics(&self, _subject: &str) -> Vec<String> {
        self.0.clone()
    }
}

/// Returns `count` items (plus `extra`), round-robin over the requested topics.
/// Can be told to fail for requests touching given topics, or always.
/// Remembers the style context of the last request.
#[derive(Default)]
pub struct ScriptedGenerator {
    fail_topics: Vec<String>,
    fail_all: bool,
    delay: Option<Duration>,
    extra: usize,
    last_context: Mutex<Vec<QuestionContent>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn failing_topics(topics: &[&str]) -> Self {
        Self { fail_topics: topics.iter().map(|s| s.to_string()).collect(), ..Self::default() }
    }

    pub fn always_failing() -> Self {
        Self { fail_all: true, ..Self::default() }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// Answers with `extra` more items than requested.
    pub fn overshooting(extra: usize) -> Self {
        Self { extra, ..Self::default() }
    }

    pub fn last_context(&self) -> Vec<QuestionContent> {
        self.last_context.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate(&self, req: &GenerationRequest) -> Result<Vec<QuestionContent>, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = req.context.clone();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all || req.topics.iter().any(|t| self.fail_topics.contains(t)) {
            return Err(GenerationError::Http("scripted failure".into()));
        }
        let topics = if req.topics.is_empty() { vec!["general".to_string()] } else { req.topics.clone() };
        Ok((0..req.count + self.extra)
            .map(|i| content(&format!("{} call{} #{}", req.subject, call, i), &topics[i % topics.len()]))
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Sleeps for the given duration before answering with nothing.
pub struct SlowGenerator(pub Duration);

#[async_trait]
impl QuestionGenerator for SlowGenerator {
    async fn generate(&self, _req: &GenerationRequest) -> Result<Vec<QuestionContent>, GenerationError> {
        tokio::time::sleep(self.0).await;
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "slow"
    }
}
