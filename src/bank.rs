//! Question bank store: durable inventory of question/answer rows with the
//! STAGING -> ACTIVE visibility lifecycle and usage tracking.
//!
//! Every operation runs inside a single write (or read) section of the
//! in-memory store, so a batch insert is all-or-nothing and
//! `take_unused_active` selects and marks rows in one step: two concurrent
//! callers can never be handed the same row.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{BankStats, EntryStatus, Level, QuestionBankEntry, QuestionContent};
use crate::error::BankError;

#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Insert a batch with the given status. Returns the new ids in input order.
    async fn add_questions(
        &self,
        items: Vec<QuestionContent>,
        subject: &str,
        level: Level,
        status: EntryStatus,
    ) -> Result<Vec<String>, BankError>;

    /// Insert a batch as ACTIVE and already used, for questions generated
    /// on demand for one student.
    async fn add_reserved(
        &self,
        items: Vec<QuestionContent>,
        subject: &str,
        level: Level,
    ) -> Result<Vec<String>, BankError>;

    /// Select up to `limit` ACTIVE unused rows and mark them used.
    async fn take_unused_active(
        &self,
        subject: &str,
        level: Level,
        limit: usize,
    ) -> Result<Vec<QuestionBankEntry>, BankError>;

    /// Up to `limit` ACTIVE rows without any side effect.
    async fn peek_active(
        &self,
        subject: &str,
        level: Level,
        limit: usize,
    ) -> Result<Vec<QuestionBankEntry>, BankError>;

    /// Flip every STAGING row of the pair to ACTIVE. Returns the count.
    async fn promote(&self, subject: &str, level: Level) -> Result<usize, BankError>;

    /// Resolve ids in the given order. Unknown ids are skipped, so callers
    /// compare lengths to detect a partial resolution.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<QuestionBankEntry>, BankError>;

    /// Rows per topic across all statuses, keyed by lowercase topic.
    async fn count_by_topic(
        &self,
        subject: &str,
        level: Level,
    ) -> Result<HashMap<String, usize>, BankError>;

    /// Per subject/level counters. `attempted` ids come from the answer ledger.
    async fn stats(&self, attempted: &HashSet<String>) -> Result<Vec<BankStats>, BankError>;
}

#[derive(Default)]
struct Rows {
    entries: Vec<QuestionBankEntry>,
    by_id: HashMap<String, usize>,
}

impl Rows {
    fn push(&mut self, entry: QuestionBankEntry) {
        self.by_id.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
    }
}

/// In-memory bank. Rows are kept in insertion order, which is also the order
/// `take_unused_active` serves them in.
#[derive(Default)]
pub struct InMemoryBank {
    rows: RwLock<Rows>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_batch(
        items: Vec<QuestionContent>,
        subject: &str,
        level: Level,
        status: EntryStatus,
        reserved: bool,
    ) -> Result<Vec<QuestionBankEntry>, BankError> {
        if let Some(index) = items.iter().position(|c| !c.is_complete()) {
            return Err(BankError::IncompleteItem { index });
        }
        let now = Utc::now();
        Ok(items
            .into_iter()
            .map(|content| QuestionBankEntry {
                id: Uuid::new_v4().to_string(),
                subject: subject.trim().to_string(),
                level,
                content: QuestionContent {
                    question: content.question.trim().to_string(),
                    answer: content.answer.trim().to_string(),
                    topic: content.topic.trim().to_string(),
                },
                status,
                is_used: reserved,
                used_at: reserved.then_some(now),
                created_at: now,
            })
            .collect())
    }

    async fn insert_batch(&self, batch: Vec<QuestionBankEntry>) -> Vec<String> {
        let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
        let mut rows = self.rows.write().await;
        for entry in batch {
            rows.push(entry);
        }
        ids
    }
}

#[async_trait]
impl QuestionBank for InMemoryBank {
    #[instrument(level = "debug", skip(self, items), fields(%subject, %level, ?status, count = items.len()))]
    async fn add_questions(
        &self,
        items: Vec<QuestionContent>,
        subject: &str,
        level: Level,
        status: EntryStatus,
    ) -> Result<Vec<String>, BankError> {
        let batch = Self::build_batch(items, subject, level, status, false)?;
        let ids = self.insert_batch(batch).await;
        debug!(target: "bank", %subject, %level, ?status, inserted = ids.len(), "Batch inserted");
        Ok(ids)
    }

    #[instrument(level = "debug", skip(self, items), fields(%subject, %level, count = items.len()))]
    async fn add_reserved(
        &self,
        items: Vec<QuestionContent>,
        subject: &str,
        level: Level,
    ) -> Result<Vec<String>, BankError> {
        let batch = Self::build_batch(items, subject, level, EntryStatus::Active, true)?;
        let ids = self.insert_batch(batch).await;
        debug!(target: "bank", %subject, %level, inserted = ids.len(), "Reserved batch inserted");
        Ok(ids)
    }

    #[instrument(level = "debug", skip(self), fields(%subject, %level))]
    async fn take_unused_active(
        &self,
        subject: &str,
        level: Level,
        limit: usize,
    ) -> Result<Vec<QuestionBankEntry>, BankError> {
        let subject = subject.trim();
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let mut taken = Vec::new();
        for entry in rows.entries.iter_mut() {
            if taken.len() >= limit {
                break;
            }
            if entry.subject == subject && entry.level == level && entry.is_servable() {
                entry.is_used = true;
                entry.used_at = Some(now);
                taken.push(entry.clone());
            }
        }
        debug!(target: "bank", %subject, %level, requested = limit, taken = taken.len(), "Took unused rows");
        Ok(taken)
    }

    async fn peek_active(
        &self,
        subject: &str,
        level: Level,
        limit: usize,
    ) -> Result<Vec<QuestionBankEntry>, BankError> {
        let subject = subject.trim();
        let rows = self.rows.read().await;
        Ok(rows
            .entries
            .iter()
            .filter(|e| e.subject == subject && e.level == level && e.status == EntryStatus::Active)
            .take(limit)
            .cloned()
            .collect())
    }

    #[instrument(level = "info", skip(self), fields(%subject, %level))]
    async fn promote(&self, subject: &str, level: Level) -> Result<usize, BankError> {
        let subject = subject.trim();
        let mut rows = self.rows.write().await;
        let mut promoted = 0;
        for entry in rows.entries.iter_mut() {
            if entry.subject == subject
                && entry.level == level
                && entry.status == EntryStatus::Staging
            {
                entry.status = entry.status.transition_to(EntryStatus::Active)?;
                promoted += 1;
            }
        }
        info!(target: "bank", %subject, %level, promoted, "Promoted staging rows");
        Ok(promoted)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<QuestionBankEntry>, BankError> {
        let rows = self.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.by_id.get(id).map(|&i| rows.entries[i].clone()))
            .collect())
    }

    async fn count_by_topic(
        &self,
        subject: &str,
        level: Level,
    ) -> Result<HashMap<String, usize>, BankError> {
        let subject = subject.trim();
        let rows = self.rows.read().await;
        let mut counts = HashMap::new();
        for e in rows.entries.iter().filter(|e| e.subject == subject && e.level == level) {
            *counts.entry(e.content.topic.to_lowercase()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn stats(&self, attempted: &HashSet<String>) -> Result<Vec<BankStats>, BankError> {
        let rows = self.rows.read().await;
        let mut by_pair: BTreeMap<(String, Level), BankStats> = BTreeMap::new();
        for e in &rows.entries {
            let s = by_pair
                .entry((e.subject.clone(), e.level))
                .or_insert_with(|| BankStats {
                    subject: e.subject.clone(),
                    level: e.level,
                    unused: 0,
                    used: 0,
                    attempted: 0,
                    staging: 0,
                });
            match (e.status, e.is_used) {
                (EntryStatus::Staging, _) => s.staging += 1,
                (EntryStatus::Active, false) => s.unused += 1,
                (EntryStatus::Active, true) => s.used += 1,
            }
            if attempted.contains(&e.id) {
                s.attempted += 1;
            }
        }
        Ok(by_pair.into_values().collect())
    }
}

/// Submitted-answer linkage: which bank rows have been answered, and by whom.
#[derive(Default)]
pub struct AttemptLedger {
    by_question: RwLock<HashMap<String, HashSet<String>>>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this (question, student) pair is recorded for the first time.
    pub async fn record(&self, bank_id: &str, student_id: &str) -> bool {
        let mut map = self.by_question.write().await;
        map.entry(bank_id.to_string())
            .or_default()
            .insert(student_id.to_string())
    }

    pub async fn attempted_ids(&self) -> HashSet<String> {
        self.by_question.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::content;

    #[tokio::test]
    async fn add_questions_normalizes_and_keeps_order() {
        let bank = InMemoryBank::new();
        let ids = bank
            .add_questions(
                vec![content("q1", "Kinematics"), content("q2", "Optics")],
                " physics ",
                "HARD".parse().unwrap(),
                EntryStatus::Active,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let rows = bank.get_by_ids(&ids).await.unwrap();
        assert_eq!(rows[0].content.question, "q1");
        assert_eq!(rows[1].subject, "physics");
        assert_eq!(rows[1].level, Level::Hard);
    }

    #[tokio::test]
    async fn unbounded_limit_takes_what_exists() {
        let bank = InMemoryBank::new();
        bank.add_questions(vec![content("q1", "Optics")], "physics", Level::Hard, EntryStatus::Active)
            .await
            .unwrap();
        let taken = bank.take_unused_active("physics", Level::Hard, usize::MAX).await.unwrap();
        assert_eq!(taken.len(), 1);
    }

    #[tokio::test]
    async fn incomplete_item_aborts_whole_batch() {
        let bank = InMemoryBank::new();
        let mut bad = content("q2", "Optics");
        bad.answer = "  ".into();
        let err = bank
            .add_questions(vec![content("q1", "Kinematics"), bad], "physics", Level::Hard, EntryStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, BankError::IncompleteItem { index: 1 }));
        assert!(bank.stats(&HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shortfall_returns_what_exists() {
        let bank = InMemoryBank::new();
        bank.add_questions(
            vec![content("a", "t"), content("b", "t")],
            "physics",
            Level::Easy,
            EntryStatus::Active,
        )
        .await
        .unwrap();

        let taken = bank.take_unused_active("physics", Level::Easy, 5).await.unwrap();
        assert_eq!(taken.len(), 2);
        assert!(taken.iter().all(|e| e.is_used && e.used_at.is_some()));
        assert!(bank.take_unused_active("physics", Level::Easy, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn staging_rows_are_invisible_until_promoted() {
        let bank = InMemoryBank::new();
        bank.add_questions(vec![content("a", "t")], "chemistry", Level::Medium, EntryStatus::Staging)
            .await
            .unwrap();
        assert!(bank.take_unused_active("chemistry", Level::Medium, 1).await.unwrap().is_empty());
        assert!(bank.peek_active("chemistry", Level::Medium, 1).await.unwrap().is_empty());

        assert_eq!(bank.promote("chemistry", Level::Medium).await.unwrap(), 1);
        assert_eq!(bank.promote("chemistry", Level::Medium).await.unwrap(), 0);
        assert_eq!(bank.take_unused_active("chemistry", Level::Medium, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_takers_never_share_a_row() {
        let bank = Arc::new(InMemoryBank::new());
        let items = (0..40).map(|i| content(&format!("q{i}"), "t")).collect();
        bank.add_questions(items, "math", Level::Easy, EntryStatus::Active).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bank = bank.clone();
            handles.push(tokio::spawn(async move {
                bank.take_unused_active("math", Level::Easy, 7).await.unwrap()
            }));
        }
        let mut seen = HashSet::new();
        let mut total = 0;
        for h in handles {
            for e in h.await.unwrap() {
                total += 1;
                assert!(seen.insert(e.id), "row served twice");
            }
        }
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn stats_split_unused_used_attempted_staging() {
        let bank = InMemoryBank::new();
        let ledger = AttemptLedger::new();
        bank.add_questions(
            vec![content("a", "t"), content("b", "t"), content("c", "t")],
            "biology",
            Level::Easy,
            EntryStatus::Active,
        )
        .await
        .unwrap();
        bank.add_questions(vec![content("d", "t")], "biology", Level::Easy, EntryStatus::Staging)
            .await
            .unwrap();
        let taken = bank.take_unused_active("biology", Level::Easy, 2).await.unwrap();
        assert!(ledger.record(&taken[0].id, "s1").await);
        assert!(!ledger.record(&taken[0].id, "s1").await);

        let stats = bank.stats(&ledger.attempted_ids().await).await.unwrap();
        assert_eq!(
            stats,
            vec![BankStats {
                subject: "biology".into(),
                level: Level::Easy,
                unused: 1,
                used: 2,
                attempted: 1,
                staging: 1,
            }]
        );
    }

    #[tokio::test]
    async fn reserved_rows_are_active_and_used() {
        let bank = InMemoryBank::new();
        let ids = bank.add_reserved(vec![content("a", "t")], "physics", Level::Hard).await.unwrap();
        let row = &bank.get_by_ids(&ids).await.unwrap()[0];
        assert_eq!(row.status, EntryStatus::Active);
        assert!(row.is_used);
        assert!(bank.take_unused_active("physics", Level::Hard, 1).await.unwrap().is_empty());
    }
}
