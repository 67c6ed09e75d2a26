//! Exam lock store. At most one `active` lock per (student, subject, level).
//!
//! `replace_active` invalidates the previous active lock and inserts the new
//! one inside the same write section, so the exclusivity invariant holds at
//! every observable instant. Lock rows are never deleted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{ExamLock, Level, LockStatus};
use crate::error::BankError;

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn active_lock(
        &self,
        student_id: &str,
        subject: &str,
        level: Level,
    ) -> Result<Option<ExamLock>, BankError>;

    /// Invalidate any active lock for the tuple and record a new one.
    async fn replace_active(
        &self,
        student_id: &str,
        subject: &str,
        level: Level,
        question_ids: Vec<String>,
    ) -> Result<ExamLock, BankError>;

    /// Invalidate the tuple's active lock without creating a new one.
    async fn release(&self, student_id: &str, subject: &str, level: Level) -> Result<usize, BankError>;

    /// Every lock row (any status) recorded for the tuple, oldest first.
    async fn history(&self, student_id: &str, subject: &str, level: Level) -> Result<Vec<ExamLock>, BankError>;
}

#[derive(Default)]
pub struct InMemoryLockStore {
    rows: RwLock<Vec<ExamLock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn invalidate_matching(rows: &mut [ExamLock], student_id: &str, subject: &str, level: Level) -> usize {
    let mut n = 0;
    for lock in rows
        .iter_mut()
        .filter(|l| l.status == LockStatus::Active && l.matches(student_id, subject, level))
    {
        lock.status = LockStatus::Invalidated;
        n += 1;
    }
    n
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn active_lock(
        &self,
        student_id: &str,
        subject: &str,
        level: Level,
    ) -> Result<Option<ExamLock>, BankError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|l| l.status == LockStatus::Active && l.matches(student_id, subject, level))
            .cloned())
    }

    #[instrument(level = "debug", skip(self, question_ids), fields(%student_id, %subject, %level, n = question_ids.len()))]
    async fn replace_active(
        &self,
        student_id: &str,
        subject: &str,
        level: Level,
        question_ids: Vec<String>,
    ) -> Result<ExamLock, BankError> {
        let lock = ExamLock {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            subject: subject.to_string(),
            level,
            question_ids,
            status: LockStatus::Active,
            created_at: Utc::now(),
        };
        let mut rows = self.rows.write().await;
        let invalidated = invalidate_matching(&mut rows, student_id, subject, level);
        rows.push(lock.clone());
        debug!(target: "exam", %student_id, %subject, %level, lock_id = %lock.id, invalidated, "Exam lock recorded");
        Ok(lock)
    }

    async fn release(&self, student_id: &str, subject: &str, level: Level) -> Result<usize, BankError> {
        let mut rows = self.rows.write().await;
        Ok(invalidate_matching(&mut rows, student_id, subject, level))
    }

    async fn history(&self, student_id: &str, subject: &str, level: Level) -> Result<Vec<ExamLock>, BankError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|l| l.matches(student_id, subject, level)).cloned().collect())
    }
}

/// True when the lock is older than `ttl`. `None` never expires.
pub fn is_expired(lock: &ExamLock, ttl: Option<Duration>) -> bool {
    match ttl.and_then(|t| chrono::Duration::from_std(t).ok()) {
        Some(ttl) => Utc::now() - lock.created_at > ttl,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn replace_keeps_a_single_active_row() {
        let store = InMemoryLockStore::new();
        store.replace_active("s1", "physics", Level::Hard, ids(&["a", "b"])).await.unwrap();
        let second = store.replace_active("s1", "physics", Level::Hard, ids(&["c"])).await.unwrap();
        store.replace_active("s2", "physics", Level::Hard, ids(&["d"])).await.unwrap();

        let history = store.history("s1", "physics", Level::Hard).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|l| l.status == LockStatus::Active).count(), 1);
        let active = store.active_lock("s1", "physics", Level::Hard).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.question_ids, ids(&["c"]));
    }

    #[tokio::test]
    async fn release_invalidates_without_deleting() {
        let store = InMemoryLockStore::new();
        store.replace_active("s1", "math", Level::Easy, ids(&["a"])).await.unwrap();
        assert_eq!(store.release("s1", "math", Level::Easy).await.unwrap(), 1);
        assert_eq!(store.release("s1", "math", Level::Easy).await.unwrap(), 0);
        assert!(store.active_lock("s1", "math", Level::Easy).await.unwrap().is_none());
        assert_eq!(store.history("s1", "math", Level::Easy).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let store = InMemoryLockStore::new();
        let mut lock = store.replace_active("s1", "math", Level::Easy, ids(&["a"])).await.unwrap();
        assert!(!is_expired(&lock, None));
        assert!(!is_expired(&lock, Some(Duration::from_secs(3600))));
        lock.created_at = Utc::now() - chrono::Duration::hours(2);
        assert!(is_expired(&lock, Some(Duration::from_secs(3600))));
    }
}
