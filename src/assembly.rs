//! Exam assembly and locking.
//!
//! Per (student, subject, level) the first call assembles a set from unused bank
//! rows, tops up any shortfall with on-demand generation, and records a lock with
//! the ordered ids. Later calls replay the lock so retries within one attempt see
//! the same questions. A lock whose ids no longer resolve is treated as absent.
//! If anything in that path fails, an unpersisted set is generated directly so a
//! student is never blocked; that set has no lock and no bank ids.

use std::{sync::Arc, time::Duration};

use tracing::{error, info, instrument, warn};

use crate::bank::QuestionBank;
use crate::domain::{ExamItem, ExamSource, Level, QuestionBankEntry};
use crate::error::AssemblyError;
use crate::generator::{generate_bounded, GenerationRequest, QuestionGenerator};
use crate::locks::{is_expired, LockStore};
use crate::topics::TopicCatalog;

/// How many existing rows are passed to the generator as style exemplars.
const CONTEXT_EXEMPLARS: usize = 2;

#[derive(Clone, Debug)]
pub struct AssemblySettings {
    pub generator_timeout: Duration,
    pub lock_ttl: Option<Duration>,
    pub max_exam_size: usize,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self { generator_timeout: Duration::from_secs(60), lock_ttl: None, max_exam_size: 50 }
    }
}

#[derive(Clone, Debug)]
pub struct AssembledExam {
    pub items: Vec<ExamItem>,
    pub source: ExamSource,
}

pub struct ExamAssembler {
    bank: Arc<dyn QuestionBank>,
    locks: Arc<dyn LockStore>,
    generator: Arc<dyn QuestionGenerator>,
    catalog: Arc<dyn TopicCatalog>,
    settings: AssemblySettings,
}

impl ExamAssembler {
    pub fn new(
        bank: Arc<dyn QuestionBank>,
        locks: Arc<dyn LockStore>,
        generator: Arc<dyn QuestionGenerator>,
        catalog: Arc<dyn TopicCatalog>,
        settings: AssemblySettings,
    ) -> Self {
        Self { bank, locks, generator, catalog, settings }
    }

    /// Ordered questions for the tuple, at most `max_exam_size` of them.
    /// Empty only when every tier failed.
    #[instrument(level = "info", skip(self), fields(%student_id, %subject, %level))]
    pub async fn get_or_create_exam(&self, student_id: &str, subject: &str, level: Level, n: usize) -> AssembledExam {
        let subject = subject.trim();
        let n = n.min(self.settings.max_exam_size);
        match self.assemble(student_id, subject, level, n).await {
            Ok(exam) if !exam.items.is_empty() || n == 0 => exam,
            Ok(_) => {
                warn!(target: "exam", %student_id, %subject, %level, "Bank and on-demand generation yielded nothing; using direct generation");
                self.fallback(subject, level, n).await
            }
            Err(e) => {
                error!(target: "exam", %student_id, %subject, %level, error = %e, "Exam assembly failed; using direct generation");
                self.fallback(subject, level, n).await
            }
        }
    }

    /// Invalidate the tuple's active lock so the next call assembles a fresh set.
    pub async fn release(&self, student_id: &str, subject: &str, level: Level) -> Result<usize, AssemblyError> {
        let released = self.locks.release(student_id, subject.trim(), level).await?;
        info!(target: "exam", %student_id, %subject, %level, released, "Exam lock released");
        Ok(released)
    }

    async fn assemble(&self, student_id: &str, subject: &str, level: Level, n: usize) -> Result<AssembledExam, AssemblyError> {
        if let Some(items) = self.replay_lock(student_id, subject, level).await? {
            info!(target: "exam", %student_id, %subject, %level, n = items.len(), "Replaying locked exam");
            return Ok(AssembledExam { items, source: ExamSource::Locked });
        }
        if n == 0 {
            return Ok(AssembledExam { items: Vec::new(), source: ExamSource::Assembled });
        }

        let mut entries = self.bank.take_unused_active(subject, level, n).await?;
        let from_bank = entries.len();
        if from_bank < n {
            let extra = self.top_up(subject, level, n - from_bank, &entries).await?;
            entries.extend(extra);
        }
        if entries.is_empty() {
            return Ok(AssembledExam { items: Vec::new(), source: ExamSource::Assembled });
        }

        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let lock = self.locks.replace_active(student_id, subject, level, ids).await?;
        info!(target: "exam", %student_id, %subject, %level, lock_id = %lock.id, from_bank, generated = entries.len() - from_bank, "Exam assembled and locked");

        Ok(AssembledExam {
            items: entries.iter().map(ExamItem::from).collect(),
            source: ExamSource::Assembled,
        })
    }

    /// Items of the active lock in recorded order, or `None` when there is no
    /// usable lock (absent, expired, or ids that no longer resolve).
    async fn replay_lock(&self, student_id: &str, subject: &str, level: Level) -> Result<Option<Vec<ExamItem>>, AssemblyError> {
        let Some(lock) = self.locks.active_lock(student_id, subject, level).await? else {
            return Ok(None);
        };
        if is_expired(&lock, self.settings.lock_ttl) {
            info!(target: "exam", %student_id, %subject, %level, lock_id = %lock.id, "Active lock expired");
            return Ok(None);
        }
        let resolved = self.bank.get_by_ids(&lock.question_ids).await?;
        if resolved.is_empty() || resolved.len() != lock.question_ids.len() {
            warn!(
                target: "exam",
                %student_id, %subject, %level, lock_id = %lock.id,
                expected = lock.question_ids.len(), resolved = resolved.len(),
                "Locked question ids no longer resolve; regenerating"
            );
            return Ok(None);
        }
        Ok(Some(resolved.iter().map(ExamItem::from).collect()))
    }

    /// Generate `k` questions on demand and store them as ACTIVE and already used.
    /// Generator failure is a zero contribution; store failure is an error.
    async fn top_up(
        &self,
        subject: &str,
        level: Level,
        k: usize,
        fetched: &[QuestionBankEntry],
    ) -> Result<Vec<QuestionBankEntry>, AssemblyError> {
        let exemplars = if fetched.is_empty() {
            self.bank.peek_active(subject, level, CONTEXT_EXEMPLARS).await?
        } else {
            fetched.iter().take(CONTEXT_EXEMPLARS).cloned().collect()
        };
        let req = GenerationRequest {
            subject: subject.to_string(),
            level,
            count: k,
            topics: self.catalog.topics(subject).await,
            context: exemplars.into_iter().map(|e| e.content).collect(),
        };

        let mut items = match generate_bounded(self.generator.as_ref(), &req, self.settings.generator_timeout).await {
            Ok(items) if !items.is_empty() => items,
            Ok(_) => {
                warn!(target: "exam", %subject, %level, shortfall = k, "On-demand generation returned nothing");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(target: "exam", %subject, %level, shortfall = k, error = %e, "On-demand generation failed");
                return Ok(Vec::new());
            }
        };

        items.truncate(k);
        let ids = self.bank.add_reserved(items, subject, level).await?;
        info!(target: "exam", %subject, %level, requested = k, stored = ids.len(), "Shortfall topped up on demand");
        Ok(self.bank.get_by_ids(&ids).await?)
    }

    /// Last resort: `n` fresh questions, not persisted, not locked.
    async fn fallback(&self, subject: &str, level: Level, n: usize) -> AssembledExam {
        let req = GenerationRequest {
            subject: subject.to_string(),
            level,
            count: n,
            topics: self.catalog.topics(subject).await,
            context: Vec::new(),
        };
        let items = match generate_bounded(self.generator.as_ref(), &req, self.settings.generator_timeout).await {
            Ok(items) => items
                .into_iter()
                .map(|c| ExamItem { question: c.question, answer: c.answer, topic: c.topic, bank_id: None })
                .collect(),
            Err(e) => {
                error!(target: "exam", %subject, %level, error = %e, "Direct generation failed; no questions available");
                Vec::new()
            }
        };
        AssembledExam { items, source: ExamSource::Fallback }
    }
}
