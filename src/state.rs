//! Application state: stores, generator, engine services and their settings.
//!
//! This module owns:
//!   - the question bank, the exam lock store and the attempt ledger
//!   - the topic catalog (from TOML or built-in fallbacks)
//!   - the generator (OpenAI when a key is present, offline templates otherwise)
//!   - the orchestrator, the exam assembler and the replenishment scheduler
//!
//! HTTP handlers only talk to the methods here.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::assembly::{AssembledExam, AssemblySettings, ExamAssembler};
use crate::bank::{AttemptLedger, InMemoryBank, QuestionBank};
use crate::config::{load_bank_config_from_env, BankConfig, EngineSettings};
use crate::domain::{BankStats, GenerationReport, Level, QuestionBankEntry};
use crate::error::{AssemblyError, BankError};
use crate::generator::{OfflineGenerator, OpenAiGenerator, QuestionGenerator};
use crate::locks::InMemoryLockStore;
use crate::orchestrator::{GuardedGenerator, OrchestratorSettings};
use crate::scheduler::{ReplenishSettings, Replenisher};
use crate::topics::ConfigTopicCatalog;

pub struct AppState {
    pub engine: EngineSettings,
    bank: Arc<InMemoryBank>,
    ledger: AttemptLedger,
    orchestrator: Arc<GuardedGenerator>,
    assembler: ExamAssembler,
    replenisher: Replenisher,
}

impl AppState {
    /// Build state from env: load config, pick a generator, wire the engine.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_bank_config_from_env().unwrap_or_default();

        let generator: Arc<dyn QuestionGenerator> =
            match OpenAiGenerator::from_env(cfg.prompts.clone(), cfg.engine.generator_timeout()) {
                Some(oa) => {
                    info!(target: "qbank_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI generator enabled.");
                    Arc::new(oa)
                }
                None => {
                    warn!(target: "qbank_backend", "OPENAI_API_KEY not set; using the offline template generator.");
                    Arc::new(OfflineGenerator)
                }
            };

        Self::from_parts(cfg, generator)
    }

    pub fn from_parts(cfg: BankConfig, generator: Arc<dyn QuestionGenerator>) -> Self {
        let engine = cfg.engine.clone();
        for (subject, topics) in &cfg.topics {
            info!(target: "qbank_backend", %subject, topics = topics.len(), "Configured topic list");
        }

        let bank = Arc::new(InMemoryBank::new());
        let locks = Arc::new(InMemoryLockStore::new());
        let catalog = Arc::new(ConfigTopicCatalog::new(cfg.topics, cfg.fallback_topics));

        let orchestrator = Arc::new(GuardedGenerator::new(
            bank.clone(),
            generator.clone(),
            catalog.clone(),
            OrchestratorSettings {
                group_size: engine.group_size,
                max_per_group: engine.max_per_group,
                concurrency: engine.concurrency,
                generator_timeout: engine.generator_timeout(),
            },
        ));
        let assembler = ExamAssembler::new(
            bank.clone(),
            locks,
            generator.clone(),
            catalog,
            AssemblySettings {
                generator_timeout: engine.generator_timeout(),
                lock_ttl: engine.lock_ttl(),
                max_exam_size: engine.max_exam_size,
            },
        );
        let replenisher = Replenisher::new(
            orchestrator.clone(),
            ReplenishSettings {
                delay: std::time::Duration::from_secs(engine.replenish_delay_secs),
                cooldown: std::time::Duration::from_secs(engine.replenish_cooldown_secs),
                target_per_topic: engine.replenish_target_per_topic,
                max_questions: engine.replenish_max_questions,
            },
        );
        info!(target: "qbank_backend", generator = generator.name(), exam_size = engine.exam_size, lock_ttl_secs = ?engine.lock_ttl_secs, "Engine ready");

        Self { engine, bank, ledger: AttemptLedger::new(), orchestrator, assembler, replenisher }
    }

    /// Serve the tuple's exam, then schedule background replenishment for the pair.
    pub async fn serve_exam(&self, student_id: &str, subject: &str, level: Level, count: Option<usize>) -> AssembledExam {
        let n = count.unwrap_or(self.engine.exam_size);
        let exam = self.assembler.get_or_create_exam(student_id, subject, level, n).await;
        self.replenisher.schedule(subject, level);
        exam
    }

    pub async fn release_exam(&self, student_id: &str, subject: &str, level: Level) -> Result<usize, AssemblyError> {
        self.assembler.release(student_id, subject, level).await
    }

    pub async fn generate(
        &self,
        subject: &str,
        level: Level,
        target_per_topic: Option<usize>,
        max_questions: Option<usize>,
    ) -> GenerationReport {
        self.orchestrator
            .generate_guarded(
                subject.trim(),
                level,
                target_per_topic.unwrap_or(self.engine.default_target_per_topic),
                max_questions.unwrap_or(self.engine.default_max_questions),
            )
            .await
    }

    pub async fn stats(&self) -> Result<Vec<BankStats>, BankError> {
        let attempted = self.ledger.attempted_ids().await;
        self.bank.stats(&attempted).await
    }

    /// Record a student's answer to a bank row. `None` when the id is unknown.
    #[instrument(level = "debug", skip(self))]
    pub async fn record_answer(&self, student_id: &str, bank_id: &str) -> Result<Option<QuestionBankEntry>, BankError> {
        let Some(entry) = self.bank.get_by_ids(&[bank_id.to_string()]).await?.pop() else {
            return Ok(None);
        };
        let first = self.ledger.record(&entry.id, student_id).await;
        info!(target: "bank", %student_id, %bank_id, first_attempt = first, "Answer recorded");
        Ok(Some(entry))
    }
}
