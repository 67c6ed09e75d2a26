//! Guarded generation: saturation-aware, concurrency-bounded replenishment.
//!
//! Underserved topics are partitioned into groups, each group gets a slice of the
//! global question budget, and groups run concurrently behind a semaphore. Every
//! group inserts its output as STAGING; once all groups have finished the pair is
//! promoted to ACTIVE in one step. A failing group contributes zero and never
//! cancels its siblings, so consumers only ever see rows from completed groups.

use std::{sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::bank::QuestionBank;
use crate::domain::{EntryStatus, GenerationReport, Level};
use crate::generator::{generate_bounded, GenerationRequest, QuestionGenerator};
use crate::saturation::{analyze, Saturation};
use crate::topics::TopicCatalog;
use crate::util::chunked;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub group_size: usize,
    pub max_per_group: usize,
    pub concurrency: usize,
    pub generator_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            group_size: 3,
            max_per_group: 5,
            concurrency: 3,
            generator_timeout: Duration::from_secs(60),
        }
    }
}

/// One generator call: which topics, how many questions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPlan {
    pub topics: Vec<String>,
    pub count: usize,
}

/// Partition topics into groups and hand out the budget in order. Groups after
/// the budget runs out are dropped.
pub fn plan_groups(topics: &[String], group_size: usize, per_group_cap: usize, budget: usize) -> Vec<GroupPlan> {
    let mut remaining = budget;
    let mut plans = Vec::new();
    for group in chunked(topics, group_size) {
        let count = per_group_cap.min(remaining);
        if count == 0 {
            break;
        }
        remaining -= count;
        plans.push(GroupPlan { topics: group, count });
    }
    plans
}

pub struct GuardedGenerator {
    bank: Arc<dyn QuestionBank>,
    generator: Arc<dyn QuestionGenerator>,
    catalog: Arc<dyn TopicCatalog>,
    settings: OrchestratorSettings,
}

impl GuardedGenerator {
    pub fn new(
        bank: Arc<dyn QuestionBank>,
        generator: Arc<dyn QuestionGenerator>,
        catalog: Arc<dyn TopicCatalog>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { bank, generator, catalog, settings }
    }

    #[instrument(level = "info", skip(self), fields(%subject, %level))]
    pub async fn generate_guarded(
        &self,
        subject: &str,
        level: Level,
        target_per_topic: usize,
        max_questions: usize,
    ) -> GenerationReport {
        let saturation =
            match analyze(self.bank.as_ref(), self.catalog.as_ref(), subject, level, target_per_topic).await {
                Ok(s) => s,
                Err(e) => {
                    error!(target: "generation", %subject, %level, error = %e, "Saturation analysis failed");
                    return report(false, 0, format!("saturation analysis failed: {e}"));
                }
            };

        let underserved = match saturation {
            Saturation::NoTopics => {
                warn!(target: "generation", %subject, %level, "No topics available; generation skipped");
                return report(false, 0, format!("no topics available for '{subject}'; generation skipped"));
            }
            Saturation::Saturated => {
                info!(target: "generation", %subject, %level, target_per_topic, "Fully saturated; skipping");
                return report(true, 0, "all topics saturated; nothing to generate".into());
            }
            Saturation::Underserved(list) => list,
        };

        let topics: Vec<String> = underserved.into_iter().map(|t| t.topic).collect();
        let plans = plan_groups(&topics, self.settings.group_size, self.settings.max_per_group, max_questions);
        if plans.is_empty() {
            return report(true, 0, "no generation budget".into());
        }
        info!(target: "generation", %subject, %level, underserved = topics.len(), groups = plans.len(), "Starting guarded generation");

        let (generated, failed) = self.run_groups(subject, level, &plans).await;
        if generated == 0 {
            return report(false, 0, format!("all {} generation groups failed", plans.len()));
        }

        match self.bank.promote(subject, level).await {
            Ok(promoted) => {
                info!(target: "generation", %subject, %level, generated, promoted, failed_groups = failed, "Guarded generation complete");
                report(
                    true,
                    generated,
                    format!("generated {generated} questions in {} groups ({failed} failed); promoted {promoted}", plans.len()),
                )
            }
            Err(e) => {
                error!(target: "generation", %subject, %level, generated, error = %e, "Promotion failed; rows remain staged");
                report(false, generated, format!("promotion failed: {e}"))
            }
        }
    }

    /// Run every group behind the semaphore. Returns (questions generated, failed groups).
    async fn run_groups(&self, subject: &str, level: Level, plans: &[GroupPlan]) -> (usize, usize) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(plans.len());

        for (idx, plan) in plans.iter().enumerate() {
            let semaphore = semaphore.clone();
            let bank = self.bank.clone();
            let generator = self.generator.clone();
            let timeout = self.settings.generator_timeout;
            let req = GenerationRequest {
                subject: subject.to_string(),
                level,
                count: plan.count,
                topics: plan.topics.clone(),
                context: Vec::new(),
            };

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return 0,
                };
                run_group(bank.as_ref(), generator.as_ref(), &req, timeout, idx).await
            });
            handles.push((idx, handle));
        }

        let mut generated = 0;
        let mut failed = 0;
        for (idx, handle) in handles {
            match handle.await {
                Ok(0) => failed += 1,
                Ok(n) => generated += n,
                Err(e) => {
                    error!(target: "generation", group = idx, error = %e, "Generation task aborted");
                    failed += 1;
                }
            }
        }
        (generated, failed)
    }
}

async fn run_group(
    bank: &dyn QuestionBank,
    generator: &dyn QuestionGenerator,
    req: &GenerationRequest,
    timeout: Duration,
    idx: usize,
) -> usize {
    let items = match generate_bounded(generator, req, timeout).await {
        Ok(items) => items,
        Err(e) => {
            warn!(target: "generation", group = idx, topics = ?req.topics, error = %e, "Generation group failed");
            return 0;
        }
    };
    if items.is_empty() {
        warn!(target: "generation", group = idx, topics = ?req.topics, "Generation group returned nothing");
        return 0;
    }
    match bank.add_questions(items, &req.subject, req.level, EntryStatus::Staging).await {
        Ok(ids) => ids.len(),
        Err(e) => {
            warn!(target: "generation", group = idx, error = %e, "Staging insert failed");
            0
        }
    }
}

fn report(success: bool, generated_count: usize, message: String) -> GenerationReport {
    GenerationReport { success, generated_count, message }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::bank::InMemoryBank;
    use crate::testing::{FixedTopics, ScriptedGenerator};

    fn owned(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn orchestrator(
        bank: Arc<InMemoryBank>,
        generator: Arc<ScriptedGenerator>,
        topics: &[&str],
    ) -> GuardedGenerator {
        GuardedGenerator::new(bank, generator, Arc::new(FixedTopics(owned(topics))), OrchestratorSettings::default())
    }

    #[test]
    fn budget_is_handed_out_in_group_order() {
        let topics = owned(&["a", "b", "c", "d", "e", "f", "g"]);
        let plans = plan_groups(&topics, 3, 5, 12);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans.iter().map(|p| p.count).collect::<Vec<_>>(), vec![5, 5, 2]);
        assert_eq!(plans[2].topics, owned(&["g"]));

        let plans = plan_groups(&topics, 3, 5, 5);
        assert_eq!(plans.len(), 1);
        assert!(plan_groups(&topics, 3, 5, 0).is_empty());
    }

    #[tokio::test]
    async fn staged_rows_promoted_after_all_groups() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(bank.clone(), generator.clone(), &["A", "B", "C", "D", "E"]);

        let report = orch.generate_guarded("physics", Level::Hard, 1, 10).await;
        assert!(report.success, "{}", report.message);
        assert_eq!(report.generated_count, 10);
        assert_eq!(generator.calls(), 2);

        let stats = bank.stats(&HashSet::new()).await.unwrap();
        assert_eq!(stats[0].unused, 10);
        assert_eq!(stats[0].staging, 0);
    }

    #[tokio::test]
    async fn failing_group_does_not_block_siblings() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::failing_topics(&["D"]));
        let orch = orchestrator(bank.clone(), generator.clone(), &["A", "B", "C", "D", "E", "F"]);

        let report = orch.generate_guarded("physics", Level::Hard, 1, 30).await;
        assert!(report.success, "{}", report.message);
        assert_eq!(report.generated_count, 5);
        assert!(report.message.contains("(1 failed)"), "{}", report.message);
        assert_eq!(generator.calls(), 2);

        // Only the topics of the surviving group gained ACTIVE rows.
        let active = bank.peek_active("physics", Level::Hard, 100).await.unwrap();
        assert_eq!(active.len(), 5);
        let served: HashSet<String> = active.iter().map(|e| e.content.topic.clone()).collect();
        assert!(!served.contains("D"));
        assert_eq!(served.len(), 3);
        let stats = bank.stats(&HashSet::new()).await.unwrap();
        assert_eq!(stats[0].staging, 0);
    }

    #[tokio::test]
    async fn all_groups_failing_reports_zero_and_promotes_nothing() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::always_failing());
        let orch = orchestrator(bank.clone(), generator, &["A", "B"]);

        let report = orch.generate_guarded("math", Level::Easy, 2, 10).await;
        assert!(!report.success);
        assert_eq!(report.generated_count, 0);
        assert!(bank.stats(&HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_runs_converge_to_saturation() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::default());
        let topics = ["A", "B", "C", "D", "E", "F", "G"];
        let orch = orchestrator(bank.clone(), generator, &topics);

        let mut last = None;
        for _ in 0..10 {
            let report = orch.generate_guarded("history", Level::Medium, 3, 5).await;
            if report.generated_count == 0 {
                last = Some(report);
                break;
            }
        }
        let last = last.expect("never saturated");
        assert!(last.success);
        let counts = bank.count_by_topic("history", Level::Medium).await.unwrap();
        for t in topics {
            assert!(counts.get(&t.to_lowercase()).copied().unwrap_or(0) >= 3, "topic {t} below target");
        }
        let again = orch.generate_guarded("history", Level::Medium, 3, 5).await;
        assert_eq!(again.generated_count, 0);
    }

    #[tokio::test]
    async fn empty_topic_list_is_skipped_not_fatal() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::default());
        let orch = orchestrator(bank, generator.clone(), &[]);
        let report = orch.generate_guarded("art", Level::Easy, 3, 5).await;
        assert!(!report.success);
        assert!(report.message.contains("no topics"));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_the_semaphore() {
        let bank = Arc::new(InMemoryBank::new());
        let generator = Arc::new(ScriptedGenerator::with_delay(Duration::from_millis(50)));
        let topics: Vec<String> = (0..18).map(|i| format!("T{i}")).collect();
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let orch = orchestrator(bank, generator.clone(), &refs);

        let report = orch.generate_guarded("physics", Level::Easy, 1, 100).await;
        assert_eq!(report.generated_count, 30);
        assert_eq!(generator.calls(), 6);
        assert!(generator.peak_in_flight() <= 3);
    }
}
