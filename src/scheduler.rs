//! Throttled, detached replenishment after an exam is served.
//!
//! Each trigger spawns a task that waits `delay`, then claims the (subject, level)
//! slot in a process-local timestamp map. The slot is stamped at claim time, so a
//! burst of triggers runs the orchestrator at most once per cooldown window.
//! The map is per process; several server processes each keep their own.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, error, info};

use crate::domain::Level;
use crate::orchestrator::GuardedGenerator;

#[derive(Clone, Debug)]
pub struct ReplenishSettings {
    pub delay: Duration,
    pub cooldown: Duration,
    pub target_per_topic: usize,
    pub max_questions: usize,
}

impl Default for ReplenishSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            cooldown: Duration::from_secs(300),
            target_per_topic: 5,
            max_questions: 15,
        }
    }
}

#[derive(Clone)]
pub struct Replenisher {
    orchestrator: Arc<GuardedGenerator>,
    last_run: Arc<Mutex<HashMap<(String, Level), Instant>>>,
    settings: ReplenishSettings,
}

impl Replenisher {
    pub fn new(orchestrator: Arc<GuardedGenerator>, settings: ReplenishSettings) -> Self {
        Self { orchestrator, last_run: Arc::new(Mutex::new(HashMap::new())), settings }
    }

    /// Fire-and-forget. The handle is only useful to tests.
    pub fn schedule(&self, subject: &str, level: Level) -> JoinHandle<()> {
        let this = self.clone();
        let subject = subject.trim().to_string();
        tokio::spawn(async move {
            tokio::time::sleep(this.settings.delay).await;
            if !this.try_claim(&subject, level).await {
                debug!(target: "replenish", %subject, %level, "Cooling down; replenishment skipped");
                return;
            }
            let report = this
                .orchestrator
                .generate_guarded(&subject, level, this.settings.target_per_topic, this.settings.max_questions)
                .await;
            if report.success {
                info!(target: "replenish", %subject, %level, generated = report.generated_count, message = %report.message, "Replenishment finished");
            } else {
                error!(target: "replenish", %subject, %level, message = %report.message, "Replenishment failed");
            }
        })
    }

    /// Stamp the slot if its cooldown has elapsed. Returns false while cooling down.
    async fn try_claim(&self, subject: &str, level: Level) -> bool {
        let now = Instant::now();
        let mut last_run = self.last_run.lock().await;
        let key = (subject.to_string(), level);
        match last_run.get(&key) {
            Some(&at) if now.duration_since(at) < self.settings.cooldown => false,
            _ => {
                last_run.insert(key, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::bank::{InMemoryBank, QuestionBank};
    use crate::orchestrator::OrchestratorSettings;
    use crate::testing::{FixedTopics, ScriptedGenerator};

    fn replenisher(generator: Arc<ScriptedGenerator>, bank: Arc<InMemoryBank>) -> Replenisher {
        let topics = Arc::new(FixedTopics(["A", "B", "C"].map(String::from).to_vec()));
        let orch = Arc::new(GuardedGenerator::new(bank, generator, topics, OrchestratorSettings::default()));
        Replenisher::new(
            orch,
            ReplenishSettings {
                delay: Duration::from_secs(2),
                cooldown: Duration::from_secs(60),
                target_per_topic: 50,
                max_questions: 5,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_triggers_runs_once() {
        let generator = Arc::new(ScriptedGenerator::default());
        let bank = Arc::new(InMemoryBank::new());
        let r = replenisher(generator.clone(), bank.clone());

        let handles: Vec<_> = (0..5).map(|_| r.schedule("physics", Level::Hard)).collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(generator.calls(), 1);
        assert_eq!(bank.stats(&HashSet::new()).await.unwrap()[0].unused, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_again_after_cooldown_and_per_pair() {
        let generator = Arc::new(ScriptedGenerator::default());
        let r = replenisher(generator.clone(), Arc::new(InMemoryBank::new()));

        r.schedule("physics", Level::Hard).await.unwrap();
        r.schedule("physics", Level::Easy).await.unwrap();
        assert_eq!(generator.calls(), 2);

        r.schedule("physics", Level::Hard).await.unwrap();
        assert_eq!(generator.calls(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        r.schedule("physics", Level::Hard).await.unwrap();
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_inside_the_task() {
        let generator = Arc::new(ScriptedGenerator::always_failing());
        let r = replenisher(generator.clone(), Arc::new(InMemoryBank::new()));
        assert!(r.schedule("math", Level::Medium).await.is_ok());
        assert_eq!(generator.calls(), 1);
    }
}
