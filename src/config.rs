//! Loading bank configuration (prompts, engine tuning, topic lists) from TOML.
//!
//! Every section is optional; a missing or broken file falls back to defaults.

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BankConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub engine: EngineSettings,
  /// Canonical topic lists keyed by subject.
  #[serde(default)]
  pub topics: HashMap<String, Vec<String>>,
  /// Per-subject fallback lists merged in when the canonical list is too small.
  /// Subjects not listed here use the built-in fallback.
  #[serde(default)]
  pub fallback_topics: HashMap<String, Vec<String>>,
}

/// Tuning knobs for the orchestrator, assembly and the replenishment scheduler.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  pub group_size: usize,
  pub max_per_group: usize,
  pub concurrency: usize,
  pub generator_timeout_secs: u64,
  pub default_target_per_topic: usize,
  pub default_max_questions: usize,
  pub exam_size: usize,
  /// Upper bound on the per-request exam size.
  pub max_exam_size: usize,
  pub lock_ttl_secs: Option<u64>,
  pub replenish_delay_secs: u64,
  pub replenish_cooldown_secs: u64,
  pub replenish_target_per_topic: usize,
  pub replenish_max_questions: usize,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      group_size: 3,
      max_per_group: 5,
      concurrency: 3,
      generator_timeout_secs: 60,
      default_target_per_topic: 10,
      default_max_questions: 30,
      exam_size: 10,
      max_exam_size: 50,
      lock_ttl_secs: None,
      replenish_delay_secs: 5,
      replenish_cooldown_secs: 300,
      replenish_target_per_topic: 5,
      replenish_max_questions: 15,
    }
  }
}

impl EngineSettings {
  pub fn generator_timeout(&self) -> Duration {
    Duration::from_secs(self.generator_timeout_secs)
  }

  pub fn lock_ttl(&self) -> Option<Duration> {
    self.lock_ttl_secs.map(Duration::from_secs)
  }
}

/// Prompts used by the LLM generator. Placeholders: `{subject}`, `{level}`,
/// `{count}`, `{topics}`, `{examples}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generate_system: String,
  pub generate_user_template: String,
  pub examples_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generate_system: "You write exam questions for students. Respond ONLY with strict JSON.".into(),
      generate_user_template: "Write {count} distinct {level} exam questions for the subject '{subject}'.\nSpread them across these topics: {topics}.\nEach question must have a concise, correct answer.\n{examples}\nReturn JSON: {\"questions\": [{\"question\": string, \"answer\": string, \"topic\": string}]}. The topic must be one of the listed topics.".into(),
      examples_template: "Match the style and difficulty of these existing questions (do not repeat them):\n{examples}".into(),
    }
  }
}

/// Attempt to load `BankConfig` from BANK_CONFIG_PATH. On any IO/parse error, returns None.
pub fn load_bank_config_from_env() -> Option<BankConfig> {
  let path = std::env::var("BANK_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<BankConfig>(&s) {
      Ok(cfg) => {
        info!(target: "qbank_backend", %path, subjects = cfg.topics.len(), "Loaded bank config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "qbank_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "qbank_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
