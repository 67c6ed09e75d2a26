//! Domain models: difficulty levels, the STAGING/ACTIVE lifecycle, bank entries,
//! exam locks and the items handed back to students.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BankError;

/// Difficulty level of a bank entry. Parsed case-insensitively, stored lowercase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Easy,
  Medium,
  Hard,
}

impl Level {
  pub fn as_str(&self) -> &'static str {
    match self {
      Level::Easy => "easy",
      Level::Medium => "medium",
      Level::Hard => "hard",
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Level {
  type Err = BankError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "easy" => Ok(Level::Easy),
      "medium" => Ok(Level::Medium),
      "hard" => Ok(Level::Hard),
      _ => Err(BankError::InvalidLevel(s.to_string())),
    }
  }
}

/// Two-phase visibility of a bank row. Consumers only ever see `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryStatus {
  Staging,
  Active,
}

impl EntryStatus {
  /// Allowed transitions. Anything not listed here is rejected, including
  /// self-transitions and `Active -> Staging`.
  const TRANSITIONS: &'static [(EntryStatus, EntryStatus)] =
    &[(EntryStatus::Staging, EntryStatus::Active)];

  pub fn can_transition_to(self, next: EntryStatus) -> bool {
    Self::TRANSITIONS.iter().any(|&(from, to)| from == self && to == next)
  }

  pub fn transition_to(self, next: EntryStatus) -> Result<EntryStatus, BankError> {
    if self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(BankError::IllegalTransition { from: self, to: next })
    }
  }
}

/// Question payload as produced by the generator and stored in the bank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionContent {
  pub question: String,
  pub answer: String,
  #[serde(default)]
  pub topic: String,
}

impl QuestionContent {
  pub fn is_complete(&self) -> bool {
    !self.question.trim().is_empty() && !self.answer.trim().is_empty()
  }
}

/// One row of the question bank. Rows are append-only.
#[derive(Clone, Debug)]
pub struct QuestionBankEntry {
  pub id: String,
  pub subject: String,
  pub level: Level,
  pub content: QuestionContent,
  pub status: EntryStatus,
  pub is_used: bool,
  pub used_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl QuestionBankEntry {
  pub fn is_servable(&self) -> bool {
    self.status == EntryStatus::Active && !self.is_used
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
  Active,
  Invalidated,
}

/// Pins an ordered set of bank entries to one student's attempt.
#[derive(Clone, Debug)]
pub struct ExamLock {
  pub id: String,
  pub student_id: String,
  pub subject: String,
  pub level: Level,
  pub question_ids: Vec<String>,
  pub status: LockStatus,
  pub created_at: DateTime<Utc>,
}

impl ExamLock {
  pub fn matches(&self, student_id: &str, subject: &str, level: Level) -> bool {
    self.student_id == student_id && self.subject == subject && self.level == level
  }
}

/// A question as served to a student. `bank_id` is `None` only for the
/// unpersisted last-resort tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamItem {
  pub question: String,
  pub answer: String,
  pub topic: String,
  pub bank_id: Option<String>,
}

impl From<&QuestionBankEntry> for ExamItem {
  fn from(e: &QuestionBankEntry) -> Self {
    ExamItem {
      question: e.content.question.clone(),
      answer: e.content.answer.clone(),
      topic: e.content.topic.clone(),
      bank_id: Some(e.id.clone()),
    }
  }
}

/// Per subject/level inventory counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankStats {
  pub subject: String,
  pub level: Level,
  pub unused: usize,
  pub used: usize,
  pub attempted: usize,
  pub staging: usize,
}

/// Outcome of a guarded generation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
  pub success: bool,
  pub generated_count: usize,
  pub message: String,
}

/// Where the questions of an assembled exam came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamSource {
  /// Replayed from an active lock.
  Locked,
  /// Freshly assembled from the bank (plus on-demand top-up) and locked.
  Assembled,
  /// Unpersisted last-resort generation; no lock, no bank ids.
  Fallback,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_parses_case_insensitively() {
    assert_eq!("HARD".parse::<Level>().unwrap(), Level::Hard);
    assert_eq!(" Medium ".parse::<Level>().unwrap(), Level::Medium);
    assert!("expert".parse::<Level>().is_err());
  }

  #[test]
  fn status_only_moves_forward() {
    assert!(EntryStatus::Staging.can_transition_to(EntryStatus::Active));
    assert!(!EntryStatus::Active.can_transition_to(EntryStatus::Staging));
    assert!(!EntryStatus::Active.can_transition_to(EntryStatus::Active));
    assert!(EntryStatus::Active.transition_to(EntryStatus::Staging).is_err());
  }
}
