//! Error types for the stores, the generator and exam assembly.

use thiserror::Error;

use crate::domain::EntryStatus;

/// Failures of the bank and lock stores.
#[derive(Debug, Error)]
pub enum BankError {
  #[error("invalid level '{0}' (expected easy, medium or hard)")]
  InvalidLevel(String),
  #[error("batch item {index} is missing a question or an answer")]
  IncompleteItem { index: usize },
  #[error("illegal status transition {from:?} -> {to:?}")]
  IllegalTransition { from: EntryStatus, to: EntryStatus },
}

#[derive(Debug, Error)]
pub enum GenerationError {
  #[error("generator HTTP error: {0}")]
  Http(String),
  #[error("generator returned malformed output: {0}")]
  Malformed(String),
  #[error("generator call timed out after {0}s")]
  Timeout(u64),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
  #[error(transparent)]
  Store(#[from] BankError),
}
