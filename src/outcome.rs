//! Per-item results for batch operations and the structured outcome
//! returned to the command front end.
//!
//! Batch operations never unwind on a single failure: every room (or
//! user/room pair) gets an [`ItemResult`], and the collected
//! [`BatchReport`] is folded into an [`Outcome`] at the end.

use crate::error::EngineError;
use std::fmt;

/// Status of one item in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Applied,
    /// Nothing needed doing.
    Unchanged,
    /// Not attempted, with the reason.
    Skipped(String),
    /// The bot lacks power; an operator has to do this by hand.
    Manual(String),
    Failed(String),
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    /// Room id, or `user in room` for per-pair batches.
    pub target: String,
    pub status: ItemStatus,
}

impl ItemResult {
    pub fn new(target: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            target: target.into(),
            status,
        }
    }

    /// Classify an engine error: permission problems become manual actions.
    pub fn from_error(target: impl Into<String>, err: &EngineError) -> Self {
        let status = match err {
            EngineError::Permission { reason, .. } => ItemStatus::Manual(reason.clone()),
            other => ItemStatus::Failed(other.to_string()),
        };
        Self::new(target, status)
    }
}

/// Collected results of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: Vec<ItemResult>,
    /// The batch stopped early; items after the last entry were not attempted.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn push(&mut self, item: ItemResult) {
        self.items.push(item);
    }

    /// Targets that were changed.
    pub fn applied(&self) -> Vec<&str> {
        self.with(|s| matches!(s, ItemStatus::Applied))
    }

    pub fn manual_actions(&self) -> Vec<&str> {
        self.with(|s| matches!(s, ItemStatus::Manual(_)))
    }

    pub fn failures(&self) -> Vec<&str> {
        self.with(|s| matches!(s, ItemStatus::Failed(_)))
    }

    fn with(&self, pred: impl Fn(&ItemStatus) -> bool) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| pred(&i.status))
            .map(|i| i.target.as_str())
            .collect()
    }

    /// Fold the per-item results into a command outcome.
    pub fn outcome(&self) -> Outcome {
        let manual_actions: Vec<String> = self.manual_actions().into_iter().map(String::from).collect();
        let failures: Vec<String> = self.failures().into_iter().map(String::from).collect();

        if manual_actions.is_empty() && failures.is_empty() && !self.cancelled {
            return Outcome::Applied;
        }
        if !self.items.is_empty() && manual_actions.len() + failures.len() == self.items.len() {
            return Outcome::Failed {
                reason: format!("no item succeeded ({} attempted)", self.items.len()),
            };
        }
        Outcome::Partial {
            manual_actions,
            failures,
        }
    }
}

/// Structured result of an administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fully applied.
    Applied,
    /// Partially applied.
    Partial {
        manual_actions: Vec<String>,
        failures: Vec<String>,
    },
    Failed {
        reason: String,
    },
}

impl Outcome {
    pub fn failed(err: &EngineError) -> Self {
        Outcome::Failed {
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => f.write_str("applied"),
            Outcome::Partial {
                manual_actions,
                failures,
            } => write!(
                f,
                "partially applied ({} manual, {} failed)",
                manual_actions.len(),
                failures.len()
            ),
            Outcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
