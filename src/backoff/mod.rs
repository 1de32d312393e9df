//! Adaptive per-domain pacing
//!
//! Each domain carries a pacing multiplier that scales the retry delay for
//! that domain. Outcomes are fed back through `BackoffController::observe`,
//! which shapes a reward, lets a pluggable `PacingPolicy` learn from batches
//! of experience, and moves the multiplier by one bounded step.

mod controller;
mod health;
pub mod policy;
pub mod reward;

pub use controller::{BackoffController, PacingSnapshot};
pub use health::HealthWindow;
pub use policy::{
    DefaultPolicyFactory, Experience, PacingPolicy, PolicyFactory, ProportionalPolicy,
    QLearningPolicy,
};
pub use reward::{DefaultRewardShaper, RewardShaper};

use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while persisting or restoring pacing state
#[derive(Error, Debug)]
pub enum BackoffError {
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Snapshot store error: {0}")]
    Store(#[from] crate::storage::StorageError),
}

/// Persistence for per-domain pacing snapshots
pub trait SnapshotStore: Send + Sync {
    fn load_snapshot(&self, domain: &str) -> StorageResult<Option<String>>;

    fn save_snapshot(&self, domain: &str, snapshot: &str) -> StorageResult<()>;
}

/// What a finished attempt tells the controller about a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingOutcome {
    Success,
    /// Duplicate content or a response that could not be used
    LowQuality,
    RetryableFailure,
    Blocked,
}

impl PacingOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RetryableFailure | Self::Blocked)
    }
}

/// One bounded step applied to the pacing multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingAction {
    Decrease,
    Hold,
    Increase,
}

impl PacingAction {
    pub const ALL: [PacingAction; 3] = [Self::Decrease, Self::Hold, Self::Increase];

    /// Factor the multiplier is scaled by
    pub fn factor(&self) -> f64 {
        match self {
            Self::Decrease => 0.8,
            Self::Hold => 1.0,
            Self::Increase => 1.2,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Decrease => 0,
            Self::Hold => 1,
            Self::Increase => 2,
        }
    }
}

impl fmt::Display for PacingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decrease => write!(f, "decrease"),
            Self::Hold => write!(f, "hold"),
            Self::Increase => write!(f, "increase"),
        }
    }
}

/// Health of a domain over its recent outcome window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainHealth {
    pub low_quality_ratio: f64,
    pub failure_ratio: f64,
    pub current_multiplier: f64,
}

/// Running counters for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingStats {
    pub observations: u64,
    pub increases: u64,
    pub decreases: u64,
    pub holds: u64,
    pub learning_steps: u64,
}

impl PacingStats {
    fn record(&mut self, action: PacingAction) {
        self.observations += 1;
        match action {
            PacingAction::Decrease => self.decreases += 1,
            PacingAction::Hold => self.holds += 1,
            PacingAction::Increase => self.increases += 1,
        }
    }
}
