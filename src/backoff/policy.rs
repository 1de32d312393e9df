//! Pacing policies
//!
//! A policy picks the next `PacingAction` for a domain from its current
//! health and learns from batches of experience. Policies are per domain and
//! serialize to an opaque JSON value so they survive restarts.

use crate::backoff::{BackoffError, DomainHealth, PacingAction};
use crate::config::{BackoffConfig, PolicyKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single (state, action, reward, next state) transition
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    pub state: DomainHealth,
    pub action: PacingAction,
    pub reward: f64,
    pub next_state: DomainHealth,
}

/// Decision logic for one domain
pub trait PacingPolicy: Send {
    fn choose(&mut self, health: &DomainHealth) -> PacingAction;

    fn learn(&mut self, batch: &[Experience]);

    fn snapshot(&self) -> serde_json::Value;

    fn name(&self) -> &'static str;
}

/// Builds fresh or restored policies for new domains
pub trait PolicyFactory: Send + Sync {
    fn create(&self) -> Box<dyn PacingPolicy>;

    fn restore(&self, snapshot: &serde_json::Value) -> Result<Box<dyn PacingPolicy>, BackoffError>;
}

/// Factory for the policy selected in the configuration
#[derive(Debug, Clone)]
pub struct DefaultPolicyFactory {
    config: BackoffConfig,
}

impl DefaultPolicyFactory {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }
}

impl PolicyFactory for DefaultPolicyFactory {
    fn create(&self) -> Box<dyn PacingPolicy> {
        match self.config.policy {
            PolicyKind::QLearning => Box::new(QLearningPolicy::new(&self.config)),
            PolicyKind::Proportional => Box::new(ProportionalPolicy::new(&self.config)),
        }
    }

    fn restore(&self, snapshot: &serde_json::Value) -> Result<Box<dyn PacingPolicy>, BackoffError> {
        Ok(match self.config.policy {
            PolicyKind::QLearning => Box::new(QLearningPolicy::restore(&self.config, snapshot)?),
            PolicyKind::Proportional => {
                Box::new(ProportionalPolicy::restore(&self.config, snapshot)?)
            }
        })
    }
}

const BUCKETS: u16 = 4;

fn ratio_bucket(ratio: f64) -> u16 {
    if ratio < 0.1 {
        0
    } else if ratio < 0.3 {
        1
    } else if ratio < 0.6 {
        2
    } else {
        3
    }
}

/// Tabular Q-learning over a discretized health vector
///
/// The state is the bucketed failure ratio, low-quality ratio and the
/// multiplier's position between its bounds (4 buckets each). Exploration
/// only happens in states that already have learned values, and ties between
/// actions resolve Hold, then Increase, then Decrease, so an untrained
/// domain holds its pace.
#[derive(Debug, Clone)]
pub struct QLearningPolicy {
    table: BTreeMap<u16, [f64; 3]>,
    learning_rate: f64,
    discount: f64,
    exploration_rate: f64,
    min_multiplier: f64,
    max_multiplier: f64,
}

#[derive(Serialize, Deserialize)]
struct QLearningSnapshot {
    table: BTreeMap<u16, [f64; 3]>,
}

impl QLearningPolicy {
    const TIE_ORDER: [PacingAction; 3] = [
        PacingAction::Hold,
        PacingAction::Increase,
        PacingAction::Decrease,
    ];

    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            table: BTreeMap::new(),
            learning_rate: config.learning_rate,
            discount: config.discount,
            exploration_rate: config.exploration_rate,
            min_multiplier: config.min_multiplier,
            max_multiplier: config.max_multiplier,
        }
    }

    pub fn restore(config: &BackoffConfig, snapshot: &serde_json::Value) -> Result<Self, BackoffError> {
        let decoded: QLearningSnapshot = serde_json::from_value(snapshot.clone())?;
        let mut policy = Self::new(config);
        policy.table = decoded.table;
        Ok(policy)
    }

    fn encode(&self, health: &DomainHealth) -> u16 {
        let span = self.max_multiplier - self.min_multiplier;
        let position = if span > 0.0 {
            let relative = (health.current_multiplier - self.min_multiplier) / span;
            ((relative * BUCKETS as f64).floor().max(0.0) as u16).min(BUCKETS - 1)
        } else {
            0
        };

        ratio_bucket(health.failure_ratio) * BUCKETS * BUCKETS
            + ratio_bucket(health.low_quality_ratio) * BUCKETS
            + position
    }

    fn greedy(values: &[f64; 3]) -> PacingAction {
        let mut best = Self::TIE_ORDER[0];
        for action in Self::TIE_ORDER.iter().skip(1) {
            if values[action.index()] > values[best.index()] {
                best = *action;
            }
        }
        best
    }

    /// Learned action values for a health state, if any
    pub fn values(&self, health: &DomainHealth) -> Option<[f64; 3]> {
        self.table.get(&self.encode(health)).copied()
    }

    pub fn states_learned(&self) -> usize {
        self.table.len()
    }
}

impl PacingPolicy for QLearningPolicy {
    fn choose(&mut self, health: &DomainHealth) -> PacingAction {
        let Some(values) = self.table.get(&self.encode(health)) else {
            return PacingAction::Hold;
        };

        let mut rng = rand::thread_rng();
        if self.exploration_rate > 0.0 && rng.gen::<f64>() < self.exploration_rate {
            return PacingAction::ALL[rng.gen_range(0..PacingAction::ALL.len())];
        }

        Self::greedy(values)
    }

    fn learn(&mut self, batch: &[Experience]) {
        for experience in batch {
            let next = self.encode(&experience.next_state);
            let best_next = self
                .table
                .get(&next)
                .map(|values| values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
                .unwrap_or(0.0);

            let state = self.encode(&experience.state);
            let values = self.table.entry(state).or_insert([0.0; 3]);
            let current = values[experience.action.index()];
            values[experience.action.index()] = current
                + self.learning_rate * (experience.reward + self.discount * best_next - current);
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "table": self.table })
    }

    fn name(&self) -> &'static str {
        "q-learning"
    }
}

/// Rule-based policy: slow down when failing, speed up when healthy
///
/// Holds until it has seen `batch_size` observations.
#[derive(Debug, Clone)]
pub struct ProportionalPolicy {
    observations: u64,
    warm_up: u64,
}

#[derive(Serialize, Deserialize)]
struct ProportionalSnapshot {
    observations: u64,
}

impl ProportionalPolicy {
    const FAILURE_THRESHOLD: f64 = 0.3;
    const HEALTHY_FAILURE: f64 = 0.1;
    const HEALTHY_LOW_QUALITY: f64 = 0.3;

    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            observations: 0,
            warm_up: config.batch_size as u64,
        }
    }

    pub fn restore(config: &BackoffConfig, snapshot: &serde_json::Value) -> Result<Self, BackoffError> {
        let decoded: ProportionalSnapshot = serde_json::from_value(snapshot.clone())?;
        let mut policy = Self::new(config);
        policy.observations = decoded.observations;
        Ok(policy)
    }
}

impl PacingPolicy for ProportionalPolicy {
    fn choose(&mut self, health: &DomainHealth) -> PacingAction {
        self.observations += 1;
        if self.observations < self.warm_up {
            return PacingAction::Hold;
        }

        if health.failure_ratio > Self::FAILURE_THRESHOLD {
            PacingAction::Increase
        } else if health.failure_ratio < Self::HEALTHY_FAILURE
            && health.low_quality_ratio < Self::HEALTHY_LOW_QUALITY
        {
            PacingAction::Decrease
        } else {
            PacingAction::Hold
        }
    }

    fn learn(&mut self, _batch: &[Experience]) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "observations": self.observations })
    }

    fn name(&self) -> &'static str {
        "proportional"
    }
}
