use crate::backoff::health::HealthWindow;
use crate::backoff::policy::{DefaultPolicyFactory, Experience, PacingPolicy, PolicyFactory};
use crate::backoff::reward::{DefaultRewardShaper, RewardShaper};
use crate::backoff::{
    BackoffError, DomainHealth, PacingAction, PacingOutcome, PacingStats, SnapshotStore,
};
use crate::config::BackoffConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted form of a domain's pacing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSnapshot {
    pub multiplier: f64,
    pub window: Vec<PacingOutcome>,
    pub stats: PacingStats,
    pub policy: serde_json::Value,
}

impl PacingSnapshot {
    pub fn decode(json: &str) -> Result<Self, BackoffError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn encode(&self) -> Result<String, BackoffError> {
        Ok(serde_json::to_string(self)?)
    }
}

struct DomainPacing {
    multiplier: f64,
    window: HealthWindow,
    pending: Option<(DomainHealth, PacingAction)>,
    buffer: Vec<Experience>,
    policy: Box<dyn PacingPolicy>,
    stats: PacingStats,
}

impl DomainPacing {
    fn snapshot(&self) -> PacingSnapshot {
        PacingSnapshot {
            multiplier: self.multiplier,
            window: self.window.outcomes(),
            stats: self.stats.clone(),
            policy: self.policy.snapshot(),
        }
    }
}

/// Per-domain adaptive pacing controller
///
/// Domains are independent: each has its own lock, so observations for
/// different domains never contend.
pub struct BackoffController {
    config: BackoffConfig,
    domains: DashMap<String, Arc<Mutex<DomainPacing>>>,
    factory: Arc<dyn PolicyFactory>,
    shaper: Arc<dyn RewardShaper>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl BackoffController {
    pub fn new(config: BackoffConfig) -> Self {
        let factory = Arc::new(DefaultPolicyFactory::new(config.clone()));
        Self {
            config,
            domains: DashMap::new(),
            factory,
            shaper: Arc::new(DefaultRewardShaper),
            store: None,
        }
    }

    pub fn with_policy_factory(mut self, factory: Arc<dyn PolicyFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_reward_shaper(mut self, shaper: Arc<dyn RewardShaper>) -> Self {
        self.shaper = shaper;
        self
    }

    /// Persists snapshots on every learning step and restores them lazily
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn fresh_domain(&self) -> DomainPacing {
        DomainPacing {
            multiplier: self.config.clamp(1.0),
            window: HealthWindow::new(self.config.health_window),
            pending: None,
            buffer: Vec::with_capacity(self.config.batch_size),
            policy: self.factory.create(),
            stats: PacingStats::default(),
        }
    }

    fn restore_domain(&self, domain: &str, store: &dyn SnapshotStore) -> Result<Option<DomainPacing>, BackoffError> {
        let Some(json) = store.load_snapshot(domain)? else {
            return Ok(None);
        };

        let snapshot = PacingSnapshot::decode(&json)?;
        let policy = self.factory.restore(&snapshot.policy)?;

        Ok(Some(DomainPacing {
            multiplier: self.config.clamp(snapshot.multiplier),
            window: HealthWindow::from_outcomes(self.config.health_window, snapshot.window),
            pending: None,
            buffer: Vec::with_capacity(self.config.batch_size),
            policy,
            stats: snapshot.stats,
        }))
    }

    fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainPacing>> {
        if let Some(existing) = self.domains.get(domain) {
            return Arc::clone(existing.value());
        }

        let state = match &self.store {
            Some(store) => match self.restore_domain(domain, store.as_ref()) {
                Ok(Some(restored)) => {
                    tracing::debug!(
                        "Restored pacing state for {} (multiplier {:.2})",
                        domain,
                        restored.multiplier
                    );
                    restored
                }
                Ok(None) => self.fresh_domain(),
                Err(e) => {
                    tracing::warn!("Discarding pacing snapshot for {}: {}", domain, e);
                    self.fresh_domain()
                }
            },
            None => self.fresh_domain(),
        };

        Arc::clone(
            self.domains
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(state)))
                .value(),
        )
    }

    /// Feeds one outcome back into the domain's controller
    ///
    /// Returns the new multiplier, always inside the configured bounds.
    pub fn observe(&self, domain: &str, outcome: PacingOutcome) -> f64 {
        let state = self.domain_state(domain);
        let mut pacing = state.lock();

        let before = pacing.window.health(pacing.multiplier);
        pacing.window.push(outcome);
        let after = pacing.window.health(pacing.multiplier);

        if let Some((previous_state, action)) = pacing.pending.take() {
            let reward = self.shaper.reward(action, outcome, &before, &after);
            pacing.buffer.push(Experience {
                state: previous_state,
                action,
                reward,
                next_state: after,
            });
        }

        if pacing.buffer.len() >= self.config.batch_size {
            let batch = std::mem::take(&mut pacing.buffer);
            pacing.policy.learn(&batch);
            pacing.stats.learning_steps += 1;
            tracing::debug!(
                "Pacing policy for {} learned from {} experiences (step {})",
                domain,
                batch.len(),
                pacing.stats.learning_steps
            );
            self.persist_domain(domain, &pacing);
        }

        let action = if self.config.escalate_on_block && outcome == PacingOutcome::Blocked {
            PacingAction::Increase
        } else {
            pacing.policy.choose(&after)
        };

        let previous = pacing.multiplier;
        pacing.multiplier = self.config.clamp(previous * action.factor());
        pacing.stats.record(action);

        let applied = DomainHealth {
            current_multiplier: pacing.multiplier,
            ..after
        };
        pacing.pending = Some((applied, action));

        if action != PacingAction::Hold {
            tracing::trace!(
                "Pacing {} for {}: {:.2} -> {:.2} after {:?}",
                action,
                domain,
                previous,
                pacing.multiplier,
                outcome
            );
        }

        pacing.multiplier
    }

    fn persist_domain(&self, domain: &str, pacing: &DomainPacing) {
        let Some(store) = &self.store else {
            return;
        };

        let result = pacing
            .snapshot()
            .encode()
            .and_then(|json| store.save_snapshot(domain, &json).map_err(BackoffError::from));
        if let Err(e) = result {
            tracing::warn!("Failed to persist pacing state for {}: {}", domain, e);
        }
    }

    /// Current multiplier of a domain; unknown domains get the neutral pace
    pub fn pacing_multiplier(&self, domain: &str) -> f64 {
        match self.domains.get(domain) {
            Some(state) => state.lock().multiplier,
            None => self.config.clamp(1.0),
        }
    }

    pub fn health(&self, domain: &str) -> Option<DomainHealth> {
        let state = self.domains.get(domain).map(|s| Arc::clone(s.value()))?;
        let pacing = state.lock();
        Some(pacing.window.health(pacing.multiplier))
    }

    pub fn stats(&self, domain: &str) -> Option<PacingStats> {
        let state = self.domains.get(domain).map(|s| Arc::clone(s.value()))?;
        let stats = state.lock().stats.clone();
        Some(stats)
    }

    /// Domains observed so far, sorted
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Writes every domain's snapshot to the store
    ///
    /// Returns the number of domains written; zero without a store.
    pub fn persist_all(&self) -> Result<usize, BackoffError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let states: Vec<(String, Arc<Mutex<DomainPacing>>)> = self
            .domains
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (domain, state) in &states {
            let json = state.lock().snapshot().encode()?;
            store.save_snapshot(domain, &json)?;
        }

        Ok(states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageResult;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore {
        snapshots: Mutex<HashMap<String, String>>,
    }

    impl SnapshotStore for MapStore {
        fn load_snapshot(&self, domain: &str) -> StorageResult<Option<String>> {
            Ok(self.snapshots.lock().get(domain).cloned())
        }

        fn save_snapshot(&self, domain: &str, snapshot: &str) -> StorageResult<()> {
            self.snapshots
                .lock()
                .insert(domain.to_string(), snapshot.to_string());
            Ok(())
        }
    }

    fn config() -> BackoffConfig {
        BackoffConfig {
            exploration_rate: 0.0,
            batch_size: 8,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_unknown_domain_is_neutral() {
        let controller = BackoffController::new(config());
        assert_eq!(controller.pacing_multiplier("example.com"), 1.0);
        assert!(controller.health("example.com").is_none());
        assert!(controller.stats("example.com").is_none());

        let narrow = BackoffController::new(BackoffConfig {
            min_multiplier: 1.0,
            max_multiplier: 1.0,
            ..config()
        });
        assert_eq!(narrow.pacing_multiplier("example.com"), 1.0);
    }

    #[test]
    fn test_block_escalates() {
        let controller = BackoffController::new(config());

        let multiplier = controller.observe("example.com", PacingOutcome::Blocked);
        assert!((multiplier - 1.2).abs() < 1e-9);

        let stats = controller.stats("example.com").unwrap();
        assert_eq!(stats.increases, 1);
        assert_eq!(stats.observations, 1);
    }

    #[test]
    fn test_sustained_failures_slow_domain_down() {
        let controller = BackoffController::new(config());

        for _ in 0..40 {
            controller.observe("flaky.com", PacingOutcome::RetryableFailure);
        }

        assert!(controller.pacing_multiplier("flaky.com") > 1.0);
        let stats = controller.stats("flaky.com").unwrap();
        assert!(stats.learning_steps >= 1);
        assert!(stats.increases >= 1);
        assert_eq!(controller.health("flaky.com").unwrap().failure_ratio, 1.0);
    }

    #[test]
    fn test_multiplier_stays_in_bounds() {
        let controller = BackoffController::new(config());

        for _ in 0..100 {
            let m = controller.observe("blocked.com", PacingOutcome::Blocked);
            assert!((0.5..=2.0).contains(&m));
        }
        assert_eq!(controller.pacing_multiplier("blocked.com"), 2.0);

        let controller = BackoffController::new(BackoffConfig {
            exploration_rate: 1.0,
            batch_size: 1,
            ..config()
        });
        for i in 0..200 {
            let outcome = if i % 3 == 0 {
                PacingOutcome::Success
            } else {
                PacingOutcome::RetryableFailure
            };
            let m = controller.observe("random.com", outcome);
            assert!((0.5..=2.0).contains(&m));
        }
    }

    #[test]
    fn test_domains_are_independent() {
        let controller = BackoffController::new(config());

        controller.observe("a.com", PacingOutcome::Blocked);
        controller.observe("b.com", PacingOutcome::Success);

        assert!(controller.pacing_multiplier("a.com") > 1.0);
        assert_eq!(controller.pacing_multiplier("b.com"), 1.0);
        assert_eq!(controller.domains(), vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_snapshot_persist_and_restore() {
        let store = Arc::new(MapStore::default());

        let controller = BackoffController::new(config()).with_store(store.clone());
        for _ in 0..3 {
            controller.observe("example.com", PacingOutcome::Blocked);
        }
        let expected = controller.pacing_multiplier("example.com");
        assert_eq!(controller.persist_all().unwrap(), 1);

        let restored = BackoffController::new(config()).with_store(store.clone());
        // restored lazily on the first observation
        restored.observe("example.com", PacingOutcome::Blocked);
        let stats = restored.stats("example.com").unwrap();
        assert_eq!(stats.observations, 4);
        assert!(restored.pacing_multiplier("example.com") >= expected);
    }

    #[test]
    fn test_learning_step_persists() {
        let store = Arc::new(MapStore::default());
        let controller = BackoffController::new(BackoffConfig {
            batch_size: 2,
            ..config()
        })
        .with_store(store.clone());

        controller.observe("example.com", PacingOutcome::Success);
        assert!(store.snapshots.lock().is_empty());

        controller.observe("example.com", PacingOutcome::Success);
        controller.observe("example.com", PacingOutcome::Success);
        assert!(store.snapshots.lock().contains_key("example.com"));
    }

    #[test]
    fn test_corrupt_snapshot_starts_fresh() {
        let store = Arc::new(MapStore::default());
        store
            .save_snapshot("example.com", "{not json")
            .unwrap();

        let controller = BackoffController::new(config()).with_store(store);
        controller.observe("example.com", PacingOutcome::Success);
        assert_eq!(controller.stats("example.com").unwrap().observations, 1);
    }
}
