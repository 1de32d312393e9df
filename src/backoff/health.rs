use crate::backoff::{DomainHealth, PacingOutcome};
use std::collections::VecDeque;

/// Sliding window over the most recent outcomes of a domain
#[derive(Debug, Clone)]
pub struct HealthWindow {
    outcomes: VecDeque<PacingOutcome>,
    capacity: usize,
}

impl HealthWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuilds a window from persisted outcomes, keeping the newest ones
    pub fn from_outcomes(capacity: usize, outcomes: Vec<PacingOutcome>) -> Self {
        let mut window = Self::new(capacity);
        for outcome in outcomes {
            window.push(outcome);
        }
        window
    }

    pub fn push(&mut self, outcome: PacingOutcome) {
        if self.outcomes.len() >= self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> Vec<PacingOutcome> {
        self.outcomes.iter().copied().collect()
    }

    /// Health ratios of the window paired with the given multiplier
    pub fn health(&self, current_multiplier: f64) -> DomainHealth {
        if self.outcomes.is_empty() {
            return DomainHealth {
                low_quality_ratio: 0.0,
                failure_ratio: 0.0,
                current_multiplier,
            };
        }

        let total = self.outcomes.len() as f64;
        let failures = self.outcomes.iter().filter(|o| o.is_failure()).count() as f64;
        let low_quality = self
            .outcomes
            .iter()
            .filter(|o| **o == PacingOutcome::LowQuality)
            .count() as f64;

        DomainHealth {
            low_quality_ratio: low_quality / total,
            failure_ratio: failures / total,
            current_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_is_healthy() {
        let window = HealthWindow::new(5);
        let health = window.health(1.0);
        assert_eq!(health.failure_ratio, 0.0);
        assert_eq!(health.low_quality_ratio, 0.0);
        assert_eq!(health.current_multiplier, 1.0);
    }

    #[test]
    fn test_ratios_over_window() {
        let mut window = HealthWindow::new(4);
        window.push(PacingOutcome::Success);
        window.push(PacingOutcome::Blocked);
        window.push(PacingOutcome::RetryableFailure);
        window.push(PacingOutcome::LowQuality);

        let health = window.health(1.2);
        assert_eq!(health.failure_ratio, 0.5);
        assert_eq!(health.low_quality_ratio, 0.25);
        assert_eq!(health.current_multiplier, 1.2);
    }

    #[test]
    fn test_oldest_outcomes_evicted() {
        let mut window = HealthWindow::new(2);
        window.push(PacingOutcome::Blocked);
        window.push(PacingOutcome::Success);
        window.push(PacingOutcome::Success);

        assert_eq!(window.len(), 2);
        assert_eq!(window.health(1.0).failure_ratio, 0.0);

        let restored = HealthWindow::from_outcomes(
            2,
            vec![
                PacingOutcome::Blocked,
                PacingOutcome::Blocked,
                PacingOutcome::Success,
            ],
        );
        assert_eq!(
            restored.outcomes(),
            vec![PacingOutcome::Blocked, PacingOutcome::Success]
        );
    }
}
