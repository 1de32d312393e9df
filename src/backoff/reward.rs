use crate::backoff::{DomainHealth, PacingAction, PacingOutcome};

/// Turns an observed outcome into a reward for the action that preceded it
pub trait RewardShaper: Send + Sync {
    fn reward(
        &self,
        action: PacingAction,
        outcome: PacingOutcome,
        before: &DomainHealth,
        after: &DomainHealth,
    ) -> f64;
}

/// Outcome quality plus a pacing term
///
/// Slowing down is rewarded while the domain fails; speeding up is rewarded
/// while it succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRewardShaper;

impl DefaultRewardShaper {
    fn quality(outcome: PacingOutcome) -> f64 {
        match outcome {
            PacingOutcome::Success => 1.0,
            PacingOutcome::LowQuality => 0.3,
            PacingOutcome::RetryableFailure => -0.5,
            PacingOutcome::Blocked => -1.0,
        }
    }
}

impl RewardShaper for DefaultRewardShaper {
    fn reward(
        &self,
        action: PacingAction,
        outcome: PacingOutcome,
        _before: &DomainHealth,
        _after: &DomainHealth,
    ) -> f64 {
        let quality = Self::quality(outcome);

        let pacing = if quality < 0.0 {
            match action {
                PacingAction::Increase => 1.5,
                PacingAction::Hold => 0.0,
                PacingAction::Decrease => -0.5,
            }
        } else {
            match action {
                PacingAction::Decrease => 0.2,
                PacingAction::Hold => 0.0,
                PacingAction::Increase => -0.2,
            }
        };

        quality + pacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> DomainHealth {
        DomainHealth {
            low_quality_ratio: 0.0,
            failure_ratio: 0.0,
            current_multiplier: 1.0,
        }
    }

    fn reward(action: PacingAction, outcome: PacingOutcome) -> f64 {
        DefaultRewardShaper.reward(action, outcome, &health(), &health())
    }

    #[test]
    fn test_slowing_down_pays_under_failure() {
        assert!(reward(PacingAction::Increase, PacingOutcome::Blocked) > 0.0);
        assert!(
            reward(PacingAction::Increase, PacingOutcome::RetryableFailure)
                > reward(PacingAction::Hold, PacingOutcome::RetryableFailure)
        );
        assert!(reward(PacingAction::Decrease, PacingOutcome::Blocked) < -1.0);
    }

    #[test]
    fn test_speeding_up_pays_under_success() {
        assert!(
            reward(PacingAction::Decrease, PacingOutcome::Success)
                > reward(PacingAction::Hold, PacingOutcome::Success)
        );
        assert!(
            reward(PacingAction::Hold, PacingOutcome::Success)
                > reward(PacingAction::Increase, PacingOutcome::Success)
        );
        assert!(reward(PacingAction::Hold, PacingOutcome::LowQuality) > 0.0);
    }
}
