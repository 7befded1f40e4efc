//! Gold reward calculation.
//!
//! Pure: the same inputs always produce the same reward.
//!
//! - Base reward is the planned duration times a per-minute rate
//!   (standing tasks earn the higher rate).
//! - A start verification timeout deducts a percentage of the base.
//! - A finish verification timeout forfeits the whole reward and dominates
//!   the start penalty.

use serde::{Deserialize, Serialize};

use crate::task::{Posture, Task};

pub const DEFAULT_GOLD_PER_MINUTE: u32 = 10;
pub const DEFAULT_STANDING_GOLD_PER_MINUTE: u32 = 15;
pub const DEFAULT_START_TIMEOUT_PENALTY_PCT: u8 = 30;

/// Why the final reward differs from the base (or doesn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardReason {
    OnTime,
    StartTimeout,
    FinishTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub base: u32,
    pub penalty: u32,
    pub final_gold: u32,
    /// Informational; the base is computed from the planned duration.
    pub actual_elapsed_minutes: u32,
    pub reason: RewardReason,
}

/// Rates and penalty used by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    pub gold_per_minute: u32,
    pub standing_gold_per_minute: u32,
    /// Percentage of the base deducted on start timeout (0-100)
    pub start_timeout_penalty_pct: u8,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            gold_per_minute: DEFAULT_GOLD_PER_MINUTE,
            standing_gold_per_minute: DEFAULT_STANDING_GOLD_PER_MINUTE,
            start_timeout_penalty_pct: DEFAULT_START_TIMEOUT_PENALTY_PCT,
        }
    }
}

impl RewardPolicy {
    pub fn rate(&self, posture: Posture) -> u32 {
        match posture {
            Posture::Sitting => self.gold_per_minute,
            Posture::Standing => self.standing_gold_per_minute,
        }
    }

    pub fn base_reward(&self, duration_minutes: u32, posture: Posture) -> u32 {
        duration_minutes.saturating_mul(self.rate(posture))
    }

    pub fn breakdown(
        &self,
        duration_minutes: u32,
        actual_elapsed_minutes: u32,
        posture: Posture,
        start_timed_out: bool,
        finish_timed_out: bool,
    ) -> RewardBreakdown {
        let base = self.base_reward(duration_minutes, posture);
        let (final_gold, reason) = if finish_timed_out {
            (0, RewardReason::FinishTimeout)
        } else if start_timed_out {
            let keep = u64::from(100 - self.start_timeout_penalty_pct.min(100));
            // Round half up.
            let kept = (u64::from(base) * keep + 50) / 100;
            (u32::try_from(kept).unwrap_or(base), RewardReason::StartTimeout)
        } else {
            (base, RewardReason::OnTime)
        };
        RewardBreakdown {
            base,
            penalty: base - final_gold,
            final_gold,
            actual_elapsed_minutes,
            reason,
        }
    }

    /// Final gold for a sitting task.
    pub fn compute(
        &self,
        duration_minutes: u32,
        actual_elapsed_minutes: u32,
        start_timed_out: bool,
        finish_timed_out: bool,
    ) -> u32 {
        self.breakdown(
            duration_minutes,
            actual_elapsed_minutes,
            Posture::Sitting,
            start_timed_out,
            finish_timed_out,
        )
        .final_gold
    }

    /// Breakdown for a finished task using its recorded flags and times.
    pub fn for_task(&self, task: &Task) -> RewardBreakdown {
        self.breakdown(
            task.duration_minutes,
            task.actual_elapsed_minutes(),
            task.posture,
            task.start_timed_out,
            task.finish_timed_out,
        )
    }
}

/// Final gold under the default policy.
pub fn compute_reward(
    duration_minutes: u32,
    actual_elapsed_minutes: u32,
    start_timed_out: bool,
    finish_timed_out: bool,
) -> u32 {
    RewardPolicy::default().compute(
        duration_minutes,
        actual_elapsed_minutes,
        start_timed_out,
        finish_timed_out,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn on_time_pays_full_base() {
        assert_eq!(compute_reward(25, 25, false, false), 250);
    }

    #[test]
    fn start_timeout_deducts_thirty_percent() {
        let b = RewardPolicy::default().breakdown(20, 18, Posture::Sitting, true, false);
        assert_eq!(b.base, 200);
        assert_eq!(b.final_gold, 140);
        assert_eq!(b.penalty, 60);
        assert_eq!(b.reason, RewardReason::StartTimeout);
    }

    #[test]
    fn finish_timeout_dominates() {
        let b = RewardPolicy::default().breakdown(20, 40, Posture::Standing, true, true);
        assert_eq!(b.base, 300);
        assert_eq!(b.final_gold, 0);
        assert_eq!(b.penalty, 300);
        assert_eq!(b.reason, RewardReason::FinishTimeout);
    }

    #[test]
    fn standing_rate_applies() {
        let policy = RewardPolicy::default();
        assert_eq!(policy.base_reward(10, Posture::Standing), 150);
        assert_eq!(policy.base_reward(10, Posture::Sitting), 100);
    }

    #[test]
    fn penalty_above_hundred_is_clamped() {
        let policy = RewardPolicy {
            start_timeout_penalty_pct: 250,
            ..RewardPolicy::default()
        };
        assert_eq!(policy.compute(10, 10, true, false), 0);
    }

    #[test]
    fn half_values_round_up() {
        // 5 min * 10 = 50 base, 70% = 35 exactly; 1 min * 5 = 5, 70% = 3.5 -> 4
        let policy = RewardPolicy {
            gold_per_minute: 5,
            ..RewardPolicy::default()
        };
        assert_eq!(policy.compute(1, 1, true, false), 4);
        assert_eq!(compute_reward(5, 5, true, false), 35);
    }

    proptest! {
        #[test]
        fn finish_timeout_always_zero(duration in 1u32..100_000, elapsed in 0u32..100_000, start in any::<bool>()) {
            prop_assert_eq!(compute_reward(duration, elapsed, start, true), 0);
        }

        #[test]
        fn start_timeout_keeps_seventy_percent(duration in 1u32..100_000, elapsed in 0u32..100_000) {
            let base = u64::from(duration) * u64::from(DEFAULT_GOLD_PER_MINUTE);
            // round(0.7 * base), half up, in integers
            let expected = (base * 7 + 5) / 10;
            prop_assert_eq!(u64::from(compute_reward(duration, elapsed, true, false)), expected);
        }

        #[test]
        fn reward_never_exceeds_base(duration in 1u32..100_000, start in any::<bool>(), finish in any::<bool>()) {
            let policy = RewardPolicy::default();
            let b = policy.breakdown(duration, duration, Posture::Sitting, start, finish);
            prop_assert!(b.final_gold <= b.base);
            prop_assert_eq!(b.base - b.penalty, b.final_gold);
        }
    }
}
