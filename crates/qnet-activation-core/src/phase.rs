//! Payment-regime detection.
//!
//! Phase 2 holds once enough of the source-token supply has been burned or the network
//! is old enough; the transition is one-way. An explicit override short-circuits the rule
//! and is reported as such so callers can log it instead of trusting it silently.

use crate::types::{BurnFraction, NetworkPhaseState, Phase};
use serde::{Deserialize, Serialize};

/// Thresholds that move the network into Phase 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRules {
    /// Burned share at or above which Phase 2 holds.
    #[serde(default = "default_burn_threshold")]
    pub burn_threshold: BurnFraction,
    /// Network age in years at or above which Phase 2 holds.
    #[serde(default = "default_max_phase_one_years")]
    pub max_phase_one_years: f64,
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self {
            burn_threshold: default_burn_threshold(),
            max_phase_one_years: default_max_phase_one_years(),
        }
    }
}

fn default_burn_threshold() -> BurnFraction {
    BurnFraction::from_ppm(900_000)
}

fn default_max_phase_one_years() -> f64 {
    5.0
}

/// Why a phase was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseReason {
    BelowThresholds,
    BurnThreshold,
    NetworkAge,
    BurnThresholdAndNetworkAge,
    ExplicitOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResolution {
    pub phase: Phase,
    pub reason: PhaseReason,
}

impl PhaseResolution {
    pub fn is_override(&self) -> bool {
        self.reason == PhaseReason::ExplicitOverride
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseDetector {
    pub rules: PhaseRules,
}

impl PhaseDetector {
    pub fn new(rules: PhaseRules) -> Self {
        Self { rules }
    }

    pub fn resolve_phase(&self, state: &NetworkPhaseState) -> Phase {
        self.resolve(state).phase
    }

    pub fn resolve(&self, state: &NetworkPhaseState) -> PhaseResolution {
        if let Some(phase) = state.explicit_phase_override {
            return PhaseResolution {
                phase,
                reason: PhaseReason::ExplicitOverride,
            };
        }

        let burned = state.burned_fraction >= self.rules.burn_threshold;
        let aged = state.network_age_years >= self.rules.max_phase_one_years;
        let (phase, reason) = match (burned, aged) {
            (true, true) => (Phase::Two, PhaseReason::BurnThresholdAndNetworkAge),
            (true, false) => (Phase::Two, PhaseReason::BurnThreshold),
            (false, true) => (Phase::Two, PhaseReason::NetworkAge),
            (false, false) => (Phase::One, PhaseReason::BelowThresholds),
        };

        PhaseResolution { phase, reason }
    }
}

/// Per-attempt phase view that never returns to Phase 1 once Phase 2 was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseLatch {
    observed_phase_two: bool,
}

impl PhaseLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `phase` and returns the effective phase for burn decisions.
    pub fn observe(&mut self, phase: Phase) -> Phase {
        if phase == Phase::Two {
            self.observed_phase_two = true;
        }
        self.effective(phase)
    }

    pub fn effective(&self, phase: Phase) -> Phase {
        if self.observed_phase_two {
            Phase::Two
        } else {
            phase
        }
    }

    pub fn observed_phase_two(&self) -> bool {
        self.observed_phase_two
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn state(burned: f64, age: f64) -> NetworkPhaseState {
        NetworkPhaseState::new(BurnFraction::from_f64(burned), age, 0, Utc::now())
    }

    #[test]
    fn boundary_observations() {
        let detector = PhaseDetector::default();
        assert_eq!(detector.resolve_phase(&state(0.90, 0.0)), Phase::Two);
        assert_eq!(detector.resolve_phase(&state(0.89, 4.99)), Phase::One);
        assert_eq!(detector.resolve_phase(&state(0.0, 5.0)), Phase::Two);
        assert_eq!(detector.resolve_phase(&state(0.8999996, 0.0)), Phase::One);
    }

    #[test]
    fn reports_which_threshold_fired() {
        let detector = PhaseDetector::default();
        assert_eq!(
            detector.resolve(&state(0.95, 6.0)).reason,
            PhaseReason::BurnThresholdAndNetworkAge
        );
        assert_eq!(detector.resolve(&state(0.2, 7.0)).reason, PhaseReason::NetworkAge);
        assert_eq!(detector.resolve(&state(0.1, 1.0)).reason, PhaseReason::BelowThresholds);
    }

    #[test]
    fn override_short_circuits_rule() {
        let detector = PhaseDetector::default();
        let resolution = detector.resolve(&state(0.99, 9.0).with_override(Phase::One));
        assert_eq!(resolution.phase, Phase::One);
        assert!(resolution.is_override());
    }

    #[test]
    fn latch_holds_phase_two() {
        let mut latch = PhaseLatch::new();
        assert_eq!(latch.observe(Phase::One), Phase::One);
        assert_eq!(latch.observe(Phase::Two), Phase::Two);
        assert_eq!(latch.observe(Phase::One), Phase::Two);
        assert!(latch.observed_phase_two());
    }

    proptest! {
        #[test]
        fn resolution_depends_only_on_burn_and_age(ppm in 0u32..=1_000_000, age in 0.0f64..20.0, size in any::<u64>()) {
            let detector = PhaseDetector::default();
            let a = NetworkPhaseState::new(BurnFraction::from_ppm(ppm), age, size, Utc::now());
            let b = NetworkPhaseState::new(BurnFraction::from_ppm(ppm), age, 0, Utc::now());
            prop_assert_eq!(detector.resolve_phase(&a), detector.resolve_phase(&b));
            let expected = if ppm >= 900_000 || age >= 5.0 { Phase::Two } else { Phase::One };
            prop_assert_eq!(detector.resolve_phase(&a), expected);
        }
    }
}
