//! Orchestrator configuration

use crate::monitor::MonitorSchedule;
use crate::phase::PhaseRules;
use crate::pricing::PricingEngine;
use crate::types::NetworkPhaseState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Tunables for one orchestrator instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Phase thresholds and override policy
    #[serde(default)]
    pub phase: PhaseConfig,

    /// Price schedules for both regimes
    #[serde(default)]
    pub pricing: PricingEngine,

    /// Credential status polling
    #[serde(default)]
    pub monitor: MonitorSchedule,

    /// Burn confirmation polling
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,

    /// Checks run before any funds move
    #[serde(default)]
    pub preflight: PreflightConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(flatten)]
    pub rules: PhaseRules,

    /// Accept `explicit_phase_override` from the state source. Test environments only.
    #[serde(default)]
    pub honor_override: bool,
}

impl PhaseConfig {
    /// Applies the override policy to a fresh observation. Any override present is logged.
    pub fn admit(&self, state: NetworkPhaseState) -> NetworkPhaseState {
        match state.explicit_phase_override {
            Some(forced) if self.honor_override => {
                warn!(phase = %forced, "honouring explicit phase override");
                state
            }
            Some(forced) => {
                warn!(phase = %forced, "ignoring explicit phase override");
                state.without_override()
            }
            None => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    /// Source-ledger confirmations required before a burn proof is presented
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,

    #[serde(default = "default_confirmation_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_confirmation_interval_ms")]
    pub interval_ms: u64,
}

impl ConfirmationPolicy {
    pub fn schedule(&self) -> MonitorSchedule {
        MonitorSchedule::new(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            min_confirmations: default_min_confirmations(),
            max_attempts: default_confirmation_attempts(),
            interval_ms: default_confirmation_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Fail with `ServiceUnavailable` unless the bridge reports both chains connected
    #[serde(default = "default_true")]
    pub require_healthy_bridge: bool,

    /// Compare the local quote with the bridge's pricing view and warn on disagreement
    #[serde(default = "default_true")]
    pub cross_check_pricing: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            require_healthy_bridge: true,
            cross_check_pricing: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_confirmations() -> u32 {
    6
}

fn default_confirmation_attempts() -> u32 {
    30
}

fn default_confirmation_interval_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BurnFraction, Phase};
    use chrono::Utc;

    #[test]
    fn empty_document_yields_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(!config.phase.honor_override);
        assert!(config.preflight.require_healthy_bridge);
        assert_eq!(config.confirmation.min_confirmations, 6);
        assert_eq!(config.pricing.burn.base, 1_500);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{
                "phase": {"burn_threshold": 0.8, "honor_override": true},
                "monitor": {"max_attempts": 3},
                "preflight": {"cross_check_pricing": false}
            }"#,
        )
        .unwrap();

        assert_eq!(config.phase.rules.burn_threshold, BurnFraction::from_ppm(800_000));
        assert_eq!(config.phase.rules.max_phase_one_years, 5.0);
        assert!(config.phase.honor_override);
        assert_eq!(config.monitor.max_attempts, 3);
        assert_eq!(config.monitor.interval_ms, 5_000);
        assert!(config.preflight.require_healthy_bridge);
        assert!(!config.preflight.cross_check_pricing);
    }

    #[test]
    fn override_is_dropped_unless_honoured() {
        let state = NetworkPhaseState::new(BurnFraction::ZERO, 0.0, 0, Utc::now())
            .with_override(Phase::Two);

        let strict = PhaseConfig::default();
        assert_eq!(strict.admit(state.clone()).explicit_phase_override, None);

        let lenient = PhaseConfig {
            honor_override: true,
            ..PhaseConfig::default()
        };
        assert_eq!(lenient.admit(state).explicit_phase_override, Some(Phase::Two));
    }
}
