//! Deterministic activation pricing for both payment regimes.
//!
//! Phase 1 is a burn-progress step function shared by every node class. Phase 2 scales a
//! per-class base amount by a network-size multiplier table. Both paths use integer
//! arithmetic only, so identical inputs always produce identical quotes.

use crate::types::{BurnFraction, NetworkPhaseState, NodeClass, Phase, PricingQuote};
use serde::{Deserialize, Serialize};

/// Phase-1 burn price schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnPriceSchedule {
    pub base: u64,
    pub floor: u64,
    /// Reduction applied per full ten percent of supply burned.
    pub reduction_per_tier: u64,
}

impl Default for BurnPriceSchedule {
    fn default() -> Self {
        Self {
            base: 1_500,
            floor: 150,
            reduction_per_tier: 150,
        }
    }
}

/// Multiplier applied for networks smaller than `below` nodes, as `numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeStep {
    pub below: u64,
    pub numerator: u64,
    pub denominator: u64,
}

/// Phase-2 pool price schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPriceSchedule {
    pub light_base: u64,
    pub full_base: u64,
    pub super_base: u64,
    /// Ascending by `below`; sizes past the last step use `top_multiplier`.
    pub size_steps: Vec<SizeStep>,
    pub top_multiplier: (u64, u64),
}

impl Default for PoolPriceSchedule {
    fn default() -> Self {
        Self {
            light_base: 5_000,
            full_base: 7_500,
            super_base: 10_000,
            size_steps: vec![
                SizeStep {
                    below: 100_000,
                    numerator: 1,
                    denominator: 2,
                },
                SizeStep {
                    below: 1_000_000,
                    numerator: 1,
                    denominator: 1,
                },
                SizeStep {
                    below: 10_000_000,
                    numerator: 2,
                    denominator: 1,
                },
            ],
            top_multiplier: (3, 1),
        }
    }
}

impl PoolPriceSchedule {
    pub fn base_for(&self, node_class: NodeClass) -> u64 {
        match node_class {
            NodeClass::Light => self.light_base,
            NodeClass::Full => self.full_base,
            NodeClass::Super => self.super_base,
        }
    }

    /// `(numerator, denominator)` for the given active node count.
    pub fn multiplier_for(&self, network_size: u64) -> (u64, u64) {
        self.size_steps
            .iter()
            .find(|step| network_size < step.below)
            .map(|step| (step.numerator, step.denominator))
            .unwrap_or(self.top_multiplier)
    }

    fn lowest_multiplier(&self) -> (u64, u64) {
        self.size_steps
            .iter()
            .map(|step| (step.numerator, step.denominator))
            .chain(std::iter::once(self.top_multiplier))
            .min_by(|a, b| (a.0 * b.1).cmp(&(b.0 * a.1)))
            .unwrap_or(self.top_multiplier)
    }
}

/// Pure pricing function over a phase-state observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingEngine {
    #[serde(default)]
    pub burn: BurnPriceSchedule,
    #[serde(default)]
    pub pool: PoolPriceSchedule,
}

impl PricingEngine {
    pub fn new(burn: BurnPriceSchedule, pool: PoolPriceSchedule) -> Self {
        Self { burn, pool }
    }

    /// Quote `node_class` under `phase`. Never fails; Phase 1 clamps to the floor.
    pub fn quote(
        &self,
        node_class: NodeClass,
        phase: Phase,
        state: &NetworkPhaseState,
    ) -> PricingQuote {
        let (amount, base_amount, floor_amount) = match phase {
            Phase::One => (
                self.burn_price(state.burned_fraction),
                self.burn.base,
                self.burn.floor,
            ),
            Phase::Two => {
                let base = self.pool.base_for(node_class);
                (
                    self.pool_price(node_class, state.network_size),
                    base,
                    scale_half_up(base, self.pool.lowest_multiplier()),
                )
            }
        };

        PricingQuote {
            node_class,
            phase,
            amount,
            currency: phase.currency(),
            base_amount,
            floor_amount,
            computed_at: state.observed_at,
        }
    }

    /// `max(floor, base - floor(pct / 10) * reduction)`.
    pub fn burn_price(&self, burned: BurnFraction) -> u64 {
        let tiers = u64::from(burned.whole_percent() / 10);
        self.burn
            .base
            .saturating_sub(tiers.saturating_mul(self.burn.reduction_per_tier))
            .max(self.burn.floor)
    }

    /// `round(base[class] * multiplier(network_size))`.
    pub fn pool_price(&self, node_class: NodeClass, network_size: u64) -> u64 {
        scale_half_up(
            self.pool.base_for(node_class),
            self.pool.multiplier_for(network_size),
        )
    }
}

fn scale_half_up(amount: u64, (numerator, denominator): (u64, u64)) -> u64 {
    if denominator == 0 {
        return amount;
    }
    let scaled = u128::from(amount) * u128::from(numerator) + u128::from(denominator / 2);
    u64::try_from(scaled / u128::from(denominator)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use chrono::Utc;
    use proptest::prelude::*;

    fn state(burned: f64, network_size: u64) -> NetworkPhaseState {
        NetworkPhaseState::new(BurnFraction::from_f64(burned), 0.0, network_size, Utc::now())
    }

    #[test]
    fn quarter_burned_light_costs_twelve_hundred() {
        let quote = PricingEngine::default().quote(NodeClass::Light, Phase::One, &state(0.25, 0));
        assert_eq!(quote.amount, 1_200);
        assert_eq!(quote.currency, Currency::SourceToken);
        assert_eq!(quote.base_amount, 1_500);
        assert_eq!(quote.floor_amount, 150);
    }

    #[test]
    fn full_node_in_mid_sized_network_costs_base() {
        let quote = PricingEngine::default().quote(NodeClass::Full, Phase::Two, &state(0.0, 500_000));
        assert_eq!(quote.amount, 7_500);
        assert_eq!(quote.currency, Currency::NativeToken);
        assert_eq!(quote.base_amount, 7_500);
        assert_eq!(quote.floor_amount, 3_750);
    }

    #[test]
    fn burn_price_steps_per_full_tier() {
        let engine = PricingEngine::default();
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.0)), 1_500);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.099)), 1_500);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.0999996)), 1_500);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.10)), 1_350);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.30)), 1_050);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.899)), 300);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.8999996)), 300);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.90)), 150);
        assert_eq!(engine.burn_price(BurnFraction::from_f64(0.95)), 150);
    }

    #[test]
    fn fully_burned_supply_hits_floor_for_every_class() {
        let engine = PricingEngine::default();
        for class in NodeClass::ALL {
            assert_eq!(engine.quote(class, Phase::One, &state(1.0, 0)).amount, 150);
        }
    }

    #[test]
    fn pool_multiplier_table_boundaries() {
        let engine = PricingEngine::default();
        assert_eq!(engine.pool_price(NodeClass::Light, 0), 2_500);
        assert_eq!(engine.pool_price(NodeClass::Light, 99_999), 2_500);
        assert_eq!(engine.pool_price(NodeClass::Light, 100_000), 5_000);
        assert_eq!(engine.pool_price(NodeClass::Super, 999_999), 10_000);
        assert_eq!(engine.pool_price(NodeClass::Super, 1_000_000), 20_000);
        assert_eq!(engine.pool_price(NodeClass::Full, 9_999_999), 15_000);
        assert_eq!(engine.pool_price(NodeClass::Full, 10_000_000), 22_500);
        assert_eq!(engine.pool_price(NodeClass::Super, u64::MAX), 30_000);
    }

    #[test]
    fn quote_timestamp_comes_from_observation() {
        let observed = state(0.5, 10);
        let quote = PricingEngine::default().quote(NodeClass::Super, Phase::One, &observed);
        assert_eq!(quote.computed_at, observed.observed_at);
    }

    proptest! {
        #[test]
        fn burn_price_is_non_increasing_and_floored(a in 0u32..=1_000_000, b in 0u32..=1_000_000) {
            let engine = PricingEngine::default();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let cheaper = engine.burn_price(BurnFraction::from_ppm(high));
            let dearer = engine.burn_price(BurnFraction::from_ppm(low));
            prop_assert!(cheaper <= dearer);
            prop_assert!(cheaper >= 150);
        }

        #[test]
        fn phase_one_quote_stays_between_floor_and_base(ppm in 0u32..=1_000_000, class_idx in 0usize..3) {
            let engine = PricingEngine::default();
            let observed = NetworkPhaseState::new(BurnFraction::from_ppm(ppm), 0.0, 0, Utc::now());
            let quote = engine.quote(NodeClass::ALL[class_idx], Phase::One, &observed);
            prop_assert!(quote.floor_amount <= quote.amount);
            prop_assert!(quote.amount <= quote.base_amount);
        }
    }
}
