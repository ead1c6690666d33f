use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource tier a node is activated into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Light,
    Full,
    Super,
}

impl NodeClass {
    pub const ALL: [NodeClass; 3] = [NodeClass::Light, NodeClass::Full, NodeClass::Super];

    pub fn name(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Full => "full",
            Self::Super => "super",
        }
    }

    /// Reserved credential character binding a code to this class.
    pub fn class_tag(self) -> char {
        match self {
            Self::Light => 'L',
            Self::Full => 'F',
            Self::Super => 'S',
        }
    }

    pub fn from_class_tag(tag: char) -> Option<Self> {
        match tag {
            'L' => Some(Self::Light),
            'F' => Some(Self::Full),
            'S' => Some(Self::Super),
            _ => None,
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "full" => Ok(Self::Full),
            "super" => Ok(Self::Super),
            other => Err(format!("unknown node class '{other}'")),
        }
    }
}

/// Active payment regime.
///
/// Phase 1 burns the capped source token on the external ledger; Phase 2 pays the native
/// token into the redistribution pool on the target network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    One,
    Two,
}

impl Phase {
    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn currency(self) -> Currency {
        match self {
            Self::One => Currency::SourceToken,
            Self::Two => Currency::NativeToken,
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("phase must be 1 or 2, got {other}")),
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {}", self.number())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Capped-supply token burned on the source ledger.
    SourceToken,
    /// Target network token paid into the redistribution pool.
    NativeToken,
}

/// Share of the source-token supply already burned, stored exactly as parts-per-million.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct BurnFraction(u32);

impl BurnFraction {
    pub const SCALE: u32 = 1_000_000;
    pub const ZERO: BurnFraction = BurnFraction(0);
    pub const ONE: BurnFraction = BurnFraction(Self::SCALE);

    pub fn from_ppm(ppm: u32) -> Self {
        Self(ppm.min(Self::SCALE))
    }

    /// Exact fraction `burned / total_supply`, clamped to `[0, 1]`.
    pub fn from_ratio(burned: u128, total_supply: u128) -> Self {
        if total_supply == 0 {
            return Self::ZERO;
        }
        let ppm = burned.min(total_supply).saturating_mul(Self::SCALE as u128) / total_supply;
        Self::from_ppm(ppm as u32)
    }

    /// Clamps to `[0, 1]`; NaN maps to zero.
    ///
    /// Truncates to whole parts-per-million so a fraction below a threshold never lands on
    /// it. The small bias absorbs binary representation error of decimal inputs like `0.29`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() || value <= 0.0 {
            return Self::ZERO;
        }
        if value >= 1.0 {
            return Self::ONE;
        }
        Self::from_ppm((value * Self::SCALE as f64 + 1e-6).floor() as u32)
    }

    pub fn ppm(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// `floor(fraction * 100)`.
    pub fn whole_percent(self) -> u32 {
        self.0 / (Self::SCALE / 100)
    }
}

impl From<f64> for BurnFraction {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<BurnFraction> for f64 {
    fn from(fraction: BurnFraction) -> Self {
        fraction.as_f64()
    }
}

impl fmt::Display for BurnFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}%", self.as_f64() * 100.0)
    }
}

/// Observation of network-wide inputs to phase and price resolution.
///
/// Fetched fresh for every decision; never cached across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPhaseState {
    pub burned_fraction: BurnFraction,
    pub network_age_years: f64,
    /// Active node count reported by the network registry.
    pub network_size: u64,
    #[serde(default)]
    pub explicit_phase_override: Option<Phase>,
    pub observed_at: DateTime<Utc>,
}

impl NetworkPhaseState {
    pub fn new(
        burned_fraction: BurnFraction,
        network_age_years: f64,
        network_size: u64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            burned_fraction,
            network_age_years: sanitize_years(network_age_years),
            network_size,
            explicit_phase_override: None,
            observed_at,
        }
    }

    pub fn with_override(mut self, phase: Phase) -> Self {
        self.explicit_phase_override = Some(phase);
        self
    }

    pub fn without_override(mut self) -> Self {
        self.explicit_phase_override = None;
        self
    }
}

fn sanitize_years(years: f64) -> f64 {
    if years.is_nan() || years < 0.0 {
        0.0
    } else {
        years
    }
}

/// Network age in years, counting 365.25 days per year.
pub fn age_years_between(genesis: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = now.signed_duration_since(genesis).num_seconds().max(0) as f64;
    seconds / (365.25 * 24.0 * 60.0 * 60.0)
}

/// Activation price for a node class under one payment regime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingQuote {
    pub node_class: NodeClass,
    pub phase: Phase,
    /// Smallest token unit of `currency`.
    pub amount: u64,
    pub currency: Currency,
    pub base_amount: u64,
    pub floor_amount: u64,
    pub computed_at: DateTime<Utc>,
}

/// Confirmed burn on the source ledger. Consumed once by the credential request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnProof {
    pub source_tx_reference: String,
    pub amount_burned: u64,
    pub burner_address: String,
    pub observed_at_source_ledger: DateTime<Utc>,
}

/// Signed, single-use activation credential issued by the verification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCredential {
    pub code: String,
    pub bound_node_class: NodeClass,
    pub issuing_authority_signature: String,
    pub expires_at: DateTime<Utc>,
}

impl ActivationCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Native-token payment committed into the redistribution pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPayment {
    pub pool_tx_reference: String,
    pub amount: u64,
    pub payer_address: String,
    pub committed_at: DateTime<Utc>,
}

/// Target network acknowledgement of a registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub network_tx_reference: String,
}

/// Caller identity for one activation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerContext {
    /// Address holding the source token (Phase 1 burner).
    pub source_address: String,
    /// Target network address that owns the node and pays in Phase 2.
    pub owner_address: String,
    /// Rail the caller intends to pay on. `None` follows the resolved phase.
    #[serde(default)]
    pub requested_phase: Option<Phase>,
}

impl PayerContext {
    pub fn new(source_address: impl Into<String>, owner_address: impl Into<String>) -> Self {
        Self {
            source_address: source_address.into(),
            owner_address: owner_address.into(),
            requested_phase: None,
        }
    }

    pub fn with_requested_phase(mut self, phase: Phase) -> Self {
        self.requested_phase = Some(phase);
        self
    }
}

/// Payment artefact backing a finished activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum PaymentReceipt {
    Burn(BurnProof),
    Pool(PoolPayment),
}

impl PaymentReceipt {
    pub fn tx_reference(&self) -> &str {
        match self {
            Self::Burn(proof) => &proof.source_tx_reference,
            Self::Pool(payment) => &payment.pool_tx_reference,
        }
    }
}

/// Artefact from which an interrupted attempt continues without paying again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumePoint {
    /// Burn confirmed on the source ledger; no credential issued yet.
    Burn(BurnProof),
    /// Credential issued; only status observation remains.
    Credential(ActivationCredential),
    /// Pool payment committed; network submission pending or rejected.
    PoolPayment(PoolPayment),
}
