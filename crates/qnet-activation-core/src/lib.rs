//! QNet node activation core.
//!
//! Deterministic phase detection and pricing for both payment regimes, activation credential
//! validation, and the orchestration that drives one payment, credential issuance and
//! registration per attempt. All I/O happens behind the collaborator traits.

#![deny(unsafe_code)]

pub mod clock;
pub mod code;
pub mod config;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod ledger;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod phase;
pub mod pricing;
pub mod types;

pub use clock::{Clock, ManualClock, TokioClock};
pub use code::{CodeValidator, GrammarViolation, ParseError, ParsedCode};
pub use config::{ConfirmationPolicy, OrchestratorConfig, PhaseConfig, PreflightConfig};
pub use error::{
    ActivationError, ActivationErrorKind, ActivationStep, GatewayError, LedgerError, PaymentState,
};
pub use flow::{ActivationStatus, ActivationStatusMachine, Observation, StatusTransitionError};
pub use gateway::{
    BridgeErrorCode, BridgeGateway, BridgeHealth, BridgePricing, BridgeResponse, BurnVerification,
    NodeClassOffer, NodeRequirements, StatusSnapshot, StatusSource, TokenGrant,
};
pub use ledger::{PoolLedger, SourceLedger};
pub use monitor::{ActivationMonitor, MonitorSchedule, StatusReport};
pub use network::{NetworkStateSource, TargetNetwork};
pub use orchestrator::{ActivationEvent, ActivationOrchestrator, ActivationResult, Collaborators};
pub use phase::{PhaseDetector, PhaseLatch, PhaseReason, PhaseResolution, PhaseRules};
pub use pricing::{BurnPriceSchedule, PoolPriceSchedule, PricingEngine, SizeStep};
pub use types::{
    age_years_between, ActivationCredential, BurnFraction, BurnProof, Currency, NetworkPhaseState,
    NodeClass, NodeRegistration, PayerContext, PaymentReceipt, Phase, PoolPayment, PricingQuote,
    ResumePoint,
};
