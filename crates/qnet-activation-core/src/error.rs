use crate::types::{Phase, ResumePoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of activation failure kinds.
///
/// Callers match on the kind (together with [`PaymentState`]) to decide whether a retry is
/// safe; message text is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationErrorKind {
    /// Payer balance below the quoted price at commit time.
    InsufficientBalance,
    /// Requested payment rail does not match the currently resolved phase.
    PhaseMismatch,
    /// Credential failed structural validation or is bound to another class.
    MalformedCredential,
    /// Issuing authority rejected the proof or the credential.
    BridgeVerificationFailed,
    /// No terminal status within the bounded schedule. Outcome unknown.
    MonitoringTimeout,
    /// Target network rejected the Phase-2 submission after the pool payment.
    NetworkSubmissionFailed,
    /// Ledger refused the spend; nothing was committed.
    PaymentRejected,
    /// A collaborator (bridge, registry, ledger, network) could not be reached.
    ServiceUnavailable,
    /// Status source reported a transition the state machine forbids.
    InvalidStatusTransition,
    /// Observation stopped by the caller.
    Cancelled,
}

impl ActivationErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::InsufficientBalance => "insufficient_balance",
            Self::PhaseMismatch => "phase_mismatch",
            Self::MalformedCredential => "malformed_credential",
            Self::BridgeVerificationFailed => "bridge_verification_failed",
            Self::MonitoringTimeout => "monitoring_timeout",
            Self::NetworkSubmissionFailed => "network_submission_failed",
            Self::PaymentRejected => "payment_rejected",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InvalidStatusTransition => "invalid_status_transition",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ActivationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Step of an activation attempt at which a failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStep {
    ResolvePhase,
    Quote,
    Preflight,
    BalanceCheck,
    Payment,
    ConfirmBurn,
    RequestCredential,
    ValidateCredential,
    SubmitActivation,
    Monitor,
}

impl ActivationStep {
    pub fn name(self) -> &'static str {
        match self {
            Self::ResolvePhase => "resolve_phase",
            Self::Quote => "quote",
            Self::Preflight => "preflight",
            Self::BalanceCheck => "balance_check",
            Self::Payment => "payment",
            Self::ConfirmBurn => "confirm_burn",
            Self::RequestCredential => "request_credential",
            Self::ValidateCredential => "validate_credential",
            Self::SubmitActivation => "submit_activation",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ActivationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether funds left the payer when the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    NotCommitted,
    Committed,
    /// The spend call itself failed in transit; the ledger must be queried.
    Unknown,
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotCommitted => "not committed",
            Self::Committed => "committed",
            Self::Unknown => "unknown",
        })
    }
}

/// Terminal activation failure with enough structure to decide retry safety.
#[derive(Debug, Clone, Error)]
#[error("{kind} at {step} ({}, payment {payment}): {detail}", phase_label(.phase))]
pub struct ActivationError {
    pub kind: ActivationErrorKind,
    pub step: ActivationStep,
    pub phase: Option<Phase>,
    pub payment: PaymentState,
    /// Present whenever funds were committed and the attempt can continue without paying.
    pub resume: Option<ResumePoint>,
    pub detail: String,
}

impl ActivationError {
    pub fn new(kind: ActivationErrorKind, step: ActivationStep, detail: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            phase: None,
            payment: PaymentState::NotCommitted,
            resume: None,
            detail: detail.into(),
        }
    }

    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_payment(mut self, payment: PaymentState) -> Self {
        self.payment = payment;
        self
    }

    /// Marks the payment committed and attaches the artefact to resume from.
    pub fn resumable(mut self, point: ResumePoint) -> Self {
        self.payment = PaymentState::Committed;
        self.resume = Some(point);
        self
    }

    pub fn phase_mismatch(requested: Phase, resolved: Phase, step: ActivationStep) -> Self {
        Self::new(
            ActivationErrorKind::PhaseMismatch,
            step,
            format!("requested {requested} rail while {resolved} is active"),
        )
        .in_phase(resolved)
    }

    /// Paying again cannot double-spend.
    pub fn may_repay(&self) -> bool {
        self.payment == PaymentState::NotCommitted
    }

    /// Re-querying status automatically is safe.
    pub fn is_status_retry_safe(&self) -> bool {
        self.kind == ActivationErrorKind::MonitoringTimeout
    }
}

fn phase_label(phase: &Option<Phase>) -> String {
    match phase {
        Some(phase) => phase.to_string(),
        None => "phase unresolved".to_string(),
    }
}

/// Failure talking to the bridge service or the target network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("service unreachable: {0}")]
    Transport(String),

    #[error("service rejected request ({code}): {message}")]
    Rejected {
        code: crate::gateway::BridgeErrorCode,
        message: String,
    },

    #[error("malformed service response: {0}")]
    Decode(String),
}

/// Failure reported by a source or native ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger refused operation: {0}")]
    Rejected(String),

    #[error("ledger unreachable: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_step_phase_and_payment() {
        let err = ActivationError::new(
            ActivationErrorKind::InsufficientBalance,
            ActivationStep::BalanceCheck,
            "need 1500, have 20",
        )
        .in_phase(Phase::One);

        assert_eq!(
            err.to_string(),
            "insufficient_balance at balance_check (phase 1, payment not committed): need 1500, have 20"
        );
        assert!(err.may_repay());
        assert!(!err.is_status_retry_safe());
    }

    #[test]
    fn resumable_errors_forbid_repayment() {
        let err = ActivationError::new(
            ActivationErrorKind::MonitoringTimeout,
            ActivationStep::Monitor,
            "no terminal status after 3 polls",
        )
        .resumable(ResumePoint::Credential(crate::types::ActivationCredential {
            code: "QNET-F1A2B3-C4D5E6-X9Y83K".to_string(),
            bound_node_class: crate::types::NodeClass::Full,
            issuing_authority_signature: "sig".to_string(),
            expires_at: chrono::Utc::now(),
        }));

        assert_eq!(err.payment, PaymentState::Committed);
        assert!(!err.may_repay());
        assert!(err.is_status_retry_safe());
        assert!(err.to_string().contains("phase unresolved"));
    }
}
