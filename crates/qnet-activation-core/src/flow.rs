use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Activation lifecycle as reported by the verification service and the target network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Pending,
    Verified,
    Activated,
    Failed,
}

impl ActivationStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Activated => "activated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Activated | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Verified => 1,
            Self::Activated | Self::Failed => 2,
        }
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of folding one observed status into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Same state as before.
    Unchanged,
    /// Moved forward, possibly through implied intermediate states.
    Advanced {
        from: ActivationStatus,
        to: ActivationStatus,
    },
    /// Observed state is behind the current one; ignored.
    Stale(ActivationStatus),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("activation status transition violation: '{from}' -> '{to}'")]
pub struct StatusTransitionError {
    pub from: ActivationStatus,
    pub to: ActivationStatus,
}

/// Enforces `Pending -> Verified -> Activated` and `Pending -> Failed`.
///
/// Terminal states never move again.
#[derive(Debug, Clone)]
pub struct ActivationStatusMachine {
    reference: String,
    status: ActivationStatus,
}

impl ActivationStatusMachine {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            status: ActivationStatus::Pending,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn status(&self) -> ActivationStatus {
        self.status
    }

    pub fn transition(&mut self, next: ActivationStatus) -> Result<(), StatusTransitionError> {
        let allowed = matches!(
            (self.status, next),
            (ActivationStatus::Pending, ActivationStatus::Verified)
                | (ActivationStatus::Pending, ActivationStatus::Failed)
                | (ActivationStatus::Verified, ActivationStatus::Activated)
        );

        if !allowed {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        Ok(())
    }

    /// Fold a polled status that may have skipped intermediate states.
    ///
    /// `Pending` observed as `Activated` passes through `Verified`.
    pub fn observe(&mut self, observed: ActivationStatus) -> Result<Observation, StatusTransitionError> {
        let from = self.status;
        if observed == from {
            return Ok(Observation::Unchanged);
        }
        if from.is_terminal() {
            return Err(StatusTransitionError { from, to: observed });
        }
        if observed.rank() < from.rank() {
            return Ok(Observation::Stale(observed));
        }

        if from == ActivationStatus::Pending && observed == ActivationStatus::Activated {
            self.transition(ActivationStatus::Verified)?;
        }
        self.transition(observed)?;

        Ok(Observation::Advanced { from, to: observed })
    }
}
