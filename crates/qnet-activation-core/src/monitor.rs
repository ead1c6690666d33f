//! Bounded status polling.
//!
//! Constant interval, no backoff. The monitor observes transitions and never causes them.

use crate::clock::Clock;
use crate::error::{ActivationError, ActivationErrorKind, ActivationStep};
use crate::flow::{ActivationStatus, ActivationStatusMachine, Observation};
use crate::gateway::StatusSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSchedule {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl MonitorSchedule {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// At least one poll always happens.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for MonitorSchedule {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    60
}

fn default_interval_ms() -> u64 {
    5_000
}

/// Terminal observation together with what the status source reported alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ActivationStatus,
    pub node_id: Option<String>,
    pub network_tx_reference: Option<String>,
    pub polls: u32,
}

#[derive(Clone)]
pub struct ActivationMonitor {
    clock: Arc<dyn Clock>,
}

impl ActivationMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub async fn await_activation<S, F>(
        &self,
        source: &S,
        reference: &str,
        schedule: MonitorSchedule,
        on_progress: F,
    ) -> Result<StatusReport, ActivationError>
    where
        S: StatusSource + ?Sized,
        F: FnMut(ActivationStatus) + Send,
    {
        self.run(source, reference, schedule, on_progress, None)
            .await
    }

    /// Like [`Self::await_activation`], stopping with `Cancelled` once `cancel` turns true.
    pub async fn await_activation_until<S, F>(
        &self,
        source: &S,
        reference: &str,
        schedule: MonitorSchedule,
        on_progress: F,
        cancel: watch::Receiver<bool>,
    ) -> Result<StatusReport, ActivationError>
    where
        S: StatusSource + ?Sized,
        F: FnMut(ActivationStatus) + Send,
    {
        self.run(source, reference, schedule, on_progress, Some(cancel))
            .await
    }

    async fn run<S, F>(
        &self,
        source: &S,
        reference: &str,
        schedule: MonitorSchedule,
        mut on_progress: F,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<StatusReport, ActivationError>
    where
        S: StatusSource + ?Sized,
        F: FnMut(ActivationStatus) + Send,
    {
        let attempts = schedule.attempts();
        let mut machine = ActivationStatusMachine::new(reference);
        let mut node_id = None;
        let mut network_tx_reference = None;

        if is_cancelled(&cancel) {
            return Err(cancelled(reference, 0));
        }

        for attempt in 1..=attempts {
            match source.poll_status(reference).await {
                Ok(snapshot) => {
                    match machine.observe(snapshot.status) {
                        Ok(Observation::Stale(observed)) => debug!(
                            reference,
                            attempt,
                            observed = %observed,
                            current = %machine.status(),
                            "ignoring stale status observation"
                        ),
                        Ok(_) => {}
                        Err(violation) => {
                            return Err(ActivationError::new(
                                ActivationErrorKind::InvalidStatusTransition,
                                ActivationStep::Monitor,
                                violation.to_string(),
                            ));
                        }
                    }
                    node_id = snapshot.node_id.or(node_id);
                    network_tx_reference = snapshot.network_tx_reference.or(network_tx_reference);
                }
                Err(err) => warn!(
                    reference,
                    attempt,
                    error = %err,
                    "status poll failed; counting as non-terminal"
                ),
            }

            let status = machine.status();
            debug!(reference, attempt, status = %status, "polled activation status");
            on_progress(status);

            if status.is_terminal() {
                return Ok(StatusReport {
                    status,
                    node_id,
                    network_tx_reference,
                    polls: attempt,
                });
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.clock.sleep(schedule.interval()) => {}
                    _ = wait_for_cancel(&mut cancel) => {}
                }
                if is_cancelled(&cancel) {
                    return Err(cancelled(reference, attempt));
                }
            }
        }

        Err(ActivationError::new(
            ActivationErrorKind::MonitoringTimeout,
            ActivationStep::Monitor,
            format!(
                "no terminal status for {reference} after {attempts} polls (last {})",
                machine.status()
            ),
        ))
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    // No sender left, or nothing to watch: never resolves.
    std::future::pending::<()>().await
}

fn cancelled(reference: &str, polls: u32) -> ActivationError {
    ActivationError::new(
        ActivationErrorKind::Cancelled,
        ActivationStep::Monitor,
        format!("observation of {reference} cancelled after {polls} polls"),
    )
}
