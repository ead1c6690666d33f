//! Activation orchestration.
//!
//! One attempt resolves the phase from a fresh observation, quotes, and drives exactly one
//! payment on the rail that phase allows. The phase is resolved again immediately before
//! funds are committed, and a Phase-2 observation anywhere in the attempt closes the burn
//! rail for the rest of it. Nothing that commits funds is retried here.

use crate::clock::{Clock, TokioClock};
use crate::code::CodeValidator;
use crate::config::OrchestratorConfig;
use crate::error::{
    ActivationError, ActivationErrorKind, ActivationStep, GatewayError, LedgerError, PaymentState,
};
use crate::flow::ActivationStatus;
use crate::gateway::{BridgeGateway, BridgeHealth, NodeClassOffer};
use crate::ledger::{PoolLedger, SourceLedger};
use crate::monitor::ActivationMonitor;
use crate::network::{NetworkStateSource, TargetNetwork};
use crate::phase::{PhaseDetector, PhaseLatch, PhaseReason, PhaseResolution};
use crate::types::{
    ActivationCredential, BurnProof, NetworkPhaseState, NodeClass, PayerContext, PaymentReceipt,
    Phase, PoolPayment, PricingQuote, ResumePoint,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// External parties an orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub state_source: Arc<dyn NetworkStateSource>,
    pub source_ledger: Arc<dyn SourceLedger>,
    pub pool_ledger: Arc<dyn PoolLedger>,
    pub bridge: Arc<dyn BridgeGateway>,
    pub network: Arc<dyn TargetNetwork>,
}

/// Progress reported while an attempt runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEvent {
    PhaseResolved { phase: Phase, reason: PhaseReason },
    Quoted(PricingQuote),
    PaymentCommitted(PaymentReceipt),
    BurnConfirmed { confirmations: u32 },
    CredentialIssued { code: String, expires_at: DateTime<Utc> },
    Status(ActivationStatus),
}

/// Outcome of an attempt that reached `Activated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub attempt_id: Uuid,
    pub node_class: NodeClass,
    pub phase: Phase,
    /// Absent when the attempt was resumed.
    pub quote: Option<PricingQuote>,
    /// Absent when resumed from an issued credential.
    pub receipt: Option<PaymentReceipt>,
    pub credential_code: Option<String>,
    pub status: ActivationStatus,
    pub node_id: Option<String>,
    pub network_tx_reference: Option<String>,
    pub completed_at: DateTime<Utc>,
}

type EventSink<'a> = &'a mut (dyn FnMut(&ActivationEvent) + Send);

pub struct ActivationOrchestrator {
    config: OrchestratorConfig,
    detector: PhaseDetector,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    monitor: ActivationMonitor,
}

impl ActivationOrchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        Self::with_clock(config, collaborators, Arc::new(TokioClock))
    }

    pub fn with_clock(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            detector: PhaseDetector::new(config.phase.rules.clone()),
            monitor: ActivationMonitor::new(clock.clone()),
            config,
            collaborators,
            clock,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Current phase from a fresh observation, with the override policy applied.
    pub async fn resolve_phase(&self) -> Result<PhaseResolution, ActivationError> {
        let (_, resolution) = self.observe_phase(ActivationStep::ResolvePhase).await?;
        Ok(resolution)
    }

    /// Local quote for `node_class` under the phase active right now.
    pub async fn current_quote(&self, node_class: NodeClass) -> Result<PricingQuote, ActivationError> {
        let (state, resolution) = self.observe_phase(ActivationStep::Quote).await?;
        Ok(self
            .config
            .pricing
            .quote(node_class, resolution.phase, &state))
    }

    pub async fn supported_node_classes(&self) -> Result<Vec<NodeClassOffer>, ActivationError> {
        self.collaborators
            .bridge
            .get_supported_node_classes()
            .await
            .map_err(|err| unavailable(ActivationStep::Preflight, "bridge", err))
    }

    pub async fn bridge_health(&self) -> Result<BridgeHealth, ActivationError> {
        self.collaborators
            .bridge
            .check_health()
            .await
            .map_err(|err| unavailable(ActivationStep::Preflight, "bridge", err))
    }

    pub async fn activate(
        &self,
        node_class: NodeClass,
        payer: &PayerContext,
    ) -> Result<ActivationResult, ActivationError> {
        self.activate_with_progress(node_class, payer, |_| {}).await
    }

    pub async fn activate_with_progress<F>(
        &self,
        node_class: NodeClass,
        payer: &PayerContext,
        mut on_event: F,
    ) -> Result<ActivationResult, ActivationError>
    where
        F: FnMut(&ActivationEvent) + Send,
    {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("activation", %attempt_id, node_class = %node_class);
        self.run_activation(attempt_id, node_class, payer, &mut on_event)
            .instrument(span)
            .await
    }

    /// Continues an interrupted attempt from `point`. Never pays.
    pub async fn resume(
        &self,
        point: ResumePoint,
        node_class: NodeClass,
        payer: &PayerContext,
    ) -> Result<ActivationResult, ActivationError> {
        self.resume_with_progress(point, node_class, payer, |_| {})
            .await
    }

    pub async fn resume_with_progress<F>(
        &self,
        point: ResumePoint,
        node_class: NodeClass,
        payer: &PayerContext,
        mut on_event: F,
    ) -> Result<ActivationResult, ActivationError>
    where
        F: FnMut(&ActivationEvent) + Send,
    {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("activation_resume", %attempt_id, node_class = %node_class);
        let events: EventSink<'_> = &mut on_event;

        async move {
            match point {
                ResumePoint::Burn(proof) => {
                    info!(tx = %proof.source_tx_reference, "resuming from confirmed burn");
                    self.finish_burn(attempt_id, node_class, payer, proof, None, events)
                        .await
                }
                ResumePoint::Credential(credential) => {
                    info!(code = %credential.code, "resuming status observation");
                    if credential.bound_node_class != node_class {
                        return Err(ActivationError::new(
                            ActivationErrorKind::MalformedCredential,
                            ActivationStep::ValidateCredential,
                            format!(
                                "credential bound to {}, resumed as {node_class}",
                                credential.bound_node_class
                            ),
                        )
                        .in_phase(Phase::One)
                        .resumable(ResumePoint::Credential(credential)));
                    }
                    self.observe_credential(attempt_id, node_class, credential, None, None, events)
                        .await
                }
                ResumePoint::PoolPayment(payment) => {
                    info!(tx = %payment.pool_tx_reference, "resubmitting pool payment");
                    self.submit_pool_activation(attempt_id, node_class, payer, payment, None, events)
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Resubmits a committed pool payment to the target network.
    pub async fn resume_submission(
        &self,
        payment: PoolPayment,
        node_class: NodeClass,
        payer: &PayerContext,
    ) -> Result<ActivationResult, ActivationError> {
        self.resume(ResumePoint::PoolPayment(payment), node_class, payer)
            .await
    }

    async fn run_activation(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        payer: &PayerContext,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        let mut latch = PhaseLatch::new();

        let (state, resolution) = self.observe_phase(ActivationStep::ResolvePhase).await?;
        let phase = latch.observe(resolution.phase);
        info!(phase = %phase, reason = ?resolution.reason, "phase resolved");
        events(&ActivationEvent::PhaseResolved {
            phase,
            reason: resolution.reason,
        });

        let requested = payer.requested_phase.unwrap_or(phase);
        if requested != phase {
            warn!(requested = %requested, resolved = %phase, "requested rail is not active");
            return Err(ActivationError::phase_mismatch(
                requested,
                phase,
                ActivationStep::ResolvePhase,
            ));
        }

        let quote = self.config.pricing.quote(node_class, phase, &state);
        info!(
            phase = %phase,
            amount = quote.amount,
            currency = ?quote.currency,
            "activation quoted"
        );
        events(&ActivationEvent::Quoted(quote.clone()));

        match phase {
            Phase::One => {
                self.run_burn_rail(attempt_id, node_class, payer, quote, &mut latch, events)
                    .await
            }
            Phase::Two => {
                self.run_pool_rail(attempt_id, node_class, payer, quote, &mut latch, events)
                    .await
            }
        }
    }

    async fn run_burn_rail(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        payer: &PayerContext,
        quote: PricingQuote,
        latch: &mut PhaseLatch,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        self.bridge_preflight(&quote).await?;

        let balance = self
            .collaborators
            .source_ledger
            .source_balance(&payer.source_address)
            .await
            .map_err(|err| ledger_failure(err, ActivationStep::BalanceCheck, Phase::One, false))?;
        if balance < quote.amount {
            return Err(insufficient(balance, &quote));
        }

        let (_, resolution) = self.observe_phase(ActivationStep::Payment).await?;
        let effective = latch.observe(resolution.phase);
        if effective != Phase::One {
            warn!(
                resolved = %resolution.phase,
                "phase 2 observed before burn; refusing to burn"
            );
            return Err(ActivationError::phase_mismatch(
                Phase::One,
                effective,
                ActivationStep::Payment,
            ));
        }

        let proof = self
            .collaborators
            .source_ledger
            .burn(&payer.source_address, quote.amount)
            .await
            .map_err(|err| ledger_failure(err, ActivationStep::Payment, Phase::One, true))?;
        info!(
            tx = %proof.source_tx_reference,
            amount = proof.amount_burned,
            ledger = self.collaborators.source_ledger.ledger_id(),
            "burn committed"
        );
        events(&ActivationEvent::PaymentCommitted(PaymentReceipt::Burn(
            proof.clone(),
        )));

        self.finish_burn(attempt_id, node_class, payer, proof, Some(quote), events)
            .await
    }

    async fn bridge_preflight(&self, quote: &PricingQuote) -> Result<(), ActivationError> {
        let preflight = self.config.preflight;
        let bridge = &self.collaborators.bridge;

        if preflight.require_healthy_bridge {
            let health = bridge
                .check_health()
                .await
                .map_err(|err| unavailable(ActivationStep::Preflight, "bridge", err).in_phase(Phase::One))?;
            if !health.is_operational() {
                return Err(ActivationError::new(
                    ActivationErrorKind::ServiceUnavailable,
                    ActivationStep::Preflight,
                    format!(
                        "bridge not operational (healthy {}, source chain {}, target chain {})",
                        health.healthy, health.source_chain_connected, health.target_chain_connected
                    ),
                )
                .in_phase(Phase::One));
            }
        }

        if preflight.cross_check_pricing {
            match bridge.get_current_pricing(quote.node_class).await {
                Ok(remote) if remote.amount != quote.amount => warn!(
                    local = quote.amount,
                    remote = remote.amount,
                    remote_burned = %remote.burned_fraction,
                    "bridge pricing disagrees with local quote; local quote stands"
                ),
                Ok(_) => debug!("bridge pricing matches local quote"),
                Err(err) => warn!(error = %err, "bridge pricing cross-check unavailable"),
            }
        }

        Ok(())
    }

    /// Confirmation, credential issuance, validation and observation after a committed burn.
    async fn finish_burn(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        payer: &PayerContext,
        proof: BurnProof,
        quote: Option<PricingQuote>,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        let confirmations = self.confirm_burn(&proof).await?;
        events(&ActivationEvent::BurnConfirmed { confirmations });

        let credential = match self
            .collaborators
            .bridge
            .request_activation_token(&proof, node_class, payer)
            .await
        {
            Ok(credential) => credential,
            Err(GatewayError::Rejected { code, message }) if code.rejects_proof() => {
                return Err(ActivationError::new(
                    ActivationErrorKind::BridgeVerificationFailed,
                    ActivationStep::RequestCredential,
                    format!("bridge rejected burn proof ({code}): {message}"),
                )
                .in_phase(Phase::One)
                .with_payment(PaymentState::Committed));
            }
            Err(err) => {
                return Err(
                    unavailable(ActivationStep::RequestCredential, "bridge", err)
                        .in_phase(Phase::One)
                        .resumable(ResumePoint::Burn(proof)),
                );
            }
        };
        info!(code = %credential.code, expires_at = %credential.expires_at, "credential issued");

        self.check_credential(&credential, node_class)?;
        events(&ActivationEvent::CredentialIssued {
            code: credential.code.clone(),
            expires_at: credential.expires_at,
        });

        let receipt = PaymentReceipt::Burn(proof);
        self.observe_credential(attempt_id, node_class, credential, quote, Some(receipt), events)
            .await
    }

    /// Polls burn verification until enough confirmations are seen.
    async fn confirm_burn(&self, proof: &BurnProof) -> Result<u32, ActivationError> {
        let policy = self.config.confirmation;
        let schedule = policy.schedule();
        let attempts = schedule.attempts();

        for attempt in 1..=attempts {
            match self
                .collaborators
                .bridge
                .verify_burn_transaction(
                    &proof.source_tx_reference,
                    proof.amount_burned,
                    &proof.burner_address,
                )
                .await
            {
                Ok(verification) if verification.verified => {
                    if verification.amount != proof.amount_burned {
                        return Err(ActivationError::new(
                            ActivationErrorKind::BridgeVerificationFailed,
                            ActivationStep::ConfirmBurn,
                            format!(
                                "bridge observed {} burned, proof claims {}",
                                verification.amount, proof.amount_burned
                            ),
                        )
                        .in_phase(Phase::One)
                        .with_payment(PaymentState::Committed));
                    }
                    if verification.confirmations >= policy.min_confirmations {
                        info!(
                            tx = %proof.source_tx_reference,
                            confirmations = verification.confirmations,
                            "burn confirmed"
                        );
                        return Ok(verification.confirmations);
                    }
                    debug!(
                        attempt,
                        confirmations = verification.confirmations,
                        required = policy.min_confirmations,
                        "burn awaiting confirmations"
                    );
                }
                Ok(_) => debug!(attempt, "burn not yet visible to bridge"),
                Err(GatewayError::Rejected { code, message }) if code.rejects_proof() => {
                    return Err(ActivationError::new(
                        ActivationErrorKind::BridgeVerificationFailed,
                        ActivationStep::ConfirmBurn,
                        format!("bridge rejected burn ({code}): {message}"),
                    )
                    .in_phase(Phase::One)
                    .with_payment(PaymentState::Committed));
                }
                Err(err) => warn!(attempt, error = %err, "burn verification poll failed"),
            }

            if attempt < attempts {
                self.clock.sleep(schedule.interval()).await;
            }
        }

        Err(ActivationError::new(
            ActivationErrorKind::MonitoringTimeout,
            ActivationStep::ConfirmBurn,
            format!(
                "burn {} not confirmed after {attempts} checks",
                proof.source_tx_reference
            ),
        )
        .in_phase(Phase::One)
        .resumable(ResumePoint::Burn(proof.clone())))
    }

    fn check_credential(
        &self,
        credential: &ActivationCredential,
        node_class: NodeClass,
    ) -> Result<(), ActivationError> {
        let malformed = |detail: String| {
            ActivationError::new(
                ActivationErrorKind::MalformedCredential,
                ActivationStep::ValidateCredential,
                detail,
            )
            .in_phase(Phase::One)
            .with_payment(PaymentState::Committed)
        };

        let parsed = CodeValidator::parse(&credential.code).map_err(|err| malformed(err.to_string()))?;
        if parsed.class_tag != node_class || credential.bound_node_class != node_class {
            return Err(malformed(format!(
                "credential bound to {} (tag {}), requested {node_class}",
                credential.bound_node_class, parsed.class_tag
            )));
        }

        if credential.is_expired_at(self.clock.now()) {
            return Err(ActivationError::new(
                ActivationErrorKind::BridgeVerificationFailed,
                ActivationStep::ValidateCredential,
                format!("credential expired at {}", credential.expires_at),
            )
            .in_phase(Phase::One)
            .resumable(ResumePoint::Credential(credential.clone())));
        }

        Ok(())
    }

    async fn observe_credential(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        credential: ActivationCredential,
        quote: Option<PricingQuote>,
        receipt: Option<PaymentReceipt>,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        let report = match self
            .monitor
            .await_activation(
                self.collaborators.bridge.as_ref(),
                &credential.code,
                self.config.monitor,
                |status| events(&ActivationEvent::Status(status)),
            )
            .await
        {
            Ok(report) => report,
            Err(err) => {
                return Err(err
                    .in_phase(Phase::One)
                    .resumable(ResumePoint::Credential(credential)));
            }
        };

        if report.status == ActivationStatus::Failed {
            return Err(ActivationError::new(
                ActivationErrorKind::BridgeVerificationFailed,
                ActivationStep::Monitor,
                format!("activation of {} reported failed", credential.code),
            )
            .in_phase(Phase::One)
            .with_payment(PaymentState::Committed));
        }

        info!(
            code = %credential.code,
            node_id = report.node_id.as_deref().unwrap_or("-"),
            polls = report.polls,
            "node activated"
        );
        Ok(ActivationResult {
            attempt_id,
            node_class,
            phase: Phase::One,
            quote,
            receipt,
            credential_code: Some(credential.code),
            status: report.status,
            node_id: report.node_id,
            network_tx_reference: report.network_tx_reference,
            completed_at: self.clock.now(),
        })
    }

    async fn run_pool_rail(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        payer: &PayerContext,
        quote: PricingQuote,
        latch: &mut PhaseLatch,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        let balance = self
            .collaborators
            .pool_ledger
            .native_balance(&payer.owner_address)
            .await
            .map_err(|err| ledger_failure(err, ActivationStep::BalanceCheck, Phase::Two, false))?;
        if balance < quote.amount {
            return Err(insufficient(balance, &quote));
        }

        let (_, resolution) = self.observe_phase(ActivationStep::Payment).await?;
        latch.observe(resolution.phase);
        if resolution.phase != Phase::Two {
            warn!("phase 1 observed before pool payment; refusing to pay");
            return Err(ActivationError::phase_mismatch(
                Phase::Two,
                resolution.phase,
                ActivationStep::Payment,
            ));
        }

        let payment = self
            .collaborators
            .pool_ledger
            .pay_into_pool(&payer.owner_address, quote.amount)
            .await
            .map_err(|err| ledger_failure(err, ActivationStep::Payment, Phase::Two, true))?;
        info!(
            tx = %payment.pool_tx_reference,
            amount = payment.amount,
            ledger = self.collaborators.pool_ledger.ledger_id(),
            "pool payment committed"
        );
        events(&ActivationEvent::PaymentCommitted(PaymentReceipt::Pool(
            payment.clone(),
        )));

        self.submit_pool_activation(attempt_id, node_class, payer, payment, Some(quote), events)
            .await
    }

    async fn submit_pool_activation(
        &self,
        attempt_id: Uuid,
        node_class: NodeClass,
        payer: &PayerContext,
        payment: PoolPayment,
        quote: Option<PricingQuote>,
        events: EventSink<'_>,
    ) -> Result<ActivationResult, ActivationError> {
        let registration = match self
            .collaborators
            .network
            .submit_activation(&payment.pool_tx_reference, node_class, &payer.owner_address)
            .await
        {
            Ok(registration) => registration,
            Err(err) => {
                warn!(tx = %payment.pool_tx_reference, error = %err, "network submission failed");
                return Err(ActivationError::new(
                    ActivationErrorKind::NetworkSubmissionFailed,
                    ActivationStep::SubmitActivation,
                    err.to_string(),
                )
                .in_phase(Phase::Two)
                .resumable(ResumePoint::PoolPayment(payment)));
            }
        };

        events(&ActivationEvent::Status(ActivationStatus::Activated));
        info!(
            node_id = %registration.node_id,
            network_tx = %registration.network_tx_reference,
            "node activated"
        );

        Ok(ActivationResult {
            attempt_id,
            node_class,
            phase: Phase::Two,
            quote,
            receipt: Some(PaymentReceipt::Pool(payment)),
            credential_code: None,
            status: ActivationStatus::Activated,
            node_id: Some(registration.node_id),
            network_tx_reference: Some(registration.network_tx_reference),
            completed_at: self.clock.now(),
        })
    }

    async fn observe_phase(
        &self,
        step: ActivationStep,
    ) -> Result<(NetworkPhaseState, PhaseResolution), ActivationError> {
        let state = self
            .collaborators
            .state_source
            .fetch_phase_state()
            .await
            .map_err(|err| unavailable(step, "network state source", err))?;

        let state = self.config.phase.admit(state);

        let resolution = self.detector.resolve(&state);
        debug!(
            step = %step,
            phase = %resolution.phase,
            burned = %state.burned_fraction,
            age_years = state.network_age_years,
            network_size = state.network_size,
            "phase observed"
        );
        Ok((state, resolution))
    }
}

fn unavailable(step: ActivationStep, service: &str, err: impl Display) -> ActivationError {
    ActivationError::new(
        ActivationErrorKind::ServiceUnavailable,
        step,
        format!("{service}: {err}"),
    )
}

fn insufficient(balance: u64, quote: &PricingQuote) -> ActivationError {
    ActivationError::new(
        ActivationErrorKind::InsufficientBalance,
        ActivationStep::BalanceCheck,
        format!("need {}, have {balance}", quote.amount),
    )
    .in_phase(quote.phase)
}

fn ledger_failure(err: LedgerError, step: ActivationStep, phase: Phase, spending: bool) -> ActivationError {
    match err {
        LedgerError::Rejected(reason) => {
            ActivationError::new(ActivationErrorKind::PaymentRejected, step, reason).in_phase(phase)
        }
        LedgerError::Transport(reason) => {
            let err = ActivationError::new(ActivationErrorKind::ServiceUnavailable, step, reason)
                .in_phase(phase);
            if spending {
                err.with_payment(PaymentState::Unknown)
            } else {
                err
            }
        }
    }
}
