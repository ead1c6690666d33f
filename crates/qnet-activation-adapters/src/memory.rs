//! Deterministic in-process collaborators for local runs and tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use qnet_activation_core::{
    ActivationCredential, ActivationStatus, BridgeErrorCode, BridgeGateway, BridgeHealth,
    BridgePricing, BurnFraction, BurnProof, BurnVerification, CodeValidator, GatewayError,
    LedgerError, NetworkPhaseState, NetworkStateSource, NodeClass, NodeClassOffer,
    NodeRegistration, NodeRequirements, PayerContext, PoolLedger, PoolPayment, PricingEngine,
    SourceLedger, StatusSnapshot, TargetNetwork,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `0x`-prefixed 40 hex digit reference derived from the operation's content.
fn tx_hash(kind: &str, address: &str, amount: u64, sequence: u64) -> String {
    let digest = blake3::hash(format!("{kind}:{address}:{amount}:{sequence}").as_bytes());
    let hex = digest.to_hex();
    format!("0x{}", &hex.as_str()[..40])
}

/// Fifteen uppercase hex digits, valid as a credential node id.
fn node_id_for(seed: &str) -> String {
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    hex.as_str()[..15].to_ascii_uppercase()
}

/// Pops the next scripted value, keeping the last one once the script runs dry.
fn next_sticky<T: Clone>(script: &mut VecDeque<T>) -> Option<T> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

/// Scripted misbehaviour of a ledger's spend call; balance reads are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendFault {
    /// The ledger refuses the spend and nothing moves.
    Refuse(String),
    /// The spend commits but its receipt is lost in transit.
    LoseReceipt,
}

#[derive(Debug, Default)]
pub struct InMemorySourceLedger {
    balances: Mutex<HashMap<String, u64>>,
    burns: Mutex<Vec<BurnProof>>,
    sequence: AtomicU64,
    unreachable: AtomicBool,
    spend_fault: Mutex<Option<SpendFault>>,
}

impl InMemorySourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: impl Into<String>, amount: u64) -> Self {
        lock(&self.balances).insert(address.into(), amount);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_spend_fault(&self, fault: Option<SpendFault>) {
        *lock(&self.spend_fault) = fault;
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        lock(&self.balances).get(address).copied().unwrap_or(0)
    }

    pub fn burns(&self) -> Vec<BurnProof> {
        lock(&self.burns).clone()
    }

    fn check_reachable(&self) -> Result<(), LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("source ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceLedger for InMemorySourceLedger {
    fn ledger_id(&self) -> &'static str {
        "memory-source"
    }

    async fn source_balance(&self, address: &str) -> Result<u64, LedgerError> {
        self.check_reachable()?;
        Ok(self.balance_of(address))
    }

    async fn burn(&self, address: &str, amount: u64) -> Result<BurnProof, LedgerError> {
        self.check_reachable()?;
        let fault = lock(&self.spend_fault).clone();
        if let Some(SpendFault::Refuse(reason)) = &fault {
            return Err(LedgerError::Rejected(reason.clone()));
        }

        let mut balances = lock(&self.balances);
        let balance = balances.entry(address.to_string()).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::Rejected(format!(
                "insufficient funds: {address} holds {balance}, burn needs {amount}"
            )));
        }
        *balance -= amount;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let proof = BurnProof {
            source_tx_reference: tx_hash("burn", address, amount, sequence),
            amount_burned: amount,
            burner_address: address.to_string(),
            observed_at_source_ledger: Utc::now(),
        };
        lock(&self.burns).push(proof.clone());
        if fault == Some(SpendFault::LoseReceipt) {
            return Err(LedgerError::Transport(format!(
                "connection reset before burn receipt for {address}"
            )));
        }
        Ok(proof)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPoolLedger {
    balances: Mutex<HashMap<String, u64>>,
    payments: Mutex<Vec<PoolPayment>>,
    pool_total: AtomicU64,
    sequence: AtomicU64,
    unreachable: AtomicBool,
    spend_fault: Mutex<Option<SpendFault>>,
}

impl InMemoryPoolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: impl Into<String>, amount: u64) -> Self {
        lock(&self.balances).insert(address.into(), amount);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_spend_fault(&self, fault: Option<SpendFault>) {
        *lock(&self.spend_fault) = fault;
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        lock(&self.balances).get(address).copied().unwrap_or(0)
    }

    pub fn payments(&self) -> Vec<PoolPayment> {
        lock(&self.payments).clone()
    }

    /// Total held by the redistribution pool.
    pub fn pool_total(&self) -> u64 {
        self.pool_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolLedger for InMemoryPoolLedger {
    fn ledger_id(&self) -> &'static str {
        "memory-pool"
    }

    async fn native_balance(&self, address: &str) -> Result<u64, LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("native ledger offline".to_string()));
        }
        Ok(self.balance_of(address))
    }

    async fn pay_into_pool(&self, address: &str, amount: u64) -> Result<PoolPayment, LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("native ledger offline".to_string()));
        }
        let fault = lock(&self.spend_fault).clone();
        if let Some(SpendFault::Refuse(reason)) = &fault {
            return Err(LedgerError::Rejected(reason.clone()));
        }

        let mut balances = lock(&self.balances);
        let balance = balances.entry(address.to_string()).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::Rejected(format!(
                "insufficient funds: {address} holds {balance}, pool payment needs {amount}"
            )));
        }
        *balance -= amount;
        self.pool_total.fetch_add(amount, Ordering::SeqCst);

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let payment = PoolPayment {
            pool_tx_reference: tx_hash("pool", address, amount, sequence),
            amount,
            payer_address: address.to_string(),
            committed_at: Utc::now(),
        };
        lock(&self.payments).push(payment.clone());
        if fault == Some(SpendFault::LoseReceipt) {
            return Err(LedgerError::Transport(format!(
                "connection reset before pool receipt for {address}"
            )));
        }
        Ok(payment)
    }
}

/// Replays phase-state observations in order; the last one sticks.
#[derive(Debug)]
pub struct StaticNetworkState {
    states: Mutex<VecDeque<NetworkPhaseState>>,
    fetches: AtomicU32,
}

impl StaticNetworkState {
    pub fn new(state: NetworkPhaseState) -> Self {
        Self::sequence(vec![state])
    }

    pub fn sequence(states: Vec<NetworkPhaseState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkStateSource for StaticNetworkState {
    async fn fetch_phase_state(&self) -> Result<NetworkPhaseState, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        next_sticky(&mut *lock(&self.states))
            .ok_or_else(|| GatewayError::Transport("no phase state scripted".to_string()))
    }
}

#[derive(Debug)]
struct BridgeScript {
    health: BridgeHealth,
    burned_fraction: BurnFraction,
    confirmations: VecDeque<u32>,
    observed_amount: Option<u64>,
    statuses: VecDeque<ActivationStatus>,
    token_rejection: Option<BridgeErrorCode>,
    credential_ttl: Duration,
    used_proofs: HashSet<String>,
    issued: HashMap<String, String>,
    unreachable: bool,
}

/// Verification service double with scripted confirmations and status progression.
///
/// Tracks consumed burn proofs and answers a second request for the same proof with
/// `proof_already_used`.
#[derive(Debug)]
pub struct ScriptedBridge {
    pricing: PricingEngine,
    script: Mutex<BridgeScript>,
    token_requests: AtomicU32,
    status_polls: AtomicU32,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self {
            pricing: PricingEngine::default(),
            script: Mutex::new(BridgeScript {
                health: BridgeHealth {
                    healthy: true,
                    source_chain_connected: true,
                    target_chain_connected: true,
                },
                burned_fraction: BurnFraction::ZERO,
                confirmations: VecDeque::from([12]),
                observed_amount: None,
                statuses: VecDeque::from([ActivationStatus::Activated]),
                token_rejection: None,
                credential_ttl: Duration::hours(24),
                used_proofs: HashSet::new(),
                issued: HashMap::new(),
                unreachable: false,
            }),
            token_requests: AtomicU32::new(0),
            status_polls: AtomicU32::new(0),
        }
    }

    fn script_mut(&mut self) -> &mut BridgeScript {
        self.script.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_health(mut self, health: BridgeHealth) -> Self {
        self.script_mut().health = health;
        self
    }

    pub fn with_burned_fraction(mut self, burned: BurnFraction) -> Self {
        self.script_mut().burned_fraction = burned;
        self
    }

    pub fn with_confirmations(mut self, confirmations: Vec<u32>) -> Self {
        self.script_mut().confirmations = confirmations.into();
        self
    }

    /// Report this amount instead of the expected one when verifying burns.
    pub fn with_observed_amount(mut self, amount: u64) -> Self {
        self.script_mut().observed_amount = Some(amount);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<ActivationStatus>) -> Self {
        self.script_mut().statuses = statuses.into();
        self
    }

    pub fn rejecting_tokens(mut self, code: BridgeErrorCode) -> Self {
        self.script_mut().token_rejection = Some(code);
        self
    }

    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.script_mut().credential_ttl = ttl;
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.script).unreachable = unreachable;
    }

    pub fn set_token_rejection(&self, code: Option<BridgeErrorCode>) {
        lock(&self.script).token_rejection = code;
    }

    pub fn set_statuses(&self, statuses: Vec<ActivationStatus>) {
        lock(&self.script).statuses = statuses.into();
    }

    pub fn set_confirmations(&self, confirmations: Vec<u32>) {
        lock(&self.script).confirmations = confirmations.into();
    }

    pub fn token_requests(&self) -> u32 {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> u32 {
        self.status_polls.load(Ordering::SeqCst)
    }

    fn reachable(&self) -> Result<MutexGuard<'_, BridgeScript>, GatewayError> {
        let script = lock(&self.script);
        if script.unreachable {
            return Err(GatewayError::Transport("bridge offline".to_string()));
        }
        Ok(script)
    }

    fn current_cost(&self, burned: BurnFraction) -> u64 {
        self.pricing.burn_price(burned)
    }
}

fn requirements_for(node_class: NodeClass) -> NodeRequirements {
    match node_class {
        NodeClass::Light => NodeRequirements {
            cpu_cores: 1,
            memory_gb: 1,
            storage_gb: 10,
            bandwidth_mbps: 5,
        },
        NodeClass::Full => NodeRequirements {
            cpu_cores: 4,
            memory_gb: 8,
            storage_gb: 500,
            bandwidth_mbps: 50,
        },
        NodeClass::Super => NodeRequirements {
            cpu_cores: 8,
            memory_gb: 32,
            storage_gb: 2_000,
            bandwidth_mbps: 200,
        },
    }
}

#[async_trait]
impl BridgeGateway for ScriptedBridge {
    fn gateway_id(&self) -> &'static str {
        "scripted-bridge"
    }

    async fn request_activation_token(
        &self,
        proof: &BurnProof,
        node_class: NodeClass,
        _payer: &PayerContext,
    ) -> Result<ActivationCredential, GatewayError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        let mut script = self.reachable()?;

        if let Some(code) = script.token_rejection {
            return Err(GatewayError::Rejected {
                code,
                message: format!("scripted rejection of {}", proof.source_tx_reference),
            });
        }
        if !script.used_proofs.insert(proof.source_tx_reference.clone()) {
            return Err(GatewayError::Rejected {
                code: BridgeErrorCode::ProofAlreadyUsed,
                message: format!("{} already redeemed", proof.source_tx_reference),
            });
        }

        let node_id = node_id_for(&proof.source_tx_reference);
        let code = CodeValidator::encode(node_class, &node_id)
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        script.issued.insert(code.clone(), node_id);

        Ok(ActivationCredential {
            issuing_authority_signature: blake3::hash(code.as_bytes()).to_hex().to_string(),
            code,
            bound_node_class: node_class,
            expires_at: Utc::now() + script.credential_ttl,
        })
    }

    async fn verify_burn_transaction(
        &self,
        _tx_reference: &str,
        expected_amount: u64,
        _payer_address: &str,
    ) -> Result<BurnVerification, GatewayError> {
        let mut script = self.reachable()?;
        let confirmations = next_sticky(&mut script.confirmations).unwrap_or(0);
        Ok(BurnVerification {
            verified: confirmations > 0,
            amount: script.observed_amount.unwrap_or(expected_amount),
            confirmations,
        })
    }

    async fn get_activation_status(&self, code: &str) -> Result<StatusSnapshot, GatewayError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.reachable()?;
        let status = next_sticky(&mut script.statuses).unwrap_or(ActivationStatus::Pending);
        let activated = status == ActivationStatus::Activated;

        Ok(StatusSnapshot {
            status,
            node_id: if activated {
                script.issued.get(code).cloned()
            } else {
                None
            },
            network_tx_reference: activated.then(|| tx_hash("activate", code, 0, 0)),
        })
    }

    async fn get_current_pricing(&self, _node_class: NodeClass) -> Result<BridgePricing, GatewayError> {
        let script = self.reachable()?;
        Ok(BridgePricing {
            amount: self.current_cost(script.burned_fraction),
            base_amount: self.pricing.burn.base,
            floor_amount: self.pricing.burn.floor,
            burned_fraction: script.burned_fraction,
        })
    }

    async fn get_supported_node_classes(&self) -> Result<Vec<NodeClassOffer>, GatewayError> {
        let script = self.reachable()?;
        let cost = self.current_cost(script.burned_fraction);
        Ok(NodeClass::ALL
            .into_iter()
            .map(|node_class| NodeClassOffer {
                node_class,
                requirements: requirements_for(node_class),
                current_cost: cost,
            })
            .collect())
    }

    async fn check_health(&self) -> Result<BridgeHealth, GatewayError> {
        Ok(self.reachable()?.health)
    }
}

/// Target network double. Rejects the first `failures` submissions and any duplicate.
#[derive(Debug, Default)]
pub struct ScriptedTargetNetwork {
    failures_remaining: AtomicU32,
    registered: Mutex<HashMap<String, NodeRegistration>>,
    submissions: AtomicU32,
}

impl ScriptedTargetNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        lock(&self.registered).len()
    }
}

#[async_trait]
impl TargetNetwork for ScriptedTargetNetwork {
    async fn submit_activation(
        &self,
        pool_tx_reference: &str,
        node_class: NodeClass,
        owner_address: &str,
    ) -> Result<NodeRegistration, GatewayError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Rejected {
                code: BridgeErrorCode::Internal,
                message: "activation entry point unavailable".to_string(),
            });
        }

        let mut registered = lock(&self.registered);
        if registered.contains_key(pool_tx_reference) {
            return Err(GatewayError::Rejected {
                code: BridgeErrorCode::ProofAlreadyUsed,
                message: format!("{pool_tx_reference} already registered"),
            });
        }

        let registration = NodeRegistration {
            node_id: format!(
                "{}-{}",
                node_class.name(),
                node_id_for(&format!("{pool_tx_reference}:{owner_address}"))
            ),
            network_tx_reference: tx_hash("register", owner_address, 0, registered.len() as u64),
        };
        registered.insert(pool_tx_reference.to_string(), registration.clone());
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burn_debits_and_records_proof() {
        let ledger = InMemorySourceLedger::new().with_balance("alice", 2_000);
        let proof = ledger.burn("alice", 1_200).await.unwrap();

        assert_eq!(ledger.balance_of("alice"), 800);
        assert_eq!(proof.amount_burned, 1_200);
        assert!(proof.source_tx_reference.starts_with("0x"));
        assert_eq!(proof.source_tx_reference.len(), 42);
        assert_eq!(ledger.burns(), vec![proof]);
    }

    #[tokio::test]
    async fn burn_refuses_overdraft() {
        let ledger = InMemorySourceLedger::new().with_balance("bob", 100);
        let err = ledger.burn("bob", 150).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
        assert_eq!(ledger.balance_of("bob"), 100);
        assert!(ledger.burns().is_empty());
    }

    #[tokio::test]
    async fn pool_payment_moves_funds_into_pool() {
        let ledger = InMemoryPoolLedger::new().with_balance("carol", 10_000);
        ledger.pay_into_pool("carol", 7_500).await.unwrap();
        assert_eq!(ledger.balance_of("carol"), 2_500);
        assert_eq!(ledger.pool_total(), 7_500);

        ledger.set_unreachable(true);
        assert!(matches!(
            ledger.pay_into_pool("carol", 1).await,
            Err(LedgerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn bridge_issues_parseable_credentials_once_per_proof() {
        let bridge = ScriptedBridge::new();
        let proof = InMemorySourceLedger::new()
            .with_balance("dave", 1_500)
            .burn("dave", 1_500)
            .await
            .unwrap();
        let payer = PayerContext::new("dave", "dave-owner");

        let credential = bridge
            .request_activation_token(&proof, NodeClass::Super, &payer)
            .await
            .unwrap();
        let parsed = CodeValidator::parse(&credential.code).unwrap();
        assert_eq!(parsed.class_tag, NodeClass::Super);

        let err = bridge
            .request_activation_token(&proof, NodeClass::Super, &payer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rejected {
                code: BridgeErrorCode::ProofAlreadyUsed,
                ..
            }
        ));
        assert_eq!(bridge.token_requests(), 2);
    }

    #[tokio::test]
    async fn bridge_status_script_sticks_on_last_entry() {
        let bridge = ScriptedBridge::new()
            .with_statuses(vec![ActivationStatus::Pending, ActivationStatus::Verified]);
        let code = "QNET-F1A2B3-C4D5E6-X9Y83K";
        assert_eq!(
            bridge.get_activation_status(code).await.unwrap().status,
            ActivationStatus::Pending
        );
        for _ in 0..3 {
            assert_eq!(
                bridge.get_activation_status(code).await.unwrap().status,
                ActivationStatus::Verified
            );
        }
        assert_eq!(bridge.status_polls(), 4);
    }

    #[tokio::test]
    async fn network_rejects_duplicates_and_scripted_failures() {
        let network = ScriptedTargetNetwork::failing(1);
        assert!(network
            .submit_activation("0xpool", NodeClass::Full, "owner")
            .await
            .is_err());
        let registration = network
            .submit_activation("0xpool", NodeClass::Full, "owner")
            .await
            .unwrap();
        assert!(registration.node_id.starts_with("full-"));
        assert!(network
            .submit_activation("0xpool", NodeClass::Full, "owner")
            .await
            .is_err());
        assert_eq!(network.submissions(), 3);
        assert_eq!(network.registrations(), 1);
    }

    #[tokio::test]
    async fn state_sequence_replays_then_sticks() {
        let first = NetworkPhaseState::new(BurnFraction::from_f64(0.1), 0.5, 10, Utc::now());
        let second = NetworkPhaseState::new(BurnFraction::from_f64(0.95), 0.5, 10, Utc::now());
        let source = StaticNetworkState::sequence(vec![first.clone(), second.clone()]);

        assert_eq!(source.fetch_phase_state().await.unwrap(), first);
        assert_eq!(source.fetch_phase_state().await.unwrap(), second);
        assert_eq!(source.fetch_phase_state().await.unwrap(), second);
        assert_eq!(source.fetches(), 3);
    }
}
