//! Contract of the verification service that issues activation credentials.
//!
//! Every response is decoded once into a typed envelope at the adapter boundary; the
//! orchestrator and the monitor only ever see the typed payloads below.

use crate::error::GatewayError;
use crate::flow::ActivationStatus;
use crate::types::{ActivationCredential, BurnFraction, BurnProof, NodeClass, PayerContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[async_trait]
pub trait BridgeGateway: Send + Sync {
    fn gateway_id(&self) -> &'static str;

    async fn request_activation_token(
        &self,
        proof: &BurnProof,
        node_class: NodeClass,
        payer: &PayerContext,
    ) -> Result<ActivationCredential, GatewayError>;

    async fn verify_burn_transaction(
        &self,
        tx_reference: &str,
        expected_amount: u64,
        payer_address: &str,
    ) -> Result<BurnVerification, GatewayError>;

    async fn get_activation_status(&self, code: &str) -> Result<StatusSnapshot, GatewayError>;

    async fn get_current_pricing(&self, node_class: NodeClass)
        -> Result<BridgePricing, GatewayError>;

    async fn get_supported_node_classes(&self) -> Result<Vec<NodeClassOffer>, GatewayError>;

    async fn check_health(&self) -> Result<BridgeHealth, GatewayError>;
}

/// Anything the monitor can poll for activation status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll_status(&self, reference: &str) -> Result<StatusSnapshot, GatewayError>;
}

#[async_trait]
impl<T> StatusSource for T
where
    T: BridgeGateway + ?Sized,
{
    async fn poll_status(&self, reference: &str) -> Result<StatusSnapshot, GatewayError> {
        self.get_activation_status(reference).await
    }
}

/// Issued credential as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub credential: String,
    pub node_class: NodeClass,
    pub signature: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    pub fn into_credential(self) -> ActivationCredential {
        ActivationCredential {
            code: self.credential,
            bound_node_class: self.node_class,
            issuing_authority_signature: self.signature,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnVerification {
    pub verified: bool,
    pub amount: u64,
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: ActivationStatus,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub network_tx_reference: Option<String>,
}

impl StatusSnapshot {
    pub fn pending() -> Self {
        Self {
            status: ActivationStatus::Pending,
            node_id: None,
            network_tx_reference: None,
        }
    }
}

/// The service's own view of current pricing; informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePricing {
    pub amount: u64,
    pub base_amount: u64,
    pub floor_amount: u64,
    pub burned_fraction: BurnFraction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequirements {
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub memory_gb: u32,
    #[serde(default)]
    pub storage_gb: u32,
    #[serde(default)]
    pub bandwidth_mbps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassOffer {
    #[serde(rename = "class")]
    pub node_class: NodeClass,
    #[serde(default)]
    pub requirements: NodeRequirements,
    pub current_cost: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeHealth {
    pub healthy: bool,
    pub source_chain_connected: bool,
    pub target_chain_connected: bool,
}

impl BridgeHealth {
    /// Healthy and connected to both ledgers.
    pub fn is_operational(&self) -> bool {
        self.healthy && self.source_chain_connected && self.target_chain_connected
    }
}

/// Typed error codes returned by the verification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorCode {
    ProofAlreadyUsed,
    AmountMismatch,
    ProofNotFound,
    CredentialExpired,
    InvalidRequest,
    Internal,
    #[serde(other)]
    Unknown,
}

impl BridgeErrorCode {
    pub fn name(self) -> &'static str {
        match self {
            Self::ProofAlreadyUsed => "proof_already_used",
            Self::AmountMismatch => "amount_mismatch",
            Self::ProofNotFound => "proof_not_found",
            Self::CredentialExpired => "credential_expired",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }

    /// The service has judged the burn proof itself; no retry of the same proof can succeed.
    pub fn rejects_proof(self) -> bool {
        matches!(
            self,
            Self::ProofAlreadyUsed
                | Self::AmountMismatch
                | Self::ProofNotFound
                | Self::CredentialExpired
        )
    }
}

impl fmt::Display for BridgeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `{"status":"success","data":…}` or `{"status":"error","code":…,"message":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResponse<T> {
    Success {
        data: T,
    },
    Error {
        code: BridgeErrorCode,
        #[serde(default)]
        message: String,
    },
}

impl<T> BridgeResponse<T> {
    pub fn into_result(self) -> Result<T, GatewayError> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Error { code, message } => Err(GatewayError::Rejected { code, message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_success_envelope() {
        let body = r#"{"status":"success","data":{"verified":true,"amount":1200,"confirmations":6}}"#;
        let response: BridgeResponse<BurnVerification> = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.into_result().unwrap(),
            BurnVerification {
                verified: true,
                amount: 1_200,
                confirmations: 6
            }
        );
    }

    #[test]
    fn decodes_error_envelope_with_unknown_code() {
        let body = r#"{"status":"error","code":"rate_limited","message":"slow down"}"#;
        let response: BridgeResponse<BridgeHealth> = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.into_result().unwrap_err(),
            GatewayError::Rejected {
                code: BridgeErrorCode::Unknown,
                message: "slow down".to_string()
            }
        );

        let body = r#"{"status":"error","code":"proof_already_used"}"#;
        let response: BridgeResponse<BridgeHealth> = serde_json::from_str(body).unwrap();
        assert!(matches!(
            response.into_result(),
            Err(GatewayError::Rejected {
                code: BridgeErrorCode::ProofAlreadyUsed,
                ..
            })
        ));
    }

    #[test]
    fn status_snapshot_fields_are_optional() {
        let snapshot: StatusSnapshot = serde_json::from_str(r#"{"status":"verified"}"#).unwrap();
        assert_eq!(snapshot.status, ActivationStatus::Verified);
        assert!(snapshot.node_id.is_none());

        let snapshot: StatusSnapshot = serde_json::from_str(
            r#"{"status":"activated","nodeId":"node-7","networkTxReference":"0xabc"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.node_id.as_deref(), Some("node-7"));
    }

    #[test]
    fn node_class_offer_uses_class_key() {
        let offer: NodeClassOffer =
            serde_json::from_str(r#"{"class":"super","currentCost":1200}"#).unwrap();
        assert_eq!(offer.node_class, NodeClass::Super);
        assert_eq!(offer.requirements, NodeRequirements::default());
    }

    #[test]
    fn only_proof_verdicts_are_terminal() {
        assert!(BridgeErrorCode::ProofAlreadyUsed.rejects_proof());
        assert!(BridgeErrorCode::AmountMismatch.rejects_proof());
        assert!(BridgeErrorCode::ProofNotFound.rejects_proof());
        assert!(BridgeErrorCode::CredentialExpired.rejects_proof());
        assert!(!BridgeErrorCode::Internal.rejects_proof());
        assert!(!BridgeErrorCode::InvalidRequest.rejects_proof());
        assert!(!BridgeErrorCode::Unknown.rejects_proof());
    }

    #[test]
    fn health_requires_both_chains() {
        let health = BridgeHealth {
            healthy: true,
            source_chain_connected: true,
            target_chain_connected: false,
        };
        assert!(!health.is_operational());
    }
}
