//! Target-network collaborators: phase-state registry and the Phase-2 activation entry point.

use crate::error::GatewayError;
use crate::types::{NetworkPhaseState, NodeClass, NodeRegistration};
use async_trait::async_trait;

#[async_trait]
pub trait NetworkStateSource: Send + Sync {
    /// Fresh observation of burn progress, network age and size.
    async fn fetch_phase_state(&self) -> Result<NetworkPhaseState, GatewayError>;
}

#[async_trait]
pub trait TargetNetwork: Send + Sync {
    /// Registers a node against a committed pool payment. The acknowledgement is terminal.
    async fn submit_activation(
        &self,
        pool_tx_reference: &str,
        node_class: NodeClass,
        owner_address: &str,
    ) -> Result<NodeRegistration, GatewayError>;
}
