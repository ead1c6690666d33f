//! Collaborator adapters for QNet node activation.
//!
//! `http` talks to the verification service and the target-network registry over REST.
//! `memory` provides deterministic ledgers, bridge and network doubles for local runs.

#![deny(unsafe_code)]

pub mod http;
pub mod memory;

pub use http::{HttpBridgeGateway, HttpNetworkRegistry};
pub use memory::{
    InMemoryPoolLedger, InMemorySourceLedger, ScriptedBridge, ScriptedTargetNetwork, SpendFault,
    StaticNetworkState,
};
