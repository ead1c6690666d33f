//! Payer-side ledgers. Balance reads are advisory; the spend itself is atomic on the ledger.

use crate::error::LedgerError;
use crate::types::{BurnProof, PoolPayment};
use async_trait::async_trait;

/// Capped-supply token ledger where Phase-1 burns happen.
#[async_trait]
pub trait SourceLedger: Send + Sync {
    fn ledger_id(&self) -> &'static str;

    async fn source_balance(&self, address: &str) -> Result<u64, LedgerError>;

    /// Irreversibly destroys `amount` from `address`.
    async fn burn(&self, address: &str, amount: u64) -> Result<BurnProof, LedgerError>;
}

/// Native-token ledger holding the redistribution pool.
#[async_trait]
pub trait PoolLedger: Send + Sync {
    fn ledger_id(&self) -> &'static str;

    async fn native_balance(&self, address: &str) -> Result<u64, LedgerError>;

    async fn pay_into_pool(&self, address: &str, amount: u64) -> Result<PoolPayment, LedgerError>;
}
