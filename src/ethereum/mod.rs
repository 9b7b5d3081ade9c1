pub mod artifact;
pub mod codec;
pub mod contract;
pub mod deploy;
pub mod events;
pub mod interface;
pub mod json;
pub mod mock;
pub mod provider;
pub mod transport;
pub mod utils;
pub mod values;

use alloy::{
    eips::BlockId,
    primitives::{Address, Bytes, TxHash, B256, U256},
    rpc::types::Log,
    signers::local::PrivateKeySigner,
};
use tokio_util::sync::CancellationToken;

use crate::error::{BindingError, Result};

/// A raw log as emitted by a contract, with its chain provenance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    pub address: Address,
    /// `topics[0]` is the event signature hash for non-anonymous events
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<TxHash>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    pub removed: bool,
}

impl From<Log> for LogRecord {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash,
            transaction_index: log.transaction_index,
            log_index: log.log_index,
            removed: log.removed,
        }
    }
}

/// A submitted, unconfirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
}

impl PendingTransaction {
    /// Address a contract created by this transaction will live at
    pub fn create_address(&self) -> Address {
        self.from.create(self.nonce)
    }
}

/// Options for read-only invocations
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Caller identity override (`msg.sender` during the call)
    pub from: Option<Address>,
    pub block: BlockId,
    pub cancel: Option<CancellationToken>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            from: None,
            block: BlockId::latest(),
            cancel: None,
        }
    }
}

impl CallOptions {
    pub fn caller(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn at_block(mut self, block: impl Into<BlockId>) -> Self {
        self.block = block.into();
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Options for state-changing invocations
#[derive(Debug, Clone, Default)]
pub struct TransactOptions {
    pub signer: Option<PrivateKeySigner>,
    /// Wei attached to the transaction
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
    pub cancel: Option<CancellationToken>,
}

impl TransactOptions {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer: Some(signer),
            ..Default::default()
        }
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The configured signer, or `AuthRequired`
    pub fn require_signer(&self) -> Result<&PrivateKeySigner> {
        self.signer.as_ref().ok_or(BindingError::AuthRequired)
    }
}

/// Run a suspending operation unless `cancel` fires first
pub(crate) async fn with_cancel<T, F>(cancel: Option<&CancellationToken>, operation: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match cancel {
        Some(token) if token.is_cancelled() => Err(BindingError::Cancelled),
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(BindingError::Cancelled),
            result = operation => result,
        },
        None => operation.await,
    }
}
