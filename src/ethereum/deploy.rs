use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use std::sync::Arc;
use tracing::info;

use super::artifact::Artifact;
use super::codec;
use super::contract::ContractHandle;
use super::interface::Interface;
use super::transport::Transport;
use super::{with_cancel, PendingTransaction, TransactOptions};
use crate::error::{BindingError, Result};

/// Result of submitting a creation transaction
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Where the contract will live once the transaction is mined
    pub address: Address,
    pub pending: PendingTransaction,
    /// Handle bound to `address`
    pub contract: ContractHandle,
}

/// Creates contracts from an interface and its creation bytecode
#[derive(Debug, Clone)]
pub struct Deployer {
    interface: Arc<Interface>,
    bytecode: Bytes,
}

impl Deployer {
    pub fn new(interface: Arc<Interface>, bin: &str) -> Result<Self> {
        let bin = bin.trim();
        let hex_part = bin.strip_prefix("0x").unwrap_or(bin);
        if hex_part.is_empty() {
            return Err(BindingError::Deployment("bytecode is empty".to_string()));
        }
        let bytecode = hex::decode(hex_part)
            .map_err(|e| BindingError::Deployment(format!("bytecode is not valid hex: {}", e)))?;

        Ok(Self {
            interface,
            bytecode: Bytes::from(bytecode),
        })
    }

    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        let bin = artifact
            .bin()
            .ok_or_else(|| BindingError::Deployment("artifact carries no bytecode".to_string()))?;
        let interface = Interface::new(artifact.abi.clone())?;
        Self::new(Arc::new(interface), bin)
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }

    /// Creation bytecode with the encoded constructor arguments appended
    pub fn encode_constructor(&self, args: Vec<DynSolValue>) -> Result<Bytes> {
        codec::encode_constructor(&self.interface, &self.bytecode, args).map_err(|e| match e {
            BindingError::ArgumentMismatch(reason) | BindingError::InvalidDescriptor(reason) => {
                BindingError::Deployment(format!("constructor arguments: {}", reason))
            }
            other => other,
        })
    }

    /// Submit the creation transaction and bind a handle to the new address.
    ///
    /// The transaction is not waited on; the address is derived from the
    /// sender and nonce.
    pub async fn deploy(
        &self,
        transport: Arc<dyn Transport>,
        options: &TransactOptions,
        args: Vec<DynSolValue>,
    ) -> Result<Deployment> {
        options.require_signer()?;
        let init_code = self.encode_constructor(args)?;

        let pending = with_cancel(
            options.cancel.as_ref(),
            transport.send_transaction(None, init_code, options),
        )
        .await?;

        let address = pending.create_address();
        info!(
            "Deployment submitted in {:?}, contract address {:?}",
            pending.hash, address
        );

        Ok(Deployment {
            address,
            pending,
            contract: ContractHandle::new(address, self.interface.clone(), transport),
        })
    }
}
