use alloy::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::{Event, StateMutability},
    primitives::{Address, Bytes, B256},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::codec::{self, DecodedOutput};
use super::events::EventStream;
use super::interface::Interface;
use super::transport::{LogFilter, Transport};
use super::values::FromSolValue;
use super::{with_cancel, CallOptions, PendingTransaction, TransactOptions};
use crate::error::{BindingError, Result};

/// What one handle is bound to: an address, its interface and a backend
struct Binding {
    address: Address,
    interface: Arc<Interface>,
    transport: Arc<dyn Transport>,
}

impl Binding {
    async fn call(&self, name: &str, args: Vec<DynSolValue>, options: &CallOptions) -> Result<DecodedOutput> {
        let function = self.interface.function(name, Some(args.len()))?;
        let data = codec::encode_call(function, args)?;

        debug!("Calling {} on {:?}", function.signature(), self.address);
        let output = self.call_raw(data, options).await?;
        codec::decode_result(function, &output)
    }

    async fn call_raw(&self, data: Bytes, options: &CallOptions) -> Result<Bytes> {
        with_cancel(
            options.cancel.as_ref(),
            self.transport.call(self.address, data, options),
        )
        .await
        .map_err(|e| self.explain_revert(e))
    }

    async fn transact(
        &self,
        name: &str,
        options: &TransactOptions,
        args: Vec<DynSolValue>,
    ) -> Result<PendingTransaction> {
        options.require_signer()?;

        let function = self.interface.function(name, Some(args.len()))?;
        if matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        ) {
            return Err(BindingError::NotTransactable(function.signature()));
        }
        let data = codec::encode_call(function, args)?;

        let pending = self.transact_raw(data, options).await?;
        info!(
            "Submitted {} to {:?}: {:?}",
            function.signature(),
            self.address,
            pending.hash
        );
        Ok(pending)
    }

    async fn transact_raw(&self, data: Bytes, options: &TransactOptions) -> Result<PendingTransaction> {
        options.require_signer()?;
        with_cancel(
            options.cancel.as_ref(),
            self.transport.send_transaction(Some(self.address), data, options),
        )
        .await
        .map_err(|e| self.explain_revert(e))
    }

    /// Replace hex revert data with the interface's custom error, if declared
    fn explain_revert(&self, error: BindingError) -> BindingError {
        match error {
            BindingError::ExecutionReverted(Some(reason)) => {
                let decoded = reason
                    .strip_prefix("0x")
                    .and_then(|data| hex::decode(data).ok())
                    .and_then(|data| self.interface.decode_error(&data));
                BindingError::ExecutionReverted(Some(decoded.unwrap_or(reason)))
            }
            other => other,
        }
    }

    fn build_filter(&self, filter: &EventFilter) -> Result<(Event, LogFilter)> {
        let event = self.interface.event(&filter.event)?.clone();
        let indexed: Vec<_> = event.inputs.iter().filter(|input| input.indexed).collect();

        if filter.indexed.len() > indexed.len() {
            return Err(BindingError::ArgumentMismatch(format!(
                "{} has {} indexed parameters, got {} filter sets",
                event.signature(),
                indexed.len(),
                filter.indexed.len()
            )));
        }

        let mut topics: [Vec<B256>; 4] = Default::default();
        let offset = if event.anonymous {
            0
        } else {
            topics[0] = vec![codec::event_signature_hash(&event)];
            1
        };

        if offset + indexed.len() > topics.len() {
            return Err(BindingError::InvalidDescriptor(format!(
                "{} has more indexed parameters than a log has topics",
                event.signature()
            )));
        }

        for (position, (param, wanted)) in indexed.iter().zip(&filter.indexed).enumerate() {
            let ty = param
                .resolve()
                .map_err(|e| BindingError::InvalidDescriptor(e.to_string()))?;
            topics[offset + position] = wanted
                .iter()
                .cloned()
                .map(|value| codec::topic_for(&ty, value))
                .collect::<Result<_>>()?;
        }

        let log_filter = LogFilter {
            address: Some(self.address),
            topics,
            from_block: filter.from_block,
            to_block: filter.to_block,
        };
        Ok((event, log_filter))
    }

    async fn query(&self, filter: &EventFilter) -> Result<EventStream> {
        let (event, log_filter) = self.build_filter(filter)?;
        let logs = with_cancel(filter.cancel.as_ref(), self.transport.query_logs(&log_filter)).await?;
        debug!("{} {} logs found for {:?}", logs.len(), event.name, self.address);

        let stream = EventStream::historical(event, logs);
        Ok(match &filter.cancel {
            Some(token) => stream.with_cancel(token.clone()),
            None => stream,
        })
    }

    async fn watch(&self, filter: &EventFilter) -> Result<EventStream> {
        let (event, log_filter) = self.build_filter(filter)?;
        let subscription =
            with_cancel(filter.cancel.as_ref(), self.transport.subscribe_logs(&log_filter)).await?;
        debug!("Watching {} on {:?}", event.name, self.address);

        let stream = EventStream::live(event, subscription);
        Ok(match &filter.cancel {
            Some(token) => stream.with_cancel(token.clone()),
            None => stream,
        })
    }
}

/// Event selection for a contract's logs.
///
/// `indexed[i]` lists the accepted values of the event's i-th indexed
/// parameter; an empty list accepts any value. `cancel` aborts the query or
/// subscription and is carried into the resulting stream.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub indexed: Vec<Vec<DynSolValue>>,
    pub cancel: Option<CancellationToken>,
}

impl EventFilter {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    /// Accepted values for the next indexed parameter
    pub fn indexed(mut self, values: Vec<DynSolValue>) -> Self {
        self.indexed.push(values);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A deployed contract seen through its interface.
///
/// Cloning is cheap; clones share the binding. Reads, writes and events are
/// also available as separate views (`caller`, `transactor`, `filterer`).
#[derive(Clone)]
pub struct ContractHandle {
    binding: Arc<Binding>,
}

impl ContractHandle {
    pub fn new(address: Address, interface: Arc<Interface>, transport: Arc<dyn Transport>) -> Self {
        Self {
            binding: Arc::new(Binding {
                address,
                interface,
                transport,
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.binding.address
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.binding.interface
    }

    /// The same contract on a different backend
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Self {
        Self::new(self.address(), self.binding.interface.clone(), transport)
    }

    pub fn caller(&self) -> ContractCaller {
        ContractCaller {
            binding: self.binding.clone(),
        }
    }

    pub fn transactor(&self) -> ContractTransactor {
        ContractTransactor {
            binding: self.binding.clone(),
        }
    }

    pub fn filterer(&self) -> ContractFilterer {
        ContractFilterer {
            binding: self.binding.clone(),
        }
    }

    pub async fn call(&self, name: &str, args: Vec<DynSolValue>) -> Result<DecodedOutput> {
        self.binding.call(name, args, &CallOptions::default()).await
    }

    pub async fn call_with(
        &self,
        name: &str,
        args: Vec<DynSolValue>,
        options: &CallOptions,
    ) -> Result<DecodedOutput> {
        self.binding.call(name, args, options).await
    }

    pub async fn call_as<T: FromSolValue>(&self, name: &str, args: Vec<DynSolValue>) -> Result<T> {
        self.call(name, args).await?.into_value()
    }

    pub async fn call_raw(&self, data: Bytes, options: &CallOptions) -> Result<Bytes> {
        self.binding.call_raw(data, options).await
    }

    pub async fn transact(
        &self,
        name: &str,
        options: &TransactOptions,
        args: Vec<DynSolValue>,
    ) -> Result<PendingTransaction> {
        self.binding.transact(name, options, args).await
    }

    pub async fn transact_raw(&self, data: Bytes, options: &TransactOptions) -> Result<PendingTransaction> {
        self.binding.transact_raw(data, options).await
    }

    pub async fn query_events(&self, filter: &EventFilter) -> Result<EventStream> {
        self.binding.query(filter).await
    }

    pub async fn watch_events(&self, filter: &EventFilter) -> Result<EventStream> {
        self.binding.watch(filter).await
    }
}

impl std::fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.binding.address)
            .finish()
    }
}

/// Read-only view of a contract
#[derive(Clone)]
pub struct ContractCaller {
    binding: Arc<Binding>,
}

impl ContractCaller {
    pub fn address(&self) -> Address {
        self.binding.address
    }

    pub async fn call(&self, name: &str, args: Vec<DynSolValue>) -> Result<DecodedOutput> {
        self.binding.call(name, args, &CallOptions::default()).await
    }

    pub async fn call_with(
        &self,
        name: &str,
        args: Vec<DynSolValue>,
        options: &CallOptions,
    ) -> Result<DecodedOutput> {
        self.binding.call(name, args, options).await
    }

    pub async fn call_as<T: FromSolValue>(&self, name: &str, args: Vec<DynSolValue>) -> Result<T> {
        self.call(name, args).await?.into_value()
    }

    pub async fn call_raw(&self, data: Bytes, options: &CallOptions) -> Result<Bytes> {
        self.binding.call_raw(data, options).await
    }
}

/// Write-only view of a contract
#[derive(Clone)]
pub struct ContractTransactor {
    binding: Arc<Binding>,
}

impl ContractTransactor {
    pub fn address(&self) -> Address {
        self.binding.address
    }

    /// Submit `name(args)`; the transaction is not waited on
    pub async fn transact(
        &self,
        name: &str,
        options: &TransactOptions,
        args: Vec<DynSolValue>,
    ) -> Result<PendingTransaction> {
        self.binding.transact(name, options, args).await
    }

    pub async fn transact_raw(&self, data: Bytes, options: &TransactOptions) -> Result<PendingTransaction> {
        self.binding.transact_raw(data, options).await
    }
}

/// Event view of a contract
#[derive(Clone)]
pub struct ContractFilterer {
    binding: Arc<Binding>,
}

impl ContractFilterer {
    pub fn address(&self) -> Address {
        self.binding.address
    }

    /// Lower an event filter to the topics a node understands
    pub fn build_filter(&self, filter: &EventFilter) -> Result<LogFilter> {
        self.binding.build_filter(filter).map(|(_, log_filter)| log_filter)
    }

    /// Matching historical events
    pub async fn query(&self, filter: &EventFilter) -> Result<EventStream> {
        self.binding.query(filter).await
    }

    /// Matching events as they are emitted
    pub async fn watch(&self, filter: &EventFilter) -> Result<EventStream> {
        self.binding.watch(filter).await
    }
}
