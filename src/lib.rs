//! Typed bindings for EVM contracts: ABI encoding and decoding, a pluggable
//! node transport, contract handles with read/write/event views, cancellable
//! event streams and deployment.

pub mod config;
pub mod error;
pub mod ethereum;

pub use error::{BindingError, Result};
pub use ethereum::{
    artifact::{Artifact, ArtifactResolver, ArtifactSource},
    codec::{DecodedEvent, DecodedOutput, EventField, Record},
    contract::{ContractCaller, ContractFilterer, ContractHandle, ContractTransactor, EventFilter},
    deploy::{Deployer, Deployment},
    events::{EventStream, StreamState},
    interface::Interface,
    mock::MockTransport,
    provider::{ProviderManager, RpcTransport},
    transport::{LogFilter, LogSubscription, Transport},
    values::FromSolValue,
    CallOptions, LogRecord, PendingTransaction, TransactOptions,
};
