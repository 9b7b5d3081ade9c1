//! In-memory transport for tests and offline tooling

use alloy::primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::sync::mpsc;

use super::transport::{LogFilter, LogSubscription, Transport};
use super::{CallOptions, LogRecord, PendingTransaction, TransactOptions};
use crate::error::{BindingError, Result};

const SUBSCRIPTION_BUFFER: usize = 64;

/// A request the mock has seen, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    Call {
        to: Address,
        data: Bytes,
        from: Option<Address>,
    },
    SendTransaction {
        to: Option<Address>,
        data: Bytes,
        from: Address,
        value: U256,
    },
    QueryLogs(LogFilter),
    SubscribeLogs(LogFilter),
}

#[derive(Default)]
struct MockState {
    call_responses: HashMap<[u8; 4], Result<Bytes>>,
    call_error: Option<BindingError>,
    send_error: Option<BindingError>,
    query_error: Option<BindingError>,
    loopback: bool,
    logs: Vec<LogRecord>,
    nonces: HashMap<Address, u64>,
    subscribers: Vec<(LogFilter, mpsc::Sender<Result<LogRecord>>)>,
    requests: Vec<MockRequest>,
}

/// Transport answering from canned responses.
///
/// Calls are answered by selector; `loopback` echoes the argument section of
/// the calldata back as return data. Logs pushed with `push_log` serve
/// historical queries; `emit` delivers to live subscriptions.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    attempts: AtomicUsize,
    unsubscribes: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo calldata (without selector) as return data for unknown selectors
    pub fn loopback() -> Self {
        let transport = Self::default();
        transport.state().loopback = true;
        transport
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_call_response(&self, selector: [u8; 4], data: impl Into<Bytes>) {
        self.state().call_responses.insert(selector, Ok(data.into()));
    }

    pub fn set_call_revert(&self, selector: [u8; 4], reason: &str) {
        self.state().call_responses.insert(
            selector,
            Err(BindingError::ExecutionReverted(Some(reason.to_string()))),
        );
    }

    /// Fail every call that has no canned response
    pub fn fail_calls(&self, error: BindingError) {
        self.state().call_error = Some(error);
    }

    pub fn fail_sends(&self, error: BindingError) {
        self.state().send_error = Some(error);
    }

    pub fn fail_queries(&self, error: BindingError) {
        self.state().query_error = Some(error);
    }

    /// Add a log to the historical record
    pub fn push_log(&self, log: LogRecord) {
        self.state().logs.push(log);
    }

    /// Deliver `log` to every live subscription whose filter matches.
    ///
    /// Returns the number of subscriptions it reached.
    pub fn emit(&self, log: LogRecord) -> usize {
        let mut state = self.state();
        let mut delivered = 0;
        state.subscribers.retain(|(filter, sender)| {
            if sender.is_closed() {
                return false;
            }
            if filter.matches(&log) && sender.try_send(Ok(log.clone())).is_ok() {
                delivered += 1;
            }
            true
        });
        delivered
    }

    /// Push an error into every live subscription
    pub fn fail_subscriptions(&self, error: BindingError) {
        let state = self.state();
        for (_, sender) in &state.subscribers {
            let _ = sender.try_send(Err(error.clone()));
        }
    }

    /// Drop the backend side of every subscription, as a lost connection would
    pub fn drop_subscriptions(&self) {
        self.state().subscribers.clear();
    }

    pub fn live_subscriptions(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|(_, sender)| !sender.is_closed());
        state.subscribers.len()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.state().requests.clone()
    }

    /// Requests that would have reached the network
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    fn record(&self, request: MockRequest) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.state().requests.push(request);
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("attempts", &self.attempts())
            .field("unsubscribes", &self.unsubscribes())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, to: Address, data: Bytes, options: &CallOptions) -> Result<Bytes> {
        self.record(MockRequest::Call {
            to,
            data: data.clone(),
            from: options.from,
        });

        if data.len() < 4 {
            return Err(BindingError::ExecutionReverted(None));
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);

        let state = self.state();
        if let Some(response) = state.call_responses.get(&selector) {
            return response.clone();
        }
        if let Some(error) = &state.call_error {
            return Err(error.clone());
        }
        if state.loopback {
            return Ok(Bytes::from(data[4..].to_vec()));
        }
        Err(BindingError::ExecutionReverted(None))
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
        options: &TransactOptions,
    ) -> Result<PendingTransaction> {
        let from = options.require_signer()?.address();

        self.record(MockRequest::SendTransaction {
            to,
            data: data.clone(),
            from,
            value: options.value,
        });

        let mut state = self.state();
        if let Some(error) = &state.send_error {
            return Err(error.clone());
        }

        let next = state.nonces.entry(from).or_insert(0);
        let nonce = options.nonce.unwrap_or(*next);
        *next = nonce + 1;

        let mut preimage = from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&data);

        Ok(PendingTransaction {
            hash: keccak256(&preimage),
            from,
            nonce,
        })
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        self.record(MockRequest::QueryLogs(filter.clone()));

        let state = self.state();
        if let Some(error) = &state.query_error {
            return Err(error.clone());
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription> {
        self.record(MockRequest::SubscribeLogs(filter.clone()));

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.state().subscribers.push((filter.clone(), sender));

        let unsubscribes = self.unsubscribes.clone();
        Ok(LogSubscription::new(receiver, move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Well-known development key (address 0xf39F...2266)
#[cfg(test)]
pub(crate) fn test_signer() -> alloy::signers::local::PrivateKeySigner {
    use std::str::FromStr;
    alloy::signers::local::PrivateKeySigner::from_str(
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_is_first_dev_account() {
        assert_eq!(
            test_signer().address(),
            alloy::primitives::address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[tokio::test]
    async fn test_canned_and_reverted_calls() {
        let transport = MockTransport::new();
        transport.set_call_response([1, 2, 3, 4], vec![0xaa; 32]);
        transport.set_call_revert([9, 9, 9, 9], "paused");

        let ok = transport
            .call(Address::ZERO, Bytes::from(vec![1, 2, 3, 4]), &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(ok.len(), 32);

        let err = transport
            .call(Address::ZERO, Bytes::from(vec![9, 9, 9, 9]), &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, BindingError::ExecutionReverted(Some("paused".to_string())));
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_send_without_signer_makes_no_attempt() {
        let transport = MockTransport::new();
        let err = transport
            .send_transaction(Some(Address::ZERO), Bytes::new(), &TransactOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, BindingError::AuthRequired);
        assert_eq!(transport.attempts(), 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_nonces_advance_per_sender() {
        let transport = MockTransport::new();
        let options = TransactOptions::new(test_signer());

        let first = transport
            .send_transaction(None, Bytes::from(vec![0x60]), &options)
            .await
            .unwrap();
        let second = transport
            .send_transaction(None, Bytes::from(vec![0x60]), &options)
            .await
            .unwrap();

        assert_eq!(first.nonce, 0);
        assert_eq!(second.nonce, 1);
        assert_ne!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_emit_reaches_matching_subscribers() {
        let transport = MockTransport::new();
        let mut subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        assert_eq!(transport.live_subscriptions(), 1);

        assert_eq!(transport.emit(LogRecord::default()), 1);
        assert!(subscription.recv().await.unwrap().is_ok());

        subscription.unsubscribe();
        assert_eq!(transport.unsubscribes(), 1);
        assert_eq!(transport.live_subscriptions(), 0);
    }
}
