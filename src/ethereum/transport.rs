//! The backend seam: everything that touches a node goes through `Transport`

use alloy::{
    primitives::{Address, Bytes, B256},
    rpc::types::Filter,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CallOptions, LogRecord, PendingTransaction, TransactOptions};
use crate::error::Result;

/// Operations a node backend must provide.
///
/// Implementations must tolerate concurrent use from many handles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read-only execution of `data` against `to`
    async fn call(&self, to: Address, data: Bytes, options: &CallOptions) -> Result<Bytes>;

    /// Sign and submit a transaction; `to = None` creates a contract.
    ///
    /// Fails with `AuthRequired` before any I/O when no signer is set.
    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
        options: &TransactOptions,
    ) -> Result<PendingTransaction>;

    /// One-shot historical log query
    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>>;

    /// Live log subscription
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription>;
}

/// Transport-level log query: address plus up to four topic sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<Address>,
    /// Per-position alternatives; an empty set matches anything
    pub topics: [Vec<B256>; 4],
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    /// Whether `log` satisfies this filter, as a node would decide
    pub fn matches(&self, log: &LogRecord) -> bool {
        if self.address.is_some_and(|address| address != log.address) {
            return false;
        }
        if let (Some(from), Some(block)) = (self.from_block, log.block_number) {
            if block < from {
                return false;
            }
        }
        if let (Some(to), Some(block)) = (self.to_block, log.block_number) {
            if block > to {
                return false;
            }
        }
        self.topics.iter().enumerate().all(|(i, wanted)| {
            wanted.is_empty() || log.topics.get(i).is_some_and(|topic| wanted.contains(topic))
        })
    }

    pub fn to_rpc(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(address) = self.address {
            filter = filter.address(address);
        }
        if let Some(from) = self.from_block {
            filter = filter.from_block(from);
        }
        if let Some(to) = self.to_block {
            filter = filter.to_block(to);
        }

        let [t0, t1, t2, t3] = self.topics.clone();
        if !t0.is_empty() {
            filter = filter.event_signature(t0);
        }
        if !t1.is_empty() {
            filter = filter.topic1(t1);
        }
        if !t2.is_empty() {
            filter = filter.topic2(t2);
        }
        if !t3.is_empty() {
            filter = filter.topic3(t3);
        }
        filter
    }
}

type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// A live stream of logs owned by one consumer.
///
/// The unsubscribe action runs exactly once: on `unsubscribe`, or on drop.
pub struct LogSubscription {
    logs: mpsc::Receiver<Result<LogRecord>>,
    unsubscribe: Option<Unsubscribe>,
}

impl LogSubscription {
    pub fn new(
        logs: mpsc::Receiver<Result<LogRecord>>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            logs,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next delivered log; `None` once the backend side has gone away
    pub async fn recv(&mut self) -> Option<Result<LogRecord>> {
        if self.unsubscribe.is_none() {
            return None;
        }
        self.logs.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            self.logs.close();
            unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{primitives::address, rpc::types::Topic};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn log_at(block: u64, topics: Vec<B256>) -> LogRecord {
        LogRecord {
            address: address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            topics,
            block_number: Some(block),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_matching() {
        let signature = B256::repeat_byte(1);
        let pool = B256::repeat_byte(2);
        let filter = LogFilter {
            address: Some(address!("5FbDB2315678afecb367f032d93F642f64180aa3")),
            topics: [vec![signature], vec![pool], vec![], vec![]],
            from_block: Some(10),
            to_block: Some(20),
        };

        assert!(filter.matches(&log_at(15, vec![signature, pool, B256::ZERO])));
        assert!(!filter.matches(&log_at(9, vec![signature, pool])));
        assert!(!filter.matches(&log_at(21, vec![signature, pool])));
        assert!(!filter.matches(&log_at(15, vec![signature, B256::ZERO])));
        assert!(!filter.matches(&log_at(15, vec![signature])));

        let mut elsewhere = log_at(15, vec![signature, pool]);
        elsewhere.address = Address::ZERO;
        assert!(!filter.matches(&elsewhere));
    }

    #[test]
    fn test_rpc_filter_carries_topics() {
        let filter = LogFilter {
            address: Some(Address::ZERO),
            topics: [vec![B256::repeat_byte(1)], vec![], vec![B256::repeat_byte(3)], vec![]],
            from_block: Some(1),
            to_block: None,
        };
        let rpc = filter.to_rpc();
        assert_eq!(rpc.topics[0], Topic::from(vec![B256::repeat_byte(1)]));
        assert!(rpc.topics[1].is_empty());
        assert_eq!(rpc.topics[2], Topic::from(vec![B256::repeat_byte(3)]));
    }

    #[tokio::test]
    async fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (_tx, rx) = mpsc::channel(4);

        let mut subscription = LogSubscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(subscription.recv().await.is_none());
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(LogRecord::default())).await.unwrap();

        let mut subscription = LogSubscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(subscription.recv().await.unwrap().is_ok());
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
