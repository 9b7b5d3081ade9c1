//! Pull-based iteration over decoded contract events

use alloy::json_abi::Event;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::codec::{self, DecodedEvent};
use super::transport::LogSubscription;
use super::LogRecord;
use crate::error::{BindingError, Result};

/// Lifecycle of an `EventStream`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, `next` not yet called
    Idle,
    Active,
    /// Historical source fully consumed
    Exhausted,
    /// Stopped on a decode or subscription error
    Failed,
    /// Closed by the consumer or by cancellation
    Closed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed | Self::Closed)
    }
}

enum Source {
    Historical(VecDeque<LogRecord>),
    Live(LogSubscription),
    Released,
}

enum Delivery {
    Log(Result<LogRecord>),
    End,
    Cancelled,
}

/// Decoded events of one kind, read one at a time with `next`.
///
/// Records come out in backend order. A record that fails to decode stops the
/// stream: earlier records remain with the caller, later ones are never
/// yielded. The underlying subscription is released as soon as the stream
/// reaches a terminal state, and on drop.
pub struct EventStream {
    event: Event,
    source: Source,
    state: StreamState,
    current: Option<DecodedEvent>,
    error: Option<BindingError>,
    cancel: Option<CancellationToken>,
}

impl EventStream {
    /// Stream over an already-fetched batch of logs
    pub fn historical(event: Event, logs: Vec<LogRecord>) -> Self {
        Self::with_source(event, Source::Historical(logs.into()))
    }

    /// Stream over a live subscription
    pub fn live(event: Event, subscription: LogSubscription) -> Self {
        Self::with_source(event, Source::Live(subscription))
    }

    fn with_source(event: Event, source: Source) -> Self {
        Self {
            event,
            source,
            state: StreamState::Idle,
            current: None,
            error: None,
            cancel: None,
        }
    }

    /// Close the stream with `Cancelled` when `token` fires
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Advance to the next record.
    ///
    /// Returns `true` when a record is available from `event`; `false` once
    /// the stream is exhausted, failed or closed.
    pub async fn next(&mut self) -> bool {
        self.current = None;
        if self.state.is_terminal() {
            return false;
        }
        self.state = StreamState::Active;

        match self.receive().await {
            Delivery::Log(Ok(log)) => match codec::decode_log(&self.event, &log) {
                Ok(decoded) => {
                    self.current = Some(decoded);
                    true
                }
                Err(e) => {
                    self.finish(StreamState::Failed, Some(e));
                    false
                }
            },
            Delivery::Log(Err(e)) => {
                let e = match e {
                    BindingError::Subscription(_) => e,
                    other => BindingError::Subscription(other.to_string()),
                };
                self.finish(StreamState::Failed, Some(e));
                false
            }
            Delivery::End => {
                if matches!(self.source, Source::Historical(_)) {
                    self.finish(StreamState::Exhausted, None);
                } else {
                    self.finish(
                        StreamState::Failed,
                        Some(BindingError::Subscription(
                            "subscription closed by the backend".to_string(),
                        )),
                    );
                }
                false
            }
            Delivery::Cancelled => {
                self.finish(StreamState::Closed, Some(BindingError::Cancelled));
                false
            }
        }
    }

    async fn receive(&mut self) -> Delivery {
        if self.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Delivery::Cancelled;
        }

        match &mut self.source {
            Source::Historical(batch) => batch.pop_front().map_or(Delivery::End, |log| Delivery::Log(Ok(log))),
            Source::Live(subscription) => match &self.cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => Delivery::Cancelled,
                    item = subscription.recv() => item.map_or(Delivery::End, Delivery::Log),
                },
                None => subscription
                    .recv()
                    .await
                    .map_or(Delivery::End, Delivery::Log),
            },
            Source::Released => Delivery::End,
        }
    }

    fn finish(&mut self, state: StreamState, error: Option<BindingError>) {
        debug!("Event stream for {} is now {:?}", self.event.name, state);
        self.state = state;
        if error.is_some() {
            self.error = error;
        }
        self.release();
    }

    fn release(&mut self) {
        if let Source::Live(mut subscription) = std::mem::replace(&mut self.source, Source::Released) {
            subscription.unsubscribe();
        }
    }

    /// The record made current by the last successful `next`
    pub fn event(&self) -> Option<&DecodedEvent> {
        self.current.as_ref()
    }

    pub fn take_event(&mut self) -> Option<DecodedEvent> {
        self.current.take()
    }

    /// The error that stopped the stream, if any
    pub fn error(&self) -> Option<&BindingError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Stop the stream and release its subscription. Idempotent.
    pub fn close(&mut self) {
        self.current = None;
        if self.state != StreamState::Closed {
            self.finish(StreamState::Closed, None);
        }
    }

    /// Drain every remaining record.
    ///
    /// Meant for historical streams; on a live stream this waits until the
    /// subscription ends.
    pub async fn collect_remaining(&mut self) -> Result<Vec<DecodedEvent>> {
        let mut events = Vec::new();
        while self.next().await {
            if let Some(event) = self.take_event() {
                events.push(event);
            }
        }
        match self.error() {
            Some(BindingError::Cancelled) | None => Ok(events),
            Some(e) => Err(e.clone()),
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("event", &self.event.name)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::codec::testing::encode_log;
    use crate::ethereum::interface::{fixtures::REWARD_POOL_ABI, Interface};
    use crate::ethereum::mock::MockTransport;
    use crate::ethereum::transport::{LogFilter, Transport};
    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::{Address, Bytes, U256};
    use std::time::Duration;

    fn pool_created() -> Event {
        let interface = Interface::from_json(REWARD_POOL_ABI).unwrap();
        interface.event("PoolCreated").unwrap().clone()
    }

    fn created_log(event: &Event, pool_id: u64) -> LogRecord {
        let mut log = encode_log(
            event,
            &[
                DynSolValue::Uint(U256::from(pool_id), 256),
                DynSolValue::Address(Address::repeat_byte(0x11)),
                DynSolValue::String(format!("pool-{}", pool_id)),
                DynSolValue::Uint(U256::from(1000), 256),
            ],
        );
        log.block_number = Some(100 + pool_id);
        log
    }

    #[tokio::test]
    async fn test_empty_history_is_exhausted() {
        let mut stream = EventStream::historical(pool_created(), Vec::new());
        assert_eq!(stream.state(), StreamState::Idle);

        assert!(!stream.next().await);
        assert_eq!(stream.state(), StreamState::Exhausted);
        assert!(stream.error().is_none());
        assert!(stream.event().is_none());
    }

    #[tokio::test]
    async fn test_history_in_order() {
        let event = pool_created();
        let logs = (1..=3).map(|id| created_log(&event, id)).collect();
        let mut stream = EventStream::historical(event, logs);

        let events = stream.collect_remaining().await.unwrap();
        let ids: Vec<U256> = events.iter().map(|e| e.get("poolId").unwrap()).collect();
        assert_eq!(ids, vec![U256::from(1), U256::from(2), U256::from(3)]);
        assert_eq!(stream.state(), StreamState::Exhausted);
    }

    #[tokio::test]
    async fn test_malformed_record_fails_stream() {
        let event = pool_created();
        let mut broken = created_log(&event, 2);
        broken.data = Bytes::from(vec![0u8; 7]);
        let logs = vec![created_log(&event, 1), broken, created_log(&event, 3)];
        let mut stream = EventStream::historical(event, logs);

        assert!(stream.next().await);
        let first = stream.take_event().unwrap();
        assert_eq!(first.get::<String>("name").unwrap(), "pool-1");

        assert!(!stream.next().await);
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(matches!(stream.error(), Some(BindingError::Decode(_))));

        // the third record is never yielded
        assert!(!stream.next().await);
        assert!(stream.event().is_none());
    }

    #[tokio::test]
    async fn test_collect_reports_failure() {
        let event = pool_created();
        let mut broken = created_log(&event, 1);
        broken.topics.pop();
        let mut stream = EventStream::historical(event, vec![broken]);

        assert!(matches!(
            stream.collect_remaining().await,
            Err(BindingError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_live_delivery_order() {
        let event = pool_created();
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let mut stream = EventStream::live(event.clone(), subscription);

        for id in [5, 3, 9] {
            assert_eq!(transport.emit(created_log(&event, id)), 1);
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            assert!(stream.next().await);
            seen.push(stream.event().unwrap().get::<u64>("poolId").unwrap());
        }
        assert_eq!(seen, vec![5, 3, 9]);
        assert_eq!(stream.state(), StreamState::Active);

        stream.close();
        assert_eq!(transport.unsubscribes(), 1);
    }

    #[tokio::test]
    async fn test_backend_drop_fails_stream() {
        let event = pool_created();
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let mut stream = EventStream::live(event.clone(), subscription);

        transport.emit(created_log(&event, 1));
        transport.drop_subscriptions();

        assert!(stream.next().await);
        assert!(!stream.next().await);
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(matches!(stream.error(), Some(BindingError::Subscription(_))));
        assert_eq!(transport.unsubscribes(), 1);
    }

    #[tokio::test]
    async fn test_subscription_error_fails_stream() {
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let mut stream = EventStream::live(pool_created(), subscription);

        transport.fail_subscriptions(BindingError::Transport("connection reset".to_string()));

        assert!(!stream.next().await);
        assert_eq!(
            stream.error(),
            Some(&BindingError::Subscription("Transport error: connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_twice_unsubscribes_once() {
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let mut stream = EventStream::live(pool_created(), subscription);

        stream.close();
        stream.close();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.error().is_none());
        assert!(!stream.next().await);
        drop(stream);

        assert_eq!(transport.unsubscribes(), 1);
        assert_eq!(transport.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let token = CancellationToken::new();
        let mut stream = EventStream::live(pool_created(), subscription).with_cancel(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        assert!(!stream.next().await);
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.error(), Some(&BindingError::Cancelled));
        assert_eq!(transport.unsubscribes(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let transport = MockTransport::new();
        let subscription = transport.subscribe_logs(&LogFilter::default()).await.unwrap();
        let stream = EventStream::live(pool_created(), subscription);

        drop(stream);
        assert_eq!(transport.unsubscribes(), 1);
    }
}
