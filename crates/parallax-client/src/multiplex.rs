//! Pending-request correlation.
//!
//! Every outbound request registers a completion handle keyed by its
//! request ID. Responses arriving on any connection complete the handle;
//! a sweeper reclaims entries whose caller stopped waiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parallax_proto::RpcResponse;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

struct PendingEntry {
    tx: oneshot::Sender<Result<RpcResponse, ClientError>>,
    enqueued: Instant,
}

/// Completion handle returned to the caller of [`PendingMap::register`].
pub type PendingReceiver = oneshot::Receiver<Result<RpcResponse, ClientError>>;

/// Map from request ID to completion handle.
///
/// Exactly one of completion, cancellation, or timeout removes each entry;
/// the map never retains an entry past its terminal event.
#[derive(Default)]
pub struct PendingMap {
    entries: DashMap<u64, PendingEntry>,
}

impl PendingMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request_id` and returns the completion handle.
    pub fn register(&self, request_id: u64) -> PendingReceiver {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id,
            PendingEntry {
                tx,
                enqueued: Instant::now(),
            },
        );
        rx
    }

    /// Completes `request_id` with a response.
    ///
    /// Unknown IDs are logged and dropped: the entry may have timed out or
    /// been cancelled before the response arrived.
    pub fn complete(&self, request_id: u64, response: RpcResponse) {
        match self.entries.remove(&request_id) {
            Some((_, entry)) => {
                // A dropped receiver means the caller went away; the late
                // response is discarded.
                let _ = entry.tx.send(Ok(response));
            }
            None => {
                tracing::warn!(request_id, "response for unknown request id");
            }
        }
    }

    /// Fails `request_id` with an error.
    pub fn fail(&self, request_id: u64, error: ClientError) {
        if let Some((_, entry)) = self.entries.remove(&request_id) {
            let _ = entry.tx.send(Err(error));
        }
    }

    /// Removes `request_id` without completing it (cancellation).
    pub fn cancel(&self, request_id: u64) {
        self.entries.remove(&request_id);
    }

    /// Fails every entry older than `timeout` with `RequestTimeout`.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().enqueued) > timeout)
            .map(|entry| *entry.key())
            .collect();

        for request_id in &expired {
            self.fail(*request_id, ClientError::RequestTimeout(*request_id));
        }

        if !expired.is_empty() {
            tracing::warn!(reclaimed = expired.len(), "swept timed-out pending requests");
        }
        expired.len()
    }

    /// Fails every entry, used when the client closes.
    pub fn fail_all(&self, make_error: impl Fn(u64) -> ClientError) {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        for request_id in ids {
            self.fail(request_id, make_error(request_id));
        }
    }

    /// Number of in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the periodic timeout sweeper.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        request_timeout: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pending = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pending.sweep(request_timeout);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use parallax_proto::Value;

    use super::*;

    #[tokio::test]
    async fn complete_delivers_and_removes() {
        let pending = PendingMap::new();
        let rx = pending.register(1);
        assert_eq!(pending.len(), 1);

        pending.complete(1, RpcResponse::success(Value::from("ok")));
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.payload, Some(Value::from("ok")));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn fail_delivers_the_error() {
        let pending = PendingMap::new();
        let rx = pending.register(2);
        pending.fail(2, ClientError::PoolClosed);

        assert!(matches!(rx.await.unwrap(), Err(ClientError::PoolClosed)));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_completion_is_dropped() {
        let pending = PendingMap::new();
        pending.complete(99, RpcResponse::success(Value::Null));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn cancellation_drops_late_responses() {
        let pending = PendingMap::new();
        let rx = pending.register(3);
        pending.cancel(3);
        assert!(pending.is_empty());

        // The late response finds no entry.
        pending.complete(3, RpcResponse::success(Value::Null));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn sweep_expires_only_old_entries() {
        let pending = PendingMap::new();
        let old_rx = pending.register(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let new_rx = pending.register(2);

        let reclaimed = pending.sweep(Duration::from_millis(25));
        assert_eq!(reclaimed, 1);
        assert_eq!(pending.len(), 1);

        assert!(matches!(
            old_rx.await.unwrap(),
            Err(ClientError::RequestTimeout(1))
        ));

        pending.complete(2, RpcResponse::success(Value::Null));
        assert!(new_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn sweeper_task_reclaims_within_two_intervals() {
        let pending = Arc::new(PendingMap::new());
        let cancel = CancellationToken::new();
        let handle = pending.spawn_sweeper(
            Duration::from_millis(50),
            Duration::from_millis(100),
            cancel.clone(),
        );

        let rx = pending.register(7);
        // Timeout 100 ms, sweep every 50 ms: reclaimed within 200 ms.
        let result = tokio::time::timeout(Duration::from_millis(250), rx)
            .await
            .expect("sweeper must fail the entry in time")
            .unwrap();
        assert!(matches!(result, Err(ClientError::RequestTimeout(7))));
        assert!(pending.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn fail_all_clears_the_map() {
        let pending = PendingMap::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        pending.fail_all(|_| ClientError::PoolClosed);
        assert!(pending.is_empty());
        assert!(matches!(rx1.await.unwrap(), Err(ClientError::PoolClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(ClientError::PoolClosed)));
    }
}
