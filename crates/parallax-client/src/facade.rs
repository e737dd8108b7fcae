//! Bounded async facade and batch submission.

use std::sync::Arc;

use parallax_proto::{RpcRequest, RpcResponse};
use tokio::sync::{oneshot, Semaphore};

use crate::client::RpcClient;
use crate::error::{ClientError, Result};

/// Handle to an in-flight call submitted through [`AsyncRpcClient`].
pub struct CallHandle {
    receiver: oneshot::Receiver<Result<RpcResponse>>,
}

impl CallHandle {
    /// Awaits the response.
    pub async fn join(self) -> Result<RpcResponse> {
        self.receiver
            .await
            .unwrap_or(Err(ClientError::Cancelled))
    }
}

/// Fire-and-await facade with fail-fast backpressure.
///
/// A semaphore sized at twice the configured pending-request bound gates
/// submission: when it is exhausted, `submit` fails immediately with
/// `Saturated` instead of queueing unboundedly.
pub struct AsyncRpcClient {
    client: Arc<RpcClient>,
    permits: Arc<Semaphore>,
}

impl AsyncRpcClient {
    /// Wraps `client` with the saturation bound.
    #[must_use]
    pub fn new(client: Arc<RpcClient>) -> Self {
        let bound = client.max_pending_requests() * 2;
        Self {
            client,
            permits: Arc::new(Semaphore::new(bound)),
        }
    }

    /// Submits a call without awaiting it.
    ///
    /// Fails fast with [`ClientError::Saturated`] at the in-flight bound.
    pub fn submit(&self, request: RpcRequest) -> Result<CallHandle> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ClientError::Saturated)?;

        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client.call(request).await;
            drop(permit);
            // A dropped receiver means the caller cancelled; the result is
            // discarded either way.
            let _ = tx.send(result);
        });

        Ok(CallHandle { receiver: rx })
    }

    /// Submits every request and awaits all results in order.
    ///
    /// Saturation applies per request: submissions beyond the bound fail
    /// with `Saturated` in their slot without affecting the rest.
    pub async fn call_batch(&self, requests: Vec<RpcRequest>) -> Vec<Result<RpcResponse>> {
        let handles: Vec<Result<CallHandle>> =
            requests.into_iter().map(|r| self.submit(r)).collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle {
                Ok(handle) => results.push(handle.join().await),
                Err(error) => results.push(Err(error)),
            }
        }
        results
    }

    /// Permits currently available before saturation.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
