//! Pooled client connections.
//!
//! Each connection owns the write half of a TCP stream plus a reader task
//! that decodes response frames and completes pending requests. Responses
//! are correlated purely by request ID, so any number of calls can be in
//! flight on one connection in any order.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parallax_common::Endpoint;
use parallax_proto::{FrameDecoder, MessageType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{ClientError, Result};
use crate::multiplex::PendingMap;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Idle in the pool.
    Available = 0,
    /// Owned by exactly one caller.
    InUse = 1,
    /// Terminal.
    Closed = 2,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Available,
            1 => Self::InUse,
            _ => Self::Closed,
        }
    }
}

/// A pooled connection to one endpoint.
pub struct PooledConnection {
    id: u64,
    endpoint: Endpoint,
    writer: Mutex<OwnedWriteHalf>,
    state: AtomicU8,
    /// Latch so exactly one `close` call performs cleanup, even when the
    /// reader task already marked the state Closed.
    close_once: std::sync::atomic::AtomicBool,
    created_at: Instant,
    /// Milliseconds since `created_at` of the last use.
    last_used_ms: AtomicU64,
    use_count: AtomicU64,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PooledConnection {
    /// Establishes a connection within `connect_timeout` and spawns its
    /// reader task against `pending`.
    pub async fn open(
        id: u64,
        endpoint: Endpoint,
        connect_timeout: Duration,
        initial_state: ConnectionState,
        pending: Arc<PendingMap>,
        max_frame_size: usize,
    ) -> Result<Arc<Self>> {
        let address = endpoint.to_string();
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ClientError::ConnectTimeout(address.clone()))?
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let connection = Arc::new(Self {
            id,
            endpoint,
            writer: Mutex::new(write_half),
            state: AtomicU8::new(initial_state as u8),
            close_once: std::sync::atomic::AtomicBool::new(false),
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            use_count: AtomicU64::new(0),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(Self::read_loop(
            connection.clone(),
            read_half,
            pending,
            max_frame_size,
        ));
        *connection.reader.lock().await = Some(reader);

        tracing::debug!(id, endpoint = %connection.endpoint, "connection established");
        Ok(connection)
    }

    async fn read_loop(
        connection: Arc<Self>,
        mut read_half: OwnedReadHalf,
        pending: Arc<PendingMap>,
        max_frame_size: usize,
    ) {
        let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
        let mut buf = vec![0u8; 8192];

        'io: loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!(id = connection.id, "peer closed connection");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(id = connection.id, error = %e, "connection read failed");
                    break;
                }
            };

            decoder.feed(&buf[..n]);
            loop {
                match decoder.try_next() {
                    Ok(Some(frame)) => {
                        if frame.message_type != MessageType::Response {
                            tracing::warn!(
                                id = connection.id,
                                "unexpected non-response frame from server"
                            );
                            continue;
                        }
                        match frame.decode_response() {
                            Ok(response) => pending.complete(frame.request_id, response),
                            Err(e) => {
                                pending.fail(frame.request_id, ClientError::Protocol(e));
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Frame-alignment errors poison the stream.
                        tracing::warn!(id = connection.id, error = %e, "protocol violation, closing connection");
                        break 'io;
                    }
                }
            }
        }

        connection.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Connection identifier, unique within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A connection is healthy until its reader observes EOF or an error.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Attempts the Available → InUse transition.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Available as u8,
                ConnectionState::InUse as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Attempts the InUse → Available transition.
    #[must_use]
    pub fn try_release(&self) -> bool {
        let released = self
            .state
            .compare_exchange(
                ConnectionState::InUse as u8,
                ConnectionState::Available as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if released {
            self.touch();
        }
        released
    }

    fn touch(&self) {
        self.last_used_ms
            .store(self.created_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the connection was last used.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        let last = Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Age of the connection.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of frames written over this connection.
    #[must_use]
    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    /// Writes one encoded frame.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(ClientError::Transport("connection closed".to_owned()));
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(frame)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        self.use_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
        Ok(())
    }

    /// Closes the connection. One-way; safe to call repeatedly.
    ///
    /// Returns `true` for the call that performed the transition, so
    /// pool accounting decrements exactly once per connection.
    pub async fn close(&self) -> bool {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        if self.close_once.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        tracing::debug!(id = self.id, endpoint = %self.endpoint, "connection closed");
        true
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("use_count", &self.use_count())
            .finish_non_exhaustive()
    }
}
