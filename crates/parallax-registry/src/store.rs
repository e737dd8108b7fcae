//! Coordination store contract.
//!
//! The framework registers services in a strongly consistent key/value
//! store offering ephemeral sequential nodes and child-change watches.
//! Only the client-side contract lives here; [`crate::memory::MemoryStore`]
//! implements it in-process for tests and local development.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

/// Identifier of a store session.
///
/// Ephemeral nodes belong to the session that created them; the store
/// removes them when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Notification that a parent's child set changed.
///
/// Watchers reread the children on every event rather than trusting an
/// event payload; the channel only signals that something changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildrenChanged;

/// Receiving half of a child watch.
pub type ChildWatch = mpsc::UnboundedReceiver<ChildrenChanged>;

/// Client contract of the coordination service.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Opens a session. May fail transiently; callers retry with backoff.
    async fn connect(&self) -> Result<SessionId, StoreError>;

    /// Ends a session, removing its ephemeral nodes and firing watches.
    async fn close_session(&self, session: SessionId) -> Result<(), StoreError>;

    /// Creates a persistent node at `path` if absent.
    async fn ensure_node(&self, path: &str) -> Result<(), StoreError>;

    /// Creates an ephemeral sequential child of `parent` carrying `data`.
    ///
    /// Returns the full path of the created child.
    async fn create_ephemeral_sequential(
        &self,
        session: SessionId,
        parent: &str,
        data: &str,
    ) -> Result<String, StoreError>;

    /// Deletes the node at `path`.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Data bodies of all children of `parent`, creation order.
    async fn children_data(&self, parent: &str) -> Result<Vec<String>, StoreError>;

    /// Installs a watch firing at least once per child-set change under
    /// `parent`.
    async fn watch_children(&self, parent: &str) -> Result<ChildWatch, StoreError>;
}
