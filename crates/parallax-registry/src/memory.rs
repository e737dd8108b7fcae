//! In-process coordination store.
//!
//! Implements the full [`CoordinationStore`] contract including sessions,
//! ephemeral sequential nodes, and child watches. Used by the test suites
//! and for single-process deployments that do not need external
//! coordination.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::store::{ChildWatch, ChildrenChanged, CoordinationStore, SessionId};

#[derive(Debug, Clone)]
struct Node {
    data: String,
    /// Owning session for ephemeral nodes.
    owner: Option<SessionId>,
}

#[derive(Default)]
struct State {
    /// Path → node, ordered so children enumerate in creation order
    /// (sequential suffixes sort lexicographically at fixed width).
    nodes: BTreeMap<String, Node>,
    watchers: BTreeMap<String, Vec<mpsc::UnboundedSender<ChildrenChanged>>>,
    sessions: Vec<SessionId>,
}

/// In-memory store with session-scoped ephemerality.
pub struct MemoryStore {
    state: Mutex<State>,
    next_session: AtomicU64,
    next_sequence: AtomicU64,
    /// Number of connect attempts to fail before succeeding, for
    /// exercising the client's backoff path.
    connect_failures: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_session: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            connect_failures: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Expires a session as if its client disconnected: ephemeral nodes
    /// vanish and affected watches fire.
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.sessions.retain(|s| *s != session);

        let removed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &removed {
            state.nodes.remove(path);
        }

        let parents: Vec<String> = removed
            .iter()
            .filter_map(|path| path.rsplit_once('/').map(|(parent, _)| parent.to_owned()))
            .collect();
        for parent in parents {
            Self::notify(&mut state, &parent);
        }
    }

    /// Number of live sessions, for tests.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.sessions.len())
            .unwrap_or(0)
    }

    fn notify(state: &mut State, parent: &str) {
        if let Some(watchers) = state.watchers.get_mut(parent) {
            watchers.retain(|sender| sender.send(ChildrenChanged).is_ok());
        }
    }

    fn children_of<'a>(state: &'a State, parent: &str) -> Vec<(&'a String, &'a Node)> {
        let prefix = format!("{parent}/");
        state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn connect(&self) -> Result<SessionId, StoreError> {
        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0
            && self
                .connect_failures
                .compare_exchange(failures, failures - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Unavailable("injected connect failure".to_owned()));
        }

        let session = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        self.state
            .lock()
            .expect("store mutex poisoned")
            .sessions
            .push(session);
        Ok(session)
    }

    async fn close_session(&self, session: SessionId) -> Result<(), StoreError> {
        {
            let state = self.state.lock().expect("store mutex poisoned");
            if !state.sessions.contains(&session) {
                return Err(StoreError::SessionNotFound(session.0));
            }
        }
        self.expire_session(session);
        Ok(())
    }

    async fn ensure_node(&self, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.nodes.entry(path.to_owned()).or_insert(Node {
            data: String::new(),
            owner: None,
        });
        Ok(())
    }

    async fn create_ephemeral_sequential(
        &self,
        session: SessionId,
        parent: &str,
        data: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if !state.sessions.contains(&session) {
            return Err(StoreError::SessionNotFound(session.0));
        }
        if !state.nodes.contains_key(parent) {
            return Err(StoreError::NodeNotFound(parent.to_owned()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let path = format!("{parent}/node-{sequence:010}");
        state.nodes.insert(
            path.clone(),
            Node {
                data: data.to_owned(),
                owner: Some(session),
            },
        );
        Self::notify(&mut state, parent);
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if state.nodes.remove(path).is_none() {
            return Err(StoreError::NodeNotFound(path.to_owned()));
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            let parent = parent.to_owned();
            Self::notify(&mut state, &parent);
        }
        Ok(())
    }

    async fn children_data(&self, parent: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(Self::children_of(&state, parent)
            .into_iter()
            .map(|(_, node)| node.data.clone())
            .collect())
    }

    async fn watch_children(&self, parent: &str) -> Result<ChildWatch, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state
            .lock()
            .expect("store mutex poisoned")
            .watchers
            .entry(parent.to_owned())
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_nodes_enumerate_in_creation_order() {
        let store = MemoryStore::new();
        let session = store.connect().await.unwrap();
        store.ensure_node("/svc/hello").await.unwrap();

        store
            .create_ephemeral_sequential(session, "/svc/hello", "a:1")
            .await
            .unwrap();
        store
            .create_ephemeral_sequential(session, "/svc/hello", "b:2")
            .await
            .unwrap();

        let children = store.children_data("/svc/hello").await.unwrap();
        assert_eq!(children, vec!["a:1".to_owned(), "b:2".to_owned()]);
    }

    #[tokio::test]
    async fn session_expiry_removes_ephemerals_and_fires_watch() {
        let store = MemoryStore::new();
        let session = store.connect().await.unwrap();
        store.ensure_node("/svc/hello").await.unwrap();
        let mut watch = store.watch_children("/svc/hello").await.unwrap();

        store
            .create_ephemeral_sequential(session, "/svc/hello", "a:1")
            .await
            .unwrap();
        assert_eq!(watch.recv().await, Some(ChildrenChanged));

        store.expire_session(session);
        assert_eq!(watch.recv().await, Some(ChildrenChanged));
        assert!(store.children_data("/svc/hello").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_session_behaves_like_expiry() {
        let store = MemoryStore::new();
        let session = store.connect().await.unwrap();
        store.ensure_node("/svc/x").await.unwrap();
        store
            .create_ephemeral_sequential(session, "/svc/x", "h:1")
            .await
            .unwrap();

        store.close_session(session).await.unwrap();
        assert!(store.children_data("/svc/x").await.unwrap().is_empty());
        assert_eq!(store.session_count(), 0);

        assert!(matches!(
            store.close_session(session).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn nested_nodes_are_not_direct_children() {
        let store = MemoryStore::new();
        let session = store.connect().await.unwrap();
        store.ensure_node("/svc").await.unwrap();
        store.ensure_node("/svc/hello").await.unwrap();
        store
            .create_ephemeral_sequential(session, "/svc/hello", "h:1")
            .await
            .unwrap();

        // /svc has one direct child: the persistent /svc/hello node.
        let children = store.children_data("/svc").await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn injected_connect_failures() {
        let store = MemoryStore::new();
        store.fail_next_connects(2);
        assert!(store.connect().await.is_err());
        assert!(store.connect().await.is_err());
        assert!(store.connect().await.is_ok());
    }

    #[tokio::test]
    async fn delete_requires_existence() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete("/missing").await,
            Err(StoreError::NodeNotFound(_))
        ));
    }
}
