//! The process-local user -> connection table.
//!
//! Invariant: at most one live connection per user per gateway. Registering
//! a user who already holds a connection closes the old one under the same
//! write lock that inserts the new one, so there is no window with two.
//! Reads (broker fan-out) only clone an mpsc sender; no socket I/O happens
//! under the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// What the socket writer task is asked to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    /// Write this JSON text frame.
    Frame(String),
    /// Close the socket; the connection was superseded or the gateway is
    /// shutting down.
    Close,
}

struct ConnectionHandle {
    tx: mpsc::UnboundedSender<SocketCommand>,
    /// Distinguishes successive connections of the same user so a stale
    /// session cannot unregister its successor.
    epoch: u64,
}

#[derive(Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<String, ConnectionHandle>>,
    epochs: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`, force-closing any previous one.
    /// Returns the epoch to pass back to [`unregister`](Self::unregister).
    pub async fn register(&self, user_id: &str, tx: mpsc::UnboundedSender<SocketCommand>) -> u64 {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let mut table = self.inner.write().await;
        if let Some(old) = table.insert(user_id.to_string(), ConnectionHandle { tx, epoch }) {
            parley_metrics::CONNECTIONS_SUPERSEDED_TOTAL.inc();
            tracing::info!(user_id, "closing superseded connection");
            let _ = old.tx.send(SocketCommand::Close);
        }
        epoch
    }

    /// Remove the entry, but only if it still belongs to the session that
    /// registered it.
    pub async fn unregister(&self, user_id: &str, epoch: u64) -> bool {
        let mut table = self.inner.write().await;
        match table.get(user_id) {
            Some(handle) if handle.epoch == epoch => {
                table.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Hand a frame to the user's writer task. Returns false when the user
    /// has no connection on this gateway.
    pub async fn send_frame(&self, user_id: &str, frame: String) -> bool {
        let table = self.inner.read().await;
        match table.get(user_id) {
            Some(handle) => handle.tx.send(SocketCommand::Frame(frame)).is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.inner.read().await.contains_key(user_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Ask every writer task to close. Used on shutdown.
    pub async fn close_all(&self) {
        let table = self.inner.read().await;
        for handle in table.values() {
            let _ = handle.tx.send(SocketCommand::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_connection_closes_the_first() {
        let table = ConnectionTable::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        table.register("u1", tx1).await;
        let epoch2 = table.register("u1", tx2).await;

        // Exactly one entry survives and the old handle was told to close.
        assert_eq!(table.len().await, 1);
        assert_eq!(rx1.recv().await, Some(SocketCommand::Close));

        assert!(table.send_frame("u1", "{}".to_string()).await);
        assert_eq!(rx2.recv().await, Some(SocketCommand::Frame("{}".to_string())));
        let _ = epoch2;
    }

    #[tokio::test]
    async fn stale_session_cannot_unregister_its_successor() {
        let table = ConnectionTable::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let epoch1 = table.register("u1", tx1).await;
        let epoch2 = table.register("u1", tx2).await;

        // The superseded session tears down last; the live entry stays.
        assert!(!table.unregister("u1", epoch1).await);
        assert!(table.is_connected("u1").await);

        assert!(table.unregister("u1", epoch2).await);
        assert!(!table.is_connected("u1").await);
    }

    #[tokio::test]
    async fn frames_to_absent_users_are_dropped() {
        let table = ConnectionTable::new();
        assert!(!table.send_frame("nobody", "{}".to_string()).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn close_all_reaches_every_connection() {
        let table = ConnectionTable::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        table.register("u1", tx1).await;
        table.register("u2", tx2).await;

        table.close_all().await;
        assert_eq!(rx1.recv().await, Some(SocketCommand::Close));
        assert_eq!(rx2.recv().await, Some(SocketCommand::Close));
    }
}
