//! Broadcast hub: fan-out to display clients and status observers.
//!
//! The hub owns two independent connection pools. Each connection is
//! represented by the sending half of an unbounded channel; a writer task in
//! the server drains the receiving half onto the socket. Fan-out therefore
//! never blocks on a slow socket: a send fails only when the connection's
//! writer task has exited, at which point the member is dropped from the
//! pool. Every display-pool membership change is reported to the status
//! pool as a `count_update`.

use crate::pipeline::messages::{DisplayCommand, StatusUpdate};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Sending half of one client connection. Messages are serialized JSON text
/// frames.
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Identifier for a registered connection, returned on register and required
/// to unregister.
pub type ClientId = u64;

/// Connection registry and broadcast fan-out for both client pools.
#[derive(Default)]
pub struct BroadcastHub {
    display: Mutex<HashMap<ClientId, ClientSender>>,
    status: Mutex<HashMap<ClientId, ClientSender>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected display clients.
    #[must_use]
    pub fn display_count(&self) -> usize {
        self.lock_display().len()
    }

    /// Register a display client. Status observers are notified of the new
    /// count.
    pub async fn register_display(&self, tx: ClientSender) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut pool = self.lock_display();
            pool.insert(id, tx);
            pool.len()
        };
        info!("display client {id} connected (total {count})");
        self.broadcast_status(&StatusUpdate::CountUpdate { count }).await;
        id
    }

    /// Remove a display client. Status observers are notified of the new
    /// count. Safe to call for an already-removed id.
    pub async fn unregister_display(&self, id: ClientId) {
        let count = {
            let mut pool = self.lock_display();
            if pool.remove(&id).is_none() {
                return;
            }
            pool.len()
        };
        info!("display client {id} disconnected (total {count})");
        self.broadcast_status(&StatusUpdate::CountUpdate { count }).await;
    }

    /// Register a status observer and immediately send it the current count.
    pub async fn register_status(&self, tx: ClientSender) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = self.display_count();
        let initial = serialize(&StatusUpdate::CountUpdate { count });
        let _ = tx.send(initial);
        self.lock_status().insert(id, tx);
        id
    }

    /// Remove a status observer. Safe to call for an already-removed id.
    pub fn unregister_status(&self, id: ClientId) {
        self.lock_status().remove(&id);
    }

    /// Broadcast a command to every display client.
    ///
    /// Delivery is best-effort and at-most-once: a failed send removes that
    /// member from the pool and does not affect delivery to the rest. If any
    /// members were dropped, status observers receive an updated count.
    pub async fn broadcast_display(&self, command: &DisplayCommand) {
        let data = serialize(command);
        let (delivered, dropped, count) = {
            let mut pool = self.lock_display();
            if pool.is_empty() {
                info!("no display clients connected; skipping broadcast");
                return;
            }
            let mut dropped = Vec::new();
            for (&id, tx) in pool.iter() {
                if tx.send(data.clone()).is_err() {
                    dropped.push(id);
                }
            }
            for id in &dropped {
                pool.remove(id);
                warn!("dropping display client {id}: send failed");
            }
            (pool.len(), dropped.len(), pool.len())
        };
        info!("broadcast to {delivered} display client(s): {data}");
        if dropped > 0 {
            self.broadcast_status(&StatusUpdate::CountUpdate { count }).await;
        }
    }

    /// Broadcast an update to every status observer. Failed members are
    /// dropped silently; observers carry no state worth reporting on.
    pub async fn broadcast_status(&self, update: &StatusUpdate) {
        let data = serialize(update);
        let mut pool = self.lock_status();
        pool.retain(|_, tx| tx.send(data.clone()).is_ok());
    }

    fn lock_display(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, ClientSender>> {
        self.display
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, ClientSender>> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn serialize<T: serde::Serialize>(value: &T) -> String {
    // The wire enums contain nothing unserializable.
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::pipeline::messages::AnimationClip;
    use crate::state::AvatarState;

    fn channel() -> (ClientSender, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn broadcast_reaches_all_display_clients() {
        let hub = BroadcastHub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.register_display(tx1).await;
        hub.register_display(tx2).await;

        hub.broadcast_display(&DisplayCommand::SetState {
            state: AvatarState::Talking,
        })
        .await;

        for rx in [&mut rx1, &mut rx2] {
            let msg = rx.recv().await.unwrap();
            assert!(msg.contains("\"set_state\""));
            assert!(msg.contains("\"talking\""));
        }
    }

    #[tokio::test]
    async fn failed_member_is_removed_and_others_still_delivered() {
        let hub = BroadcastHub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, rx2) = channel();
        let (tx3, mut rx3) = channel();
        hub.register_display(tx1).await;
        hub.register_display(tx2).await;
        hub.register_display(tx3).await;
        drop(rx2); // dead connection

        let (status_tx, mut status_rx) = channel();
        hub.register_status(status_tx).await;
        // Initial count still includes the dead member.
        let initial: serde_json::Value =
            serde_json::from_str(&status_rx.recv().await.unwrap()).unwrap();
        assert_eq!(initial["count"], 3);

        hub.broadcast_display(&DisplayCommand::StartMixamo {
            clip: AnimationClip::looping("clip.fbx"),
        })
        .await;

        assert!(rx1.recv().await.unwrap().contains("start_mixamo"));
        assert!(rx3.recv().await.unwrap().contains("start_mixamo"));
        assert_eq!(hub.display_count(), 2);

        // Removal is a membership change: observers get the corrected count.
        let update: serde_json::Value =
            serde_json::from_str(&status_rx.recv().await.unwrap()).unwrap();
        assert_eq!(update["type"], "count_update");
        assert_eq!(update["count"], 2);
    }

    #[tokio::test]
    async fn connect_and_disconnect_notify_status_pool() {
        let hub = BroadcastHub::new();
        let (status_tx, mut status_rx) = channel();
        hub.register_status(status_tx).await;
        let first: serde_json::Value =
            serde_json::from_str(&status_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["count"], 0);

        let (tx, _rx) = channel();
        let id = hub.register_display(tx).await;
        let connected: serde_json::Value =
            serde_json::from_str(&status_rx.recv().await.unwrap()).unwrap();
        assert_eq!(connected["count"], 1);

        hub.unregister_display(id).await;
        let disconnected: serde_json::Value =
            serde_json::from_str(&status_rx.recv().await.unwrap()).unwrap();
        assert_eq!(disconnected["count"], 0);

        // Unregistering twice is a no-op.
        hub.unregister_display(id).await;
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn display_clients_do_not_receive_count_updates() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = channel();
        hub.register_display(tx).await;

        let (other_tx, _other_rx) = channel();
        hub.register_display(other_tx).await;

        // Membership changed twice; the display channel stays quiet.
        assert!(rx.try_recv().is_err());
    }
}
