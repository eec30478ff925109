use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parlor_types::ChatEvent;

use crate::error::ChatError;

/// Per-connection outbound channel, drained by the connection's writer task.
pub type EventSender = mpsc::UnboundedSender<ChatEvent>;

/// Tracks which connections are joined and who they are.
///
/// Both directions of the mapping plus the outbound senders live in one
/// structure behind one lock, so no caller can ever observe a state where
/// the two maps disagree.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    /// connection id -> identity + outbound channel
    by_conn: HashMap<Uuid, ConnectionEntry>,
    /// identity -> the connection that currently owns it
    by_identity: HashMap<String, Uuid>,
}

struct ConnectionEntry {
    identity: String,
    sender: EventSender,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection under `identity` (trimmed first). A second
    /// connection claiming an already-held identity wins: the earlier
    /// holder is dropped from both maps and stops receiving events,
    /// though its socket is left to close on its own.
    ///
    /// Returns the canonical identity and the evicted connection id, if
    /// there was one.
    pub async fn register(
        &self,
        conn_id: Uuid,
        identity: &str,
        sender: EventSender,
    ) -> Result<(String, Option<Uuid>), ChatError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ChatError::validation("identity must not be empty"));
        }

        let mut state = self.inner.write().await;

        // A connection registering again sheds its previous mapping first.
        if let Some(prev) = state.by_conn.remove(&conn_id) {
            if state.by_identity.get(&prev.identity) == Some(&conn_id) {
                state.by_identity.remove(&prev.identity);
            }
        }

        let evicted = state
            .by_identity
            .insert(identity.to_string(), conn_id)
            .filter(|old| *old != conn_id);
        if let Some(old) = evicted {
            state.by_conn.remove(&old);
            debug!("{identity}: connection {old} superseded by {conn_id}");
        }

        state.by_conn.insert(
            conn_id,
            ConnectionEntry {
                identity: identity.to_string(),
                sender,
            },
        );

        #[cfg(debug_assertions)]
        assert_maps_agree(&state);

        Ok((identity.to_string(), evicted))
    }

    /// Remove a connection. Returns the identity it held, or `None` if it
    /// was never joined or had already been superseded.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<String> {
        let mut state = self.inner.write().await;

        let entry = state.by_conn.remove(&conn_id)?;
        if state.by_identity.get(&entry.identity) == Some(&conn_id) {
            state.by_identity.remove(&entry.identity);
        }

        #[cfg(debug_assertions)]
        assert_maps_agree(&state);

        Some(entry.identity)
    }

    /// The connection currently owning `identity`.
    pub async fn lookup(&self, identity: &str) -> Option<Uuid> {
        self.inner.read().await.by_identity.get(identity).copied()
    }

    /// The identity a connection is joined as.
    pub async fn identity_of(&self, conn_id: Uuid) -> Option<String> {
        self.inner
            .read()
            .await
            .by_conn
            .get(&conn_id)
            .map(|entry| entry.identity.clone())
    }

    /// Sorted snapshot of everyone currently joined.
    pub async fn list_online(&self) -> Vec<String> {
        let state = self.inner.read().await;
        let mut online: Vec<String> = state.by_identity.keys().cloned().collect();
        online.sort();
        online
    }

    /// Deliver to every joined connection.
    pub async fn broadcast(&self, event: ChatEvent) {
        let state = self.inner.read().await;
        for entry in state.by_conn.values() {
            let _ = entry.sender.send(event.clone());
        }
    }

    /// Deliver to every joined connection except `except`.
    pub async fn broadcast_except(&self, except: Uuid, event: ChatEvent) {
        let state = self.inner.read().await;
        for (conn_id, entry) in state.by_conn.iter() {
            if *conn_id != except {
                let _ = entry.sender.send(event.clone());
            }
        }
    }

    /// Deliver to the connection owning `identity`. Returns whether a
    /// live connection was found; a miss is not an error.
    pub async fn send_to_identity(&self, identity: &str, event: ChatEvent) -> bool {
        let state = self.inner.read().await;
        let Some(conn_id) = state.by_identity.get(identity) else {
            return false;
        };
        match state.by_conn.get(conn_id) {
            Some(entry) => entry.sender.send(event).is_ok(),
            None => false,
        }
    }
}

/// The two maps must always describe the same bijection. A disagreement
/// is a bug in this module, so debug builds stop on the spot.
#[cfg(debug_assertions)]
fn assert_maps_agree(state: &RegistryState) {
    assert_eq!(
        state.by_identity.len(),
        state.by_conn.len(),
        "registry maps have diverged in size"
    );
    for (identity, conn_id) in &state.by_identity {
        let held = state
            .by_conn
            .get(conn_id)
            .map(|entry| entry.identity.as_str());
        assert_eq!(
            held,
            Some(identity.as_str()),
            "registry maps disagree about {identity}"
        );
    }
}
