use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::{ChatEvent, PresenceRecord};

use crate::registry::ConnectionRegistry;

/// Turns registry transitions into the presence events everyone else sees.
///
/// All notifications are fire-and-forget: a slow or closed receiver never
/// holds up the transition that produced the event.
#[derive(Clone)]
pub struct PresenceNotifier {
    registry: ConnectionRegistry,
    db: Arc<Database>,
}

impl PresenceNotifier {
    pub fn new(registry: ConnectionRegistry, db: Arc<Database>) -> Self {
        Self { registry, db }
    }

    /// Announce an arrival: everyone else learns who came, everyone gets
    /// the fresh roster.
    pub async fn joined(&self, conn_id: Uuid, identity: &str) {
        info!("{identity} joined the chat");
        self.registry
            .broadcast_except(conn_id, ChatEvent::UserOnline(identity.to_string()))
            .await;
        self.broadcast_roster().await;
    }

    /// Announce a departure, stamping the identity's last-seen record
    /// first so the `userOffline` event and later REST queries agree.
    pub async fn departed(&self, identity: &str) {
        info!("{identity} left the chat");

        // The store keeps millisecond precision; truncate up front so the
        // broadcast value reads back unchanged.
        let last_seen = Utc::now().trunc_subsecs(3);
        let db = self.db.clone();
        let record_for = identity.to_string();
        let stored =
            tokio::task::spawn_blocking(move || db.record_last_seen(&record_for, last_seen)).await;
        match stored {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to record last-seen for {identity}: {err:#}"),
            Err(err) => warn!("last-seen task for {identity} failed: {err}"),
        }

        self.registry
            .broadcast(ChatEvent::UserOffline(PresenceRecord {
                identity: identity.to_string(),
                last_seen,
            }))
            .await;
        self.broadcast_roster().await;
    }

    /// Relay a typing start to everyone but the typist.
    pub async fn typing(&self, conn_id: Uuid, identity: &str) {
        self.registry
            .broadcast_except(conn_id, ChatEvent::UserTyping(identity.to_string()))
            .await;
    }

    /// Relay a typing stop. The client decides when typing has stopped;
    /// the server keeps no timer.
    pub async fn stopped_typing(&self, conn_id: Uuid, identity: &str) {
        self.registry
            .broadcast_except(conn_id, ChatEvent::UserStopTyping(identity.to_string()))
            .await;
    }

    async fn broadcast_roster(&self) {
        let online = self.registry.list_online().await;
        self.registry.broadcast(ChatEvent::UpdateUserList(online)).await;
    }
}
