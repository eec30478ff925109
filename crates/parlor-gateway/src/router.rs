use std::sync::Arc;

use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::{ChatEvent, ClientCommand};

use crate::error::ChatError;
use crate::presence::PresenceNotifier;
use crate::registry::{ConnectionRegistry, EventSender};

/// How many public-room messages a history push carries.
pub const PUBLIC_HISTORY_LIMIT: u32 = 20;

/// The hub every connection task talks to: validates each command,
/// persists before any fan-out, and addresses the results through the
/// registry.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    presence: PresenceNotifier,
    db: Arc<Database>,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry, db: Arc<Database>) -> Self {
        let presence = PresenceNotifier::new(registry.clone(), db.clone());
        Self {
            registry,
            presence,
            db,
        }
    }

    /// Entry point for connection tasks. `identity` is the connection's
    /// authenticated identity; `reply` reaches the originating connection
    /// whether or not it has joined yet.
    pub async fn handle(
        &self,
        conn_id: Uuid,
        identity: &str,
        reply: &EventSender,
        cmd: ClientCommand,
    ) {
        match cmd {
            ClientCommand::Join => self.join(conn_id, identity, reply).await,

            ClientCommand::SendMessage { content } => {
                if let Some(me) = self.require_joined(conn_id, reply).await {
                    self.public_send(&me, &content, reply).await;
                }
            }

            ClientCommand::PrivateMessage { recipient, content } => {
                if let Some(me) = self.require_joined(conn_id, reply).await {
                    self.private_send(&me, &recipient, &content, reply).await;
                }
            }

            ClientCommand::FetchPrivateHistory { peer } => {
                if let Some(me) = self.require_joined(conn_id, reply).await {
                    self.private_history(&me, &peer, reply).await;
                }
            }

            ClientCommand::FetchPublicHistory => {
                if self.require_joined(conn_id, reply).await.is_some() {
                    self.public_history(reply).await;
                }
            }

            ClientCommand::Typing => {
                if let Some(me) = self.require_joined(conn_id, reply).await {
                    self.presence.typing(conn_id, &me).await;
                }
            }

            ClientCommand::StopTyping => {
                if let Some(me) = self.require_joined(conn_id, reply).await {
                    self.presence.stopped_typing(conn_id, &me).await;
                }
            }
        }
    }

    /// Connection teardown, called by the owning connection task once its
    /// socket is gone. Evicted connections unregister as a no-op here, so
    /// their departure neither broadcasts nor touches the last-seen record.
    pub async fn disconnect(&self, conn_id: Uuid) {
        if let Some(identity) = self.registry.unregister(conn_id).await {
            self.presence.departed(&identity).await;
        }
    }

    async fn join(&self, conn_id: Uuid, identity: &str, reply: &EventSender) {
        let (identity, superseded) = match self
            .registry
            .register(conn_id, identity, reply.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report(reply, &err);
                return;
            }
        };
        if superseded.is_some() {
            debug!("{identity} rejoined from a new connection");
        }

        match self.run_db(move |db| db.recent_public(PUBLIC_HISTORY_LIMIT)).await {
            Ok(history) => {
                let _ = reply.send(ChatEvent::ChatHistory(history));
            }
            Err(err) => self.report(reply, &err),
        }

        self.presence.joined(conn_id, &identity).await;
    }

    async fn public_send(&self, identity: &str, content: &str, reply: &EventSender) {
        let content = content.trim();
        if content.is_empty() {
            self.report(reply, &ChatError::validation("message content must not be empty"));
            return;
        }

        let sender = identity.to_string();
        let body = content.to_string();
        match self.run_db(move |db| db.append_public(&sender, &body)).await {
            Ok(stored) => {
                debug!("{} -> public room ({} bytes)", stored.sender, stored.content.len());
                self.registry.broadcast(ChatEvent::ReceiveMessage(stored)).await;
            }
            Err(err) => self.report(reply, &err),
        }
    }

    async fn private_send(
        &self,
        identity: &str,
        recipient: &str,
        content: &str,
        reply: &EventSender,
    ) {
        let content = content.trim();
        if content.is_empty() {
            self.report(reply, &ChatError::validation("message content must not be empty"));
            return;
        }
        let recipient = recipient.trim();
        if recipient.is_empty() {
            self.report(reply, &ChatError::validation("recipient must not be empty"));
            return;
        }

        let sender = identity.to_string();
        let to = recipient.to_string();
        let body = content.to_string();
        let stored = match self.run_db(move |db| db.append_private(&sender, &to, &body)).await {
            Ok(stored) => stored,
            Err(err) => {
                self.report(reply, &err);
                return;
            }
        };

        // Point-to-point with no sender echo; a message to yourself is
        // kept but not pushed anywhere.
        if stored.receiver != identity {
            let delivered = self
                .registry
                .send_to_identity(
                    &stored.receiver,
                    ChatEvent::ReceivePrivateMessage {
                        sender: stored.sender.clone(),
                        message: stored.content.clone(),
                        timestamp: stored.timestamp,
                    },
                )
                .await;
            if !delivered {
                debug!("{} is offline, message {} kept for later", stored.receiver, stored.id);
            }
        }
    }

    async fn private_history(&self, identity: &str, peer: &str, reply: &EventSender) {
        let peer = peer.trim();
        if peer.is_empty() {
            self.report(reply, &ChatError::validation("peer must not be empty"));
            return;
        }

        let me = identity.to_string();
        let other = peer.to_string();
        match self
            .run_db(move |db| db.fetch_thread_and_mark_read(&me, &other))
            .await
        {
            Ok((thread, marked)) => {
                if marked > 0 {
                    debug!("{identity} read {marked} messages from {peer}");
                }
                let _ = reply.send(ChatEvent::PrivateHistory(thread));
            }
            Err(err) => self.report(reply, &err),
        }
    }

    async fn public_history(&self, reply: &EventSender) {
        match self.run_db(move |db| db.recent_public(PUBLIC_HISTORY_LIMIT)).await {
            Ok(history) => {
                let _ = reply.send(ChatEvent::ChatHistory(history));
            }
            Err(err) => self.report(reply, &err),
        }
    }

    /// Gate for everything except `join`. An evicted connection fails
    /// this check even though its socket is still open.
    async fn require_joined(&self, conn_id: Uuid, reply: &EventSender) -> Option<String> {
        let registered = self.registry.identity_of(conn_id).await;
        if registered.is_none() {
            self.report(reply, &ChatError::validation("join required"));
        }
        registered
    }

    /// Run a storage call off the async runtime. Failures come back as
    /// `ChatError::Persistence`, fit for reporting to the originator.
    async fn run_db<T, F>(&self, op: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        task::spawn_blocking(move || op(&db))
            .await
            .map_err(|err| ChatError::Persistence(anyhow::anyhow!(err)))?
            .map_err(ChatError::Persistence)
    }

    fn report(&self, reply: &EventSender, err: &ChatError) {
        match err {
            ChatError::Validation(reason) => debug!("request rejected: {reason}"),
            ChatError::Persistence(source) => warn!("storage failure: {source:#}"),
        }
        let _ = reply.send(ChatEvent::SendFailure {
            reason: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct TestClient {
        conn_id: Uuid,
        identity: &'static str,
        tx: EventSender,
        rx: UnboundedReceiver<ChatEvent>,
    }

    impl TestClient {
        fn new(identity: &'static str) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn_id: Uuid::new_v4(),
                identity,
                tx,
                rx,
            }
        }

        async fn send(&self, router: &MessageRouter, cmd: ClientCommand) {
            router.handle(self.conn_id, self.identity, &self.tx, cmd).await;
        }

        /// Events delivered so far. Everything the router emits lands in
        /// the channel before `handle` returns, so no waiting is needed.
        fn drain(&mut self) -> Vec<ChatEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn harness() -> (MessageRouter, Arc<Database>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("parlor.db")).unwrap());
        let router = MessageRouter::new(ConnectionRegistry::new(), db.clone());
        (router, db, dir)
    }

    async fn joined(router: &MessageRouter, identity: &'static str) -> TestClient {
        let mut client = TestClient::new(identity);
        client.send(router, ClientCommand::Join).await;
        client.drain();
        client
    }

    #[tokio::test]
    async fn join_delivers_history_then_roster() {
        let (router, _db, _dir) = harness();
        let mut alice = TestClient::new("alice");

        alice.send(&router, ClientCommand::Join).await;

        let events = alice.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChatEvent::ChatHistory(history) => assert!(history.is_empty()),
            other => panic!("expected history first, got {other:?}"),
        }
        match &events[1] {
            ChatEvent::UpdateUserList(list) => assert_eq!(list, &["alice"]),
            other => panic!("expected roster, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn arrival_is_announced_to_the_room() {
        let (router, _db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;

        let mut bob = TestClient::new("bob");
        bob.send(&router, ClientCommand::Join).await;

        let to_alice = alice.drain();
        assert_eq!(to_alice.len(), 2);
        match &to_alice[0] {
            ChatEvent::UserOnline(who) => assert_eq!(who, "bob"),
            other => panic!("expected arrival, got {other:?}"),
        }
        match &to_alice[1] {
            ChatEvent::UpdateUserList(list) => assert_eq!(list, &["alice", "bob"]),
            other => panic!("expected roster, got {other:?}"),
        }

        // the arrival itself is not told it came online
        let to_bob = bob.drain();
        assert!(to_bob.iter().all(|e| !matches!(e, ChatEvent::UserOnline(_))));
    }

    #[tokio::test]
    async fn public_message_echoes_to_sender_and_room() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        alice.drain();

        alice
            .send(&router, ClientCommand::SendMessage { content: "  hello room  ".into() })
            .await;

        for client in [&mut alice, &mut bob] {
            let events = client.drain();
            assert_eq!(events.len(), 1);
            match &events[0] {
                ChatEvent::ReceiveMessage(msg) => {
                    assert_eq!(msg.sender, "alice");
                    assert_eq!(msg.content, "hello room");
                }
                other => panic!("expected public message, got {other:?}"),
            }
        }

        let stored = db.recent_public(PUBLIC_HISTORY_LIMIT).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hello room");
    }

    #[tokio::test]
    async fn blank_public_message_is_rejected_before_any_side_effect() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        alice.drain();

        alice
            .send(&router, ClientCommand::SendMessage { content: "   \n ".into() })
            .await;

        let events = alice.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::SendFailure { reason } => {
                assert_eq!(reason, "message content must not be empty")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(bob.drain().is_empty(), "nothing may be fanned out");
        assert!(db.recent_public(PUBLIC_HISTORY_LIMIT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn commands_before_join_are_refused() {
        let (router, db, _dir) = harness();
        let mut carol = TestClient::new("carol");

        carol
            .send(&router, ClientCommand::SendMessage { content: "hi".into() })
            .await;

        let events = carol.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::SendFailure { reason } => assert_eq!(reason, "join required"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(db.recent_public(PUBLIC_HISTORY_LIMIT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_message_reaches_recipient_only() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        let mut carol = joined(&router, "carol").await;
        alice.drain();
        bob.drain();

        alice
            .send(
                &router,
                ClientCommand::PrivateMessage { recipient: "bob".into(), content: "psst".into() },
            )
            .await;

        let to_bob = bob.drain();
        assert_eq!(to_bob.len(), 1);
        match &to_bob[0] {
            ChatEvent::ReceivePrivateMessage { sender, message, .. } => {
                assert_eq!(sender, "alice");
                assert_eq!(message, "psst");
            }
            other => panic!("expected private delivery, got {other:?}"),
        }

        assert!(alice.drain().is_empty(), "sender must get no echo");
        assert!(carol.drain().is_empty(), "third parties must see nothing");

        let thread = db.thread_between("alice", "bob").unwrap();
        assert_eq!(thread.len(), 1);
        assert!(!thread[0].read);
    }

    #[tokio::test]
    async fn private_message_to_offline_identity_is_kept() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;

        alice
            .send(
                &router,
                ClientCommand::PrivateMessage { recipient: "zoe".into(), content: "you there?".into() },
            )
            .await;

        assert!(alice.drain().is_empty(), "an offline recipient is not an error");
        let thread = db.thread_between("alice", "zoe").unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].content, "you there?");
    }

    #[tokio::test]
    async fn message_to_self_is_kept_but_not_delivered() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;

        alice
            .send(
                &router,
                ClientCommand::PrivateMessage { recipient: "alice".into(), content: "note".into() },
            )
            .await;

        assert!(alice.drain().is_empty());
        assert_eq!(db.thread_between("alice", "alice").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn thread_fetch_marks_only_the_requesters_half() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        alice.drain();

        for content in ["one", "two"] {
            alice
                .send(
                    &router,
                    ClientCommand::PrivateMessage { recipient: "bob".into(), content: content.into() },
                )
                .await;
        }
        bob.send(
            &router,
            ClientCommand::PrivateMessage { recipient: "alice".into(), content: "reply".into() },
        )
        .await;
        alice.drain();
        bob.drain();

        bob.send(&router, ClientCommand::FetchPrivateHistory { peer: "alice".into() })
            .await;

        let events = bob.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::PrivateHistory(thread) => {
                assert_eq!(thread.len(), 3);
                assert!(thread[0].read, "addressed to bob, now read");
                assert!(thread[1].read, "addressed to bob, now read");
                assert!(!thread[2].read, "bob's own message stays unread");
            }
            other => panic!("expected thread, got {other:?}"),
        }

        // alice now sees that her messages were read
        alice
            .send(&router, ClientCommand::FetchPrivateHistory { peer: "bob".into() })
            .await;
        let events = alice.drain();
        match &events[0] {
            ChatEvent::PrivateHistory(thread) => {
                assert!(thread[0].read && thread[1].read);
                assert!(thread[2].read, "alice's fetch marks bob's reply read");
            }
            other => panic!("expected thread, got {other:?}"),
        }

        assert_eq!(db.mark_read("bob", "alice").unwrap(), 0, "nothing left unread");
    }

    #[tokio::test]
    async fn second_join_supersedes_the_first_connection() {
        let (router, db, _dir) = harness();
        let mut first = joined(&router, "alice").await;
        let mut second = TestClient::new("alice");

        second.send(&router, ClientCommand::Join).await;
        let events = second.drain();
        match &events[1] {
            ChatEvent::UpdateUserList(list) => {
                assert_eq!(list, &["alice"], "one entry however many sockets tried")
            }
            other => panic!("expected roster, got {other:?}"),
        }
        assert!(first.drain().is_empty(), "evicted connection hears nothing");

        // the evicted connection can no longer send
        first
            .send(&router, ClientCommand::SendMessage { content: "still here?".into() })
            .await;
        let events = first.drain();
        match &events[0] {
            ChatEvent::SendFailure { reason } => assert_eq!(reason, "join required"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(db.recent_public(PUBLIC_HISTORY_LIMIT).unwrap().is_empty());

        // its disconnect is inert: no offline broadcast, no last-seen stamp
        router.disconnect(first.conn_id).await;
        assert!(second.drain().is_empty());
        assert_eq!(db.last_seen("alice").unwrap(), None);

        // the live connection still works
        second
            .send(&router, ClientCommand::SendMessage { content: "here".into() })
            .await;
        assert_eq!(second.drain().len(), 1);
    }

    #[tokio::test]
    async fn departure_announces_offline_and_stamps_last_seen() {
        let (router, db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        alice.drain();

        router.disconnect(bob.conn_id).await;

        let events = alice.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChatEvent::UserOffline(record) => {
                assert_eq!(record.identity, "bob");
                assert_eq!(
                    db.last_seen("bob").unwrap().unwrap().timestamp_millis(),
                    record.last_seen.timestamp_millis(),
                    "event and store must agree"
                );
            }
            other => panic!("expected offline, got {other:?}"),
        }
        match &events[1] {
            ChatEvent::UpdateUserList(list) => assert_eq!(list, &["alice"]),
            other => panic!("expected roster, got {other:?}"),
        }

        assert!(bob.drain().is_empty(), "the departed gets no farewell");
    }

    #[tokio::test]
    async fn typing_relays_skip_the_typist() {
        let (router, _db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;
        let mut bob = joined(&router, "bob").await;
        alice.drain();

        alice.send(&router, ClientCommand::Typing).await;
        alice.send(&router, ClientCommand::StopTyping).await;

        let to_bob = bob.drain();
        assert_eq!(to_bob.len(), 2);
        assert!(matches!(&to_bob[0], ChatEvent::UserTyping(who) if who == "alice"));
        assert!(matches!(&to_bob[1], ChatEvent::UserStopTyping(who) if who == "alice"));
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn history_fetch_returns_recent_messages_oldest_first() {
        let (router, _db, _dir) = harness();
        let mut alice = joined(&router, "alice").await;

        for content in ["first", "second", "third"] {
            alice
                .send(&router, ClientCommand::SendMessage { content: content.into() })
                .await;
        }
        alice.drain();

        alice.send(&router, ClientCommand::FetchPublicHistory).await;
        let events = alice.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::ChatHistory(history) => {
                let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, ["first", "second", "third"]);
            }
            other => panic!("expected history, got {other:?}"),
        }
    }
}
