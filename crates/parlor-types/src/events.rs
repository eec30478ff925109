use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PresenceRecord, PrivateMessage, PublicMessage};

/// Events sent over the WebSocket gateway, server to client.
///
/// Tag strings are the wire contract and are load-bearing for existing
/// clients; the mixed camelCase / snake_case is inherited from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Recent public-room history, oldest first. Sent to the joining
    /// connection and in answer to `fetch_public_history`.
    #[serde(rename = "chatHistory")]
    ChatHistory(Vec<PublicMessage>),

    /// A public-room message, broadcast to every joined connection
    /// including the sender.
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(PublicMessage),

    /// A private message, delivered to the recipient connection only.
    /// The sender gets no echo.
    #[serde(rename = "receive_private_message")]
    ReceivePrivateMessage {
        sender: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A pairwise thread, oldest first, answering `fetch_private_history`.
    #[serde(rename = "private_history")]
    PrivateHistory(Vec<PrivateMessage>),

    /// Full snapshot of online identities, sorted.
    #[serde(rename = "updateUserList")]
    UpdateUserList(Vec<String>),

    /// An identity came online. Not sent to the arrival itself.
    #[serde(rename = "userOnline")]
    UserOnline(String),

    /// An identity went offline, with its recorded last-seen time.
    #[serde(rename = "userOffline")]
    UserOffline(PresenceRecord),

    /// An identity started typing in the public room.
    #[serde(rename = "userTyping")]
    UserTyping(String),

    /// An identity stopped typing.
    #[serde(rename = "userStopTyping")]
    UserStopTyping(String),

    /// A request from this connection was rejected or failed. Only ever
    /// sent to the originating connection.
    #[serde(rename = "sendFailure")]
    SendFailure { reason: String },
}

/// Commands sent from client to server.
///
/// None of these carry the sender: identity always comes from the
/// connection's authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Enter the chat. Registers presence and triggers the history push.
    #[serde(rename = "join")]
    Join,

    /// Post to the public room.
    #[serde(rename = "sendMessage")]
    SendMessage { content: String },

    /// Send a private message to another identity.
    #[serde(rename = "private_message")]
    PrivateMessage { recipient: String, content: String },

    /// Fetch the pairwise thread with `peer`. Marks the unread half
    /// addressed to the requester as read.
    #[serde(rename = "fetch_private_history")]
    FetchPrivateHistory { peer: String },

    /// Re-fetch recent public-room history.
    #[serde(rename = "fetch_public_history")]
    FetchPublicHistory,

    /// Started typing in the public room.
    #[serde(rename = "typing")]
    Typing,

    /// Stopped typing.
    #[serde(rename = "stopTyping")]
    StopTyping,
}
