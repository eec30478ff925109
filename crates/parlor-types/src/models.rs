use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicMessage {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A message between exactly two identities. History is append-only;
/// `read` flips from false to true when the receiver fetches the thread,
/// never back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Last-seen bookkeeping for an identity, updated on disconnect.
/// The stored timestamp never moves backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub identity: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}
