use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use parlor_types::{PrivateMessage, PublicMessage};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Public room --

    /// Append to the public room, assigning the server timestamp.
    /// History is append-only; nothing ever updates or deletes these rows.
    pub fn append_public(&self, sender: &str, content: &str) -> Result<PublicMessage> {
        let timestamp = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO public_messages (sender, content, ts) VALUES (?1, ?2, ?3)",
                rusqlite::params![sender, content, timestamp.timestamp_millis()],
            )?;
            Ok(PublicMessage {
                id: conn.last_insert_rowid(),
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp,
            })
        })
    }

    /// The most recent `limit` public messages, oldest first.
    pub fn recent_public(&self, limit: u32) -> Result<Vec<PublicMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, content, ts FROM public_messages
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt
                .query_map([limit], |row| {
                    Ok(PublicMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        content: row.get(2)?,
                        timestamp: millis_to_utc(row.get(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    // -- Private threads --

    /// Append a private message, assigning the server timestamp.
    /// New messages always start unread.
    pub fn append_private(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<PrivateMessage> {
        let timestamp = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_messages (sender, receiver, content, ts) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender, receiver, content, timestamp.timestamp_millis()],
            )?;
            Ok(PrivateMessage {
                id: conn.last_insert_rowid(),
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                content: content.to_string(),
                timestamp,
                read: false,
            })
        })
    }

    /// Both halves of the thread between `a` and `b`, ascending by
    /// timestamp with insertion order breaking ties. Symmetric in its
    /// arguments.
    pub fn thread_between(&self, a: &str, b: &str) -> Result<Vec<PrivateMessage>> {
        self.with_conn(|conn| query_thread(conn, a, b))
    }

    /// Flip the unread messages from `sender` to `receiver` to read.
    /// Returns how many rows changed; calling again is a no-op.
    pub fn mark_read(&self, receiver: &str, sender: &str) -> Result<usize> {
        self.with_conn(|conn| mark_thread_read(conn, receiver, sender))
    }

    /// The read-receipt path: mark the requester's unread half of the
    /// thread read, then return the whole thread reflecting the update.
    /// Both statements run under one connection lock, so an append
    /// racing this call is either fully before it (and gets marked) or
    /// fully after (and stays unread).
    pub fn fetch_thread_and_mark_read(
        &self,
        requester: &str,
        peer: &str,
    ) -> Result<(Vec<PrivateMessage>, usize)> {
        self.with_conn(|conn| {
            let marked = mark_thread_read(conn, requester, peer)?;
            let thread = query_thread(conn, requester, peer)?;
            Ok((thread, marked))
        })
    }

    // -- Presence --

    /// Record when an identity was last connected. Keeps the latest of
    /// the stored and offered timestamps, so replayed or out-of-order
    /// disconnect events can never move the record backwards.
    pub fn record_last_seen(&self, identity: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (identity, last_seen) VALUES (?1, ?2)
                 ON CONFLICT(identity) DO UPDATE SET last_seen = MAX(last_seen, excluded.last_seen)",
                rusqlite::params![identity, at.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    pub fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let ms: Option<i64> = conn
                .query_row(
                    "SELECT last_seen FROM presence WHERE identity = ?1",
                    [identity],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(ms.map(millis_to_utc))
        })
    }
}

fn query_thread(conn: &Connection, a: &str, b: &str) -> Result<Vec<PrivateMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, receiver, content, ts, read FROM private_messages
         WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
         ORDER BY ts, id",
    )?;

    let rows = stmt
        .query_map([a, b], |row| {
            Ok(PrivateMessage {
                id: row.get(0)?,
                sender: row.get(1)?,
                receiver: row.get(2)?,
                content: row.get(3)?,
                timestamp: millis_to_utc(row.get(4)?),
                read: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn mark_thread_read(conn: &Connection, receiver: &str, sender: &str) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE private_messages SET read = 1
         WHERE receiver = ?1 AND sender = ?2 AND read = 0",
        [receiver, sender],
    )?;
    Ok(changed)
}

/// Timestamps are stored at millisecond precision; truncate before
/// persisting so the echoed copy and every later read agree exactly.
fn now_millis() -> DateTime<Utc> {
    millis_to_utc(Utc::now().timestamp_millis())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    // Stored values come from timestamp_millis(), always in range.
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
