use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS public_messages (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            sender   TEXT NOT NULL,
            content  TEXT NOT NULL,
            ts       INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS private_messages (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            sender   TEXT NOT NULL,
            receiver TEXT NOT NULL,
            content  TEXT NOT NULL,
            ts       INTEGER NOT NULL,
            read     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_private_pair
            ON private_messages(sender, receiver, ts);

        CREATE TABLE IF NOT EXISTS presence (
            identity   TEXT PRIMARY KEY,
            last_seen  INTEGER NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
