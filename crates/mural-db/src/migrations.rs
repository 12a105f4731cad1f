use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            namespace   TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       BLOB NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (namespace, key)
        ) WITHOUT ROWID;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
