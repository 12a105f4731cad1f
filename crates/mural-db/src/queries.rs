use crate::Database;
use crate::models::RecordRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

impl Database {
    pub fn get_record(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM records WHERE namespace = ?1 AND key = ?2",
                    (namespace, key),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    /// Insert or overwrite. Last write wins.
    pub fn put_record(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO records (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (namespace, key)
                 DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                rusqlite::params![namespace, key, value],
            )?;
            Ok(())
        })
    }

    /// Deleting a missing key is not an error.
    pub fn delete_record(&self, namespace: &str, key: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM records WHERE namespace = ?1 AND key = ?2",
                (namespace, key),
            )?;
            Ok(())
        })
    }

    pub fn list_keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM records
                 WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map((namespace, prefix), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    /// Keys and values under a prefix in one query, ordered by key.
    pub fn scan_records(&self, namespace: &str, prefix: &str) -> Result<Vec<RecordRow>> {
        self.with_conn(|conn| query_records(conn, namespace, prefix))
    }

    /// Returns the number of deleted records.
    pub fn delete_prefix(&self, namespace: &str, prefix: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM records WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2",
                (namespace, prefix),
            )?;
            Ok(deleted)
        })
    }
}

fn query_records(conn: &Connection, namespace: &str, prefix: &str) -> Result<Vec<RecordRow>> {
    let mut stmt = conn.prepare(
        "SELECT key, value FROM records
         WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2
         ORDER BY key",
    )?;

    let rows = stmt
        .query_map((namespace, prefix), |row| {
            Ok(RecordRow {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_overwrite_delete() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_record("canvas", "r1/1:1").unwrap(), None);

        db.put_record("canvas", "r1/1:1", b"first").unwrap();
        db.put_record("canvas", "r1/1:1", b"second").unwrap();
        assert_eq!(db.get_record("canvas", "r1/1:1").unwrap().as_deref(), Some(&b"second"[..]));

        db.delete_record("canvas", "r1/1:1").unwrap();
        db.delete_record("canvas", "r1/1:1").unwrap();
        assert_eq!(db.get_record("canvas", "r1/1:1").unwrap(), None);
    }

    #[test]
    fn namespaces_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.put_record("canvas", "k", b"a").unwrap();
        db.put_record("users", "k", b"b").unwrap();
        assert_eq!(db.get_record("canvas", "k").unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(db.list_keys("chat", "").unwrap().len(), 0);
    }

    #[test]
    fn prefix_listing_is_literal() {
        let db = Database::open_in_memory().unwrap();
        db.put_record("canvas", "r1/0:0", b"x").unwrap();
        db.put_record("canvas", "r1/2:0", b"x").unwrap();
        db.put_record("canvas", "r10/0:0", b"x").unwrap();
        db.put_record("canvas", "r_/0:0", b"x").unwrap();

        assert_eq!(db.list_keys("canvas", "r1/").unwrap(), vec!["r1/0:0", "r1/2:0"]);
        assert_eq!(db.scan_records("canvas", "r_/").unwrap().len(), 1);

        assert_eq!(db.delete_prefix("canvas", "r1/").unwrap(), 2);
        assert_eq!(db.list_keys("canvas", "").unwrap(), vec!["r10/0:0", "r_/0:0"]);
    }
}
