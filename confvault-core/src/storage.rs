//! SQLite-backed shadow history: content-addressed blobs and trees, a linear
//! revision chain, and a single `HEAD` ref.

use crate::error::{Error, Result};
use crate::models::{Revision, Tree};
use chrono::DateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const SCHEMA_VERSION: i32 = 1;
const HEAD: &str = "HEAD";
const MIN_PREFIX_LEN: usize = 4;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS blobs (
                hash TEXT PRIMARY KEY,
                content BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tree_entries (
                tree TEXT NOT NULL,
                path TEXT NOT NULL,
                blob TEXT NOT NULL,
                PRIMARY KEY (tree, path)
            );

            CREATE TABLE IF NOT EXISTS revisions (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL UNIQUE,
                parent TEXT,
                tree TEXT NOT NULL,
                message TEXT NOT NULL,
                author TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS refs (
                name TEXT PRIMARY KEY,
                revision TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tree_entries_blob ON tree_entries(blob);
            CREATE INDEX IF NOT EXISTS idx_revisions_tree ON revisions(tree);
            CREATE INDEX IF NOT EXISTS idx_revisions_parent ON revisions(parent);
            "#,
        )?;

        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(Error::Corrupted(format!(
                    "history store schema {v} is newer than supported {SCHEMA_VERSION}"
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    pub fn head(&self) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT revision FROM refs WHERE name = ?1",
                params![HEAD],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn next_seq(&self) -> Result<i64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM revisions", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Stores `revision` and its tree, then moves `HEAD` from `expected` to
    /// it. Everything happens in one transaction: if `HEAD` no longer points
    /// at `expected`, nothing is written and `WriteConflict` is returned.
    pub fn append(&self, expected: Option<&str>, revision: &Revision, tree: &Tree) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut insert_blob =
                tx.prepare_cached("INSERT OR IGNORE INTO blobs (hash, content) VALUES (?1, ?2)")?;
            let mut insert_entry = tx.prepare_cached(
                "INSERT OR IGNORE INTO tree_entries (tree, path, blob) VALUES (?1, ?2, ?3)",
            )?;
            for ((path, blob), (_, content)) in tree.entries().iter().zip(tree.iter()) {
                insert_blob.execute(params![blob, content])?;
                insert_entry.execute(params![revision.tree, path, blob])?;
            }
        }

        tx.execute(
            "INSERT INTO revisions (id, seq, parent, tree, message, author, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                revision.id,
                revision.seq,
                revision.parent,
                revision.tree,
                revision.message,
                revision.author,
                revision.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            // Another writer took this sequence number first.
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Error::WriteConflict(format!("revision seq {} already taken", revision.seq))
            }
            other => other.into(),
        })?;

        let moved = match expected {
            Some(old) => tx.execute(
                "UPDATE refs SET revision = ?1 WHERE name = ?2 AND revision = ?3",
                params![revision.id, HEAD, old],
            )?,
            None => tx.execute(
                "INSERT OR IGNORE INTO refs (name, revision) VALUES (?1, ?2)",
                params![HEAD, revision.id],
            )?,
        };

        if moved != 1 {
            // Dropping the transaction rolls it back.
            return Err(Error::WriteConflict(format!(
                "HEAD moved away from {}",
                expected.unwrap_or("<empty>")
            )));
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_revision(&self, id: &str) -> Result<Revision> {
        self.conn
            .query_row(
                "SELECT id, seq, parent, tree, message, author, timestamp
                 FROM revisions WHERE id = ?1",
                params![id],
                Self::revision_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Expands an unambiguous id prefix to the full revision id.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        let reference = reference.trim().to_ascii_lowercase();
        if reference.len() < MIN_PREFIX_LEN || !reference.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::NotFound(reference));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM revisions WHERE id LIKE ?1 || '%' LIMIT 2")?;
        let matches = stmt
            .query_map(params![reference], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match matches.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(Error::NotFound(reference)),
        }
    }

    pub fn read_tree(&self, tree: &str) -> Result<Tree> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT e.path, b.content FROM tree_entries e
             LEFT JOIN blobs b ON b.hash = e.blob
             WHERE e.tree = ?1 ORDER BY e.path",
        )?;
        let rows = stmt
            .query_map(params![tree], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut result = Tree::new();
        for (path, content) in rows {
            let content = content
                .ok_or_else(|| Error::Corrupted(format!("missing blob for {path} in tree {tree}")))?;
            result.insert(path, content);
        }
        Ok(result)
    }

    pub fn file_count(&self, tree: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tree_entries WHERE tree = ?1",
            params![tree],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Walks parent links from `from`, newest first, stopping after `max`
    /// revisions or at the oldest one still stored.
    pub fn chain(&self, from: &str, max: usize) -> Result<Vec<Revision>> {
        let mut chain = Vec::new();
        let mut next = Some(from.to_string());
        while let Some(id) = next {
            if chain.len() >= max {
                break;
            }
            let revision = match self.get_revision(&id) {
                Ok(revision) => revision,
                // Pruned ancestor: the chain ends here.
                Err(Error::NotFound(_)) if !chain.is_empty() => break,
                Err(e) => return Err(e),
            };
            next = revision.parent.clone();
            chain.push(revision);
        }
        Ok(chain)
    }

    pub fn revision_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM revisions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn all_revision_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM revisions ORDER BY seq")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn delete_revisions(&self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM revisions WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Drops tree entries and blobs no remaining revision refers to.
    /// Returns (tree entries, blobs) removed.
    pub fn collect_garbage(&self) -> Result<(usize, usize)> {
        let tx = self.conn.unchecked_transaction()?;
        let entries = tx.execute(
            "DELETE FROM tree_entries WHERE tree NOT IN (SELECT tree FROM revisions)",
            [],
        )?;
        let blobs = tx.execute(
            "DELETE FROM blobs WHERE hash NOT IN (SELECT blob FROM tree_entries)",
            [],
        )?;
        tx.commit()?;
        Ok((entries, blobs))
    }

    pub fn blob_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn revision_from_row(row: &Row) -> rusqlite::Result<Revision> {
        let timestamp: String = row.get(6)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
            })?
            .into();

        Ok(Revision {
            id: row.get(0)?,
            seq: row.get(1)?,
            parent: row.get(2)?,
            tree: row.get(3)?,
            message: row.get(4)?,
            author: row.get(5)?,
            timestamp,
        })
    }
}
