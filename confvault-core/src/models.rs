use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub(crate) fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Full contents of the managed directory at one point in time, keyed by
/// `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    files: BTreeMap<String, Vec<u8>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path to blob hash, sorted by path.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.files
            .iter()
            .map(|(path, content)| (path.clone(), hash_content(content)))
            .collect()
    }

    /// Content address of the tree: identical trees hash identically.
    pub fn hash(&self) -> String {
        tree_hash(&self.entries())
    }
}

pub(crate) fn tree_hash(entries: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    for (path, blob) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(blob.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// An immutable recorded state of the managed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub parent: Option<String>,
    pub tree: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Position in commit order. Authoritative over `timestamp`.
    pub seq: i64,
}

impl Revision {
    pub(crate) fn new(
        parent: Option<String>,
        tree: String,
        message: String,
        author: String,
        seq: i64,
    ) -> Self {
        let timestamp = Utc::now();
        let id = Self::compute_id(parent.as_deref(), &tree, &message, &author, &timestamp, seq);
        Self {
            id,
            parent,
            tree,
            message,
            author,
            timestamp,
            seq,
        }
    }

    fn compute_id(
        parent: Option<&str>,
        tree: &str,
        message: &str,
        author: &str,
        timestamp: &DateTime<Utc>,
        seq: i64,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("tree {tree}\n"));
        if let Some(parent) = parent {
            hasher.update(format!("parent {parent}\n"));
        }
        hasher.update(format!("author {author}\n"));
        hasher.update(format!("time {} {seq}\n\n", timestamp.to_rfc3339()));
        hasher.update(message.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn short_id(&self) -> &str {
        short(&self.id)
    }

    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

pub fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}

/// What `history()` returns per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub revision: Revision,
    pub file_count: usize,
}

/// A reference to a tree state, as accepted by diff and rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionRef {
    Head,
    Working,
    Id(String),
}

impl RevisionRef {
    pub fn parse(s: &str) -> Self {
        match s {
            "HEAD" | "head" => RevisionRef::Head,
            "working" | "WORKING" => RevisionRef::Working,
            other => RevisionRef::Id(other.to_string()),
        }
    }
}

impl From<&Revision> for RevisionRef {
    fn from(revision: &Revision) -> Self {
        RevisionRef::Id(revision.id.clone())
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionRef::Head => f.write_str("HEAD"),
            RevisionRef::Working => f.write_str("working"),
            RevisionRef::Id(id) => f.write_str(id),
        }
    }
}
