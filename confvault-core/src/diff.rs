use crate::models::{hash_content, Tree};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::HashMap;

const CONTEXT_LINES: usize = 3;
const BINARY_SNIFF_LEN: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Renamed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
            ChangeKind::Renamed => "renamed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Previous location for renames.
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub binary: bool,
    /// Unified diff text. `None` for binary files or when hunks were not
    /// requested.
    pub hunk: Option<String>,
}

pub fn is_binary(content: &[u8]) -> bool {
    let head = &content[..content.len().min(BINARY_SNIFF_LEN)];
    head.contains(&0) || std::str::from_utf8(content).is_err()
}

/// Per-file differences from `from` to `to`, ordered by path. A removed and
/// an added file with identical content are reported as one rename.
pub fn diff_trees(from: &Tree, to: &Tree, with_hunks: bool) -> Vec<FileChange> {
    let mut changes = Vec::new();

    let removed: Vec<&str> = from.paths().filter(|p| !to.contains(p)).collect();
    let mut added: Vec<&str> = to.paths().filter(|p| !from.contains(p)).collect();

    let mut added_by_hash: HashMap<String, Vec<&str>> = HashMap::new();
    for path in &added {
        if let Some(content) = to.get(path) {
            added_by_hash
                .entry(hash_content(content))
                .or_default()
                .push(path);
        }
    }

    for old_path in removed {
        let Some(old_content) = from.get(old_path) else {
            continue;
        };
        let renamed_to = added_by_hash
            .get_mut(&hash_content(old_content))
            .and_then(|candidates| (!candidates.is_empty()).then(|| candidates.remove(0)));

        match renamed_to {
            Some(new_path) => {
                added.retain(|p| *p != new_path);
                changes.push(FileChange {
                    path: new_path.to_string(),
                    old_path: Some(old_path.to_string()),
                    kind: ChangeKind::Renamed,
                    binary: is_binary(old_content),
                    hunk: None,
                });
            }
            None => changes.push(file_change(
                old_path,
                ChangeKind::Removed,
                Some(old_content),
                None,
                with_hunks,
            )),
        }
    }

    for path in added {
        changes.push(file_change(path, ChangeKind::Added, None, to.get(path), with_hunks));
    }

    for (path, old_content) in from.iter() {
        if let Some(new_content) = to.get(path) {
            if old_content != new_content {
                changes.push(file_change(
                    path,
                    ChangeKind::Modified,
                    Some(old_content),
                    Some(new_content),
                    with_hunks,
                ));
            }
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn file_change(
    path: &str,
    kind: ChangeKind,
    old: Option<&[u8]>,
    new: Option<&[u8]>,
    with_hunks: bool,
) -> FileChange {
    let binary = old.map(is_binary).unwrap_or(false) || new.map(is_binary).unwrap_or(false);
    let hunk = (with_hunks && !binary).then(|| {
        let old_text = old.map(String::from_utf8_lossy).unwrap_or_default();
        let new_text = new.map(String::from_utf8_lossy).unwrap_or_default();
        unified(path, &old_text, &new_text)
    });

    FileChange {
        path: path.to_string(),
        old_path: None,
        kind,
        binary,
        hunk,
    }
}

fn unified(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_identical_trees_have_no_changes() {
        let tree = Tree::new().with_file("a.txt", "1\n");
        assert!(diff_trees(&tree, &tree.clone(), true).is_empty());
    }

    #[test]
    fn test_diff_computation() {
        let from = Tree::new()
            .with_file("keep.yaml", "line 1\nline 2\nline 3\n")
            .with_file("gone.yaml", "bye\n");
        let to = Tree::new()
            .with_file("keep.yaml", "line 1\nline 2 modified\nline 3\nline 4\n")
            .with_file("new.yaml", "hello\n");

        let changes = diff_trees(&from, &to, true);
        let summary: Vec<_> = changes.iter().map(|c| (c.path.as_str(), c.kind)).collect();

        assert_eq!(
            summary,
            vec![
                ("gone.yaml", ChangeKind::Removed),
                ("keep.yaml", ChangeKind::Modified),
                ("new.yaml", ChangeKind::Added),
            ]
        );

        let hunk = changes[1].hunk.as_deref().unwrap();
        assert!(hunk.starts_with("--- a/keep.yaml\n+++ b/keep.yaml\n"));
        assert!(hunk.contains("-line 2\n"));
        assert!(hunk.contains("+line 2 modified\n"));
        assert!(hunk.contains("+line 4\n"));
        assert!(changes[2].hunk.as_deref().unwrap().contains("+hello\n"));
    }

    #[test]
    fn test_rename_detection() {
        let from = Tree::new().with_file("old/lights.yaml", "light: []\n");
        let to = Tree::new().with_file("packages/lights.yaml", "light: []\n");

        let changes = diff_trees(&from, &to, true);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "packages/lights.yaml");
        assert_eq!(changes[0].old_path.as_deref(), Some("old/lights.yaml"));
    }

    #[test]
    fn test_binary_files_have_no_hunk() {
        let from = Tree::new().with_file("image.png", vec![0x89, b'P', b'N', b'G', 0, 1]);
        let to = Tree::new().with_file("image.png", vec![0x89, b'P', b'N', b'G', 0, 2]);

        let changes = diff_trees(&from, &to, true);

        assert_eq!(changes.len(), 1);
        assert!(changes[0].binary);
        assert_eq!(changes[0].hunk, None);
    }

    #[test]
    fn test_is_deterministic() {
        let from = Tree::new().with_file("a", "1\n").with_file("b", "2\n");
        let to = Tree::new().with_file("a", "3\n").with_file("c", "2\n");

        assert_eq!(diff_trees(&from, &to, true), diff_trees(&from, &to, true));
    }

    #[test]
    fn test_without_hunks() {
        let from = Tree::new().with_file("a", "1\n");
        let to = Tree::new().with_file("a", "2\n");
        assert_eq!(diff_trees(&from, &to, false)[0].hunk, None);
    }
}
