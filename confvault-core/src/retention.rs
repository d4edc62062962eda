//! Bounding history to the retention window.

use crate::error::Result;
use crate::lock::ReadPins;
use crate::storage::Storage;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub revisions_removed: usize,
    /// Outside the window but being read; left for a later pass.
    pub revisions_deferred: usize,
    pub tree_entries_removed: usize,
    pub blobs_removed: usize,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.revisions_removed == 0 && self.tree_entries_removed == 0 && self.blobs_removed == 0
    }
}

/// Deletes every revision that is not among the `max_backups` newest
/// reachable from head, then reclaims unreferenced trees and blobs. Head
/// itself is always kept.
pub fn prune(storage: &Storage, pins: &ReadPins, max_backups: usize) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    let Some(head) = storage.head()? else {
        return Ok(report);
    };

    let retained: HashSet<String> = storage
        .chain(&head, max_backups.max(1))?
        .into_iter()
        .map(|revision| revision.id)
        .collect();

    let mut expired = Vec::new();
    for id in storage.all_revision_ids()? {
        if retained.contains(&id) {
            continue;
        }
        if pins.is_pinned(&id) {
            report.revisions_deferred += 1;
            continue;
        }
        expired.push(id);
    }

    if expired.is_empty() && report.revisions_deferred == 0 {
        debug!("Nothing to prune ({} retained)", retained.len());
        return Ok(report);
    }

    report.revisions_removed = storage.delete_revisions(&expired)?;
    let (entries, blobs) = storage.collect_garbage()?;
    report.tree_entries_removed = entries;
    report.blobs_removed = blobs;

    info!(
        "Pruned {} revision(s), {} blob(s) reclaimed, {} deferred",
        report.revisions_removed, report.blobs_removed, report.revisions_deferred
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Revision, Tree};

    fn build_history(storage: &Storage, n: usize) -> Vec<String> {
        let mut parent: Option<String> = None;
        let mut ids = Vec::new();
        for i in 0..n {
            let tree = Tree::new().with_file("a.txt", format!("{i}"));
            let revision = Revision::new(
                parent.clone(),
                tree.hash(),
                format!("r{i}"),
                "test".to_string(),
                storage.next_seq().unwrap(),
            );
            storage.append(parent.as_deref(), &revision, &tree).unwrap();
            parent = Some(revision.id.clone());
            ids.push(revision.id);
        }
        ids
    }

    #[test]
    fn test_keeps_newest_window() {
        let storage = Storage::in_memory().unwrap();
        let ids = build_history(&storage, 8);

        let report = prune(&storage, &ReadPins::default(), 3).unwrap();

        assert_eq!(report.revisions_removed, 5);
        assert_eq!(report.blobs_removed, 5);
        assert_eq!(storage.all_revision_ids().unwrap(), ids[5..].to_vec());
    }

    #[test]
    fn test_within_window_is_noop() {
        let storage = Storage::in_memory().unwrap();
        build_history(&storage, 3);

        let report = prune(&storage, &ReadPins::default(), 50).unwrap();

        assert!(report.is_empty());
        assert_eq!(storage.revision_count().unwrap(), 3);
    }

    #[test]
    fn test_pinned_revisions_are_deferred() {
        let storage = Storage::in_memory().unwrap();
        let ids = build_history(&storage, 5);
        let pins = ReadPins::default();
        let pin = pins.pin(&ids[0]);

        let report = prune(&storage, &pins, 2).unwrap();
        assert_eq!(report.revisions_removed, 2);
        assert_eq!(report.revisions_deferred, 1);
        assert!(storage.get_revision(&ids[0]).is_ok());

        drop(pin);
        let report = prune(&storage, &pins, 2).unwrap();
        assert_eq!(report.revisions_removed, 1);
        assert_eq!(storage.revision_count().unwrap(), 2);
    }

    #[test]
    fn test_zero_window_still_keeps_head() {
        let storage = Storage::in_memory().unwrap();
        let ids = build_history(&storage, 3);

        let report = prune(&storage, &ReadPins::default(), 0).unwrap();

        assert_eq!(report.revisions_removed, 2);
        assert_eq!(storage.head().unwrap().as_ref(), ids.last());
        assert!(storage.get_revision(&ids[2]).is_ok());
    }

    #[test]
    fn test_empty_history() {
        let storage = Storage::in_memory().unwrap();
        assert!(prune(&storage, &ReadPins::default(), 1).unwrap().is_empty());
    }
}
