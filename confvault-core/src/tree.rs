//! Reading and rewriting the live managed directory.

use crate::error::{Error, Result};
use crate::models::Tree;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// Cheap per-file signature used to notice edits made while a snapshot is
/// being read.
pub type Fingerprint = Vec<(String, u64, Option<SystemTime>)>;

pub struct WorkingTree {
    root: PathBuf,
    ignore_patterns: Vec<String>,
}

impl WorkingTree {
    pub fn new(root: PathBuf, ignore_patterns: Vec<String>) -> Self {
        Self {
            root,
            ignore_patterns,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        relative
            .split('/')
            .any(|component| Self::matches_any(component, &self.ignore_patterns))
    }

    fn matches_any(component: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                component.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                component.starts_with(prefix)
            } else {
                component == pattern
            }
        })
    }

    /// Tracked regular files as (relative path, absolute path).
    fn files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.entry_ignored(entry));

        for entry in walker {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => Error::Io(io),
                None => Error::InvalidPath("filesystem loop".into()),
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                warn!("Skipping non-regular file: {:?}", entry.path());
                continue;
            }
            match self.relative(entry.path()) {
                Some(relative) => files.push((relative, entry.into_path())),
                None => warn!("Skipping non UTF-8 path: {:?}", entry.path()),
            }
        }

        Ok(files)
    }

    fn entry_ignored(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| Self::matches_any(name, &self.ignore_patterns))
            .unwrap_or(false)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        self.files()?
            .into_iter()
            .map(|(relative, path)| {
                let meta = fs::metadata(&path)?;
                Ok((relative, meta.len(), meta.modified().ok()))
            })
            .collect()
    }

    /// Reads every tracked file.
    pub fn read(&self) -> Result<Tree> {
        let mut tree = Tree::new();
        for (relative, path) in self.files()? {
            match fs::read(&path) {
                Ok(content) => tree.insert(relative, content),
                // Deleted between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::WriteConflict(format!("{relative} vanished")))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(tree)
    }

    /// Reads the tree and fails with `WriteConflict` if anything changed
    /// while reading.
    pub fn snapshot(&self) -> Result<Tree> {
        let before = self.fingerprint()?;
        let tree = self.read()?;
        let after = self.fingerprint()?;
        if before != after {
            return Err(Error::WriteConflict(
                "working tree was modified during snapshot".into(),
            ));
        }
        debug!("Read {} files from {:?}", tree.len(), self.root);
        Ok(tree)
    }

    /// Makes the tracked contents equal to `target`.
    ///
    /// All target files are first written under `staging`. Live files are
    /// then moved aside and staged files renamed into place; if any step of
    /// that swap fails, the moved files are put back before returning.
    /// Ignored paths are never touched.
    pub fn restore(&self, target: &Tree, staging: &Path) -> Result<()> {
        let txn = staging.join(format!("restore-{}", Uuid::new_v4()));
        let result = self.restore_via(target, &txn);
        if txn.exists() {
            if let Err(e) = fs::remove_dir_all(&txn) {
                warn!("Failed to clean staging area {:?}: {}", txn, e);
            }
        }
        result
    }

    fn restore_via(&self, target: &Tree, txn: &Path) -> Result<()> {
        let staged_dir = txn.join("staged");
        let backup_dir = txn.join("backup");

        let mut to_install = Vec::new();
        for (relative, content) in target.iter() {
            let live = self.absolute(relative);
            if fs::read(&live).ok().as_deref() == Some(content) {
                continue;
            }
            let staged = join_relative(&staged_dir, relative);
            if let Some(parent) = staged.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&staged, content)?;
            to_install.push(relative.to_string());
        }

        let mut to_displace: Vec<String> = self
            .files()?
            .into_iter()
            .map(|(relative, _)| relative)
            .filter(|relative| !target.contains(relative))
            .collect();
        to_displace.extend(
            to_install
                .iter()
                .filter(|relative| self.absolute(relative).is_file())
                .cloned(),
        );

        let mut displaced = Vec::new();
        let mut installed = Vec::new();
        let swap = (|| -> Result<()> {
            for relative in &to_displace {
                let backup = join_relative(&backup_dir, relative);
                if let Some(parent) = backup.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(self.absolute(relative), &backup)?;
                displaced.push(relative.clone());
            }
            for relative in &to_install {
                let live = self.absolute(relative);
                if live.is_dir() {
                    // Left behind by a displaced file; fails if it still holds ignored content.
                    fs::remove_dir(&live)?;
                }
                if let Some(parent) = live.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(join_relative(&staged_dir, relative), &live)?;
                installed.push(relative.clone());
            }
            Ok(())
        })();

        if let Err(e) = swap {
            warn!("Restore failed, reverting {} file(s): {}", displaced.len(), e);
            for relative in &installed {
                let _ = fs::remove_file(self.absolute(relative));
            }
            for relative in &displaced {
                let live = self.absolute(relative);
                if let Some(parent) = live.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(undo) = fs::rename(join_relative(&backup_dir, relative), &live) {
                    warn!("Could not put back {}: {}", relative, undo);
                }
            }
            // Directories created for new paths.
            self.remove_empty_dirs(&installed);
            return Err(e);
        }

        self.remove_empty_dirs(&displaced);
        debug!(
            "Restore wrote {} file(s), moved aside {} file(s)",
            installed.len(),
            displaced.len()
        );
        Ok(())
    }

    fn remove_empty_dirs(&self, removed: &[String]) {
        for relative in removed {
            let mut dir = self.absolute(relative);
            while dir.pop() && dir != self.root {
                // Stops at the first non-empty directory.
                if fs::remove_dir(&dir).is_err() {
                    break;
                }
            }
        }
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}
