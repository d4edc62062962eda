//! The versioning engine for one managed directory.

use crate::config::{VaultConfig, METADATA_DIR};
use crate::diff::{diff_trees, FileChange};
use crate::error::{Error, ErrorKind, Result, Stage, StageExt};
use crate::identity::{Identity, StaticIdentity};
use crate::journal::{Journal, Operation, OperationRecord, Outcome};
use crate::lock::{MutationLock, ReadPin, ReadPins};
use crate::models::{Revision, RevisionRef, RevisionSummary, Tree};
use crate::retention::{self, PruneReport};
use crate::storage::Storage;
use crate::tree::WorkingTree;
use crate::validate::{AcceptAll, Validator};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const INITIAL_MESSAGE: &str = "Initial snapshot";
pub const SAFETY_MESSAGE: &str = "pre-rollback snapshot";
const DB_FILE: &str = "history.db";
const JOURNAL_FILE: &str = "journal.jsonl";
const STAGING_DIR: &str = "staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    Idle,
    Validating,
    SafetySnapshotting,
    Restoring,
    Committing,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Why the change was made; becomes the message body.
    pub description: Option<String>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub author: Option<String>,
    pub validate: bool,
    /// Falls back to the configured validation timeout.
    pub validation_timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            author: None,
            validate: true,
            validation_timeout: None,
            cancel: None,
        }
    }
}

pub struct Vault {
    root: PathBuf,
    metadata_dir: PathBuf,
    config: VaultConfig,
    storage: Arc<Mutex<Storage>>,
    journal: Journal,
    working: WorkingTree,
    lock: MutationLock,
    pins: ReadPins,
    validator: Arc<dyn Validator>,
    identity: Arc<dyn Identity>,
    state: Arc<Mutex<RollbackState>>,
    /// Runs right before head advancement in `record`.
    #[cfg(test)]
    before_append: Option<Arc<dyn Fn(&Storage) + Send + Sync>>,
}

impl Vault {
    /// Opens the vault for `root`, reading `.confvault/config.toml` if any.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config = VaultConfig::load(root.as_ref())?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config<P: AsRef<Path>>(root: P, config: VaultConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().canonicalize().map_err(|e| {
            Error::InvalidPath(format!("{}: {}", root.as_ref().display(), e))
        })?;
        if !root.is_dir() {
            return Err(Error::InvalidPath(format!("{} is not a directory", root.display())));
        }

        let metadata_dir = root.join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir)?;

        let storage = Storage::new(metadata_dir.join(DB_FILE))?;
        let journal = Journal::open(metadata_dir.join(JOURNAL_FILE))?;

        let mut ignore_patterns = config.ignore_patterns.clone();
        for always in [METADATA_DIR, ".git"] {
            if !ignore_patterns.iter().any(|p| p == always) {
                ignore_patterns.push(always.to_string());
            }
        }
        let working = WorkingTree::new(root.clone(), ignore_patterns);
        let identity = Arc::new(StaticIdentity::new(config.system_author.clone()));

        debug!("Opened vault at {:?}", root);
        Ok(Self {
            root,
            metadata_dir,
            config,
            storage: Arc::new(Mutex::new(storage)),
            journal,
            working,
            lock: MutationLock::new(),
            pins: ReadPins::default(),
            validator: Arc::new(AcceptAll),
            identity,
            state: Arc::new(Mutex::new(RollbackState::Idle)),
            #[cfg(test)]
            before_append: None,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Whether a path relative to the root is excluded from versioning.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.working.is_ignored(relative)
    }

    pub fn rollback_state(&self) -> RollbackState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(|p| p.into_inner())
    }

    // Shadow repository

    /// Records the current directory as the root revision unless history
    /// already exists, in which case the existing head is returned.
    pub async fn initialize(&self) -> Result<Revision> {
        let system = self.identity.system();
        let result: Result<Revision> = async {
            let _token = self.lock.acquire(self.config.lock_timeout()).await.at(Stage::Locking)?;
            let existing = {
                let storage = self.storage();
                match storage.head()? {
                    Some(head) => Some(storage.get_revision(&head)?),
                    None => None,
                }
            };
            match existing {
                Some(head) => {
                    debug!("History already initialized at {}", head.short_id());
                    Ok(head)
                }
                None => self
                    .record_with_retry(INITIAL_MESSAGE, &system, false, None)
                    .map(|(revision, _)| revision),
            }
        }
        .await;

        self.write_journal(Operation::Initialize, &system, INITIAL_MESSAGE, result.as_ref());
        result
    }

    /// Current head revision id, `None` before anything was recorded.
    pub fn head(&self) -> Result<Option<String>> {
        self.storage().head()
    }

    pub fn head_revision(&self) -> Result<Option<Revision>> {
        let storage = self.storage();
        match storage.head()? {
            Some(id) => Ok(Some(storage.get_revision(&id)?)),
            None => Ok(None),
        }
    }

    /// Looks up a revision by full id, unique prefix, or `HEAD`.
    pub fn revision(&self, reference: &str) -> Result<Revision> {
        let storage = self.storage();
        let id = Self::resolve_in(&storage, &RevisionRef::parse(reference))?;
        storage.get_revision(&id)
    }

    pub fn read_tree(&self, reference: &str) -> Result<Tree> {
        self.tree_of(&RevisionRef::parse(reference)).map(|(tree, _)| tree)
    }

    fn resolve_in(storage: &Storage, reference: &RevisionRef) -> Result<String> {
        match reference {
            RevisionRef::Head => storage
                .head()?
                .ok_or_else(|| Error::NotFound("HEAD".to_string())),
            RevisionRef::Working => Err(Error::NotFound("working".to_string())),
            RevisionRef::Id(id) => match storage.get_revision(id) {
                Ok(revision) => Ok(revision.id),
                Err(Error::NotFound(_)) => storage.resolve(id),
                Err(e) => Err(e),
            },
        }
    }

    /// Tree for a reference, with a pin on the revision it came from.
    fn tree_of(&self, reference: &RevisionRef) -> Result<(Tree, Option<ReadPin>)> {
        if *reference == RevisionRef::Working {
            return Ok((self.working.read()?, None));
        }
        let storage = self.storage();
        let id = Self::resolve_in(&storage, reference)?;
        let pin = self.pins.pin(&id);
        let revision = storage.get_revision(&id)?;
        Ok((storage.read_tree(&revision.tree)?, Some(pin)))
    }

    // Snapshot engine

    pub async fn commit(&self, message: &str, author: &str) -> Result<Revision> {
        self.commit_with(message, author, CommitOptions::default())
            .await
    }

    /// Records the working tree as a new revision. Returns the existing head
    /// unchanged when nothing differs from it.
    pub async fn commit_with(
        &self,
        message: &str,
        author: &str,
        options: CommitOptions,
    ) -> Result<Revision> {
        let author = self.identity.resolve(Some(author));
        let message = match options.description.as_deref().map(str::trim) {
            Some(why) if !why.is_empty() => format!("{}\n\n{}", message.trim(), why),
            _ => message.trim().to_string(),
        };

        let result: Result<(Revision, bool)> = async {
            let _token = self.lock.acquire(self.config.lock_timeout()).await.at(Stage::Locking)?;
            self.record_with_retry(&message, &author, false, options.cancel.as_ref())
        }
        .await;

        self.write_journal(
            Operation::Commit,
            &author,
            &message,
            result.as_ref().map(|(revision, _)| revision),
        );

        let (revision, created) = result?;
        if created {
            self.schedule_prune();
        }
        Ok(revision)
    }

    fn record_with_retry(
        &self,
        message: &str,
        author: &str,
        force: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Revision, bool)> {
        match self.record(message, author, force, cancel) {
            Err(e) if e.kind() == ErrorKind::WriteConflict => {
                warn!("Write conflict, retrying once: {}", e);
                self.record(message, author, force, cancel)
            }
            other => other,
        }
    }

    /// One attempt at turning the working tree into a revision. Must be
    /// called with the mutation lock held.
    fn record(
        &self,
        message: &str,
        author: &str,
        force: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Revision, bool)> {
        let expected = self.head_revision().at(Stage::Reading)?;
        let tree = self.working.snapshot().at(Stage::Reading)?;
        let tree_hash = tree.hash();

        if let Some(head) = &expected {
            if !force && head.tree == tree_hash {
                debug!("Working tree matches {}, nothing to commit", head.short_id());
                return Ok((head.clone(), false));
            }
        }

        if cancel.map(CancellationToken::is_cancelled).unwrap_or(false) {
            return Err(Error::Cancelled.at(Stage::Committing));
        }

        let storage = self.storage();
        let parent = expected.map(|head| head.id);
        let seq = storage.next_seq().at(Stage::Committing)?;
        let revision = Revision::new(
            parent.clone(),
            tree_hash,
            message.to_string(),
            author.to_string(),
            seq,
        );
        #[cfg(test)]
        if let Some(hook) = &self.before_append {
            hook(&storage);
        }
        storage
            .append(parent.as_deref(), &revision, &tree)
            .at(Stage::Committing)?;

        info!(
            "Committed {} ({} files) by {}: {}",
            revision.short_id(),
            tree.len(),
            revision.author,
            revision.subject()
        );
        Ok((revision, true))
    }

    /// Newest first, at most `limit` entries after skipping `offset`, never
    /// reaching past the retention window.
    pub fn history(&self, limit: usize, offset: usize) -> Result<Vec<RevisionSummary>> {
        let storage = self.storage();
        let Some(head) = storage.head()? else {
            return Ok(Vec::new());
        };

        let mut summaries = Vec::new();
        for revision in storage
            .chain(&head, self.config.max_backups)?
            .into_iter()
            .skip(offset)
            .take(limit)
        {
            let file_count = storage.file_count(&revision.tree)?;
            summaries.push(RevisionSummary {
                revision,
                file_count,
            });
        }
        Ok(summaries)
    }

    // Diff provider

    pub fn diff(&self, from: &RevisionRef, to: &RevisionRef) -> Result<Vec<FileChange>> {
        let (from_tree, _from_pin) = self.tree_of(from)?;
        let (to_tree, _to_pin) = self.tree_of(to)?;
        Ok(diff_trees(&from_tree, &to_tree, true))
    }

    /// Uncommitted changes: head against the working tree, without hunks.
    pub fn status(&self) -> Result<Vec<FileChange>> {
        let head_tree = match self.tree_of(&RevisionRef::Head) {
            Ok((tree, _)) => tree,
            Err(Error::NotFound(_)) => Tree::new(),
            Err(e) => return Err(e),
        };
        let working = self.working.read()?;
        Ok(diff_trees(&head_tree, &working, false))
    }

    // Rollback manager

    /// What a rollback to `target` would change relative to head.
    pub fn dry_run_diff(&self, target: &str) -> Result<Vec<FileChange>> {
        self.diff(&RevisionRef::Head, &RevisionRef::parse(target))
    }

    pub async fn rollback(&self, target: &str) -> Result<Revision> {
        self.rollback_with(target, RollbackOptions::default()).await
    }

    /// Makes the working tree equal to `target` again and records that as a
    /// new revision, after validating the target and snapshotting the
    /// current state.
    pub async fn rollback_with(&self, target: &str, options: RollbackOptions) -> Result<Revision> {
        let author = self.identity.resolve(options.author.as_deref());
        let result = self.run_rollback(target, &author, &options).await;

        let description = format!("rollback to {target}");
        self.write_journal(Operation::Rollback, &author, &description, result.as_ref());

        if result.is_ok() {
            self.schedule_prune();
        }
        result
    }

    async fn run_rollback(
        &self,
        target: &str,
        author: &str,
        options: &RollbackOptions,
    ) -> Result<Revision> {
        let _token = self.lock.acquire(self.config.lock_timeout()).await.at(Stage::Locking)?;
        // Declared after the token so the state is reset before the lock is released.
        let _idle = IdleOnDrop(self.state.as_ref());
        let cancelled = || {
            options
                .cancel
                .as_ref()
                .map(CancellationToken::is_cancelled)
                .unwrap_or(false)
        };

        self.set_state(RollbackState::Validating);
        let (target_id, tree, _pin) = {
            let storage = self.storage();
            let id = Self::resolve_in(&storage, &RevisionRef::parse(target)).at(Stage::Validating)?;
            let pin = self.pins.pin(&id);
            let revision = storage.get_revision(&id).at(Stage::Validating)?;
            let tree = storage.read_tree(&revision.tree).at(Stage::Validating)?;
            (id, tree, pin)
        };

        if options.validate {
            let timeout = options
                .validation_timeout
                .unwrap_or_else(|| self.config.validation_timeout());
            let outcome = with_deadline(
                timeout,
                options.cancel.as_ref(),
                self.validator.validate(&tree),
            )
            .await
            .at(Stage::Validating)?;
            if let Err(issues) = outcome {
                return Err(Error::ValidationFailed(issues).at(Stage::Validating));
            }
        }

        if cancelled() {
            return Err(Error::Cancelled.at(Stage::SafetySnapshotting));
        }
        self.set_state(RollbackState::SafetySnapshotting);
        let system = self.identity.system();
        let (safety, _) = self
            .record_with_retry(SAFETY_MESSAGE, &system, true, options.cancel.as_ref())
            .at(Stage::SafetySnapshotting)?;
        self.write_journal(Operation::Commit, &system, SAFETY_MESSAGE, Ok(&safety));

        // Past this point the operation runs to completion.
        if cancelled() {
            return Err(Error::Cancelled.at(Stage::Restoring));
        }
        self.set_state(RollbackState::Restoring);
        self.working
            .restore(&tree, &self.metadata_dir.join(STAGING_DIR))
            .map_err(|e| {
                error!("Restore of {} failed: {}", target_id, e);
                e
            })
            .at(Stage::Restoring)?;

        self.set_state(RollbackState::Committing);
        let message = format!("rollback to {target_id}");
        let (revision, _) = self
            .record_with_retry(&message, author, false, None)
            .at(Stage::Committing)?;

        info!(
            "Rolled back to {} (safety snapshot {}, new head {})",
            crate::models::short(&target_id),
            safety.short_id(),
            revision.short_id()
        );
        Ok(revision)
    }

    fn set_state(&self, state: RollbackState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    // Retention pruner

    /// Runs one prune pass now.
    pub fn prune(&self) -> Result<PruneReport> {
        let storage = self.storage();
        retention::prune(&storage, &self.pins, self.config.max_backups)
    }

    fn schedule_prune(&self) {
        let storage = Arc::clone(&self.storage);
        let pins = self.pins.clone();
        let max_backups = self.config.max_backups;
        tokio::task::spawn_blocking(move || {
            let storage = storage.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = retention::prune(&storage, &pins, max_backups) {
                warn!("Background prune failed: {}", e);
            }
        });
    }

    // Journal

    fn write_journal(
        &self,
        operation: Operation,
        author: &str,
        description: &str,
        result: std::result::Result<&Revision, &Error>,
    ) {
        let mut record = OperationRecord::new(operation, author, description);
        match result {
            Ok(revision) => record = record.with_revision(revision.id.as_str()),
            Err(e) => {
                if e.kind() == ErrorKind::StorageFailure {
                    error!("{} failed: {:?}", operation.as_str(), e);
                } else {
                    warn!("{} failed: {}", operation.as_str(), e);
                }
                record = record.with_outcome(Outcome::from_error(e));
            }
        }
        if let Err(e) = self.journal.append(&record) {
            error!("Could not write journal entry to {:?}: {}", self.journal.path(), e);
        }
    }
}

/// Returns the rollback state to `Idle` when the rollback that owns the
/// lock ends, on every exit path.
struct IdleOnDrop<'a>(&'a Mutex<RollbackState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = RollbackState::Idle;
    }
}

async fn with_deadline<F: Future>(
    timeout: Duration,
    cancel: Option<&CancellationToken>,
    future: F,
) -> Result<F::Output> {
    let bounded = tokio::time::timeout(timeout, future);
    match cancel {
        Some(token) => tokio::select! {
            outcome = bounded => outcome.map_err(|_| Error::Timeout(timeout)),
            _ = token.cancelled() => Err(Error::Cancelled),
        },
        None => bounded.await.map_err(|_| Error::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Vault {
        Vault::open_with_config(dir.path(), VaultConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("configuration.yaml"), "homeassistant:\n").unwrap();
        let vault = open(&dir);

        assert_eq!(vault.head().unwrap(), None);
        let root = vault.initialize().await.unwrap();
        let again = vault.initialize().await.unwrap();

        assert_eq!(root, again);
        assert_eq!(root.parent, None);
        assert_eq!(root.message, INITIAL_MESSAGE);
        assert_eq!(root.author, VaultConfig::default().system_author);
        assert_eq!(vault.history(10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_keeps_existing_history_on_reopen() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        let first = open(&dir).initialize().await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "2").unwrap();
        let reopened = open(&dir);
        assert_eq!(reopened.initialize().await.unwrap(), first);
        assert_eq!(reopened.read_tree(&first.id).unwrap().get("a.txt"), Some(&b"1"[..]));
    }

    #[tokio::test]
    async fn test_commit_description_becomes_body() {
        let dir = TempDir::new().unwrap();
        let vault = open(&dir);
        vault.initialize().await.unwrap();
        std::fs::write(dir.path().join("automations.yaml"), "[]\n").unwrap();

        let revision = vault
            .commit_with(
                "update automation: front_door_motion",
                "cursor-agent",
                CommitOptions {
                    description: Some("lower the delay".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(revision.subject(), "update automation: front_door_motion");
        assert!(revision.message.ends_with("\n\nlower the delay"));
        assert_eq!(revision.author, "cursor-agent");
    }

    #[tokio::test]
    async fn test_cancelled_commit_records_nothing() {
        let dir = TempDir::new().unwrap();
        let vault = open(&dir);
        let root = vault.initialize().await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = vault
            .commit_with(
                "set a",
                "agent",
                CommitOptions {
                    cancel: Some(token),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(vault.head().unwrap(), Some(root.id));
    }

    #[tokio::test]
    async fn test_status_lists_uncommitted_changes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        let vault = open(&dir);
        assert_eq!(vault.status().unwrap().len(), 1);

        vault.initialize().await.unwrap();
        assert!(vault.status().unwrap().is_empty());

        std::fs::write(dir.path().join("b.txt"), "2").unwrap();
        let status = vault.status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].path, "b.txt");
        assert_eq!(status[0].hunk, None);
    }

    #[tokio::test]
    async fn test_short_references_resolve() {
        let dir = TempDir::new().unwrap();
        let vault = open(&dir);
        let root = vault.initialize().await.unwrap();

        assert_eq!(vault.revision(&root.id[..8]).unwrap().id, root.id);
        assert_eq!(vault.revision("HEAD").unwrap().id, root.id);
        assert_eq!(
            vault.revision("ffffffffffff").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_rollback_state_returns_to_idle_after_failure() {
        let dir = TempDir::new().unwrap();
        let vault = open(&dir);
        vault.initialize().await.unwrap();

        let err = vault.rollback("0123456789abcdef").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.stage(), Some(Stage::Validating));
        assert_eq!(vault.rollback_state(), RollbackState::Idle);
        assert!(!vault.lock.is_held());
    }

    /// Advances HEAD to a sibling revision, as another writer would.
    fn move_head(storage: &Storage, label: &str) -> String {
        let head = storage.head().unwrap();
        let tree = Tree::new().with_file("elsewhere.txt", label);
        let sibling = Revision::new(
            head.clone(),
            tree.hash(),
            format!("external {label}"),
            "other-writer".to_string(),
            storage.next_seq().unwrap(),
        );
        storage.append(head.as_deref(), &sibling, &tree).unwrap();
        sibling.id
    }

    #[tokio::test]
    async fn test_write_conflict_is_retried_once() {
        let dir = TempDir::new().unwrap();
        let mut vault = open(&dir);
        vault.initialize().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let moved_to = Arc::new(Mutex::new(None));
        {
            let calls = Arc::clone(&calls);
            let moved_to = Arc::clone(&moved_to);
            vault.before_append = Some(Arc::new(move |storage: &Storage| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    *moved_to.lock().unwrap() = Some(move_head(storage, "first"));
                }
            }));
        }
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();

        let revision = vault.commit("set a", "agent").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(revision.parent, moved_to.lock().unwrap().clone());
        assert_eq!(vault.head().unwrap(), Some(revision.id));
    }

    #[tokio::test]
    async fn test_repeated_write_conflict_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let mut vault = open(&dir);
        vault.initialize().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            vault.before_append = Some(Arc::new(move |storage: &Storage| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                move_head(storage, &n.to_string());
            }));
        }
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();

        let err = vault.commit("set a", "agent").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteConflict);
        assert_eq!(err.stage(), Some(Stage::Committing));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!vault.lock.is_held());
        let last = vault.journal().recent(1).unwrap().remove(0);
        assert!(matches!(
            last.outcome,
            Outcome::Failure { kind: ErrorKind::WriteConflict, .. }
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_releases_lock() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::default().with_lock_timeout(Duration::ZERO);
        let vault = Vault::open_with_config(dir.path(), config).unwrap();
        vault.initialize().await.unwrap();

        let conn = rusqlite::Connection::open(dir.path().join(METADATA_DIR).join(DB_FILE)).unwrap();
        conn.execute_batch("DROP TABLE revisions").unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();

        let err = vault.commit("set a", "agent").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(!vault.lock.is_held());

        // A leaked token would make this Busy.
        let again = vault.commit("set a", "agent").await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::StorageFailure);

        let last = vault.journal().recent(1).unwrap().remove(0);
        assert!(matches!(
            last.outcome,
            Outcome::Failure { kind: ErrorKind::StorageFailure, .. }
        ));
    }

    #[test]
    fn test_zero_window_is_rejected_on_open() {
        let dir = TempDir::new().unwrap();
        let result = Vault::open_with_config(dir.path(), VaultConfig::default().with_max_backups(0));
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result = with_deadline(
            Duration::from_millis(10),
            None,
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
