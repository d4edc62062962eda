use confvault_core::{ErrorKind, Vault};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commits the managed directory after each burst of file events.
pub struct AutoCommitter {
    _debouncer: Debouncer<notify::RecommendedWatcher, FileIdMap>,
    task: JoinHandle<()>,
}

impl AutoCommitter {
    pub fn start(vault: Arc<Vault>, debounce: Duration) -> anyhow::Result<Self> {
        let (tx, mut rx) = mpsc::channel(100);

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            if let Err(e) = tx.blocking_send(result) {
                error!("Failed to send event: {}", e);
            }
        })?;

        debouncer
            .watcher()
            .watch(vault.root(), RecursiveMode::Recursive)?;

        info!("Watching {:?} for changes", vault.root());

        let task = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(events) => {
                        let events: Vec<Event> = events.into_iter().map(|e| e.event).collect();
                        let changed = changed_paths(&vault, &events);
                        if changed.is_empty() {
                            continue;
                        }
                        debug!("{} path(s) changed: {:?}", changed.len(), changed);
                        Self::commit(&vault, changed.len()).await;
                    }
                    Err(errors) => {
                        for error in errors {
                            error!("Watch error: {:?}", error);
                        }
                    }
                }
            }
        });

        Ok(Self {
            _debouncer: debouncer,
            task,
        })
    }

    async fn commit(vault: &Vault, changed: usize) {
        let message = format!("auto: {} file(s) changed", changed);
        let author = vault.config().system_author.clone();
        match vault.commit(&message, &author).await {
            Ok(revision) => info!("Auto-commit at {}", revision.short_id()),
            // A rollback holds the lock; its own commit covers the change.
            Err(e) if e.kind() == ErrorKind::Busy => warn!("Skipped auto-commit: {}", e),
            Err(e) => error!("Auto-commit failed: {}", e),
        }
    }
}

impl Drop for AutoCommitter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Relative paths touched by create, modify, or remove events outside the
/// ignored set.
fn changed_paths(vault: &Vault, events: &[Event]) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for event in events {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            continue;
        }
        for path in &event.paths {
            let Ok(relative) = path.strip_prefix(vault.root()) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if relative.is_empty() || vault.is_ignored(&relative) {
                continue;
            }
            changed.insert(relative);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use confvault_core::VaultConfig;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use tempfile::TempDir;

    fn vault(dir: &TempDir) -> Vault {
        Vault::open_with_config(dir.path(), VaultConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_auto_committer_creation() {
        let dir = TempDir::new().unwrap();
        let vault = Arc::new(vault(&dir));

        let _watcher = AutoCommitter::start(vault, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_changed_paths_skips_ignored() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let root = vault.root().to_path_buf();

        let events = vec![
            Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("scripts.yaml")),
            Event::new(EventKind::Modify(ModifyKind::Any))
                .add_path(root.join(".confvault/journal.jsonl"))
                .add_path(root.join("packages/lights.yaml")),
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path(root.join(".git/index")),
            Event::new(EventKind::Access(AccessKind::Any)).add_path(root.join("secrets.yaml")),
            Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("scripts.yaml")),
        ];

        let changed: Vec<_> = changed_paths(&vault, &events).into_iter().collect();
        assert_eq!(changed, vec!["packages/lights.yaml", "scripts.yaml"]);
    }
}
