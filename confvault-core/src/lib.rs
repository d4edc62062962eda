//! # confvault-core
//!
//! Shadow version history for an externally edited configuration directory.
//!
//! A [`Vault`] keeps its own SQLite-backed revision chain under
//! `.confvault/` inside the managed directory, independent of any git
//! repository the directory may already be. It provides attributed commits,
//! paginated history, tree diffs, validated and reversible rollback, a
//! bounded retention window, and an append-only operation journal.
//!
//! ```no_run
//! use confvault_core::Vault;
//!
//! # async fn example() -> confvault_core::Result<()> {
//! let vault = Vault::open("/config")?;
//! vault.initialize().await?;
//!
//! // ... write automations.yaml ...
//! let revision = vault.commit("update automation: front_door_motion", "cursor-agent").await?;
//!
//! // Undo it.
//! if let Some(parent) = &revision.parent {
//!     vault.rollback(parent).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod identity;
pub mod journal;
pub mod lock;
pub mod models;
pub mod retention;
pub mod storage;
pub mod tree;
pub mod validate;
pub mod vault;

pub use config::VaultConfig;
pub use diff::{ChangeKind, FileChange};
pub use error::{Error, ErrorKind, Result, Stage};
pub use identity::{Identity, StaticIdentity};
pub use journal::{Journal, Operation, OperationRecord, Outcome};
pub use models::{Revision, RevisionRef, RevisionSummary, Tree};
pub use retention::PruneReport;
pub use validate::{AcceptAll, ValidationIssue, Validator, YamlValidator};
pub use vault::{CommitOptions, RollbackOptions, RollbackState, Vault};
