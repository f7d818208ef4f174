//! Capability Store
//!
//! The store holds the form tree and every capability record, addressed by id.
//! It has three access paths:
//!
//! - **Reads**: [`CapabilityStore::snapshot`] hands out an `Arc<TreeSnapshot>`.
//!   Holding it never blocks writers, and evaluation runs entirely on it.
//! - **Cache writes**: [`CapabilityStore::cache`] is a [`ValueCache`] that takes
//!   no store lock at all (last writer wins).
//! - **Transactional writes**: [`CapabilityStore::begin`] opens a
//!   [`StoreTransaction`]; [`CapabilityStore::commit`] replays it onto the
//!   current snapshot, persists the result when the store is file backed, and
//!   only then publishes it. Any failure leaves the published snapshot and the
//!   file untouched.
//!
//! For a file-backed store, `begin` takes the [`StoreLock`] and reloads the
//! document before copying it, and the transaction keeps the lock until it is
//! committed or dropped. Other processes writing the same file are therefore
//! serialised, and each one builds on what the previous one wrote.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tbl_engine::models::{NodeType, TreeNode};
//! use tbl_engine::store::CapabilityStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = CapabilityStore::open("tree.json").await?;
//! let mut tx = store.begin().await?;
//! tx.insert_node(TreeNode::new("extra", "quote", Some("roof"), NodeType::Field))?;
//! store.commit(tx).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod document;
pub mod graph;
pub mod lock;
pub mod snapshot;
pub mod transaction;

pub use cache::{CachedValue, ValueCache};
pub use document::StoreDocument;
pub use graph::ReferenceGraph;
pub use lock::StoreLock;
pub use snapshot::{CapabilityKey, ReferenceTarget, TreeSnapshot};
pub use transaction::{Change, DeletionSummary, StoreTransaction};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::EngineError;

#[derive(Debug)]
pub struct CapabilityStore {
    state: RwLock<Arc<TreeSnapshot>>,
    cache: ValueCache,
    path: Option<PathBuf>,
}

impl CapabilityStore {
    /// A store that lives only in memory.
    pub fn in_memory(snapshot: TreeSnapshot) -> Self {
        Self {
            state: RwLock::new(Arc::new(snapshot)),
            cache: ValueCache::new(),
            path: None,
        }
    }

    /// Build an in-memory store from a document.
    pub fn from_document(document: StoreDocument) -> Result<Self, EngineError> {
        let (snapshot, cache) = document.into_snapshot()?;
        Ok(Self {
            state: RwLock::new(Arc::new(snapshot)),
            cache: ValueCache::from_entries(cache),
            path: None,
        })
    }

    /// Open a file-backed store. The file must exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = document::load_document(path).await?;
        let mut store = Self::from_document(document)
            .with_context(|| format!("Invalid store file: {}", path.display()))?;
        store.path = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            nodes = store.state.get_mut().node_count(),
            "opened store"
        );
        Ok(store)
    }

    /// Open a file-backed store, starting empty when the file does not exist yet.
    pub async fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::open(path).await
        } else {
            let mut store = Self::in_memory(TreeSnapshot::new());
            store.path = Some(path.to_path_buf());
            Ok(store)
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The currently published snapshot.
    pub async fn snapshot(&self) -> Arc<TreeSnapshot> {
        Arc::clone(&*self.state.read().await)
    }

    pub const fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Start a transaction on a copy of the current snapshot.
    ///
    /// File-backed stores lock the file and reload it first.
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let Some(path) = &self.path else {
            let snapshot = self.snapshot().await;
            return Ok(StoreTransaction::begin(&snapshot));
        };
        let lock = StoreLock::acquire(path).await?;
        let snapshot = self.reload(path).await?;
        Ok(StoreTransaction::begin(&snapshot).holding(lock))
    }

    /// Replace the published snapshot with the file's content and merge its
    /// cache. Only called with the store lock held.
    async fn reload(&self, path: &Path) -> Result<Arc<TreeSnapshot>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(self.snapshot().await);
        }

        let document = document::load_document(path).await?;
        let (snapshot, cache) = document
            .into_snapshot()
            .with_context(|| format!("Invalid store file: {}", path.display()))?;
        self.cache.merge(cache);

        let snapshot = Arc::new(snapshot);
        *self.state.write().await = Arc::clone(&snapshot);
        debug!(path = %path.display(), nodes = snapshot.node_count(), "reloaded store");
        Ok(snapshot)
    }

    /// Apply a transaction atomically.
    ///
    /// The changes are replayed onto the current snapshot and the result must
    /// pass [`TreeSnapshot::ensure_valid`] before it is persisted and published.
    /// The store lock held by `tx` is released once the file is written.
    pub async fn commit(&self, tx: StoreTransaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }

        let mut guard = self.state.write().await;
        let mut next = TreeSnapshot::clone(&guard);
        tx.apply_to(&mut next)?;
        next.ensure_valid()?;

        if let Some(path) = &self.path {
            let document = StoreDocument::from_snapshot(&next, self.cache.to_entries());
            document::save_document(path, document).await?;
        }

        debug!(changes = tx.changes().len(), "committed store transaction");
        *guard = Arc::new(next);
        Ok(())
    }

    /// Write the cache to disk together with the file's current tree, under
    /// the store lock. No-op for in-memory stores.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _lock = StoreLock::acquire(path).await?;
        let snapshot = self.reload(path).await?;
        let document = StoreDocument::from_snapshot(&snapshot, self.cache.to_entries());
        document::save_document(path, document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapabilityKind, NodeType, TreeNode, Value};
    use tempfile::TempDir;

    fn seeded() -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        snapshot.insert_node(TreeNode::new("root", "t", None, NodeType::Section)).unwrap();
        snapshot
    }

    #[tokio::test]
    async fn test_commit_publishes() {
        let store = CapabilityStore::in_memory(seeded());
        let before = store.snapshot().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(TreeNode::new("a", "t", Some("root"), NodeType::Field)).unwrap();
        store.commit(tx).await.unwrap();

        assert!(!before.contains_node("a"));
        assert!(store.snapshot().await.contains_node("a"));
    }

    #[tokio::test]
    async fn test_invalid_commit_is_discarded() {
        let store = CapabilityStore::in_memory(seeded());

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(TreeNode::new("a", "t", Some("root"), NodeType::Field)).unwrap();
        let mut broken = TreeNode::new("b", "t", Some("root"), NodeType::Field);
        broken.capabilities.attach(CapabilityKind::Formula, "missing");
        tx.insert_node(broken).unwrap();

        let err = store.commit(tx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::StoreCorrupted { .. })
        ));
        let snapshot = store.snapshot().await;
        assert!(!snapshot.contains_node("a"));
        assert!(!snapshot.contains_node("b"));
    }

    #[tokio::test]
    async fn test_disjoint_transactions_both_land() {
        let store = CapabilityStore::in_memory(seeded());
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_node(TreeNode::new("a", "t", Some("root"), NodeType::Field)).unwrap();
        second.insert_node(TreeNode::new("b", "t", Some("root"), NodeType::Field)).unwrap();

        store.commit(first).await.unwrap();
        store.commit(second).await.unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.contains_node("a"));
        assert!(snapshot.contains_node("b"));
    }

    #[tokio::test]
    async fn test_file_backed_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");

        let store = CapabilityStore::open_or_create(&path).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_node(TreeNode::new("root", "t", None, NodeType::Section)).unwrap();
        store.commit(tx).await.unwrap();
        store.cache().put("root", Value::Number(3.0), None);
        store.persist().await.unwrap();

        let reopened = CapabilityStore::open(&path).await.unwrap();
        assert!(reopened.snapshot().await.contains_node("root"));
        assert_eq!(reopened.cache().value("root"), Some(Value::Number(3.0)));
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_second_handle_builds_on_first_write() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        let seed = CapabilityStore::open_or_create(&path).await.unwrap();
        let mut tx = seed.begin().await.unwrap();
        tx.insert_node(TreeNode::new("root", "t", None, NodeType::Section)).unwrap();
        seed.commit(tx).await.unwrap();

        // Both handles loaded the file before either wrote to it.
        let first = CapabilityStore::open(&path).await.unwrap();
        let second = CapabilityStore::open(&path).await.unwrap();

        let mut tx = first.begin().await.unwrap();
        tx.insert_node(TreeNode::new("a", "t", Some("root"), NodeType::Field)).unwrap();
        first.commit(tx).await.unwrap();

        let mut tx = second.begin().await.unwrap();
        assert!(tx.view().contains_node("a"));
        tx.insert_node(TreeNode::new("b", "t", Some("root"), NodeType::Field)).unwrap();
        second.commit(tx).await.unwrap();

        let reopened = CapabilityStore::open(&path).await.unwrap().snapshot().await;
        assert!(reopened.contains_node("a"));
        assert!(reopened.contains_node("b"));
    }

    #[tokio::test]
    async fn test_open_transaction_holds_the_file_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        let store = CapabilityStore::open_or_create(&path).await.unwrap();

        let tx = store.begin().await.unwrap();
        assert!(tx.is_locked());
        assert!(StoreLock::acquire_with_timeout(&path, std::time::Duration::from_millis(50)).await.is_err());

        drop(tx);
        assert!(StoreLock::acquire_with_timeout(&path, std::time::Duration::from_millis(500)).await.is_ok());
        assert!(store.begin().await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_in_memory_transactions_take_no_lock() {
        let store = CapabilityStore::in_memory(seeded());
        assert!(!store.begin().await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(CapabilityStore::open(temp.path().join("missing.json")).await.is_err());
    }
}
