//! Duplication Orchestrator
//!
//! "Add one more" on a repeater deep-copies the repeater's template subtrees.
//! One call is one store transaction made of three strictly ordered passes:
//!
//! 1. **Clone nodes** breadth-first. Each clone is `<id>-<suffix>`, hangs under
//!    the clone of its original parent (template roots stay under the
//!    repeater) and records its provenance in [`NodeMetadata`]. The result is a
//!    frozen [`NodeIdMap`].
//! 2. **Clone capabilities** owned by any cloned node, with suffixed ids and
//!    suffixed variable keys. The result is a frozen [`CapabilityIdMaps`].
//! 3. **Rewrite references** of every cloned record through the two maps.
//!    Anything the maps do not know is left as is: silently when it targets a
//!    node marked `shared`, with a warning otherwise.
//!
//! The repeater's bookkeeping is updated in the same transaction, which is
//! committed only when every pass succeeded. An id collision or a reference
//! into a foreign clone scope aborts the whole call.
//!
//! Calls on the same repeater are serialised by a per-repeater lock; calls on
//! different repeaters run in parallel.
//!
//! [`NodeMetadata`]: crate::models::NodeMetadata

pub mod context;
pub mod maps;
pub mod rewrite;

pub use context::{DuplicationContext, DuplicationMode, audit_scopes};
pub use maps::{CapabilityIdMaps, NodeIdMap};
pub use rewrite::RewriteSummary;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::default_duplication_lock_timeout;
use crate::core::EngineError;
use crate::models::{Capability, CapabilityKind, NodeType, RepeaterInstance, TreeNode};
use crate::store::{CapabilityKey, CapabilityStore, StoreTransaction, TreeSnapshot};
use crate::suffix::SuffixAllocator;
use maps::CapabilityIdMapsBuilder;
use rewrite::ReferenceRewriter;

/// Result of one successful duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationReport {
    pub repeater_id: String,
    pub scope_id: String,
    pub suffix: u32,
    /// Clones of the template roots
    pub root_node_ids: Vec<String>,
    /// Every created node, parents before children
    pub created_node_ids: Vec<String>,
    pub node_id_map: BTreeMap<String, String>,
    pub capability_counts: BTreeMap<CapabilityKind, usize>,
    pub rewritten_references: usize,
    pub shared_references: usize,
    /// References kept on targets outside the template that are not marked shared
    pub unmarked_references: Vec<String>,
    /// Configured templates that no longer exist
    pub skipped_templates: Vec<String>,
}

/// Result of removing one repeater instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub repeater_id: String,
    pub scope_id: String,
    pub suffix: u32,
    pub removed_node_ids: Vec<String>,
    pub removed_capabilities: usize,
}

/// Knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct DuplicationOptions {
    /// How long to wait for another duplication of the same repeater
    pub lock_timeout: Duration,
    /// Log a warning for every reference kept on an unmarked target
    pub warn_unmarked_references: bool,
}

impl Default for DuplicationOptions {
    fn default() -> Self {
        Self {
            lock_timeout: default_duplication_lock_timeout(),
            warn_unmarked_references: true,
        }
    }
}

pub struct DuplicationOrchestrator {
    store: Arc<CapabilityStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    options: DuplicationOptions,
}

impl DuplicationOrchestrator {
    pub fn new(store: Arc<CapabilityStore>) -> Self {
        Self::with_options(store, DuplicationOptions::default())
    }

    pub fn with_options(store: Arc<CapabilityStore>, options: DuplicationOptions) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            options,
        }
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    fn lock_for(&self, repeater_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(repeater_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    async fn acquire(&self, repeater_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(repeater_id);
        tokio::time::timeout(self.options.lock_timeout, lock.lock_owned()).await.map_err(|_| {
            anyhow::anyhow!(
                "Timed out after {:?} waiting for another duplication of repeater '{repeater_id}'",
                self.options.lock_timeout
            )
        })
    }

    /// Add one instance to a repeater.
    ///
    /// Not idempotent: every successful call creates a new instance with a new
    /// suffix.
    pub async fn duplicate(&self, repeater_id: &str) -> Result<DuplicationReport> {
        let _guard = self.acquire(repeater_id).await?;

        let mut tx = self.store.begin().await?;
        let report = duplicate_in(&mut tx, repeater_id, &self.options)?;
        self.store.commit(tx).await?;

        // Clones start without a computed value.
        let cache = self.store.cache();
        for id in &report.created_node_ids {
            cache.remove(id);
        }

        info!(
            repeater = repeater_id,
            scope = %report.scope_id,
            suffix = report.suffix,
            nodes = report.created_node_ids.len(),
            "duplicated repeater templates"
        );
        Ok(report)
    }

    /// Delete one instance: its clone subtrees and every capability they own.
    /// The suffix stays retired.
    pub async fn remove_instance(&self, repeater_id: &str, scope_id: &str) -> Result<RemovalReport> {
        let _guard = self.acquire(repeater_id).await?;

        let mut tx = self.store.begin().await?;
        let report = remove_instance_in(&mut tx, repeater_id, scope_id)?;
        self.store.commit(tx).await?;

        let cache = self.store.cache();
        for id in &report.removed_node_ids {
            cache.remove(id);
        }
        info!(repeater = repeater_id, scope = scope_id, nodes = report.removed_node_ids.len(), "removed instance");
        Ok(report)
    }

    /// The duplication context of a clone.
    pub async fn context_of(&self, node_id: &str) -> Option<DuplicationContext> {
        let snapshot = self.store.snapshot().await;
        snapshot.node(node_id).and_then(DuplicationContext::from_node)
    }
}

fn load_repeater(view: &TreeSnapshot, repeater_id: &str) -> Result<TreeNode, EngineError> {
    let repeater = view.node(repeater_id).cloned().ok_or_else(|| EngineError::NodeNotFound {
        id: repeater_id.to_string(),
    })?;
    if repeater.node_type != NodeType::Repeater {
        return Err(EngineError::NotARepeater {
            id: repeater.id,
            node_type: repeater.node_type.to_string(),
        });
    }
    Ok(repeater)
}

/// Template subtree of `root`, breadth-first, leaving out clones produced by
/// earlier passes of nested repeaters.
fn template_subtree<'a>(view: &'a TreeSnapshot, root: &'a TreeNode) -> Vec<&'a TreeNode> {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        nodes.push(node);
        // Instances of nested repeaters carry their own scope and stay behind.
        for child in view.children(&node.id) {
            if child.metadata.repeat_scope_id == root.metadata.repeat_scope_id {
                queue.push_back(child);
            }
        }
    }
    nodes
}

/// Run the three passes inside `tx`. Nothing is written to `tx` unless every
/// pass succeeded.
pub fn duplicate_in(
    tx: &mut StoreTransaction,
    repeater_id: &str,
    options: &DuplicationOptions,
) -> Result<DuplicationReport, EngineError> {
    let view = tx.view();
    let mut repeater = load_repeater(view, repeater_id)?;
    let mut config = repeater.repeater.clone().unwrap_or_default();

    let mut templates = Vec::new();
    let mut skipped_templates = Vec::new();
    for template_id in &config.template_node_ids {
        match view.node(template_id) {
            Some(template) => templates.push(template),
            None => {
                warn!(repeater = repeater_id, template = %template_id, "template node is missing; skipped");
                skipped_templates.push(template_id.clone());
            }
        }
    }
    if templates.is_empty() {
        return Err(EngineError::NoTemplates {
            repeater_id: repeater_id.to_string(),
        });
    }

    // (original node, template root) in breadth-first order, each node once.
    let mut originals: Vec<(&TreeNode, &str)> = Vec::new();
    let mut included = HashSet::new();
    for template in &templates {
        for node in template_subtree(view, template) {
            if included.insert(node.id.as_str()) {
                originals.push((node, template.id.as_str()));
            }
        }
    }

    let original_ids: Vec<&str> = originals.iter().map(|(node, _)| node.id.as_str()).collect();
    let mut allocator =
        SuffixAllocator::seed(view, &repeater.tree_id, original_ids.iter().copied()).with_floor(config.max_suffix);
    let suffix = allocator.allocate_group(&original_ids)?;
    let scope_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    debug!(repeater = repeater_id, suffix, scope = %scope_id, nodes = originals.len(), "starting duplication");

    // Pass 1: nodes.
    let node_map = NodeIdMap::from_pairs(
        original_ids.iter().map(|id| ((*id).to_string(), format!("{id}-{suffix}"))),
    );
    let next_order = view.children(repeater_id).iter().map(|child| child.order).max().map_or(0, |max| max + 1);
    let mut cloned_nodes = Vec::with_capacity(originals.len());
    let mut root_node_ids = Vec::new();
    for (index, (original, template_root)) in originals.iter().enumerate() {
        let clone_id = format!("{}-{suffix}", original.id);
        if view.contains_node(&clone_id) {
            return Err(EngineError::IdCollision {
                id: clone_id,
            });
        }

        let mut clone = (*original).clone();
        clone.id = clone_id;
        let is_root = original.id == *template_root;
        match original.parent_id.as_deref().and_then(|parent| node_map.get(parent)) {
            Some(parent_clone) if !is_root => clone.parent_id = Some(parent_clone.to_string()),
            _ => {}
        }
        if is_root {
            clone.order = next_order + index as i64;
            root_node_ids.push(clone.id.clone());
        }
        clone.metadata.source_template_id = Some(original.id.clone());
        clone.metadata.copy_suffix = Some(suffix);
        clone.metadata.repeat_scope_id = Some(scope_id.clone());
        clone.metadata.duplicated_from_repeater = Some(repeater_id.to_string());
        clone.metadata.template_root_id = Some((*template_root).to_string());
        clone.metadata.duplicated_at = Some(now);
        clone.metadata.shared = false;
        if let Some(nested) = clone.repeater.as_mut() {
            nested.instances.clear();
            nested.max_suffix = 0;
        }
        cloned_nodes.push(clone);
    }

    // Pass 2: capabilities.
    let mut builder = CapabilityIdMapsBuilder::default();
    let mut cloned_capabilities = Vec::new();
    for (original, _) in &originals {
        let Some(owner_clone) = node_map.get(&original.id) else {
            continue;
        };
        for capability in view.owned_capabilities(&original.id) {
            let clone_id = format!("{}-{suffix}", capability.id());
            let key = CapabilityKey::new(capability.kind(), clone_id.clone());
            if view.contains_capability(&key) {
                return Err(EngineError::IdCollision {
                    id: key.to_string(),
                });
            }
            builder.record(capability.kind(), capability.id(), &clone_id);

            let mut clone = capability.clone();
            clone.reassign(clone_id, owner_clone.to_string());
            if let Capability::Variable(variable) = &mut clone {
                let exposed_key = format!("{}-{suffix}", variable.exposed_key);
                builder.record_variable_key(&variable.exposed_key, &exposed_key);
                variable.exposed_key = exposed_key;
            }
            cloned_capabilities.push(clone);
        }
    }
    let capability_map = builder.freeze();

    // Pass 3: references.
    let enclosing = context::enclosing_scopes(view, repeater_id);
    let rewriter = ReferenceRewriter {
        before: view,
        nodes: &node_map,
        capabilities: &capability_map,
        enclosing_scopes: &enclosing,
        warn_unmarked: options.warn_unmarked_references,
    };
    let mut summary = RewriteSummary::default();
    for capability in &mut cloned_capabilities {
        rewriter.rewrite_capability(capability, &mut summary)?;
    }
    for node in &mut cloned_nodes {
        rewriter.rewrite_node(node, &mut summary);
    }

    let created_node_ids: Vec<String> = cloned_nodes.iter().map(|node| node.id.clone()).collect();
    config.instances.push(RepeaterInstance {
        scope_id: scope_id.clone(),
        suffix,
        root_node_ids: root_node_ids.clone(),
        node_ids: created_node_ids.clone(),
        created_at: now,
    });
    config.max_suffix = config.max_suffix.max(suffix);
    repeater.repeater = Some(config);

    let report = DuplicationReport {
        repeater_id: repeater_id.to_string(),
        scope_id,
        suffix,
        root_node_ids,
        created_node_ids,
        node_id_map: node_map.to_btree(),
        capability_counts: capability_map.counts(),
        rewritten_references: summary.rewritten,
        shared_references: summary.shared,
        unmarked_references: summary.unmarked,
        skipped_templates,
    };

    for node in cloned_nodes {
        tx.insert_node(node)?;
    }
    for capability in cloned_capabilities {
        tx.insert_capability(capability)?;
    }
    tx.update_node(repeater)?;
    Ok(report)
}

/// Remove one instance inside `tx`.
pub fn remove_instance_in(
    tx: &mut StoreTransaction,
    repeater_id: &str,
    scope_id: &str,
) -> Result<RemovalReport, EngineError> {
    let mut repeater = load_repeater(tx.view(), repeater_id)?;
    let mut config = repeater.repeater.clone().unwrap_or_default();
    let Some(position) = config.instances.iter().position(|instance| instance.scope_id == scope_id) else {
        return Err(EngineError::InstanceNotFound {
            repeater_id: repeater_id.to_string(),
            scope_id: scope_id.to_string(),
        });
    };
    let instance = config.instances.remove(position);

    let roots: Vec<&str> = instance
        .root_node_ids
        .iter()
        .map(String::as_str)
        .filter(|id| tx.view().contains_node(id))
        .collect();
    let (removed_node_ids, removed_capabilities) = if roots.is_empty() {
        (Vec::new(), 0)
    } else {
        let summary = tx.delete_nodes(&roots)?;
        (summary.node_ids, summary.capability_keys.len())
    };

    repeater.repeater = Some(config);
    tx.update_node(repeater)?;

    Ok(RemovalReport {
        repeater_id: repeater_id.to_string(),
        scope_id: scope_id.to_string(),
        suffix: instance.suffix,
        removed_node_ids,
        removed_capabilities,
    })
}
