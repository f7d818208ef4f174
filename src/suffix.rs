//! Suffix Allocator
//!
//! One allocator serves one duplication transaction. It is seeded by a single
//! scan of the snapshot: every clone whose `sourceTemplateId` is one of the
//! template ids contributes its suffix, read from `copySuffix` metadata or,
//! failing that, from the trailing `-<n>` of its own id. Allocation is
//! `max + 1` and the counter moves forward on every call, so an allocator never
//! hands out the same suffix twice for a template. Running out of suffixes
//! (a stored suffix of `u32::MAX`) is a duplication integrity violation.

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::core::EngineError;
use crate::reference::trailing_suffix;
use crate::store::TreeSnapshot;

#[derive(Debug, Clone, Default)]
pub struct SuffixAllocator {
    used: BTreeMap<String, u32>,
    floor: u32,
}

impl SuffixAllocator {
    /// Scan `tree_id` for clones of `template_ids` and record the highest suffix per template.
    pub fn seed<I, S>(snapshot: &TreeSnapshot, tree_id: &str, template_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let templates: HashSet<String> = template_ids.into_iter().map(Into::into).collect();
        let mut used: BTreeMap<String, u32> = templates.iter().map(|id| (id.clone(), 0)).collect();

        for node in snapshot.tree_nodes(tree_id) {
            let Some(source) = node.metadata.source_template_id.as_deref() else {
                continue;
            };
            if !templates.contains(source) {
                continue;
            }
            let suffix = node.metadata.copy_suffix.or_else(|| trailing_suffix(&node.id)).unwrap_or(0);
            let entry = used.entry(source.to_string()).or_insert(0);
            *entry = (*entry).max(suffix);
        }

        debug!(tree_id, templates = templates.len(), "seeded suffix allocator");
        Self {
            used,
            floor: 0,
        }
    }

    /// Never allocate at or below `floor`; used with the repeater's recorded
    /// high-water mark so suffixes of removed instances stay retired.
    #[must_use]
    pub const fn with_floor(mut self, floor: u32) -> Self {
        self.floor = floor;
        self
    }

    /// Highest suffix seen or allocated for a template.
    pub fn max_used(&self, template_id: &str) -> u32 {
        self.used.get(template_id).copied().unwrap_or(0)
    }

    /// Next suffix for one template.
    pub fn allocate(&mut self, template_id: &str) -> Result<u32, EngineError> {
        let next = Self::next_after(self.max_used(template_id).max(self.floor))?;
        self.used.insert(template_id.to_string(), next);
        Ok(next)
    }

    /// One suffix shared by a group of templates duplicated together: above the
    /// maximum of every member, and recorded for all of them.
    pub fn allocate_group<S: AsRef<str>>(&mut self, template_ids: &[S]) -> Result<u32, EngineError> {
        let highest = template_ids.iter().map(|id| self.max_used(id.as_ref())).max().unwrap_or(0);
        let next = Self::next_after(highest.max(self.floor))?;
        for id in template_ids {
            self.used.insert(id.as_ref().to_string(), next);
        }
        Ok(next)
    }

    fn next_after(highest: u32) -> Result<u32, EngineError> {
        highest.checked_add(1).ok_or_else(|| EngineError::DuplicationIntegrity {
            reason: format!("suffix space exhausted: {highest} is already in use"),
        })
    }
}
