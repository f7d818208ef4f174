//! `tbl duplicate` and `tbl remove-instance`: manage repeater instances.
//!
//! ```bash
//! tbl duplicate roofs
//! tbl remove-instance roofs 5b0c9a6e-...
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, did_you_mean, find_similar_ids, print_json};
use crate::core::{EngineError, user_friendly_error};
use crate::models::NodeType;

/// Add one instance of a repeater's template subtree.
#[derive(Args, Debug)]
pub struct DuplicateCommand {
    /// Repeater node id
    repeater_id: String,
}

impl DuplicateCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let service = ctx.service().await?;
        let response = match service.duplicate_repeater(&self.repeater_id).await {
            Ok(response) => response,
            Err(err) => {
                let snapshot = service.store().snapshot().await;
                if snapshot.node(&self.repeater_id).is_none() {
                    let repeaters = snapshot
                        .nodes()
                        .filter(|node| node.node_type == NodeType::Repeater)
                        .map(|node| node.id.as_str());
                    if let Some(hint) = did_you_mean(&find_similar_ids(&self.repeater_id, repeaters)) {
                        return Err(user_friendly_error(err).with_suggestion(hint).into());
                    }
                }
                return Err(err);
            }
        };

        if ctx.is_json() {
            return print_json(&response);
        }

        println!(
            "{} Duplicated '{}' as instance {} (scope {})",
            "✓".green(),
            self.repeater_id,
            response.suffix,
            response.scope_id
        );
        ctx.note(format!("  created: {}", response.created_node_ids.join(", ")));
        ctx.note(format!(
            "  references rewritten: {}, shared: {}",
            response.rewritten_references, response.shared_references
        ));
        for reference in &response.unmarked_references {
            println!("{} kept reference to a target not marked shared: {}", "⚠".yellow(), reference);
        }
        for template in &response.skipped_templates {
            println!("{} skipped missing template node '{}'", "⚠".yellow(), template);
        }
        Ok(())
    }
}

/// Delete one instance created by `tbl duplicate`.
#[derive(Args, Debug)]
pub struct RemoveInstanceCommand {
    /// Repeater node id
    repeater_id: String,

    /// Scope id printed by `tbl duplicate`
    scope_id: String,
}

impl RemoveInstanceCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let service = ctx.service().await?;
        let response = match service.remove_instance(&self.repeater_id, &self.scope_id).await {
            Ok(response) => response,
            Err(err) => {
                let unknown_scope = matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::InstanceNotFound { .. })
                );
                if unknown_scope {
                    return Err(user_friendly_error(err)
                        .with_suggestion("Use the scope id printed by 'tbl duplicate'; an instance can only be removed once")
                        .into());
                }
                return Err(err);
            }
        };

        if ctx.is_json() {
            return print_json(&response);
        }

        println!(
            "{} Removed instance {} of '{}' ({} nodes, {} capabilities)",
            "✓".green(),
            response.suffix,
            self.repeater_id,
            response.removed_node_ids.len(),
            response.removed_capabilities
        );
        ctx.note(format!("  removed: {}", response.removed_node_ids.join(", ")));
        Ok(())
    }
}
