//! `tbl validate`: check a store for structural, scope and cycle problems.
//!
//! ```text
//! ✓ Store is valid (24 nodes, 11 capabilities)
//! ⚠ formula:f-old → @value.gone (dangling reference)
//! ```
//!
//! Dangling references are reported as warnings; with `--strict` they fail
//! the command as well. Any other issue always fails it.

use anyhow::{Result, anyhow};
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, print_json};
use crate::api::ValidationResponse;

#[derive(Args, Debug, Default)]
pub struct ValidateCommand {
    /// Treat dangling references as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let service = ctx.service().await?;
        let response = service.validate().await;

        if ctx.is_json() {
            print_json(&response)?;
        } else {
            let snapshot = service.store().snapshot().await;
            print_report(&response, snapshot.node_count(), snapshot.capability_count());
        }

        let failures = self.failure_count(&response);
        if failures > 0 {
            return Err(anyhow!("Store validation failed with {failures} issue(s)"));
        }
        Ok(())
    }

    fn failure_count(&self, response: &ValidationResponse) -> usize {
        if self.strict {
            response.issue_count() + response.dangling_references.len()
        } else {
            response.issue_count()
        }
    }
}

fn print_report(response: &ValidationResponse, nodes: usize, capabilities: usize) {
    for issue in &response.structure {
        println!("{} {}", "✗".red(), issue);
    }
    for issue in &response.scopes {
        println!("{} {} (scope)", "✗".red(), issue);
    }
    for cycle in &response.cycles {
        println!("{} {} (cycle)", "✗".red(), cycle);
    }
    for reference in &response.dangling_references {
        println!("{} {} (dangling reference)", "⚠".yellow(), reference);
    }

    if response.ok {
        println!("{} Store is valid ({nodes} nodes, {capabilities} capabilities)", "✓".green());
    }
}
