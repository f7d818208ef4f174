//! `tbl recalc`: re-evaluate every computed node of a tree and store the results.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, ContextArgs, print_json};

#[derive(Args, Debug)]
pub struct RecalcCommand {
    /// Tree id
    tree_id: String,

    #[command(flatten)]
    context: ContextArgs,
}

impl RecalcCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let service = ctx.service().await?;
        let context = self.context.load().await?;
        let response = service.recalc_tree(&self.tree_id, &context).await?;

        if ctx.is_json() {
            return print_json(&response);
        }

        if let Some(cycle) = &response.cycle {
            println!("{} {} (evaluated in id order)", "⚠".yellow(), cycle);
        }
        for failure in &response.failed {
            println!("{} {}: {}", "✗".red(), failure.node_id, failure.reason);
        }
        println!(
            "{} Recalculated '{}': {} evaluated, {} failed",
            "✓".green(),
            response.tree_id,
            response.evaluated.len(),
            response.failed.len()
        );
        Ok(())
    }
}
