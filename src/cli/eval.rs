//! `tbl eval`: evaluate one formula, condition or table.
//!
//! ```bash
//! tbl eval formula f-area --set width=4 --set length=2.5
//! tbl eval condition c-pitch --context answers.json
//! tbl --format json eval table t-supplier --set postcode=5150
//! ```
//!
//! A failed evaluation is still a successful command: the failure is printed
//! (or returned as the `{ ok: false, ... }` payload) and the exit code is 0.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use super::common::{CommandContext, ContextArgs, did_you_mean, find_similar_ids, print_json, print_warnings};
use crate::api::{ConditionResponse, EngineService, EvaluateRequest, EvaluationResponse, FailureBody, TableResponse};
use crate::core::{EngineError, ErrorContext, IntoAnyhowWithContext};
use crate::models::CapabilityKind;

#[derive(Args, Debug)]
pub struct EvalCommand {
    #[command(subcommand)]
    target: EvalTarget,
}

#[derive(Subcommand, Debug)]
enum EvalTarget {
    /// Evaluate a formula
    Formula(EvalArgs),
    /// Evaluate a condition
    Condition(EvalArgs),
    /// Look a value up in a table
    Table(EvalArgs),
}

#[derive(Args, Debug)]
struct EvalArgs {
    /// Capability id
    id: String,

    #[command(flatten)]
    context: ContextArgs,
}

impl EvalArgs {
    async fn prepare(&self, ctx: &CommandContext, kind: CapabilityKind) -> Result<(EngineService, EvaluateRequest)> {
        let service = ctx.service().await?;
        ensure_capability(&service, kind, &self.id).await?;
        let mut request = EvaluateRequest::new(&self.id);
        request.context = self.context.load().await?;
        Ok((service, request))
    }
}

impl EvalCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        match self.target {
            EvalTarget::Formula(args) => {
                let (service, request) = args.prepare(ctx, CapabilityKind::Formula).await?;
                let response = service.evaluate_formula(&request).await;
                if ctx.is_json() {
                    return print_json(&response);
                }
                match response {
                    EvaluationResponse::Ok(body) => {
                        println!("{} {} = {}", "✓".green(), args.id, ctx.show(&body.value));
                        println!("  {}", body.trace.dimmed());
                        print_warnings(&body.warnings);
                    }
                    EvaluationResponse::Failed(body) => print_failure(&args.id, &body),
                }
            }
            EvalTarget::Condition(args) => {
                let (service, request) = args.prepare(ctx, CapabilityKind::Condition).await?;
                let response = service.evaluate_condition(&request).await;
                if ctx.is_json() {
                    return print_json(&response);
                }
                match response {
                    ConditionResponse::Ok(body) => {
                        println!("{} {} = {}", "✓".green(), args.id, ctx.show(&body.value));
                        println!("  {}", body.trace.dimmed());
                        match body.matched_branch {
                            Some(branch) => ctx.note(format!(
                                "  branch {branch} matched after {} evaluated",
                                body.branches_evaluated
                            )),
                            None => ctx.note("  fallback used"),
                        }
                        print_warnings(&body.warnings);
                    }
                    ConditionResponse::Failed(body) => print_failure(&args.id, &body),
                }
            }
            EvalTarget::Table(args) => {
                let (service, request) = args.prepare(ctx, CapabilityKind::Table).await?;
                let response = service.evaluate_table(&request).await;
                if ctx.is_json() {
                    return print_json(&response);
                }
                match response {
                    TableResponse::Ok(body) => {
                        println!("{} {} = {}", "✓".green(), args.id, ctx.show(&body.value));
                        println!("  {}", body.trace.dimmed());
                        if let (Some(row), Some(column)) = (&body.row, &body.column) {
                            ctx.note(format!("  row {row}, column {column}"));
                        }
                        print_warnings(&body.warnings);
                    }
                    TableResponse::Failed(body) => print_failure(&args.id, &body),
                }
            }
        }
        Ok(())
    }
}

/// Fail early on unknown ids so the user gets a suggestion instead of an
/// unresolved-reference payload.
async fn ensure_capability(service: &EngineService, kind: CapabilityKind, id: &str) -> Result<()> {
    let snapshot = service.store().snapshot().await;
    if snapshot.capability(kind, id).is_some() {
        return Ok(());
    }

    let known: Vec<&str> =
        snapshot.capabilities().filter(|capability| capability.kind() == kind).map(|capability| capability.id()).collect();
    let error = EngineError::CapabilityNotFound {
        kind,
        id: id.to_string(),
    };
    let mut context = ErrorContext::new(error.clone());
    if let Some(hint) = did_you_mean(&find_similar_ids(id, known)) {
        context = context.with_suggestion(hint);
    }
    Err(error.into_anyhow_with_context(context))
}

fn print_failure(id: &str, body: &FailureBody) {
    println!("{} {}: {} [{}]", "✗".red(), id, body.reason, body.code);
    println!("  shown as: {}", body.display);
    if let Some(chain) = &body.chain {
        println!("  cycle: {}", chain.join(" → "));
    }
    print_warnings(&body.warnings);
}
