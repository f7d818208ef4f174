//! The evaluator: reference resolution and capability dispatch.
//!
//! Every reference read during an evaluation goes through
//! [`Evaluator::resolve_reference`], and every capability evaluation through
//! [`Evaluator::eval_capability`]. The latter keeps the stack of capabilities
//! currently being evaluated; meeting one of them again is a cycle and turns
//! into [`EvalFailure::Cycle`] instead of unbounded recursion.

use tracing::{debug, warn};

use super::{
    ConditionOutcome, EvalFailure, EvalOutcome, EvalResult, EvalSettings, Evaluation, TableMatch,
    ValueContext, condition, expression, table,
};
use crate::models::{Capability, CapabilityKind, Operand, Value, Variable, format_number};
use crate::reference::ParsedReference;
use crate::store::{CapabilityKey, TreeSnapshot, ValueCache};

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Capability records evaluated, nested ones included
    pub capability_evaluations: usize,
    /// Reference tokens resolved
    pub reference_resolutions: usize,
    /// Condition branch expressions tested
    pub branch_tests: usize,
}

/// A resolved operand together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub value: Value,
    /// Wire form of the reference, `None` for literals
    pub reference: Option<String>,
    /// The reference named nothing in the store
    pub unresolved: bool,
}

impl Resolved {
    pub(crate) const fn literal(value: Value) -> Self {
        Self {
            value,
            reference: None,
            unresolved: false,
        }
    }

    fn from_reference(value: Value, reference: &ParsedReference) -> Self {
        Self {
            value,
            reference: Some(reference.to_string()),
            unresolved: false,
        }
    }

    /// The failure to report when this operand is empty but a value was required.
    pub(crate) fn missing(&self) -> EvalFailure {
        match (&self.reference, self.unresolved) {
            (Some(reference), true) => EvalFailure::UnresolvedReference {
                reference: reference.clone(),
            },
            (reference, _) => EvalFailure::MissingValue {
                reference: reference.clone(),
            },
        }
    }
}

pub struct Evaluator<'a> {
    snapshot: &'a TreeSnapshot,
    context: &'a dyn ValueContext,
    cache: Option<&'a ValueCache>,
    settings: EvalSettings,
    stack: Vec<CapabilityKey>,
    warnings: Vec<String>,
    stats: EvalStats,
}

impl<'a> Evaluator<'a> {
    pub fn new(snapshot: &'a TreeSnapshot, context: &'a dyn ValueContext, settings: EvalSettings) -> Self {
        Self {
            snapshot,
            context,
            cache: None,
            settings,
            stack: Vec::new(),
            warnings: Vec::new(),
            stats: EvalStats::default(),
        }
    }

    /// Fall back to, and write back into, the given value cache.
    #[must_use]
    pub const fn with_cache(mut self, cache: &'a ValueCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub const fn stats(&self) -> EvalStats {
        self.stats
    }

    pub const fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Evaluate any capability by kind and id.
    pub fn evaluate(&mut self, kind: CapabilityKind, id: &str) -> EvalOutcome {
        let key = CapabilityKey::new(kind, id);
        let result = self.eval_capability(&key);
        if let Err(failure) = &result {
            debug!(capability = %key, reason = %failure, "evaluation failed");
        }
        EvalOutcome {
            capability: key,
            result,
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    pub fn evaluate_formula(&mut self, id: &str) -> EvalOutcome {
        self.evaluate(CapabilityKind::Formula, id)
    }

    pub fn evaluate_table(&mut self, id: &str) -> EvalOutcome {
        self.evaluate(CapabilityKind::Table, id)
    }

    /// [`evaluate_table`](Self::evaluate_table) that also hands back the
    /// matched cell. The keys are resolved once.
    pub fn evaluate_table_match(&mut self, id: &str) -> (EvalOutcome, Option<TableMatch>) {
        let key = CapabilityKey::new(CapabilityKind::Table, id);
        let snapshot = self.snapshot;
        let (result, matched) = match snapshot.table(id) {
            Some(record) => {
                self.stack.push(key.clone());
                self.stats.capability_evaluations += 1;
                let lookup = table::lookup(self, record);
                self.stack.pop();
                match lookup {
                    Ok(matched) => (table::conclude(self, record, matched.clone()), Some(matched)),
                    Err(failure) => (Err(failure), None),
                }
            }
            None => (
                Err(EvalFailure::UnresolvedReference {
                    reference: key.to_string(),
                }),
                None,
            ),
        };
        if let Err(failure) = &result {
            debug!(capability = %key, reason = %failure, "evaluation failed");
        }
        let outcome = EvalOutcome {
            capability: key,
            result,
            warnings: std::mem::take(&mut self.warnings),
        };
        (outcome, matched)
    }

    pub fn evaluate_variable(&mut self, id: &str) -> EvalOutcome {
        self.evaluate(CapabilityKind::Variable, id)
    }

    /// Evaluate a condition and report which branch won and how many were tested.
    pub fn evaluate_condition(&mut self, id: &str) -> ConditionOutcome {
        let key = CapabilityKey::new(CapabilityKind::Condition, id);
        let snapshot = self.snapshot;
        let mut outcome = match snapshot.condition(id) {
            Some(record) => {
                self.stack.push(key.clone());
                self.stats.capability_evaluations += 1;
                let outcome = condition::evaluate(self, record);
                self.stack.pop();
                outcome
            }
            None => ConditionOutcome::failed(EvalFailure::UnresolvedReference {
                reference: key.to_string(),
            }),
        };
        outcome.warnings = std::mem::take(&mut self.warnings);
        outcome
    }

    /// Table lookup that distinguishes "no match" from other failures.
    pub fn lookup_table(&mut self, id: &str) -> Result<TableMatch, EvalFailure> {
        let snapshot = self.snapshot;
        let record = snapshot.table(id).ok_or_else(|| EvalFailure::UnresolvedReference {
            reference: CapabilityKey::new(CapabilityKind::Table, id).to_string(),
        })?;
        let result = table::lookup(self, record);
        self.warnings.clear();
        result
    }

    /// Evaluate the active capability of a node, if it has one.
    pub fn evaluate_node(&mut self, node_id: &str) -> Option<EvalOutcome> {
        let snapshot = self.snapshot;
        let (kind, id) = snapshot.node(node_id)?.active_capability()?;
        Some(self.evaluate(kind, id))
    }

    /// [`evaluate_node`](Self::evaluate_node), writing the result into the
    /// value cache. A failed evaluation clears the cached value.
    pub fn evaluate_node_and_cache(&mut self, node_id: &str) -> Option<EvalOutcome> {
        let outcome = self.evaluate_node(node_id)?;
        if let Some(cache) = self.cache {
            match &outcome.result {
                Ok(evaluation) => {
                    cache.put(node_id, evaluation.value.clone(), Some(evaluation.trace.clone()));
                }
                Err(_) => cache.remove(node_id),
            }
        }
        Some(outcome)
    }

    /// The single dispatch point over capability kinds.
    pub(crate) fn eval_capability(&mut self, key: &CapabilityKey) -> EvalResult {
        let snapshot = self.snapshot;
        let Some(capability) = snapshot.capability(key.kind, &key.id) else {
            return Err(EvalFailure::UnresolvedReference {
                reference: key.to_string(),
            });
        };

        if let Some(start) = self.stack.iter().position(|visiting| visiting == key) {
            let mut chain: Vec<String> = self.stack[start..].iter().map(ToString::to_string).collect();
            chain.push(key.to_string());
            warn!(chain = %chain.join(" → "), "reference cycle");
            return Err(EvalFailure::Cycle {
                chain,
            });
        }
        if self.stack.len() >= self.settings.max_depth {
            return Err(EvalFailure::DepthExceeded {
                depth: self.settings.max_depth,
            });
        }

        self.stack.push(key.clone());
        self.stats.capability_evaluations += 1;
        let result = match capability {
            Capability::Formula(formula) => expression::evaluate(self, formula),
            Capability::Condition(record) => condition::evaluate(self, record).result,
            Capability::Table(record) => table::evaluate(self, record),
            Capability::Variable(variable) => self.eval_variable(variable),
        };
        self.stack.pop();
        result
    }

    fn eval_variable(&mut self, variable: &Variable) -> EvalResult {
        let resolved = match &variable.source_ref {
            Some(reference) => self.resolve_reference(reference)?,
            None => self.resolve_field(&variable.node_id, &ParsedReference::field(&variable.node_id))?,
        };
        let shown = self.show(&resolved.value);
        Ok(Evaluation {
            value: resolved.value,
            trace: format!("{} = {shown}", variable.exposed_key),
        })
    }

    pub(crate) fn resolve_operand(&mut self, operand: &Operand) -> Result<Resolved, EvalFailure> {
        match operand {
            Operand::Literal {
                value,
            } => Ok(Resolved::literal(value.clone())),
            Operand::Reference {
                reference,
            } => self.resolve_reference(reference),
        }
    }

    /// Resolve one reference.
    ///
    /// Fields read the live context, then the cached computed value, then the
    /// node's active capability. Capability references are evaluated. A
    /// reference that names nothing yields an empty operand and a warning.
    pub(crate) fn resolve_reference(&mut self, reference: &ParsedReference) -> Result<Resolved, EvalFailure> {
        self.stats.reference_resolutions += 1;
        let snapshot = self.snapshot;

        match CapabilityKind::from_reference_kind(reference.kind) {
            None => self.resolve_field(&reference.id, reference),
            Some(CapabilityKind::Variable) => {
                if let Some(value) = self.context.lookup(&reference.id) {
                    return Ok(Resolved::from_reference(value, reference));
                }
                match snapshot.variable_by_key(&reference.id) {
                    Some(variable) => {
                        let key = CapabilityKey::new(CapabilityKind::Variable, variable.id.clone());
                        let evaluation = self.eval_capability(&key)?;
                        Ok(Resolved::from_reference(evaluation.value, reference))
                    }
                    None => Ok(self.unresolved(reference)),
                }
            }
            Some(kind) => {
                let key = CapabilityKey::new(kind, reference.id.clone());
                if snapshot.contains_capability(&key) {
                    let evaluation = self.eval_capability(&key)?;
                    Ok(Resolved::from_reference(evaluation.value, reference))
                } else {
                    Ok(self.unresolved(reference))
                }
            }
        }
    }

    fn resolve_field(&mut self, node_id: &str, reference: &ParsedReference) -> Result<Resolved, EvalFailure> {
        if let Some(value) = self.context.lookup(node_id) {
            return Ok(Resolved::from_reference(value, reference));
        }
        if let Some(value) = self.cache.and_then(|cache| cache.value(node_id)) {
            return Ok(Resolved::from_reference(value, reference));
        }

        let snapshot = self.snapshot;
        let Some(node) = snapshot.node(node_id) else {
            return Ok(self.unresolved(reference));
        };
        match node.active_capability() {
            Some((kind, id)) => {
                let evaluation = self.eval_capability(&CapabilityKey::new(kind, id))?;
                Ok(Resolved::from_reference(evaluation.value, reference))
            }
            None => Ok(Resolved::from_reference(Value::Empty, reference)),
        }
    }

    fn unresolved(&mut self, reference: &ParsedReference) -> Resolved {
        let message = format!("reference '{reference}' does not resolve; using an empty value");
        debug!("{message}");
        self.warnings.push(message);
        Resolved {
            value: Value::Empty,
            reference: Some(reference.to_string()),
            unresolved: true,
        }
    }

    pub(crate) fn record_branch_test(&mut self) {
        self.stats.branch_tests += 1;
    }

    pub(crate) fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Text used for a value inside a trace.
    pub(crate) fn show(&self, value: &Value) -> String {
        match (value, self.settings.decimal_places) {
            (value, _) if value.is_empty() => self.settings.empty_display.clone(),
            (Value::Number(n), Some(places)) => {
                let factor = 10f64.powi(places.min(15) as i32);
                format_number((n * factor).round() / factor)
            }
            (value, _) => value.to_string(),
        }
    }
}
