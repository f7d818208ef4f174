//! Table Lookup Resolver
//!
//! Keys are compared after normalisation: numbers by their canonical text form
//! (`"5150"`, `5150` and `"5150.0"` are the same key), everything else with
//! whitespace collapsed and case folded. A key that matches more than one row
//! or column is an error rather than an arbitrary pick.

use serde::Serialize;

use super::{EvalFailure, EvalResult, Evaluation, Evaluator};
use crate::models::{LookupMode, Operand, Table, Value, format_number};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TableMatch {
    Found {
        value: Value,
        row: Option<String>,
        column: Option<String>,
    },
    NoMatch {
        key: String,
    },
}

impl TableMatch {
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Found {
                value,
                ..
            } => Some(value),
            Self::NoMatch {
                ..
            } => None,
        }
    }
}

/// Which axis a key is matched along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Row,
    Column,
}

impl Axis {
    const fn name(self) -> &'static str {
        match self {
            Self::Row => "row",
            Self::Column => "column",
        }
    }
}

pub(crate) fn normalize_key(value: &Value) -> String {
    match value.as_number() {
        Some(n) => format_number(n),
        None => value.to_string().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
    }
}

fn normalize_label(label: &str) -> String {
    normalize_key(&Value::text(label))
}

pub(crate) fn evaluate(evaluator: &mut Evaluator<'_>, table: &Table) -> EvalResult {
    let matched = lookup(evaluator, table)?;
    conclude(evaluator, table, matched)
}

/// Turn a lookup result into the table's value and trace.
pub(crate) fn conclude(evaluator: &Evaluator<'_>, table: &Table, matched: TableMatch) -> EvalResult {
    match matched {
        TableMatch::Found {
            value,
            row,
            column,
        } => {
            let name = if table.name.is_empty() { &table.id } else { &table.name };
            let shown = evaluator.show(&value);
            let trace = format!(
                "{name}[{}, {}] = {shown}",
                row.as_deref().unwrap_or("*"),
                column.as_deref().unwrap_or("*")
            );
            Ok(Evaluation {
                value,
                trace,
            })
        }
        TableMatch::NoMatch {
            key,
        } => Err(EvalFailure::NoMatch {
            key,
        }),
    }
}

pub(crate) fn lookup(evaluator: &mut Evaluator<'_>, table: &Table) -> Result<TableMatch, EvalFailure> {
    let config = &table.lookup;
    let (row, column) = match config.mode {
        LookupMode::Row => {
            let key = resolve_key(evaluator, config.row_key.as_ref(), "row")?;
            let key_column = position(table, Axis::Column, config.key_column.as_deref())?;
            let Some(row) = find(table, Axis::Row, key_column, &key)? else {
                return Ok(TableMatch::NoMatch {
                    key,
                });
            };
            let column = display_index(table, Axis::Column, config.display_column.as_deref(), key_column)?;
            (row, column)
        }
        LookupMode::Column => {
            let key = resolve_key(evaluator, config.column_key.as_ref(), "column")?;
            let key_row = position(table, Axis::Row, config.key_row.as_deref())?;
            let Some(column) = find(table, Axis::Column, key_row, &key)? else {
                return Ok(TableMatch::NoMatch {
                    key,
                });
            };
            let row = display_index(table, Axis::Row, config.display_row.as_deref(), key_row)?;
            (row, column)
        }
        LookupMode::Both => {
            let row_key = resolve_key(evaluator, config.row_key.as_ref(), "row")?;
            let column_key = resolve_key(evaluator, config.column_key.as_ref(), "column")?;
            let key_column = position(table, Axis::Column, config.key_column.as_deref())?;
            let key_row = position(table, Axis::Row, config.key_row.as_deref())?;
            let Some(row) = find(table, Axis::Row, key_column, &row_key)? else {
                return Ok(TableMatch::NoMatch {
                    key: row_key,
                });
            };
            let Some(column) = find(table, Axis::Column, key_row, &column_key)? else {
                return Ok(TableMatch::NoMatch {
                    key: column_key,
                });
            };
            (row, column)
        }
    };

    Ok(TableMatch::Found {
        value: cell(table, row, column),
        row: table.rows.get(row).cloned(),
        column: table.columns.get(column).cloned(),
    })
}

fn resolve_key(evaluator: &mut Evaluator<'_>, operand: Option<&Operand>, axis: &str) -> Result<String, EvalFailure> {
    let operand = operand.ok_or_else(|| EvalFailure::invalid(format!("{axis} lookup has no {axis} key")))?;
    let resolved = evaluator.resolve_operand(operand)?;
    if resolved.value.is_empty() {
        return Err(resolved.missing());
    }
    Ok(normalize_key(&resolved.value))
}

fn cell(table: &Table, row: usize, column: usize) -> Value {
    table.data.get(row).and_then(|cells| cells.get(column)).cloned().unwrap_or_default()
}

fn labels(table: &Table, axis: Axis) -> &[String] {
    match axis {
        Axis::Row => &table.rows,
        Axis::Column => &table.columns,
    }
}

/// Index of a named row or column, `None` when no name is configured.
fn position(table: &Table, axis: Axis, name: Option<&str>) -> Result<Option<usize>, EvalFailure> {
    let Some(name) = name else {
        return Ok(None);
    };
    let wanted = normalize_label(name);
    labels(table, axis)
        .iter()
        .position(|label| normalize_label(label) == wanted)
        .map(Some)
        .ok_or_else(|| EvalFailure::invalid(format!("table '{}' has no {} '{name}'", table.id, axis.name())))
}

/// Find the single row (or column) whose key equals `key`.
///
/// The key is read from the labels, or from the cells of `key_line` (a column
/// when matching rows, a row when matching columns) when one is configured.
fn find(table: &Table, axis: Axis, key_line: Option<usize>, key: &str) -> Result<Option<usize>, EvalFailure> {
    let count = labels(table, axis).len();
    let matches: Vec<usize> = (0..count)
        .filter(|&index| {
            let candidate = match (axis, key_line) {
                (_, None) => normalize_label(&labels(table, axis)[index]),
                (Axis::Row, Some(column)) => normalize_key(&cell(table, index, column)),
                (Axis::Column, Some(row)) => normalize_key(&cell(table, row, index)),
            };
            !candidate.is_empty() && candidate == key
        })
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        many => Err(EvalFailure::AmbiguousMatch {
            key: key.to_string(),
            count: many.len(),
        }),
    }
}

/// The line whose cell is displayed: the configured one, or the first line that
/// is not the key line.
fn display_index(table: &Table, axis: Axis, name: Option<&str>, key_line: Option<usize>) -> Result<usize, EvalFailure> {
    if let Some(index) = position(table, axis, name)? {
        return Ok(index);
    }
    let count = labels(table, axis).len();
    (0..count)
        .find(|index| Some(*index) != key_line)
        .ok_or_else(|| EvalFailure::invalid(format!("table '{}' has nothing to display", table.id)))
}
