//! Expression Evaluator
//!
//! Formulas are evaluated in two steps. Every token is first turned into an
//! [`Atom`]: references are resolved through the [`Evaluator`], literals are
//! taken as they are. The substituted atom list is what the trace shows. A
//! precedence-climbing parser then folds the atoms into one value:
//! `^` binds tightest and is right-associative, `*` and `/` come next, then
//! `+` and `-`. Parentheses override, and a leading `-` negates.
//!
//! Nesting (parentheses, function calls, signs, chained `^`) is capped at
//! [`MAX_NESTING`]; a deeper formula is an invalid expression.

use super::resolver::Resolved;
use super::{EvalFailure, EvalResult, Evaluation, Evaluator};
use crate::models::{Formula, FormulaToken, Function, Operator, Value};

/// Deepest sub-expression nesting the parser follows.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone)]
enum Atom {
    Operand(Resolved),
    Symbol(FormulaToken),
}

impl Atom {
    fn operator(&self) -> Option<Operator> {
        match self {
            Self::Symbol(FormulaToken::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    fn is(&self, token: &FormulaToken) -> bool {
        matches!(
            (self, token),
            (Self::Symbol(FormulaToken::LeftParen), FormulaToken::LeftParen)
                | (Self::Symbol(FormulaToken::RightParen), FormulaToken::RightParen)
                | (Self::Symbol(FormulaToken::Comma), FormulaToken::Comma)
        )
    }
}

pub(crate) fn evaluate(evaluator: &mut Evaluator<'_>, formula: &Formula) -> EvalResult {
    if formula.tokens.is_empty() {
        return Err(EvalFailure::invalid(format!("formula '{}' has no tokens", formula.id)));
    }

    let mut atoms = Vec::with_capacity(formula.tokens.len());
    for token in formula.tokens.iter() {
        let atom = match token {
            FormulaToken::Reference(reference) => Atom::Operand(evaluator.resolve_reference(reference)?),
            FormulaToken::Number(n) => Atom::Operand(Resolved::literal(Value::Number(*n))),
            FormulaToken::Text(text) => Atom::Operand(Resolved::literal(Value::Text(text.clone()))),
            symbol => Atom::Symbol(symbol.clone()),
        };
        atoms.push(atom);
    }

    let expression = render(evaluator, &atoms);
    let mut parser = Parser {
        atoms: &atoms,
        pos: 0,
        depth: 0,
    };
    let result = parser.expression(1)?;
    if let Some(extra) = atoms.get(parser.pos) {
        return Err(EvalFailure::invalid(format!("unexpected '{}'", describe(evaluator, extra))));
    }

    let shown = evaluator.show(&result.value);
    Ok(Evaluation {
        value: result.value,
        trace: format!("{expression} = {shown}"),
    })
}

/// The substituted expression: operands replaced by their values.
fn render(evaluator: &Evaluator<'_>, atoms: &[Atom]) -> String {
    let mut out = String::new();
    let mut previous_opens = true;
    for (index, atom) in atoms.iter().enumerate() {
        let closes = atom.is(&FormulaToken::RightParen) || atom.is(&FormulaToken::Comma);
        if !previous_opens && !closes {
            out.push(' ');
        }
        out.push_str(&describe(evaluator, atom));
        previous_opens = match atom {
            Atom::Symbol(FormulaToken::LeftParen | FormulaToken::Function(_)) => true,
            Atom::Symbol(FormulaToken::Operator(Operator::Sub)) => is_prefix_position(atoms, index),
            _ => false,
        };
    }
    out
}

/// A `-` at this index negates rather than subtracts.
fn is_prefix_position(atoms: &[Atom], index: usize) -> bool {
    match index.checked_sub(1).and_then(|i| atoms.get(i)) {
        None => true,
        Some(previous) => {
            previous.operator().is_some()
                || previous.is(&FormulaToken::LeftParen)
                || previous.is(&FormulaToken::Comma)
        }
    }
}

fn describe(evaluator: &Evaluator<'_>, atom: &Atom) -> String {
    match atom {
        Atom::Operand(resolved) => evaluator.show(&resolved.value),
        Atom::Symbol(token) => token.to_string(),
    }
}

struct Parser<'t> {
    atoms: &'t [Atom],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Atom> {
        self.atoms.get(self.pos)
    }

    fn expect(&mut self, token: &FormulaToken) -> Result<(), EvalFailure> {
        match self.peek() {
            Some(atom) if atom.is(token) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(EvalFailure::invalid(format!("expected '{token}'"))),
        }
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Resolved, EvalFailure> {
        if self.depth >= MAX_NESTING {
            return Err(EvalFailure::invalid(format!("expression nests deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = self.operation(min_precedence);
        self.depth -= 1;
        result
    }

    fn operation(&mut self, min_precedence: u8) -> Result<Resolved, EvalFailure> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek().and_then(Atom::operator) {
            if op.precedence() < min_precedence {
                break;
            }
            self.pos += 1;
            let next = if op.is_right_associative() {
                op.precedence()
            } else {
                op.precedence() + 1
            };
            let right = self.expression(next)?;
            left = Resolved::literal(Value::Number(apply(op, &left, &right)?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Resolved, EvalFailure> {
        while self.peek().and_then(Atom::operator) == Some(Operator::Add) {
            self.pos += 1;
        }
        if self.peek().and_then(Atom::operator) == Some(Operator::Sub) {
            self.pos += 1;
            let operand = self.expression(Operator::Pow.precedence())?;
            let n = number(&operand, "-")?;
            return Ok(Resolved::literal(Value::Number(-n)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Resolved, EvalFailure> {
        let Some(atom) = self.peek() else {
            return Err(EvalFailure::invalid("expression ends unexpectedly"));
        };
        match atom {
            Atom::Operand(resolved) => {
                let resolved = resolved.clone();
                self.pos += 1;
                Ok(resolved)
            }
            Atom::Symbol(FormulaToken::LeftParen) => {
                self.pos += 1;
                let inner = self.expression(1)?;
                self.expect(&FormulaToken::RightParen)?;
                Ok(inner)
            }
            Atom::Symbol(FormulaToken::Function(function)) => {
                let function = *function;
                self.pos += 1;
                let args = self.arguments()?;
                Ok(Resolved::literal(Value::Number(call(function, &args)?)))
            }
            Atom::Symbol(token) => Err(EvalFailure::invalid(format!("unexpected '{token}'"))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Resolved>, EvalFailure> {
        self.expect(&FormulaToken::LeftParen)?;
        let mut args = Vec::new();
        if matches!(self.peek(), Some(atom) if atom.is(&FormulaToken::RightParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression(1)?);
            match self.peek() {
                Some(atom) if atom.is(&FormulaToken::Comma) => self.pos += 1,
                Some(atom) if atom.is(&FormulaToken::RightParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(EvalFailure::invalid("expected ',' or ')' in argument list")),
            }
        }
    }
}

/// Numeric view of an operand, or the failure explaining why there is none.
fn number(operand: &Resolved, operation: &str) -> Result<f64, EvalFailure> {
    if operand.value.is_empty() {
        return Err(operand.missing());
    }
    operand.value.as_number().ok_or_else(|| EvalFailure::TypeMismatch {
        operation: operation.to_string(),
        found: format!("{} '{}'", operand.value.type_name(), operand.value),
    })
}

fn finite(n: f64) -> Result<f64, EvalFailure> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(EvalFailure::invalid("result is not a finite number"))
    }
}

fn apply(op: Operator, left: &Resolved, right: &Resolved) -> Result<f64, EvalFailure> {
    let a = number(left, op.symbol())?;
    let b = number(right, op.symbol())?;
    let n = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(EvalFailure::DivisionByZero);
            }
            a / b
        }
        Operator::Pow => a.powf(b),
    };
    finite(n)
}

fn call(function: Function, args: &[Resolved]) -> Result<f64, EvalFailure> {
    let name = function.name();
    let numbers = args.iter().map(|arg| number(arg, name)).collect::<Result<Vec<_>, _>>()?;
    let arity = |expected: &str| EvalFailure::invalid(format!("{name} expects {expected}, got {}", numbers.len()));

    let n = match (function, numbers.as_slice()) {
        (Function::Min, [first, rest @ ..]) => rest.iter().fold(*first, |acc, n| acc.min(*n)),
        (Function::Max, [first, rest @ ..]) => rest.iter().fold(*first, |acc, n| acc.max(*n)),
        (Function::Min | Function::Max, []) => return Err(arity("at least one argument")),
        (Function::Round, [x]) => x.round(),
        (Function::Round, [x, digits]) => {
            let factor = 10f64.powi(digits.trunc().clamp(-15.0, 15.0) as i32);
            (x * factor).round() / factor
        }
        (Function::Round, _) => return Err(arity("one or two arguments")),
        (Function::Abs, [x]) => x.abs(),
        (Function::Ceil, [x]) => x.ceil(),
        (Function::Floor, [x]) => x.floor(),
        (Function::Abs | Function::Ceil | Function::Floor, _) => return Err(arity("one argument")),
    };
    finite(n)
}
