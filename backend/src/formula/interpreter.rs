// Formula language - interpreter
//
// Evaluates a parsed `Expr` against `Bindings`. Evaluation is pure and
// deterministic: the same tree and bindings always produce the same value.
// Numbers are computed in f64; whole results are returned as JSON integers.

use crate::formula::context::Bindings;
use crate::formula::types::{BinaryOp, Expr, Formula, UnaryOp};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while evaluating a formula
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unknown binding: {0}")]
    UnknownBinding(String),

    #[error("Field '{field}' not found on {target}")]
    FieldNotFound { field: String, target: String },

    #[error("Type mismatch: {op} cannot be applied to {found}")]
    TypeMismatch { op: &'static str, found: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NonFinite,
}

/// Evaluate a formula against the given bindings
///
/// # Example
///
/// ```rust
/// use workflow_simulator_core_rs::formula::{evaluate, parse_formula, Bindings};
/// use serde_json::json;
///
/// let formula = parse_formula("n <= 3 ? \"low\" : \"high\"").unwrap();
/// let bindings = Bindings::new().with("n", json!(2));
/// assert_eq!(evaluate(&formula, &bindings).unwrap(), json!("low"));
/// ```
pub fn evaluate(formula: &Formula, bindings: &Bindings) -> Result<Value, EvalError> {
    evaluate_expr(formula.expr(), bindings)
}

/// Evaluate a formula used as a condition
///
/// The result must be a boolean or a number (non-zero is true).
pub fn evaluate_condition(formula: &Formula, bindings: &Bindings) -> Result<bool, EvalError> {
    let value = evaluate(formula, bindings)?;
    truthy(&value, "condition")
}

/// Evaluate an expression tree
pub fn evaluate_expr(expr: &Expr, bindings: &Bindings) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Binding(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownBinding(name.clone())),

        Expr::Field { target, field } => {
            let base = evaluate_expr(target, bindings)?;
            match base.get(field.as_str()) {
                Some(v) if base.is_object() => Ok(v.clone()),
                _ => Err(EvalError::FieldNotFound {
                    field: field.clone(),
                    target: type_name(&base),
                }),
            }
        }

        Expr::Unary { op, operand } => {
            let v = evaluate_expr(operand, bindings)?;
            match op {
                UnaryOp::Neg => number_value(-as_number(&v, "unary '-'")?),
                UnaryOp::Not => Ok(Value::Bool(!truthy(&v, "'!'")?)),
            }
        }

        // Short-circuit forms first
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            if !truthy(&evaluate_expr(left, bindings)?, "'&&'")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&evaluate_expr(right, bindings)?, "'&&'")?))
        }

        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            if truthy(&evaluate_expr(left, bindings)?, "'||'")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&evaluate_expr(right, bindings)?, "'||'")?))
        }

        Expr::Binary { op, left, right } => {
            let l = evaluate_expr(left, bindings)?;
            let r = evaluate_expr(right, bindings)?;
            apply_binary(*op, &l, &r)
        }

        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            if truthy(&evaluate_expr(condition, bindings)?, "'?:'")? {
                evaluate_expr(then_branch, bindings)
            } else {
                evaluate_expr(else_branch, bindings)
            }
        }
    }
}

fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),

        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = as_number(l, op.symbol())?;
                    let b = as_number(r, op.symbol())?;
                    a.partial_cmp(&b).ok_or(EvalError::NonFinite)?
                }
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }

        BinaryOp::Add => match (l, r) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, display(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", display(a), b))),
            _ => number_value(as_number(l, "'+'")? + as_number(r, "'+'")?),
        },

        BinaryOp::Sub => number_value(as_number(l, "'-'")? - as_number(r, "'-'")?),
        BinaryOp::Mul => number_value(as_number(l, "'*'")? * as_number(r, "'*'")?),

        BinaryOp::Div | BinaryOp::Rem => {
            let a = as_number(l, op.symbol())?;
            let b = as_number(r, op.symbol())?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            number_value(if op == BinaryOp::Div { a / b } else { a % b })
        }

        // evaluate_expr short-circuits these; this is the eager form
        BinaryOp::And => Ok(Value::Bool(truthy(l, "'&&'")? && truthy(r, "'&&'")?)),
        BinaryOp::Or => Ok(Value::Bool(truthy(l, "'||'")? || truthy(r, "'||'")?)),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn as_number(v: &Value, op: &'static str) -> Result<f64, EvalError> {
    match v {
        Value::Number(n) => n.as_f64().ok_or(EvalError::NonFinite),
        other => Err(EvalError::TypeMismatch {
            op,
            found: type_name(other),
        }),
    }
}

fn truthy(v: &Value, op: &'static str) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|x| x != 0.0).unwrap_or(false)),
        Value::Null => Ok(false),
        other => Err(EvalError::TypeMismatch {
            op,
            found: type_name(other),
        }),
    }
}

/// Convert an f64 result back to JSON, keeping whole numbers integral
pub fn number_value(n: f64) -> Result<Value, EvalError> {
    if !n.is_finite() {
        return Err(EvalError::NonFinite);
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Ok(Value::from(n as i64))
    } else {
        Ok(Value::from(n))
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse_formula;
    use serde_json::json;

    fn eval(source: &str, bindings: &Bindings) -> Result<Value, EvalError> {
        evaluate(&parse_formula(source).unwrap(), bindings)
    }

    #[test]
    fn test_arithmetic_keeps_integers_integral() {
        let b = Bindings::new().with("a", json!(4)).with("b", json!(160));
        assert_eq!(eval("a + b + 10", &b).unwrap(), json!(174));
        assert_eq!(eval("a / 8", &b).unwrap(), json!(0.5));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let b = Bindings::new().with("n", json!(5));
        assert_eq!(eval("n >= 4 && n <= 6", &b).unwrap(), json!(true));
        assert_eq!(eval("n < 4 || n > 6", &b).unwrap(), json!(false));
        assert_eq!(eval("!(n == 5)", &b).unwrap(), json!(false));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let b = Bindings::new().with("x", json!(2.0));
        assert_eq!(eval("x == 2", &b).unwrap(), json!(true));
    }

    #[test]
    fn test_nested_ternary_mapping() {
        let f = "n <= 3 ? \"token_received\" : (n <= 6 ? \"processing_complete\" : \"reset\")";
        for (n, expected) in [(2, "token_received"), (5, "processing_complete"), (9, "reset")] {
            let b = Bindings::new().with("n", json!(n));
            assert_eq!(eval(f, &b).unwrap(), json!(expected));
        }
    }

    #[test]
    fn test_field_access() {
        let b = Bindings::new().with("reading", json!({"celsius": 20}));
        assert_eq!(eval("reading.celsius * 2", &b).unwrap(), json!(40));
        assert_eq!(
            eval("reading.kelvin", &b),
            Err(EvalError::FieldNotFound {
                field: "kelvin".to_string(),
                target: "object".to_string()
            })
        );
    }

    #[test]
    fn test_field_access_on_scalar_fails() {
        let b = Bindings::new().with("n", json!(1));
        assert!(matches!(
            eval("n.value", &b),
            Err(EvalError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_binding() {
        assert_eq!(
            eval("missing + 1", &Bindings::new()),
            Err(EvalError::UnknownBinding("missing".to_string()))
        );
    }

    #[test]
    fn test_type_mismatch() {
        let b = Bindings::new().with("s", json!("abc"));
        assert!(matches!(
            eval("s * 2", &b),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_string_concatenation() {
        let b = Bindings::new().with("n", json!(3));
        assert_eq!(eval("\"n=\" + n", &b).unwrap(), json!("n=3"));
    }

    #[test]
    fn test_division_by_zero() {
        let b = Bindings::new().with("n", json!(3));
        assert_eq!(eval("n / 0", &b), Err(EvalError::DivisionByZero));
        assert_eq!(eval("n % 0", &b), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_short_circuit_skips_unknown_binding() {
        let b = Bindings::new();
        assert_eq!(eval("false && missing", &b).unwrap(), json!(false));
        assert_eq!(eval("true || missing", &b).unwrap(), json!(true));
    }

    #[test]
    fn test_condition_rejects_strings() {
        let f = parse_formula("\"yes\"").unwrap();
        assert!(evaluate_condition(&f, &Bindings::new()).is_err());
    }
}
