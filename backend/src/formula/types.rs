// Formula language - AST definitions
//
// A formula is parsed once (at scenario validation) into an `Expr` tree and
// evaluated many times against per-evaluation bindings. The language is pure:
// literals, named bindings, field access, unary/binary operators and the
// ternary conditional. There are no calls, assignments or loops.

use std::collections::BTreeSet;
use std::fmt;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

/// Binary operators, listed from lowest to highest precedence group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value (number, string, boolean, null)
    Literal(serde_json::Value),

    /// Reference to a named binding (ProcessNode input, `value`, `state`, ...)
    Binding(String),

    /// `target.field`
    Field { target: Box<Expr>, field: String },

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `condition ? then_branch : else_branch`
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

impl Expr {
    /// Collect every binding name the expression refers to
    ///
    /// Field names after a `.` are not bindings and are not collected.
    pub fn bindings(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_bindings(&mut names);
        names
    }

    fn collect_bindings(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Binding(name) => {
                names.insert(name.clone());
            }
            Expr::Field { target, .. } => target.collect_bindings(names),
            Expr::Unary { operand, .. } => operand.collect_bindings(names),
            Expr::Binary { left, right, .. } => {
                left.collect_bindings(names);
                right.collect_bindings(names);
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_bindings(names);
                then_branch.collect_bindings(names);
                else_branch.collect_bindings(names);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Binding(name) => write!(f, "{}", name),
            Expr::Field { target, field } => write!(f, "{}.{}", target, field),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Not => write!(f, "!{}", operand),
            },
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "({} ? {} : {})", condition, then_branch, else_branch),
        }
    }
}

/// A parsed formula together with its source text
///
/// Serializes as the source string so scenario documents round-trip unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
    bindings: BTreeSet<String>,
}

impl Formula {
    pub(crate) fn new(source: String, expr: Expr) -> Self {
        let bindings = expr.bindings();
        Self {
            source,
            expr,
            bindings,
        }
    }

    /// Original formula text
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Binding names referenced anywhere in the formula
    pub fn bindings(&self) -> &BTreeSet<String> {
        &self.bindings
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
