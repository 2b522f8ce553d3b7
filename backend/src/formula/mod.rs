// Formula language
//
// A small, side-effect free expression language used by ProcessNode outputs,
// FSM transition conditions/onEntry emits and StateMultiplexer routes.
//
// Architecture:
// - types.rs: AST (Expr, Formula)
// - parser.rs: lexer + recursive-descent parser (parse once at load time)
// - context.rs: Bindings (named values for one evaluation)
// - interpreter.rs: evaluator (evaluate many times per run)

pub mod context;
pub mod interpreter;
pub mod parser;
pub mod types;

pub use context::Bindings;
pub use interpreter::{evaluate, evaluate_condition, evaluate_expr, number_value, EvalError};
pub use parser::{parse_formula, ParseError};
pub use types::{BinaryOp, Expr, Formula, UnaryOp};
