//! Bytebeat expression language: lexer, parser and bounded evaluator.
//!
//! User expressions are untrusted. They are compiled into an [`Expr`]
//! tree by a restricted-grammar parser (never delegated to any host
//! evaluation facility) and evaluated under a fuel budget, so compile
//! and evaluate stay distinct, inspectable steps.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinaryOp, Builtin, Expr, UnaryOp};
pub use eval::{eval, EvalState, DEFAULT_FUEL_BUDGET};
pub use parser::MAX_NESTING_DEPTH;

use lexer::Lexer;
use parser::Parser;

/// Expression failed to lex, parse or resolve.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Character outside the expression alphabet
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// Malformed numeric literal
    #[error("invalid number '{text}' at position {pos}")]
    InvalidNumber { text: String, pos: usize },

    /// Token out of place
    #[error("expected {expected}, found {found} at position {pos}")]
    UnexpectedToken {
        expected: String,
        found: String,
        pos: usize,
    },

    /// Input ended mid-expression
    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEof { expected: String },

    /// Identifier is neither `t` nor a builtin
    #[error("unknown identifier '{name}' at position {pos}")]
    UnknownIdent { name: String, pos: usize },

    /// Builtin called with the wrong number of arguments
    #[error("{name} expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Nesting beyond [`MAX_NESTING_DEPTH`]
    #[error("expression nesting too deep (limit {limit})")]
    TooDeep { limit: usize },
}

/// Per-sample evaluation failure. Mapped to silence by the caller,
/// never propagated through the audio path.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Evaluation exceeded its per-call fuel budget
    #[error("expression exceeded its evaluation budget of {budget} operations")]
    BudgetExhausted { budget: u64 },
}

/// A compiled expression: parsed AST plus its fuel budget.
#[derive(Debug, Clone)]
pub struct Program {
    root: Expr,
    fuel_budget: u64,
}

impl Program {
    /// Compile source text into a program with the default fuel budget.
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        let root = Parser::new(tokens).parse_expression()?;
        Ok(Program {
            root,
            fuel_budget: DEFAULT_FUEL_BUDGET,
        })
    }

    /// Override the per-call fuel budget.
    pub fn with_fuel_budget(mut self, budget: u64) -> Self {
        self.fuel_budget = budget;
        self
    }

    /// The per-call fuel budget.
    pub fn fuel_budget(&self) -> u64 {
        self.fuel_budget
    }

    /// Fresh evaluation state sized to this program's budget.
    pub fn new_state(&self) -> EvalState {
        EvalState::new(self.fuel_budget)
    }

    /// Evaluate at sample index `t` with caller-held state.
    pub fn eval(&self, t: f64, state: &mut EvalState) -> Result<f64, EvalError> {
        eval(&self.root, t, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_eval_roundtrip() {
        let program = Program::compile("(t>>4)&255").unwrap();
        let mut state = program.new_state();
        assert_eq!(program.eval(4096.0, &mut state).unwrap(), 0.0);
        assert_eq!(program.eval(4112.0, &mut state).unwrap(), 1.0);
    }

    #[test]
    fn compile_error_carries_message() {
        let err = Program::compile("t >>").unwrap_err();
        assert!(err.to_string().contains("unexpected end of expression"));
    }

    #[test]
    fn tiny_budget_fails_every_call() {
        let program = Program::compile("t+t+t+t").unwrap().with_fuel_budget(2);
        let mut state = program.new_state();
        for t in 0..8 {
            assert!(program.eval(t as f64, &mut state).is_err());
        }
    }
}
