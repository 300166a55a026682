use thiserror::Error;

use crate::syntax::term::Term;

/// Errors raised while parsing or compiling top-level terms.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed declaration or expression.
    #[error("{file}:{line}: syntax error: {message}")]
    Syntax {
        message: String,
        file: String,
        line: usize,
    },

    /// More than 256 distinct constants of one kind in a predicate.
    #[error("constant pool overflow in {predicate}: too many distinct {kind} constants")]
    PoolOverflow {
        predicate: String,
        kind: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, file: impl Into<String>, line: usize) -> Self {
        CompileError::Syntax {
            message: message.into(),
            file: file.into(),
            line,
        }
    }
}

/// Errors raised during execution. These unwind all choice points back to
/// the top-level run call; there is no automatic retry.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An unbound cell was read where a value was required.
    #[error("instantiation error: {context}")]
    Instantiation { context: &'static str },

    /// Operand tag disagrees with the opcode.
    #[error("type error: expected {expected}, got {actual}")]
    Type {
        expected: &'static str,
        actual: String,
    },

    /// Meta-call to an undefined name/arity.
    #[error("unknown predicate {name}/{arity}")]
    UnknownPredicate { name: String, arity: usize },

    /// Call to an unregistered host function or constructor.
    #[error("unknown host function {0}")]
    UnknownFunction(String),

    /// Read of a global that was never defined.
    #[error("undefined global {0}")]
    UndefinedGlobal(String),

    /// Bytecode-level invariant violation; indicates a compiler bug.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The `throw` builtin; carries the thrown term.
    #[error("uncaught throw: {0}")]
    UserThrow(Term),

    /// The configured step budget ran out.
    #[error("step limit exceeded")]
    StepLimit,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
