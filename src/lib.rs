pub mod bytecode;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod syntax;

pub use engine::{Engine, Solutions};
pub use error::{CompileError, EngineError, RuntimeError};
