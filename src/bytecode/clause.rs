use std::rc::Rc;

use crate::runtime::symbol::Symbol;
use crate::syntax::term::{Term, Variable};

/// One head-argument position in the head model: a literal, a variable
/// bound to an environment slot, or a void argument.
#[derive(Debug, Clone)]
pub enum HeadSlot {
    Const(Term),
    Var { slot: u8, name: Rc<str> },
    Void,
}

/// A compiled rule or fact.
///
/// `env_size` is the number of environment cells the clause needs; it
/// always equals one past the highest slot index used by the bytecode, or
/// zero when no slots are used. The head model reconstructs the head term
/// for tracing and listing without decoding bytecode.
#[derive(Debug, Clone)]
pub struct CompiledClause {
    pub source: Term,
    pub code: Vec<u8>,
    pub env_size: usize,
    pub head_model: Vec<HeadSlot>,
    pub file: String,
    pub line: usize,
}

impl CompiledClause {
    /// Rebuild the head term from the head model, naming variables with
    /// their source names.
    pub fn reconstruct_head(&self, functor: &Symbol) -> Term {
        if self.head_model.is_empty() {
            return Term::Atom(functor.clone());
        }
        let args = self
            .head_model
            .iter()
            .map(|slot| match slot {
                HeadSlot::Const(term) => term.clone(),
                HeadSlot::Var { name, .. } => Term::Var(Variable::new(name.clone())),
                HeadSlot::Void => Term::Var(Variable::generated("_")),
            })
            .collect();
        Term::call(functor.clone(), args)
    }
}
