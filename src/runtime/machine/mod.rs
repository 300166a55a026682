use std::rc::Rc;

use tracing::debug;

use crate::bytecode::clause::CompiledClause;
use crate::bytecode::compiler::CompiledQuery;
use crate::error::RuntimeError;
use crate::runtime::store::{ConstantPools, Predicate, PredicateKind, Store};
use crate::runtime::table::Table;
use crate::runtime::value::Value;

mod dispatch;
mod exprs;
mod trace;
mod unify;

/// One live clause invocation: its bytecode, environment frame base, the
/// caller-argument cursor used while the head is matched, and the
/// choice-point height at entry (the cut barrier).
#[derive(Clone)]
pub(crate) struct Activation {
    pub clause: Rc<CompiledClause>,
    pub pred: Rc<Predicate>,
    pub pc: usize,
    pub env_base: usize,
    pub arg_cursor: usize,
    pub cut_barrier: usize,
}

/// What a choice point retries: the next clause of a rule predicate, or
/// the next row of a table.
pub(crate) enum Retry {
    Clauses { pred: Rc<Predicate>, next: usize },
    Rows { pred: Rc<Predicate>, table: Rc<Table>, next: usize },
}

/// Saved state sufficient to try an alternative: stack top, trail mark,
/// and a snapshot of the goal stack (the continuation).
pub(crate) struct ChoicePoint {
    pub retry: Retry,
    pub arity: usize,
    pub saved_sp: usize,
    pub saved_trail: usize,
    pub saved_goals: Vec<Activation>,
}

/// A pending goal between its `CGoal`/`CMetaGoal` prelude and the
/// `CCall`/`CLastCall` that consumes it.
pub(crate) struct Pending {
    pub pred: Rc<Predicate>,
    pub arity: usize,
}

pub(crate) enum Flow {
    Continue,
    Fail,
}

/// The goal virtual machine.
///
/// Single-threaded; `run` blocks until the next solution or failure. All
/// cells live on one data stack whose addresses stay stable for the life
/// of a query: the stack only grows, or is truncated on backtracking after
/// the trail has reset every surviving binding.
pub struct Machine {
    pub(crate) stack: Vec<Value>,
    pub(crate) trail: Vec<usize>,
    pub(crate) goals: Vec<Activation>,
    pub(crate) choice_points: Vec<ChoicePoint>,
    pub(crate) fstack: Vec<Value>,
    pub(crate) pending: Option<Pending>,
    steps: u64,
    step_limit: Option<u64>,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(256),
            trail: Vec::new(),
            goals: Vec::new(),
            choice_points: Vec::new(),
            fstack: Vec::new(),
            pending: None,
            steps: 0,
            step_limit: None,
        }
    }

    /// Bound the number of predicate calls; exceeding it raises a fatal
    /// error that unwinds to the caller of `run`.
    pub fn set_step_limit(&mut self, limit: Option<u64>) {
        self.step_limit = limit;
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.trail.clear();
        self.goals.clear();
        self.choice_points.clear();
        self.fstack.clear();
        self.pending = None;
        self.steps = 0;
    }

    /// Install a compiled query as the initial goal.
    pub fn start(&mut self, query: &CompiledQuery) {
        self.reset();
        self.enter_clause(query.pred.clone(), query.clause.clone(), 0, 0);
    }

    /// Run until the next solution. Returns whether one was found. After a
    /// solution, call `retry` to look for the next one.
    pub fn run(&mut self, store: &Store) -> Result<bool, RuntimeError> {
        loop {
            if self.goals.is_empty() {
                return Ok(true);
            }
            match self.step(store)? {
                Flow::Continue => {}
                Flow::Fail => {
                    if !self.backtrack(store)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Backtrack out of the current solution and run to the next one.
    pub fn retry(&mut self, store: &Store) -> Result<bool, RuntimeError> {
        if !self.backtrack(store)? {
            return Ok(false);
        }
        self.run(store)
    }

    pub(crate) fn enter_clause(
        &mut self,
        pred: Rc<Predicate>,
        clause: Rc<CompiledClause>,
        arg_base: usize,
        cut_barrier: usize,
    ) {
        let env_base = self.stack.len();
        for _ in 0..clause.env_size {
            self.stack.push(Value::Unbound);
        }
        self.goals.push(Activation {
            clause,
            pred,
            pc: 0,
            env_base,
            arg_cursor: arg_base,
            cut_barrier,
        });
    }

    pub(crate) fn check_step_limit(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;
        if let Some(limit) = self.step_limit {
            if self.steps > limit {
                return Err(RuntimeError::StepLimit);
            }
        }
        Ok(())
    }

    /// Invoke a predicate whose arguments occupy
    /// `stack[arg_base..arg_base + arity]`. The caller's continuation is
    /// already in place.
    pub(crate) fn call_predicate(
        &mut self,
        store: &Store,
        pred: Rc<Predicate>,
        arg_base: usize,
        arity: usize,
    ) -> Result<Flow, RuntimeError> {
        if pred.is_traced.get() {
            self.trace_port(store, "CALL", &pred, arg_base, arity);
        }

        enum Action {
            Empty,
            Rules { first: Rc<CompiledClause>, multi: bool },
            Table(Rc<Table>),
            Primop(crate::runtime::store::PrimopFn),
        }

        let action = {
            let kind = pred.kind.borrow();
            match &*kind {
                PredicateKind::Rules(clauses) => match clauses.first() {
                    None => Action::Empty,
                    Some(first) => Action::Rules {
                        first: first.clone(),
                        multi: clauses.len() > 1,
                    },
                },
                PredicateKind::Table(table) => Action::Table(table.clone()),
                PredicateKind::Primop(body) => Action::Primop(body.clone()),
            }
        };

        match action {
            Action::Empty => {
                debug!(target: "horn::vm", "no clauses for {}", pred.indicator);
                Ok(Flow::Fail)
            }
            Action::Rules { first, multi } => {
                if multi {
                    self.push_choice_point(
                        Retry::Clauses {
                            pred: pred.clone(),
                            next: 1,
                        },
                        arity,
                    );
                }
                let barrier = if multi {
                    self.choice_points.len() - 1
                } else {
                    self.choice_points.len()
                };
                self.enter_clause(pred, first, arg_base, barrier);
                Ok(Flow::Continue)
            }
            Action::Table(table) => {
                self.push_choice_point(
                    Retry::Rows {
                        pred,
                        table,
                        next: 0,
                    },
                    arity,
                );
                // Row matching runs through the ordinary retry path.
                if self.backtrack(store)? {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }
            Action::Primop(body) => {
                if body(self, arg_base, arity)? {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }
        }
    }

    fn push_choice_point(&mut self, retry: Retry, arity: usize) {
        self.choice_points.push(ChoicePoint {
            retry,
            arity,
            saved_sp: self.stack.len(),
            saved_trail: self.trail.len(),
            saved_goals: self.goals.clone(),
        });
    }

    /// Restore the most recent choice point and resume at its next
    /// alternative. Returns false when no alternatives remain anywhere.
    pub(crate) fn backtrack(&mut self, store: &Store) -> Result<bool, RuntimeError> {
        loop {
            let Some(mut cp) = self.choice_points.pop() else {
                return Ok(false);
            };

            // Undo bindings past the mark, newest first, then drop the
            // cells above the saved stack top.
            while self.trail.len() > cp.saved_trail {
                let addr = self.trail.pop().unwrap_or_default();
                self.stack[addr] = Value::Unbound;
            }
            self.stack.truncate(cp.saved_sp);
            self.goals.clear();
            self.goals.extend_from_slice(&cp.saved_goals);
            self.pending = None;
            self.fstack.clear();

            let arg_base = cp.saved_sp - cp.arity;
            let call_arity = cp.arity;
            let position = self.choice_points.len();

            match cp.retry {
                Retry::Clauses {
                    ref pred,
                    ref mut next,
                } => {
                    let pred = pred.clone();
                    let index = *next;
                    let count = pred.clause_count();
                    if index >= count {
                        continue;
                    }
                    *next = index + 1;
                    let Some(clause) = pred.clause(index) else {
                        continue;
                    };
                    if index + 1 < count {
                        self.choice_points.push(cp);
                    }
                    if pred.is_traced.get() {
                        self.trace_port(store, "RETRY", &pred, arg_base, call_arity);
                    }
                    self.enter_clause(pred, clause, arg_base, position);
                    return Ok(true);
                }
                Retry::Rows {
                    ref pred,
                    ref table,
                    ref mut next,
                } => {
                    let pred = pred.clone();
                    let table = table.clone();
                    let mut index = *next;
                    let row_count = table.row_count();
                    let mut matched = false;
                    while index < row_count {
                        let mark = self.trail.len();
                        let row = table.rows()[index].clone();
                        let mut ok = true;
                        for (column, cell) in row.iter().enumerate() {
                            if !self.unify_ref_value(arg_base + column, cell) {
                                ok = false;
                                break;
                            }
                        }
                        index += 1;
                        if ok {
                            matched = true;
                            break;
                        }
                        while self.trail.len() > mark {
                            let addr = self.trail.pop().unwrap_or_default();
                            self.stack[addr] = Value::Unbound;
                        }
                    }
                    if matched {
                        *next = index;
                        if index < row_count {
                            self.choice_points.push(cp);
                        }
                        if pred.is_traced.get() {
                            self.trace_port(store, "MATCH", &pred, arg_base, call_arity);
                        }
                        return Ok(true);
                    }
                    continue;
                }
            }
        }
    }

    /// Evaluate a standalone expression block (used by `report`).
    pub fn eval_standalone(
        &mut self,
        store: &Store,
        code: &[u8],
        pools: &Rc<std::cell::RefCell<ConstantPools>>,
    ) -> Result<Value, RuntimeError> {
        self.reset();
        let mut pc = 0;
        self.run_expr(store, code, &mut pc, 0, pools)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
