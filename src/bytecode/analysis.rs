use std::collections::HashMap;
use std::rc::Rc;

use crate::syntax::term::{Call, Term};

/// Builtin goals handled by inline opcodes rather than predicate calls.
pub fn is_comparison(name: &str) -> bool {
    matches!(name, "<" | ">" | "=<" | ">=")
}

pub fn is_type_test(name: &str) -> bool {
    matches!(
        name,
        "integer" | "float" | "number" | "string" | "symbol" | "missing"
    )
}

pub fn is_mode_test(name: &str) -> bool {
    matches!(name, "var" | "nonvar")
}

pub fn updater_arity(name: &str) -> Option<usize> {
    match name {
        "unsafe_set" | "maximize_update" | "minimize_update" | "sum_update_and_repeat" => Some(2),
        "unsafe_initialize"
        | "unsafe_initialize_zero"
        | "unsafe_initialize_zero_int"
        | "inc_and_repeat" => Some(1),
        _ => None,
    }
}

/// Classification result for one clause variable.
#[derive(Debug)]
pub struct VarInfo {
    pub name: Rc<str>,
    pub generated: bool,
    pub occurrences: usize,
    /// Occurs somewhere other than as a bare argument of the head or of an
    /// ordinary goal: inside a compound, in an expression, or as the target
    /// of an updater. Such variables always need an environment cell.
    pub deep: bool,
    pub slot: Option<u8>,
}

/// Variable analysis for one clause.
///
/// Counts occurrences in head-then-body, left-to-right order and assigns
/// environment slots first-come to every variable that is not void. A
/// variable is void when it occurs exactly once as a bare argument; it
/// compiles to a void opcode and gets no cell.
#[derive(Debug)]
pub struct ClauseAnalysis {
    vars: Vec<VarInfo>,
    by_name: HashMap<Rc<str>, usize>,
}

impl ClauseAnalysis {
    /// Analyze a clause. `force_slots` is used for top-level queries, where
    /// every named variable needs a cell so bindings can be read back.
    pub fn analyze(head: Option<&Term>, body: Option<&Term>, force_slots: bool) -> Self {
        let mut analysis = Self {
            vars: Vec::new(),
            by_name: HashMap::new(),
        };

        if let Some(Term::Call(call)) = head {
            for arg in &call.args {
                analysis.collect_arg(arg);
            }
        }
        if let Some(body) = body {
            analysis.collect_goal(body);
        }

        let mut next_slot: u8 = 0;
        for var in &mut analysis.vars {
            let void = var.occurrences == 1 && !var.deep && !(force_slots && !var.generated);
            if !void {
                var.slot = Some(next_slot);
                next_slot += 1;
            }
        }

        analysis
    }

    fn record(&mut self, name: &Rc<str>, generated: bool, deep: bool) {
        match self.by_name.get(name) {
            Some(&index) => {
                let var = &mut self.vars[index];
                var.occurrences += 1;
                var.deep |= deep;
            }
            None => {
                self.by_name.insert(name.clone(), self.vars.len());
                self.vars.push(VarInfo {
                    name: name.clone(),
                    generated,
                    occurrences: 1,
                    deep,
                    slot: None,
                });
            }
        }
    }

    /// A bare argument position: a variable here may be void.
    fn collect_arg(&mut self, term: &Term) {
        match term {
            Term::Var(v) => self.record(&v.name, v.generated, false),
            Term::Call(_) => self.collect_deep(term),
            _ => {}
        }
    }

    /// An expression or compound position: every variable needs a cell.
    fn collect_deep(&mut self, term: &Term) {
        match term {
            Term::Var(v) => self.record(&v.name, v.generated, true),
            Term::Call(call) => {
                for arg in &call.args {
                    self.collect_deep(arg);
                }
            }
            _ => {}
        }
    }

    fn collect_goal(&mut self, term: &Term) {
        match term {
            Term::Atom(_) | Term::Bool(_) => {}
            Term::Var(v) => {
                // A bare variable goal is a degenerate meta-call target.
                self.record(&v.name, v.generated, true);
            }
            Term::Call(call) => self.collect_call_goal(call),
            _ => {}
        }
    }

    fn collect_call_goal(&mut self, call: &Call) {
        let name = call.functor.name();
        match (name, call.arity()) {
            (",", 2) | (";", 2) => {
                self.collect_goal(&call.args[0]);
                self.collect_goal(&call.args[1]);
            }
            (cmp, 2) if is_comparison(cmp) => {
                self.collect_deep(&call.args[0]);
                self.collect_deep(&call.args[1]);
            }
            (test, 1) if is_mode_test(test) || is_type_test(test) => {
                self.collect_arg(&call.args[0]);
            }
            (updater, n) if updater_arity(updater) == Some(n) => {
                for arg in &call.args {
                    self.collect_deep(arg);
                }
            }
            ("throw", 1) => self.collect_deep(&call.args[0]),
            ("call_failed", 1) => self.collect_arg(&call.args[0]),
            _ => {
                // Ordinary goal or meta-call: bare variable arguments may be
                // void, compound arguments are expressions.
                for arg in &call.args {
                    self.collect_arg(arg);
                }
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.by_name.get(name).map(|&i| &self.vars[i])
    }

    pub fn slot(&self, name: &str) -> Option<u8> {
        self.lookup(name).and_then(|v| v.slot)
    }

    pub fn vars(&self) -> &[VarInfo] {
        &self.vars
    }

    /// Variables with one use, not generated, and not underscore-prefixed.
    pub fn singletons(&self) -> Vec<Rc<str>> {
        self.vars
            .iter()
            .filter(|v| v.occurrences == 1 && !v.generated && !v.name.starts_with('_'))
            .map(|v| v.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::symbol::Interner;
    use crate::syntax::parser::Parser;

    fn analyze_clause(input: &str) -> ClauseAnalysis {
        let mut interner = Interner::new();
        let mut parser = Parser::new(input, "<test>", &mut interner);
        let terms = parser.parse_program().expect("parse failed");
        let term = &terms[0].term;
        if term.is_call(":-", 2) {
            let Term::Call(rule) = term else { unreachable!() };
            ClauseAnalysis::analyze(Some(&rule.args[0]), Some(&rule.args[1]), false)
        } else {
            ClauseAnalysis::analyze(Some(term), None, false)
        }
    }

    #[test]
    fn test_ground_fact_has_no_vars() {
        let analysis = analyze_clause("parent(tom, bob).");
        assert!(analysis.vars().is_empty());
    }

    #[test]
    fn test_shared_vars_get_slots_in_head_order() {
        let analysis = analyze_clause("grandparent(X, Z) :- parent(X, Y), parent(Y, Z).");
        assert_eq!(analysis.slot("X"), Some(0));
        assert_eq!(analysis.slot("Z"), Some(1));
        assert_eq!(analysis.slot("Y"), Some(2));
    }

    #[test]
    fn test_single_use_is_void() {
        let analysis = analyze_clause("p(X) :- q(X, Y).");
        assert_eq!(analysis.slot("X"), Some(0));
        assert_eq!(analysis.slot("Y"), None);
        assert_eq!(analysis.singletons(), vec![Rc::from("Y")]);
    }

    #[test]
    fn test_expression_vars_need_cells() {
        // X occurs once but inside a comparison, so it still needs a cell.
        let analysis = analyze_clause("p :- X > 1.");
        assert_eq!(analysis.slot("X"), Some(0));
    }

    #[test]
    fn test_compound_arg_vars_need_cells() {
        let analysis = analyze_clause("s_test(a(X, Y), a(X, Y)).");
        assert_eq!(analysis.slot("X"), Some(0));
        assert_eq!(analysis.slot("Y"), Some(1));
        assert!(analysis.singletons().is_empty());
    }

    #[test]
    fn test_underscore_prefixed_not_reported() {
        let analysis = analyze_clause("p(_Unused) :- q.");
        assert!(analysis.singletons().is_empty());
    }

    #[test]
    fn test_query_mode_forces_slots() {
        let mut interner = Interner::new();
        let mut parser = Parser::new("q(Y)", "<query>", &mut interner);
        let goal = parser.parse_query().expect("parse failed");
        let analysis = ClauseAnalysis::analyze(None, Some(&goal), true);
        assert_eq!(analysis.slot("Y"), Some(0));
    }
}
