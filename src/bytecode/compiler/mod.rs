use std::collections::HashSet;
use std::rc::Rc;

use tracing::warn;

use crate::bytecode::analysis::{
    is_comparison, is_mode_test, is_type_test, updater_arity, ClauseAnalysis,
};
use crate::bytecode::clause::{CompiledClause, HeadSlot};
use crate::bytecode::op_code::{CmpKind, ConstKind, FOp, OpCode, TypeKind};
use crate::error::CompileError;
use crate::runtime::store::{Indicator, Predicate, Store};
use crate::runtime::value::{Obj, Value};
use crate::syntax::parser::SourceTerm;
use crate::syntax::term::{Call, Term, Variable};

mod expression;

/// Reserved declaration functors handled by the declaration filter.
const DECLARATIONS: &[&str] = &[
    "function",
    "table",
    "require",
    "global",
    "report",
    "struct",
    "signature",
    "trace",
    "notrace",
    "externally_called",
    "listing",
];

/// Exclusive-logic connectives; their assertion database is an external
/// collaborator, so ground facts over them are rejected here.
const EL_CONNECTIVES: &[&str] = &["/", ":", "/>"];

/// A side effect the engine must carry out after processing a term.
pub enum Directive {
    Handled,
    Require(String),
    Report {
        code: Vec<u8>,
        pred: Rc<Predicate>,
    },
    Listing(Indicator),
}

/// A non-fatal diagnostic attached to a compiled clause.
#[derive(Debug, Clone)]
pub struct CompileWarning {
    pub message: String,
    pub file: String,
    pub line: usize,
}

/// A source-to-source rewrite applied to top-level terms before
/// compilation.
pub type Transform = Rc<dyn Fn(&Term) -> Option<Term>>;

/// The clause compiler. Processes one top-level term at a time: runs the
/// declaration filter, applies transforms, splits facts from rules, and
/// generates bytecode into the predicate store.
pub struct Compiler<'a> {
    store: &'a mut Store,
    file: String,
    transforms: Vec<Transform>,
    warnings: Vec<CompileWarning>,
}

impl<'a> Compiler<'a> {
    pub fn new(store: &'a mut Store, file: impl Into<String>) -> Self {
        Self {
            store,
            file: file.into(),
            transforms: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn take_warnings(&mut self) -> Vec<CompileWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Process one top-level term: declaration, fact, or rule.
    pub fn process(&mut self, source: &SourceTerm) -> Result<Directive, CompileError> {
        if let Some(directive) = self.process_declaration(&source.term, source.line)? {
            return Ok(directive);
        }

        let mut term = source.term.clone();
        for transform in &self.transforms {
            if let Some(rewritten) = transform(&term) {
                term = rewritten;
            }
        }

        self.compile_clause(&term, source.line)?;
        Ok(Directive::Handled)
    }

    fn syntax_error(&self, message: impl Into<String>, line: usize) -> CompileError {
        CompileError::syntax(message, self.file.clone(), line)
    }

    // Pass 1: the declaration filter. A unary call whose functor is a
    // reserved name applies a store side effect and produces no code.
    fn process_declaration(
        &mut self,
        term: &Term,
        line: usize,
    ) -> Result<Option<Directive>, CompileError> {
        let Term::Call(call) = term else {
            return Ok(None);
        };
        if call.arity() != 1 || !DECLARATIONS.contains(&call.functor.name()) {
            return Ok(None);
        }
        let arg = &call.args[0];

        let directive = match call.functor.name() {
            "function" => {
                let indicator = self.parse_indicator(arg, line)?;
                self.store.declare_function(indicator.name);
                Directive::Handled
            }
            "table" => {
                self.declare_table(arg, line)?;
                Directive::Handled
            }
            "require" => {
                let path = match arg {
                    Term::Str(s) => s.to_string(),
                    Term::Atom(s) => s.name().to_string(),
                    other => {
                        return Err(
                            self.syntax_error(format!("require expects a path, got {}", other), line)
                        )
                    }
                };
                Directive::Require(path)
            }
            "global" => {
                let Term::Atom(name) = arg else {
                    return Err(
                        self.syntax_error(format!("global expects a name, got {}", arg), line)
                    );
                };
                self.store.define_global(name.clone(), Value::Ref(Obj::Null));
                Directive::Handled
            }
            "report" => {
                let pred = self.store.make_anonymous_predicate("report", 0);
                let analysis = ClauseAnalysis::analyze(None, None, false);
                let mut gen = CodeGen::new(pred.clone(), &analysis, &self.file, line);
                gen.emit_expr(self.store, arg, false)?;
                gen.emit_fop(FOp::FReturn);
                Directive::Report {
                    code: gen.code,
                    pred,
                }
            }
            "struct" => {
                let Term::Call(shape) = arg else {
                    return Err(self.syntax_error(
                        format!("struct expects a shape like name(Field, ...), got {}", arg),
                        line,
                    ));
                };
                let mut fields = Vec::with_capacity(shape.arity());
                for field in &shape.args {
                    let Term::Var(v) = field else {
                        return Err(self.syntax_error(
                            format!("struct fields must be variables, got {}", field),
                            line,
                        ));
                    };
                    // Field names are stored lowercased so `.field` access
                    // lexes as an atom.
                    fields.push(self.store.symbols.intern(&v.name.to_lowercase()));
                }
                self.store.define_struct(shape.functor.clone(), fields);
                Directive::Handled
            }
            "signature" => {
                let Term::Call(shape) = arg else {
                    return Err(self.syntax_error(
                        format!("signature expects a shape like pred(type, ...), got {}", arg),
                        line,
                    ));
                };
                let mut types = Vec::with_capacity(shape.arity());
                for ty in &shape.args {
                    let Term::Atom(name) = ty else {
                        return Err(self.syntax_error(
                            format!("signature types must be atoms, got {}", ty),
                            line,
                        ));
                    };
                    types.push(name.clone());
                }
                let pred = self
                    .store
                    .intern_predicate(Indicator::new(shape.functor.clone(), shape.arity()));
                *pred.signature.borrow_mut() = Some(types);
                Directive::Handled
            }
            "trace" | "notrace" => {
                let indicator = self.parse_indicator(arg, line)?;
                let pred = self.store.intern_predicate(indicator);
                pred.is_traced.set(call.functor.name() == "trace");
                Directive::Handled
            }
            "externally_called" => {
                let indicator = self.parse_indicator(arg, line)?;
                let pred = self.store.intern_predicate(indicator);
                pred.is_externally_called.set(true);
                Directive::Handled
            }
            "listing" => {
                let indicator = self.parse_indicator(arg, line)?;
                Directive::Listing(indicator)
            }
            _ => return Ok(None),
        };
        Ok(Some(directive))
    }

    /// Parse `name/arity` or a bare atom (arity 0) as a predicate indicator.
    fn parse_indicator(&mut self, term: &Term, line: usize) -> Result<Indicator, CompileError> {
        match term {
            Term::Atom(name) => Ok(Indicator::new(name.clone(), 0)),
            Term::Call(call) if call.functor.name() == "/" && call.arity() == 2 => {
                match (&call.args[0], &call.args[1]) {
                    (Term::Atom(name), Term::Int(arity)) if *arity >= 0 => {
                        Ok(Indicator::new(name.clone(), *arity as usize))
                    }
                    _ => Err(self.syntax_error(
                        format!("expected name/arity indicator, got {}", term),
                        line,
                    )),
                }
            }
            other => Err(self.syntax_error(
                format!("expected predicate indicator, got {}", other),
                line,
            )),
        }
    }

    fn declare_table(&mut self, arg: &Term, line: usize) -> Result<(), CompileError> {
        match arg {
            // table(name/arity)
            Term::Call(call) if call.functor.name() == "/" && call.arity() == 2 => {
                let indicator = self.parse_indicator(arg, line)?;
                self.store.define_table(indicator, Vec::new());
                Ok(())
            }
            // table(name(type, ...)) records the signature as well
            Term::Call(call) => {
                let mut signature = Vec::with_capacity(call.arity());
                for ty in &call.args {
                    let Term::Atom(name) = ty else {
                        return Err(self.syntax_error(
                            format!("table column types must be atoms, got {}", ty),
                            line,
                        ));
                    };
                    signature.push(name.clone());
                }
                let indicator = Indicator::new(call.functor.clone(), call.arity());
                self.store.define_table(indicator, signature);
                Ok(())
            }
            other => Err(self.syntax_error(format!("table expects an indicator, got {}", other), line)),
        }
    }

    // Pass 5: fact vs rule split, table assertion, EL routing.
    fn compile_clause(&mut self, term: &Term, line: usize) -> Result<(), CompileError> {
        let (head, body) = match term {
            Term::Call(call) if call.functor.name() == ":-" && call.arity() == 2 => {
                (&call.args[0], Some(&call.args[1]))
            }
            other => (other, None),
        };

        let Some((functor, arity)) = head.indicator_parts() else {
            return Err(self.syntax_error(format!("clause head must be callable, got {}", head), line));
        };
        let functor = functor.clone();

        if body.is_none() && EL_CONNECTIVES.contains(&functor.name()) && arity == 2 {
            return Err(self.syntax_error(
                "exclusive-logic assertions are handled by the external EL database",
                line,
            ));
        }

        let indicator = Indicator::new(functor.clone(), arity);
        let pred = self.store.intern_predicate(indicator.clone());

        // Ground facts over a table predicate become rows, not clauses.
        if let Some(table) = pred.table() {
            if body.is_some() {
                return Err(self.syntax_error(
                    format!("{} is a table and cannot take rules", indicator),
                    line,
                ));
            }
            if !head.is_ground() {
                return Err(self.syntax_error(
                    format!("table fact must be ground: {}", head),
                    line,
                ));
            }
            let Term::Call(call) = head else {
                return Err(self.syntax_error("table facts need arguments", line));
            };
            let mut row = Vec::with_capacity(call.arity());
            for arg in &call.args {
                row.push(self.ground_term_to_value(arg, line)?);
            }
            table.assert_row(row);
            return Ok(());
        }

        if pred.is_special() {
            return Err(self.syntax_error(
                format!("{} is special and cannot take clauses", indicator),
                line,
            ));
        }

        let (clause, _analysis) = compile_clause_into(
            self.store,
            &pred,
            Some(head),
            body,
            term.clone(),
            &self.file,
            line,
            false,
            true,
            &mut self.warnings,
        )?;
        self.store.add_clause(indicator, clause)?;
        Ok(())
    }

    /// Convert a ground term into a runtime value for table rows.
    fn ground_term_to_value(&mut self, term: &Term, line: usize) -> Result<Value, CompileError> {
        ground_term_to_value(self.store, term)
            .ok_or_else(|| self.syntax_error(format!("cannot store {} in a table", term), line))
    }
}

/// Ground term to runtime value; `None` when the term has no value form.
pub fn ground_term_to_value(store: &Store, term: &Term) -> Option<Value> {
    Some(match term {
        Term::Int(i) => Value::Int(*i),
        Term::Float(x) => Value::Float(*x),
        Term::Bool(b) => Value::Bool(*b),
        Term::Str(s) => Value::Ref(Obj::Str(s.clone())),
        Term::Null => Value::Ref(Obj::Null),
        Term::Atom(s) => Value::Ref(Obj::Symbol(s.clone())),
        Term::Call(call) if call.functor.name() == "/" && call.arity() == 2 => {
            match (&call.args[0], &call.args[1]) {
                (Term::Atom(name), Term::Int(arity)) if *arity >= 0 => Value::Ref(Obj::Pred(
                    Indicator::new(name.clone(), *arity as usize),
                )),
                _ => return None,
            }
        }
        Term::Call(call) => {
            let def = store.struct_def(&call.functor)?;
            if def.fields.len() != call.arity() {
                return None;
            }
            let mut fields = Vec::with_capacity(call.arity());
            for arg in &call.args {
                fields.push(ground_term_to_value(store, arg)?);
            }
            Value::Ref(Obj::Struct(Rc::new(crate::runtime::value::StructInst {
                type_name: call.functor.clone(),
                fields,
            })))
        }
        Term::Var(_) => return None,
    })
}

/// Compile one clause body+head into bytecode against a predicate's pools.
/// Shared by ordinary clauses, nested disjunction clauses, and queries.
#[allow(clippy::too_many_arguments)]
pub fn compile_clause_into(
    store: &mut Store,
    pred: &Rc<Predicate>,
    head: Option<&Term>,
    body: Option<&Term>,
    source: Term,
    file: &str,
    line: usize,
    force_slots: bool,
    warn_singletons: bool,
    warnings: &mut Vec<CompileWarning>,
) -> Result<(Rc<CompiledClause>, ClauseAnalysis), CompileError> {
    let analysis = ClauseAnalysis::analyze(head, body, force_slots);

    if warn_singletons {
        for name in analysis.singletons() {
            let message = format!(
                "singleton variable {} in clause for {}",
                name, pred.indicator
            );
            warn!(target: "horn::compile", "{}:{}: {}", file, line, message);
            warnings.push(CompileWarning {
                message,
                file: file.to_string(),
                line,
            });
        }
    }

    let mut gen = CodeGen::new(pred.clone(), &analysis, file, line);
    if let Some(head) = head {
        gen.emit_head(store, head)?;
    }
    match body {
        Some(body) => gen.emit_body(store, body, true, warnings)?,
        None => gen.emit_op(OpCode::CNoGoal),
    }

    let env_size = gen.env_size();
    let clause = Rc::new(CompiledClause {
        source,
        code: gen.code,
        env_size,
        head_model: gen.head_model,
        file: file.to_string(),
        line,
    });
    Ok((clause, analysis))
}

/// A compiled top-level query: an anonymous zero-arity predicate whose one
/// clause is the goal, plus the named variables readable after a solution.
pub struct CompiledQuery {
    pub pred: Rc<Predicate>,
    pub clause: Rc<CompiledClause>,
    pub vars: Vec<(Rc<str>, u8)>,
}

/// Compile a goal term as a top-level query. Every named variable is given
/// a cell so bindings can be read back from the first environment frame.
pub fn compile_query(
    store: &mut Store,
    goal: &Term,
    file: &str,
) -> Result<CompiledQuery, CompileError> {
    let pred = store.make_anonymous_predicate("?-", 0);
    let mut warnings = Vec::new();
    let (clause, analysis) = compile_clause_into(
        store,
        &pred,
        None,
        Some(goal),
        goal.clone(),
        file,
        0,
        true,
        false,
        &mut warnings,
    )?;
    pred.push_clause(clause.clone());
    let vars = analysis
        .vars()
        .iter()
        .filter(|v| !v.generated)
        .filter_map(|v| v.slot.map(|slot| (v.name.clone(), slot)))
        .collect();
    Ok(CompiledQuery { pred, clause, vars })
}

/// Bytecode emitter for one clause.
pub(crate) struct CodeGen<'c> {
    pub code: Vec<u8>,
    pub head_model: Vec<HeadSlot>,
    pred: Rc<Predicate>,
    analysis: &'c ClauseAnalysis,
    /// Variables whose first reference has been compiled.
    seen: HashSet<Rc<str>>,
    max_slot: Option<u8>,
    file: String,
    line: usize,
}

impl<'c> CodeGen<'c> {
    fn new(pred: Rc<Predicate>, analysis: &'c ClauseAnalysis, file: &str, line: usize) -> Self {
        Self {
            code: Vec::new(),
            head_model: Vec::new(),
            pred,
            analysis,
            seen: HashSet::new(),
            max_slot: None,
            file: file.to_string(),
            line,
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.file.clone(), self.line)
    }

    pub fn env_size(&self) -> usize {
        self.max_slot.map_or(0, |slot| slot as usize + 1)
    }

    pub fn emit_op(&mut self, op: OpCode) {
        self.code.push(op as u8);
    }

    pub fn emit_fop(&mut self, op: FOp) {
        self.code.push(op as u8);
    }

    pub fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    fn emit_slot(&mut self, slot: u8) {
        self.max_slot = Some(self.max_slot.map_or(slot, |m| m.max(slot)));
        self.code.push(slot);
    }

    /// Emit an argument opcode in the head or goal family.
    fn emit_arg_op(&mut self, base: OpCode, in_head: bool) {
        let op = if in_head { base } else { base.goal_form() };
        self.emit_op(op);
    }

    fn intern_int(&mut self, value: i64) -> Result<u8, CompileError> {
        self.pred
            .pools
            .borrow_mut()
            .intern_int(value, &self.pred.indicator)
    }

    fn intern_float(&mut self, value: f32) -> Result<u8, CompileError> {
        self.pred
            .pools
            .borrow_mut()
            .intern_float(value, &self.pred.indicator)
    }

    fn intern_object(&mut self, value: Obj) -> Result<u8, CompileError> {
        self.pred
            .pools
            .borrow_mut()
            .intern_object(value, &self.pred.indicator)
    }

    fn slot_of(&self, var: &Variable) -> Result<u8, CompileError> {
        self.analysis.slot(&var.name).ok_or_else(|| {
            self.syntax_error(format!("internal: variable {} has no cell", var.name))
        })
    }

    fn mark_first_reference(&mut self, name: &Rc<str>) {
        self.seen.insert(name.clone());
    }

    // Pass 6: head emission.
    pub fn emit_head(&mut self, store: &mut Store, head: &Term) -> Result<(), CompileError> {
        let Term::Call(call) = head else {
            return Ok(()); // arity-0 head has no argument code
        };
        for arg in &call.args {
            let model = self.emit_arg(store, arg, true)?;
            self.head_model.push(model);
        }
        Ok(())
    }

    /// Emit one head or goal argument; returns its head-model entry.
    fn emit_arg(
        &mut self,
        store: &mut Store,
        term: &Term,
        in_head: bool,
    ) -> Result<HeadSlot, CompileError> {
        match term {
            Term::Var(v) => match self.analysis.slot(&v.name) {
                None => {
                    self.emit_arg_op(OpCode::HeadVoid, in_head);
                    Ok(HeadSlot::Void)
                }
                Some(slot) => {
                    if self.seen.insert(v.name.clone()) {
                        self.emit_arg_op(OpCode::HeadVarFirst, in_head);
                    } else {
                        self.emit_arg_op(OpCode::HeadVarMatch, in_head);
                    }
                    self.emit_slot(slot);
                    Ok(HeadSlot::Var {
                        slot,
                        name: v.name.clone(),
                    })
                }
            },
            Term::Int(i) => {
                let index = self.intern_int(*i)?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Int as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Float(x) => {
                let index = self.intern_float(*x)?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Float as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Bool(b) => {
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Bool as u8);
                self.emit_byte(*b as u8);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Str(s) => {
                let index = self.intern_object(Obj::Str(s.clone()))?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Object as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Null => {
                let index = self.intern_object(Obj::Null)?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Object as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Atom(s) => {
                let index = self.intern_object(Obj::Symbol(s.clone()))?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Object as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Call(call) if is_indicator(call) => {
                let indicator = indicator_of(call);
                store.intern_predicate(indicator.clone());
                let index = self.intern_object(Obj::Pred(indicator))?;
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Pred as u8);
                self.emit_byte(index);
                Ok(HeadSlot::Const(term.clone()))
            }
            Term::Call(_) => {
                // Compound arguments are functional expressions.
                self.emit_arg_op(OpCode::HeadConst, in_head);
                self.emit_byte(ConstKind::Expr as u8);
                self.emit_expr(store, term, true)?;
                self.emit_fop(FOp::FReturn);
                Ok(HeadSlot::Const(term.clone()))
            }
        }
    }

    // Pass 7: body emission.
    pub fn emit_body(
        &mut self,
        store: &mut Store,
        term: &Term,
        tail: bool,
        warnings: &mut Vec<CompileWarning>,
    ) -> Result<(), CompileError> {
        match term {
            Term::Call(call) if call.functor.name() == "," && call.arity() == 2 => {
                self.emit_body(store, &call.args[0], false, warnings)?;
                self.emit_body(store, &call.args[1], tail, warnings)
            }
            Term::Call(call) if call.functor.name() == ";" && call.arity() == 2 => {
                self.emit_disjunction(store, term, tail, warnings)
            }
            Term::Atom(s) if s.name() == "!" => {
                self.emit_op(OpCode::CCut);
                if tail {
                    self.emit_op(OpCode::CNoGoal);
                }
                Ok(())
            }
            Term::Atom(s) if s.name() == "fail" => {
                self.emit_op(OpCode::CFail);
                Ok(())
            }
            Term::Bool(false) => {
                self.emit_op(OpCode::CFail);
                Ok(())
            }
            Term::Atom(s) if s.name() == "true" => {
                if tail {
                    self.emit_op(OpCode::CNoGoal);
                }
                Ok(())
            }
            Term::Bool(true) => {
                if tail {
                    self.emit_op(OpCode::CNoGoal);
                }
                Ok(())
            }
            Term::Var(_) => {
                // A bare variable goal is a meta-call with no extra args.
                self.emit_arg(store, term, false)?;
                self.emit_op(OpCode::CMetaGoal);
                self.emit_byte(0);
                self.emit_op(if tail { OpCode::CLastCall } else { OpCode::CCall });
                Ok(())
            }
            Term::Call(call) if call.functor.name() == "call" => {
                self.emit_meta_call(store, call, tail)
            }
            Term::Call(call) if call.arity() == 2 && is_comparison(call.functor.name()) => {
                self.emit_comparison(store, call, tail)
            }
            Term::Call(call)
                if call.arity() == 1
                    && (is_mode_test(call.functor.name()) || is_type_test(call.functor.name())) =>
            {
                self.emit_test(store, call, tail)
            }
            Term::Call(call) if updater_arity(call.functor.name()) == Some(call.arity()) => {
                self.emit_updater(store, call, tail)
            }
            Term::Call(call) if call.functor.name() == "throw" && call.arity() == 1 => {
                self.emit_op(OpCode::BThrow);
                self.emit_expr(store, &call.args[0], false)?;
                self.emit_fop(FOp::FReturn);
                Ok(())
            }
            Term::Call(call) if call.functor.name() == "call_failed" && call.arity() == 1 => {
                let index = self.intern_object(Obj::Str(call.args[0].to_string().into()))?;
                self.emit_op(OpCode::BCallFailed);
                self.emit_byte(index);
                Ok(())
            }
            Term::Atom(_) | Term::Call(_) => self.emit_goal_call(store, term, tail, warnings),
            other => Err(self.syntax_error(format!("{} is not a callable goal", other))),
        }
    }

    fn emit_goal_call(
        &mut self,
        store: &mut Store,
        term: &Term,
        tail: bool,
        warnings: &mut Vec<CompileWarning>,
    ) -> Result<(), CompileError> {
        let (functor, arity) = term
            .indicator_parts()
            .map(|(f, a)| (f.clone(), a))
            .ok_or_else(|| self.syntax_error(format!("{} is not callable", term)))?;
        let indicator = Indicator::new(functor, arity);
        let target = store.intern_predicate(indicator.clone());

        if target.mandatory_instantiation.get() {
            if let Term::Call(call) = term {
                for arg in &call.args {
                    if let Term::Var(v) = arg {
                        if !self.seen.contains(&v.name) {
                            let message = format!(
                                "{} requires instantiated arguments; {} is unbound here",
                                indicator, v.name
                            );
                            warn!(target: "horn::compile", "{}:{}: {}", self.file, self.line, message);
                            warnings.push(CompileWarning {
                                message,
                                file: self.file.clone(),
                                line: self.line,
                            });
                        }
                    }
                }
            }
        }

        let index = self.intern_object(Obj::Pred(indicator))?;
        self.emit_op(OpCode::CGoal);
        self.emit_byte(index);
        if let Term::Call(call) = term {
            for arg in &call.args {
                self.emit_arg(store, arg, false)?;
            }
        }
        self.emit_op(if tail { OpCode::CLastCall } else { OpCode::CCall });
        Ok(())
    }

    fn emit_meta_call(
        &mut self,
        store: &mut Store,
        call: &Call,
        tail: bool,
    ) -> Result<(), CompileError> {
        let target = &call.args[0];
        let extra = &call.args[1..];
        self.emit_arg(store, target, false)?;
        self.emit_op(OpCode::CMetaGoal);
        self.emit_byte(extra.len() as u8);
        for arg in extra {
            self.emit_arg(store, arg, false)?;
        }
        self.emit_op(if tail { OpCode::CLastCall } else { OpCode::CCall });
        Ok(())
    }

    fn emit_comparison(
        &mut self,
        store: &mut Store,
        call: &Call,
        tail: bool,
    ) -> Result<(), CompileError> {
        let kind = match call.functor.name() {
            "<" => CmpKind::Less,
            ">" => CmpKind::Greater,
            "=<" => CmpKind::LessEq,
            _ => CmpKind::GreaterEq,
        };
        self.emit_op(OpCode::BCompare);
        self.emit_byte(kind as u8);
        self.emit_expr(store, &call.args[0], false)?;
        self.emit_fop(FOp::FReturn);
        self.emit_expr(store, &call.args[1], false)?;
        self.emit_fop(FOp::FReturn);
        if tail {
            self.emit_op(OpCode::CNoGoal);
        }
        Ok(())
    }

    /// var/nonvar and type tests, with compile-time specialisation: tests
    /// whose outcome is statically known emit a no-op or `CFail`.
    fn emit_test(
        &mut self,
        _store: &mut Store,
        call: &Call,
        tail: bool,
    ) -> Result<(), CompileError> {
        let name = call.functor.name();
        let arg = &call.args[0];

        enum Outcome {
            True,
            False,
            Emit(OpCode, Option<TypeKind>, u8),
        }

        let outcome = match (name, arg) {
            ("var", Term::Var(v)) => {
                if self.seen.contains(&v.name) {
                    Outcome::Emit(OpCode::BVar, None, self.slot_of(v)?)
                } else {
                    Outcome::True // first, unbound occurrence
                }
            }
            ("var", _) => Outcome::False,
            ("nonvar", Term::Var(v)) => {
                if self.seen.contains(&v.name) {
                    Outcome::Emit(OpCode::BNonvar, None, self.slot_of(v)?)
                } else {
                    Outcome::False
                }
            }
            ("nonvar", _) => Outcome::True,
            (test, Term::Var(v)) => {
                if self.seen.contains(&v.name) {
                    let kind = type_kind(test);
                    Outcome::Emit(OpCode::BTypeTest, Some(kind), self.slot_of(v)?)
                } else {
                    Outcome::False // an unbound cell matches no type
                }
            }
            (test, literal) => {
                if literal_matches_type(test, literal) {
                    Outcome::True
                } else {
                    Outcome::False
                }
            }
        };

        match outcome {
            Outcome::True => {
                if tail {
                    self.emit_op(OpCode::CNoGoal);
                }
            }
            Outcome::False => {
                self.emit_op(OpCode::CFail);
            }
            Outcome::Emit(op, kind, slot) => {
                self.emit_op(op);
                if let Some(kind) = kind {
                    self.emit_byte(kind as u8);
                }
                self.emit_slot(slot);
                if tail {
                    self.emit_op(OpCode::CNoGoal);
                }
            }
        }
        Ok(())
    }

    fn emit_updater(
        &mut self,
        store: &mut Store,
        call: &Call,
        tail: bool,
    ) -> Result<(), CompileError> {
        let Term::Var(target) = &call.args[0] else {
            return Err(self.syntax_error(format!(
                "{} expects a variable target, got {}",
                call.functor, call.args[0]
            )));
        };
        let slot = self.slot_of(target)?;
        self.seen.insert(target.name.clone());

        let (op, has_expr) = match call.functor.name() {
            "unsafe_set" => (OpCode::BUnsafeSet, true),
            "unsafe_initialize" => (OpCode::BUnsafeInit, false),
            "unsafe_initialize_zero" => (OpCode::BUnsafeInitZero, false),
            "unsafe_initialize_zero_int" => (OpCode::BUnsafeInitZeroInt, false),
            "maximize_update" => (OpCode::BMaximize, true),
            "minimize_update" => (OpCode::BMinimize, true),
            "sum_update_and_repeat" => (OpCode::BSumRepeat, true),
            _ => (OpCode::BIncRepeat, false),
        };
        self.emit_op(op);
        self.emit_slot(slot);
        if has_expr {
            self.emit_expr(store, &call.args[1], false)?;
            self.emit_fop(FOp::FReturn);
        }
        if tail {
            self.emit_op(OpCode::CNoGoal);
        }
        Ok(())
    }

    /// Compile `a ; b` by materialising an anonymous nested predicate whose
    /// clauses are the flattened disjuncts, then calling it with the
    /// variables shared with the enclosing clause.
    fn emit_disjunction(
        &mut self,
        store: &mut Store,
        term: &Term,
        tail: bool,
        warnings: &mut Vec<CompileWarning>,
    ) -> Result<(), CompileError> {
        let mut disjuncts = Vec::new();
        flatten_disjunction(term, &mut disjuncts);

        let mut shared = Vec::new();
        term.collect_vars(&mut shared);
        shared.retain(|v| self.analysis.slot(&v.name).is_some());

        let nested = store.intern_nested_predicate(
            &self.pred.indicator,
            shared.len(),
            self.pred.pools.clone(),
        );

        for disjunct in &disjuncts {
            let head = if shared.is_empty() {
                Term::Atom(nested.indicator.name.clone())
            } else {
                Term::call(
                    nested.indicator.name.clone(),
                    shared.iter().map(|v| Term::Var(v.clone())).collect(),
                )
            };
            let source = if shared.is_empty() {
                (*disjunct).clone()
            } else {
                Term::call(
                    store.symbols.intern(":-"),
                    vec![head.clone(), (*disjunct).clone()],
                )
            };
            let (clause, _) = compile_clause_into(
                store,
                &nested,
                Some(&head),
                Some(disjunct),
                source,
                &self.file,
                self.line,
                false,
                false, // singletons were reported on the enclosing clause
                warnings,
            )?;
            nested.push_clause(clause);
        }

        let index = self.intern_object(Obj::Pred(nested.indicator.clone()))?;
        self.emit_op(OpCode::CGoal);
        self.emit_byte(index);
        for var in &shared {
            self.emit_arg(store, &Term::Var(var.clone()), false)?;
        }
        self.emit_op(if tail { OpCode::CLastCall } else { OpCode::CCall });
        Ok(())
    }
}

fn flatten_disjunction<'t>(term: &'t Term, out: &mut Vec<&'t Term>) {
    match term {
        Term::Call(call) if call.functor.name() == ";" && call.arity() == 2 => {
            flatten_disjunction(&call.args[0], out);
            flatten_disjunction(&call.args[1], out);
        }
        other => out.push(other),
    }
}

pub(crate) fn is_indicator(call: &Call) -> bool {
    call.functor.name() == "/"
        && call.arity() == 2
        && matches!(
            (&call.args[0], &call.args[1]),
            (Term::Atom(_), Term::Int(n)) if *n >= 0
        )
}

pub(crate) fn indicator_of(call: &Call) -> Indicator {
    let (Term::Atom(name), Term::Int(arity)) = (&call.args[0], &call.args[1]) else {
        unreachable!("checked by is_indicator");
    };
    Indicator::new(name.clone(), *arity as usize)
}

fn type_kind(name: &str) -> TypeKind {
    match name {
        "integer" => TypeKind::Integer,
        "float" => TypeKind::Float,
        "number" => TypeKind::Number,
        "string" => TypeKind::String,
        "symbol" => TypeKind::Symbol,
        _ => TypeKind::Missing,
    }
}

fn literal_matches_type(test: &str, term: &Term) -> bool {
    match test {
        "integer" => matches!(term, Term::Int(_)),
        "float" => matches!(term, Term::Float(_)),
        "number" => matches!(term, Term::Int(_) | Term::Float(_)),
        "string" => matches!(term, Term::Str(_)),
        "symbol" => matches!(term, Term::Atom(_)),
        "missing" => matches!(term, Term::Null),
        _ => false,
    }
}
