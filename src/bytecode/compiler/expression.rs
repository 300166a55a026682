use tracing::warn;

use crate::bytecode::compiler::{indicator_of, is_indicator, CodeGen};
use crate::bytecode::op_code::FOp;
use crate::error::CompileError;
use crate::runtime::store::Store;
use crate::runtime::value::Obj;
use crate::syntax::term::{Call, Term};

impl CodeGen<'_> {
    /// Emit expression-VM code for a functional expression. `unchecked`
    /// selects the variable-load discipline: pattern positions (constructor
    /// and aggregate arguments) load unbound cells as references so
    /// unification can bind through them; value positions error on unbound.
    pub(crate) fn emit_expr(
        &mut self,
        store: &mut Store,
        term: &Term,
        unchecked: bool,
    ) -> Result<(), CompileError> {
        match term {
            Term::Int(i) => {
                if let Ok(small) = i8::try_from(*i) {
                    self.emit_fop(FOp::FSmallInt);
                    self.emit_byte(small as u8);
                } else {
                    let index = self.intern_int(*i)?;
                    self.emit_fop(FOp::FInt);
                    self.emit_byte(index);
                }
                Ok(())
            }
            Term::Float(x) => {
                let index = self.intern_float(*x)?;
                self.emit_fop(FOp::FFloat);
                self.emit_byte(index);
                Ok(())
            }
            Term::Bool(b) => {
                self.emit_fop(FOp::FBool);
                self.emit_byte(*b as u8);
                Ok(())
            }
            Term::Str(s) => {
                let index = self.intern_object(Obj::Str(s.clone()))?;
                self.emit_fop(FOp::FObject);
                self.emit_byte(index);
                Ok(())
            }
            Term::Null => {
                let index = self.intern_object(Obj::Null)?;
                self.emit_fop(FOp::FObject);
                self.emit_byte(index);
                Ok(())
            }
            Term::Atom(s) => {
                let index = self.intern_object(Obj::Symbol(s.clone()))?;
                if store.find_global(s).is_some() {
                    self.emit_fop(FOp::FLoadGlobal);
                } else {
                    self.emit_fop(FOp::FObject);
                }
                self.emit_byte(index);
                Ok(())
            }
            Term::Var(v) => {
                let slot = self.slot_of(v)?;
                self.mark_first_reference(&v.name);
                self.emit_fop(if unchecked {
                    FOp::FLoadUnchecked
                } else {
                    FOp::FLoad
                });
                self.emit_slot(slot);
                Ok(())
            }
            Term::Call(call) => self.emit_call_expr(store, call, unchecked),
        }
    }

    fn emit_call_expr(
        &mut self,
        store: &mut Store,
        call: &Call,
        unchecked: bool,
    ) -> Result<(), CompileError> {
        let name = call.functor.name();
        match (name, call.arity()) {
            ("/", 2) if is_indicator(call) => {
                let indicator = indicator_of(call);
                store.intern_predicate(indicator.clone());
                let index = self.intern_object(Obj::Pred(indicator))?;
                self.emit_fop(FOp::FObject);
                self.emit_byte(index);
                Ok(())
            }
            ("+", 2) | ("-", 2) | ("*", 2) | ("/", 2) => {
                self.emit_expr(store, &call.args[0], false)?;
                self.emit_expr(store, &call.args[1], false)?;
                self.emit_fop(match name {
                    "+" => FOp::FAdd,
                    "-" => FOp::FSub,
                    "*" => FOp::FMul,
                    _ => FOp::FDiv,
                });
                Ok(())
            }
            ("-", 1) => {
                self.emit_expr(store, &call.args[0], false)?;
                self.emit_fop(FOp::FNeg);
                Ok(())
            }
            (".", 2) => match &call.args[1] {
                Term::Atom(field) => {
                    self.emit_expr(store, &call.args[0], false)?;
                    let index = self.intern_object(Obj::Symbol(field.clone()))?;
                    self.emit_fop(FOp::FObject);
                    self.emit_byte(index);
                    self.emit_fop(FOp::FFieldRef);
                    Ok(())
                }
                Term::Call(method) => {
                    self.emit_expr(store, &call.args[0], false)?;
                    let index = self.intern_object(Obj::Symbol(method.functor.clone()))?;
                    self.emit_fop(FOp::FObject);
                    self.emit_byte(index);
                    for arg in &method.args {
                        self.emit_expr(store, arg, false)?;
                    }
                    self.emit_fop(FOp::FMethodCall);
                    self.emit_byte(method.args.len() as u8);
                    Ok(())
                }
                other => Err(self.syntax_error(format!(
                    "field access needs a name on the right, got {}",
                    other
                ))),
            },
            ("::", 2) => {
                let Term::Atom(component) = &call.args[1] else {
                    return Err(self.syntax_error(format!(
                        "component access needs a name on the right, got {}",
                        call.args[1]
                    )));
                };
                self.emit_expr(store, &call.args[0], false)?;
                let index = self.intern_object(Obj::Symbol(component.clone()))?;
                self.emit_fop(FOp::FObject);
                self.emit_byte(index);
                self.emit_fop(FOp::FComponentLookup);
                Ok(())
            }
            ("new", 1) => {
                let Term::Call(ctor) = &call.args[0] else {
                    return Err(self.syntax_error("new requires a constructor call"));
                };
                self.emit_constructor(store, &ctor.functor.clone(), &ctor.args, unchecked)
            }
            ("array", n) | ("arraylist", n) | ("hashset", n) => {
                for arg in &call.args {
                    self.emit_expr(store, arg, unchecked)?;
                }
                self.emit_fop(match name {
                    "array" => FOp::FArray,
                    "arraylist" => FOp::FArrayList,
                    _ => FOp::FHashset,
                });
                self.emit_byte(n as u8);
                Ok(())
            }
            ("non_false", 1) => {
                self.emit_expr(store, &call.args[0], false)?;
                self.emit_fop(FOp::FNonFalse);
                Ok(())
            }
            ("format", n) => {
                for arg in &call.args {
                    self.emit_expr(store, arg, false)?;
                }
                self.emit_fop(FOp::FFormat);
                self.emit_byte(n as u8);
                Ok(())
            }
            _ => {
                if let Some(def) = store.struct_def(&call.functor) {
                    if def.fields.len() != call.arity() {
                        return Err(self.syntax_error(format!(
                            "struct {} has {} fields, got {} arguments",
                            call.functor,
                            def.fields.len(),
                            call.arity()
                        )));
                    }
                    return self.emit_constructor(store, &call.functor.clone(), &call.args, true);
                }
                // Declared or host-registered functions, and anything else,
                // dispatch through the host-function registry at run time.
                if !store.is_declared_function(&call.functor) {
                    warn!(
                        target: "horn::compile",
                        "{}/{} is not a declared function; the call will fail unless it is registered before running",
                        call.functor,
                        call.arity()
                    );
                }
                let index = self.intern_object(Obj::Symbol(call.functor.clone()))?;
                self.emit_fop(FOp::FObject);
                self.emit_byte(index);
                for arg in &call.args {
                    self.emit_expr(store, arg, false)?;
                }
                self.emit_fop(FOp::FCallFunction);
                self.emit_byte(call.args.len() as u8);
                Ok(())
            }
        }
    }

    /// Type symbol, then arguments, then `FConstructor`.
    fn emit_constructor(
        &mut self,
        store: &mut Store,
        type_name: &crate::runtime::symbol::Symbol,
        args: &[Term],
        unchecked: bool,
    ) -> Result<(), CompileError> {
        let index = self.intern_object(Obj::Symbol(type_name.clone()))?;
        self.emit_fop(FOp::FObject);
        self.emit_byte(index);
        for arg in args {
            self.emit_expr(store, arg, unchecked)?;
        }
        self.emit_fop(FOp::FConstructor);
        self.emit_byte(args.len() as u8);
        Ok(())
    }
}
