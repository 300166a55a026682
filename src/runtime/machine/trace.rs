use std::rc::Rc;

use tracing::debug;

use crate::bytecode::clause::HeadSlot;
use crate::runtime::machine::Machine;
use crate::runtime::store::{Predicate, Store};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{Obj, SetKey, Value};
use crate::syntax::term::{Term, Variable};

impl Machine {
    /// Convert a runtime value back into a surface term. Unbound cells
    /// read back as generated variables named after their address.
    pub fn readback(&self, store: &Store, value: &Value) -> Term {
        match value {
            Value::StackRef(addr) => {
                let terminal = self.deref(*addr);
                match self.stack[terminal].clone() {
                    Value::Unbound => Term::Var(Variable::generated(format!("_{}", terminal))),
                    concrete => self.readback(store, &concrete),
                }
            }
            Value::Unbound => Term::Var(Variable::generated("_")),
            Value::Int(i) => Term::Int(*i),
            Value::Float(x) => Term::Float(*x),
            Value::Bool(b) => Term::Bool(*b),
            Value::Ref(obj) => self.readback_obj(store, obj),
        }
    }

    fn readback_obj(&self, store: &Store, obj: &Obj) -> Term {
        match obj {
            Obj::Null => Term::Null,
            Obj::Symbol(symbol) => Term::Atom(symbol.clone()),
            Obj::Str(text) => Term::Str(text.clone()),
            Obj::Pred(indicator) => match store.symbols.lookup("/") {
                Some(slash) => Term::call(
                    slash,
                    vec![
                        Term::Atom(indicator.name.clone()),
                        Term::Int(indicator.arity as i64),
                    ],
                ),
                None => Term::Atom(indicator.name.clone()),
            },
            Obj::Struct(inst) => Term::call(
                inst.type_name.clone(),
                inst.fields
                    .iter()
                    .map(|field| self.readback(store, field))
                    .collect(),
            ),
            Obj::Array(items) => self.readback_aggregate(store, "array", items.iter()),
            Obj::List(items) => {
                let items = items.borrow();
                self.readback_aggregate(store, "arraylist", items.iter())
            }
            Obj::Set(keys) => {
                let items: Vec<Value> = keys
                    .iter()
                    .map(|key| match key {
                        SetKey::Int(i) => Value::Int(*i),
                        SetKey::Bool(b) => Value::Bool(*b),
                        SetKey::Str(s) => Value::Ref(Obj::Str(s.as_str().into())),
                        SetKey::Symbol(s) => Value::Ref(Obj::Symbol(s.clone())),
                    })
                    .collect();
                self.readback_aggregate(store, "hashset", items.iter())
            }
            Obj::Opaque(object) => Term::Str(format!("<{}>", object.host_type_name()).into()),
        }
    }

    fn readback_aggregate<'v>(
        &self,
        store: &Store,
        name: &str,
        items: impl Iterator<Item = &'v Value>,
    ) -> Term {
        let args: Vec<Term> = items.map(|item| self.readback(store, item)).collect();
        match store.symbols.lookup(name) {
            Some(functor) if !args.is_empty() => Term::call(functor, args),
            Some(functor) => Term::Atom(functor),
            None => Term::Str(name.into()),
        }
    }

    /// Render `pred(args...)` from live argument cells.
    fn render_goal(
        &self,
        store: &Store,
        pred: &Rc<Predicate>,
        arg_base: usize,
        arity: usize,
    ) -> String {
        if arity == 0 {
            return pred.indicator.name.to_string();
        }
        let args: Vec<String> = (0..arity)
            .map(|i| {
                self.readback(store, &Value::StackRef(arg_base + i))
                    .to_string()
            })
            .collect();
        format!("{}({})", pred.indicator.name, args.join(", "))
    }

    /// Emit a debug event for a traced predicate port.
    pub(crate) fn trace_port(
        &self,
        store: &Store,
        port: &str,
        pred: &Rc<Predicate>,
        arg_base: usize,
        arity: usize,
    ) {
        let goal = self.render_goal(store, pred, arg_base, arity);
        debug!(target: "horn::trace", "{:5} {}", port, goal);
    }

    /// Emit the exit port for the clause that just succeeded, with its
    /// head reconstructed from the head model and live bindings.
    pub(crate) fn trace_exit(&self, store: &Store) {
        let Some(act) = self.goals.last() else {
            return;
        };
        let functor: Symbol = act.pred.indicator.name.clone();
        if act.clause.head_model.is_empty() {
            debug!(target: "horn::trace", "EXIT  {}", functor);
            return;
        }
        let args: Vec<String> = act
            .clause
            .head_model
            .iter()
            .map(|slot| match slot {
                HeadSlot::Const(term) => term.to_string(),
                HeadSlot::Var { slot, .. } => self
                    .readback(store, &Value::StackRef(act.env_base + *slot as usize))
                    .to_string(),
                HeadSlot::Void => "_".to_string(),
            })
            .collect();
        debug!(target: "horn::trace", "EXIT  {}({})", functor, args.join(", "));
    }
}
