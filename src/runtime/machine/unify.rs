use crate::runtime::machine::Machine;
use crate::runtime::value::{Obj, Value};

impl Machine {
    /// Follow `StackRef` links from `addr` to the terminal cell address.
    /// An unbound cell terminates the chain, as does any concrete value.
    pub(crate) fn deref(&self, mut addr: usize) -> usize {
        loop {
            match &self.stack[addr] {
                Value::StackRef(next) if *next != addr => addr = *next,
                _ => return addr,
            }
        }
    }

    /// The concrete value (or `Unbound`) reachable from `addr`.
    pub fn value_at(&self, addr: usize) -> Value {
        self.stack[self.deref(addr)].clone()
    }

    /// Write into an unbound cell and record the address on the trail so
    /// backtracking can reset it.
    pub(crate) fn bind(&mut self, addr: usize, value: Value) {
        self.stack[addr] = value;
        self.trail.push(addr);
    }

    /// Push a dereferenced copy of a cell: concrete values are copied,
    /// unbound cells are pushed as a reference to their home address.
    pub(crate) fn push_deref(&mut self, addr: usize) {
        let terminal = self.deref(addr);
        let value = match &self.stack[terminal] {
            Value::Unbound => Value::StackRef(terminal),
            other => other.clone(),
        };
        self.stack.push(value);
    }

    /// Unify the cells at two stack addresses.
    pub fn unify_addrs(&mut self, a: usize, b: usize) -> bool {
        self.unify_ref_value(a, &Value::StackRef(b))
    }

    /// Unify the cell at `addr` with a value. The value may itself be a
    /// `StackRef` (another cell) or contain them in struct fields.
    pub(crate) fn unify_ref_value(&mut self, addr: usize, value: &Value) -> bool {
        let da = self.deref(addr);
        match value {
            Value::StackRef(other) => {
                let db = self.deref(*other);
                if da == db {
                    // Self-unification through a reference chain is the
                    // identity; binding here would create a cycle.
                    return true;
                }
                let a_unbound = matches!(self.stack[da], Value::Unbound);
                let b_unbound = matches!(self.stack[db], Value::Unbound);
                match (a_unbound, b_unbound) {
                    (true, true) => {
                        // Bind the younger cell to the older one.
                        let (younger, older) = if da > db { (da, db) } else { (db, da) };
                        self.bind(younger, Value::StackRef(older));
                        true
                    }
                    (true, false) => {
                        let concrete = self.stack[db].clone();
                        self.bind(da, concrete);
                        true
                    }
                    (false, true) => {
                        let concrete = self.stack[da].clone();
                        self.bind(db, concrete);
                        true
                    }
                    (false, false) => {
                        let left = self.stack[da].clone();
                        let right = self.stack[db].clone();
                        self.unify_concrete(&left, &right)
                    }
                }
            }
            Value::Unbound => false,
            concrete => {
                if matches!(self.stack[da], Value::Unbound) {
                    self.bind(da, concrete.clone());
                    true
                } else {
                    let cell = self.stack[da].clone();
                    self.unify_concrete(&cell, concrete)
                }
            }
        }
    }

    /// Unify two values that may contain cell references in struct fields.
    pub(crate) fn unify_values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::StackRef(addr), other) => self.unify_ref_value(*addr, other),
            (other, Value::StackRef(addr)) => self.unify_ref_value(*addr, other),
            _ => self.unify_concrete(a, b),
        }
    }

    /// Tag-and-payload equality over concrete values: integers and floats
    /// compare numerically across tags, booleans as-is, references by host
    /// equality, and struct instances structurally.
    fn unify_concrete(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                (*x as f32) == *y
            }
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Ref(x), Value::Ref(y)) => self.unify_objs(x, y),
            // A primitive scalar matches a struct instance when it matches
            // every field: the implicit-struct-signature coercion.
            (Value::Ref(Obj::Struct(inst)), scalar) | (scalar, Value::Ref(Obj::Struct(inst)))
                if matches!(scalar, Value::Int(_) | Value::Float(_) | Value::Bool(_)) =>
            {
                let inst = inst.clone();
                let scalar = scalar.clone();
                inst.fields.iter().all(|field| {
                    let field = field.clone();
                    self.unify_values(&field, &scalar)
                })
            }
            _ => false,
        }
    }

    fn unify_objs(&mut self, a: &Obj, b: &Obj) -> bool {
        match (a, b) {
            (Obj::Struct(x), Obj::Struct(y)) => {
                if x.type_name != y.type_name || x.fields.len() != y.fields.len() {
                    return false;
                }
                let (x, y) = (x.clone(), y.clone());
                x.fields
                    .iter()
                    .zip(y.fields.iter())
                    .all(|(left, right)| self.unify_values(left, right))
            }
            (Obj::Array(x), Obj::Array(y)) => {
                if x.len() != y.len() {
                    return false;
                }
                let (x, y) = (x.clone(), y.clone());
                x.iter()
                    .zip(y.iter())
                    .all(|(left, right)| self.unify_values(left, right))
            }
            _ => a.host_eq(b),
        }
    }

    /// Resolve a value that may be a cell reference to its concrete form
    /// (or `Unbound`).
    pub(crate) fn resolve(&self, value: Value) -> Value {
        match value {
            Value::StackRef(addr) => self.value_at(addr),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_cells(cells: Vec<Value>) -> Machine {
        let mut machine = Machine::new();
        machine.stack = cells;
        machine
    }

    #[test]
    fn test_bind_and_deref_chain() {
        let mut machine = machine_with_cells(vec![
            Value::Unbound,
            Value::StackRef(0),
            Value::StackRef(1),
        ]);
        assert_eq!(machine.deref(2), 0);
        machine.bind(0, Value::Int(7));
        assert!(matches!(machine.value_at(2), Value::Int(7)));
    }

    #[test]
    fn test_unify_unbound_binds_younger_to_older() {
        let mut machine = machine_with_cells(vec![Value::Unbound, Value::Unbound]);
        assert!(machine.unify_addrs(1, 0));
        assert!(matches!(machine.stack[1], Value::StackRef(0)));
        assert!(matches!(machine.stack[0], Value::Unbound));
        assert_eq!(machine.trail, vec![1]);
    }

    #[test]
    fn test_unify_numeric_across_tags() {
        let mut machine = machine_with_cells(vec![Value::Int(2), Value::Float(2.0)]);
        assert!(machine.unify_addrs(0, 1));
        let mut machine = machine_with_cells(vec![Value::Int(2), Value::Float(2.5)]);
        assert!(!machine.unify_addrs(0, 1));
    }

    #[test]
    fn test_unify_failure_leaves_trail_restorable() {
        let mut machine = machine_with_cells(vec![Value::Unbound, Value::Int(1), Value::Int(2)]);
        let mark = machine.trail.len();
        assert!(machine.unify_addrs(0, 1));
        assert!(!machine.unify_addrs(0, 2));
        // Rewinding to the mark restores the pre-unification state.
        while machine.trail.len() > mark {
            let addr = machine.trail.pop().unwrap();
            machine.stack[addr] = Value::Unbound;
        }
        assert!(matches!(machine.stack[0], Value::Unbound));
    }

    #[test]
    fn test_self_unification_is_identity() {
        let mut machine = machine_with_cells(vec![Value::Unbound, Value::StackRef(0)]);
        assert!(machine.unify_addrs(0, 1));
        // No binding happened: the chain already meets at one cell.
        assert!(machine.trail.is_empty());
    }
}
