use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::bytecode::clause::CompiledClause;
use crate::error::{CompileError, RuntimeError};
use crate::runtime::host::{HostCtor, HostFn};
use crate::runtime::machine::Machine;
use crate::runtime::symbol::{Interner, Symbol};
use crate::runtime::table::Table;
use crate::runtime::value::{Obj, Value};

/// Predicate identity: name plus arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Indicator {
    pub name: Symbol,
    pub arity: usize,
}

impl Indicator {
    pub fn new(name: Symbol, arity: usize) -> Self {
        Self { name, arity }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A native deterministic predicate body. Receives the machine, the base
/// address of the argument cells, and the arity; returns whether the call
/// succeeded.
pub type PrimopFn = Rc<dyn Fn(&mut Machine, usize, usize) -> Result<bool, RuntimeError>>;

/// How a predicate's extension is stored, discriminated at call time.
pub enum PredicateKind {
    Rules(Vec<Rc<CompiledClause>>),
    Table(Rc<Table>),
    Primop(PrimopFn),
}

/// Per-predicate constant pools. Bytecode references constants by byte
/// index, so each pool holds at most 256 distinct entries. Nested
/// (disjunction) predicates share their parent's pools.
#[derive(Default)]
pub struct ConstantPools {
    pub ints: Vec<i64>,
    pub floats: Vec<f32>,
    pub objects: Vec<Obj>,
}

impl ConstantPools {
    fn pool_index(len: usize, owner: &Indicator, kind: &'static str) -> Result<u8, CompileError> {
        u8::try_from(len).map_err(|_| CompileError::PoolOverflow {
            predicate: owner.to_string(),
            kind,
        })
    }

    pub fn intern_int(&mut self, value: i64, owner: &Indicator) -> Result<u8, CompileError> {
        if let Some(i) = self.ints.iter().position(|&v| v == value) {
            return Ok(i as u8);
        }
        let index = Self::pool_index(self.ints.len(), owner, "integer")?;
        self.ints.push(value);
        Ok(index)
    }

    pub fn intern_float(&mut self, value: f32, owner: &Indicator) -> Result<u8, CompileError> {
        if let Some(i) = self.floats.iter().position(|&v| v.to_bits() == value.to_bits()) {
            return Ok(i as u8);
        }
        let index = Self::pool_index(self.floats.len(), owner, "float")?;
        self.floats.push(value);
        Ok(index)
    }

    pub fn intern_object(&mut self, value: Obj, owner: &Indicator) -> Result<u8, CompileError> {
        if let Some(i) = self.objects.iter().position(|v| v.host_eq(&value)) {
            return Ok(i as u8);
        }
        let index = Self::pool_index(self.objects.len(), owner, "object")?;
        self.objects.push(value);
        Ok(index)
    }
}

/// A stored predicate: extension plus flags and documentation signature.
pub struct Predicate {
    pub indicator: Indicator,
    pub kind: RefCell<PredicateKind>,
    pub pools: Rc<RefCell<ConstantPools>>,
    pub signature: RefCell<Option<Vec<Symbol>>>,
    pub is_traced: Cell<bool>,
    pub is_nested: bool,
    pub is_externally_called: Cell<bool>,
    pub mandatory_instantiation: Cell<bool>,
}

impl Predicate {
    fn new(indicator: Indicator, kind: PredicateKind, pools: Rc<RefCell<ConstantPools>>, is_nested: bool) -> Rc<Self> {
        Rc::new(Self {
            indicator,
            kind: RefCell::new(kind),
            pools,
            signature: RefCell::new(None),
            is_traced: Cell::new(false),
            is_nested,
            is_externally_called: Cell::new(false),
            mandatory_instantiation: Cell::new(false),
        })
    }

    /// Primops and tables are "special": their extension is native.
    pub fn is_special(&self) -> bool {
        !matches!(&*self.kind.borrow(), PredicateKind::Rules(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(&*self.kind.borrow(), PredicateKind::Table(_))
    }

    pub fn clause_count(&self) -> usize {
        match &*self.kind.borrow() {
            PredicateKind::Rules(clauses) => clauses.len(),
            _ => 1,
        }
    }

    pub fn clause(&self, index: usize) -> Option<Rc<CompiledClause>> {
        match &*self.kind.borrow() {
            PredicateKind::Rules(clauses) => clauses.get(index).cloned(),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<Rc<Table>> {
        match &*self.kind.borrow() {
            PredicateKind::Table(table) => Some(table.clone()),
            _ => None,
        }
    }

    /// Append a clause directly; used for predicates outside the store map
    /// (queries) and nested disjunction predicates.
    pub(crate) fn push_clause(&self, clause: Rc<CompiledClause>) {
        if let PredicateKind::Rules(clauses) = &mut *self.kind.borrow_mut() {
            clauses.push(clause);
        }
    }
}

/// A declared struct type: field names in declaration order.
#[derive(Debug)]
pub struct StructDef {
    pub type_name: Symbol,
    pub fields: Vec<Symbol>,
}

/// The knowledge base: symbol interner, predicate table, struct registry,
/// globals, and the host-interop registries. One store per engine.
pub struct Store {
    pub symbols: Interner,
    predicates: HashMap<Indicator, Rc<Predicate>>,
    structs: HashMap<Symbol, Rc<StructDef>>,
    globals: HashMap<Symbol, Value>,
    functions: HashMap<Symbol, HostFn>,
    declared_functions: HashSet<Symbol>,
    constructors: HashMap<Symbol, HostCtor>,
    user_ops: HashMap<u8, HostFn>,
    nested_counter: usize,
}

impl Store {
    pub fn new() -> Self {
        let mut store = Self {
            symbols: Interner::new(),
            predicates: HashMap::new(),
            structs: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            declared_functions: HashSet::new(),
            constructors: HashMap::new(),
            user_ops: HashMap::new(),
            nested_counter: 0,
        };
        // Names the readback path relies on, interned up front.
        for name in ["/", "array", "arraylist", "hashset"] {
            store.symbols.intern(name);
        }
        store.install_unify_primop();
        store
    }

    /// `=`/2 is a primop: unify the two argument cells.
    fn install_unify_primop(&mut self) {
        let name = self.symbols.intern("=");
        let indicator = Indicator::new(name, 2);
        self.define_primop(
            indicator,
            Rc::new(|machine: &mut Machine, base: usize, _arity: usize| {
                Ok(machine.unify_addrs(base, base + 1))
            }),
        );
    }

    /// Intern a predicate entry, creating an empty rule predicate when the
    /// indicator has not been seen. Forward references rely on this.
    pub fn intern_predicate(&mut self, indicator: Indicator) -> Rc<Predicate> {
        if let Some(pred) = self.predicates.get(&indicator) {
            return pred.clone();
        }
        let pred = Predicate::new(
            indicator.clone(),
            PredicateKind::Rules(Vec::new()),
            Rc::new(RefCell::new(ConstantPools::default())),
            false,
        );
        self.predicates.insert(indicator, pred.clone());
        pred
    }

    /// Materialise an anonymous nested predicate for a compiled disjunction
    /// body. It shares the parent's constant pools.
    pub fn intern_nested_predicate(
        &mut self,
        parent: &Indicator,
        arity: usize,
        pools: Rc<RefCell<ConstantPools>>,
    ) -> Rc<Predicate> {
        self.nested_counter += 1;
        let name = self
            .symbols
            .intern(&format!("{};{}", parent.name, self.nested_counter));
        let indicator = Indicator::new(name, arity);
        let pred = Predicate::new(indicator.clone(), PredicateKind::Rules(Vec::new()), pools, true);
        self.predicates.insert(indicator, pred.clone());
        pred
    }

    pub fn lookup_predicate(&self, indicator: &Indicator) -> Option<Rc<Predicate>> {
        self.predicates.get(indicator).cloned()
    }

    /// A rule predicate that is not registered in the predicate table;
    /// used for top-level queries and `report` expressions.
    pub fn make_anonymous_predicate(&mut self, name: &str, arity: usize) -> Rc<Predicate> {
        let sym = self.symbols.intern(name);
        Predicate::new(
            Indicator::new(sym, arity),
            PredicateKind::Rules(Vec::new()),
            Rc::new(RefCell::new(ConstantPools::default())),
            true,
        )
    }

    /// Append a compiled clause to a rule predicate.
    pub fn add_clause(
        &mut self,
        indicator: Indicator,
        clause: Rc<CompiledClause>,
    ) -> Result<Rc<Predicate>, CompileError> {
        let pred = self.intern_predicate(indicator.clone());
        match &mut *pred.kind.borrow_mut() {
            PredicateKind::Rules(clauses) => clauses.push(clause),
            _ => {
                return Err(CompileError::syntax(
                    format!("{} is special and cannot take clauses", indicator),
                    clause.file.clone(),
                    clause.line,
                ))
            }
        }
        Ok(pred)
    }

    pub fn define_primop(&mut self, indicator: Indicator, body: PrimopFn) -> Rc<Predicate> {
        let pred = Predicate::new(
            indicator.clone(),
            PredicateKind::Primop(body),
            Rc::new(RefCell::new(ConstantPools::default())),
            false,
        );
        self.predicates.insert(indicator, pred.clone());
        pred
    }

    pub fn define_table(&mut self, indicator: Indicator, signature: Vec<Symbol>) -> Rc<Table> {
        let table = Rc::new(Table::new(indicator.clone(), signature));
        let pred = Predicate::new(
            indicator.clone(),
            PredicateKind::Table(table.clone()),
            Rc::new(RefCell::new(ConstantPools::default())),
            false,
        );
        self.predicates.insert(indicator, pred);
        table
    }

    /// Declare a struct type and install its type-test primop `name/1`.
    pub fn define_struct(&mut self, type_name: Symbol, fields: Vec<Symbol>) {
        let def = Rc::new(StructDef {
            type_name: type_name.clone(),
            fields,
        });
        self.structs.insert(type_name.clone(), def);

        let test_name = type_name.clone();
        self.define_primop(
            Indicator::new(type_name, 1),
            Rc::new(move |machine: &mut Machine, base: usize, _arity: usize| {
                let value = machine.value_at(base);
                Ok(matches!(
                    value,
                    Value::Ref(Obj::Struct(inst)) if inst.type_name == test_name
                ))
            }),
        );
    }

    pub fn struct_def(&self, type_name: &Symbol) -> Option<Rc<StructDef>> {
        self.structs.get(type_name).cloned()
    }

    pub fn define_global(&mut self, name: Symbol, initial: Value) {
        self.globals.insert(name, initial);
    }

    pub fn find_global(&self, name: &Symbol) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Mark a functor as a declared function so compounds with it compile
    /// to host-function dispatch.
    pub fn declare_function(&mut self, name: Symbol) {
        self.declared_functions.insert(name);
    }

    pub fn is_declared_function(&self, name: &Symbol) -> bool {
        self.declared_functions.contains(name) || self.functions.contains_key(name)
    }

    pub fn register_function(&mut self, name: Symbol, body: HostFn) {
        self.declared_functions.insert(name.clone());
        self.functions.insert(name, body);
    }

    pub fn host_function(&self, name: &Symbol) -> Option<HostFn> {
        self.functions.get(name).cloned()
    }

    pub fn register_constructor(&mut self, name: Symbol, body: HostCtor) {
        self.constructors.insert(name, body);
    }

    pub fn host_constructor(&self, name: &Symbol) -> Option<HostCtor> {
        self.constructors.get(name).cloned()
    }

    pub fn register_user_op(&mut self, subop: u8, body: HostFn) {
        self.user_ops.insert(subop, body);
    }

    pub fn user_op(&self, subop: u8) -> Option<HostFn> {
        self.user_ops.get(&subop).cloned()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
