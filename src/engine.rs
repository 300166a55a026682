use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{error, info};

use crate::bytecode::compiler::{compile_query, CompileWarning, Compiler, Directive, Transform};
use crate::bytecode::op_code::disassemble;
use crate::error::{CompileError, EngineError, RuntimeError};
use crate::runtime::host::{HostCtor, HostFn};
use crate::runtime::machine::Machine;
use crate::runtime::store::{Indicator, PredicateKind, Store};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{Obj, StructInst, Value};
use crate::syntax::parser::Parser;
use crate::syntax::term::Term;

/// Default extension for source files; `compile_file` appends it when a
/// path has none.
pub const SOURCE_EXTENSION: &str = "horn";

/// An embeddable logic-programming engine: knowledge base, compiler entry
/// points, and query execution.
///
/// All process-wide state of the runtime (symbols, predicates, globals)
/// lives inside the engine value, so multiple engines coexist.
pub struct Engine {
    store: Store,
    loaded: HashSet<PathBuf>,
    reported: HashSet<String>,
    transforms: Vec<Transform>,
    warnings: Vec<CompileWarning>,
    step_limit: Option<u64>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            loaded: HashSet::new(),
            reported: HashSet::new(),
            transforms: Vec::new(),
            warnings: Vec::new(),
            step_limit: None,
        }
    }

    /// Parse and process every top-level term in `source` until EOF.
    pub fn compile(&mut self, source: &str) -> Result<(), EngineError> {
        self.compile_named(source, "<source>")
    }

    /// As [`Engine::compile`], but for a `;`-delimited term stream ended
    /// by `;;`.
    pub fn compile_delimited(&mut self, source: &str) -> Result<(), EngineError> {
        let terms = {
            let mut parser = Parser::new(source, "<source>", &mut self.store.symbols);
            parser.parse_delimited()?
        };
        for term in terms {
            self.process_term(&term, "<source>")?;
        }
        Ok(())
    }

    fn compile_named(&mut self, source: &str, file: &str) -> Result<(), EngineError> {
        let terms = {
            let mut parser = Parser::new(source, file, &mut self.store.symbols);
            parser.parse_program()?
        };
        for term in terms {
            self.process_term(&term, file)?;
        }
        Ok(())
    }

    fn process_term(
        &mut self,
        term: &crate::syntax::parser::SourceTerm,
        file: &str,
    ) -> Result<(), EngineError> {
        let directive = {
            let mut compiler =
                Compiler::new(&mut self.store, file).with_transforms(self.transforms.clone());
            let directive = compiler.process(term)?;
            self.warnings.extend(compiler.take_warnings());
            directive
        };
        match directive {
            Directive::Handled => Ok(()),
            Directive::Require(path) => self.require(&path),
            Directive::Report { code, pred } => {
                let mut machine = Machine::new();
                let value = machine.eval_standalone(&self.store, &code, &pred.pools)?;
                let rendered = machine.readback(&self.store, &value);
                info!(target: "horn::engine", "report: {}", rendered);
                println!("{}", rendered);
                Ok(())
            }
            Directive::Listing(indicator) => {
                print!("{}", self.listing(&indicator));
                Ok(())
            }
        }
    }

    /// The stored clauses of a predicate, one term per line.
    pub fn listing(&self, indicator: &Indicator) -> String {
        let mut out = String::new();
        let Some(pred) = self.store.lookup_predicate(indicator) else {
            return out;
        };
        if let PredicateKind::Rules(clauses) = &*pred.kind.borrow() {
            for clause in clauses {
                out.push_str(&format!("{}.\n", clause.source));
            }
        }
        out
    }

    /// Disassembled bytecode of a predicate's clauses, for inspection.
    pub fn bytecode_listing(&self, name: &str, arity: usize) -> Option<String> {
        let symbol = self.store.symbols.lookup(name)?;
        let pred = self
            .store
            .lookup_predicate(&Indicator::new(symbol, arity))?;
        let mut out = String::new();
        if let PredicateKind::Rules(clauses) = &*pred.kind.borrow() {
            for (index, clause) in clauses.iter().enumerate() {
                out.push_str(&format!(
                    "; clause {} (env {}): {}\n",
                    index, clause.env_size, clause.source
                ));
                out.push_str(&disassemble(&clause.code));
            }
        }
        Some(out)
    }

    fn require(&mut self, path: &str) -> Result<(), EngineError> {
        let mut resolved = PathBuf::from(path);
        if resolved.extension().is_none() {
            resolved.set_extension(SOURCE_EXTENSION);
        }
        self.load_path(resolved)
    }

    /// Compile a file once per canonical path; repeated requires are
    /// no-ops. Paths without an extension default to `.horn`.
    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut resolved = path.as_ref().to_path_buf();
        if resolved.extension().is_none() {
            resolved.set_extension(SOURCE_EXTENSION);
        }
        self.load_path(resolved)
    }

    fn load_path(&mut self, path: PathBuf) -> Result<(), EngineError> {
        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !self.loaded.insert(canonical.clone()) {
            return Ok(());
        }
        let display = canonical.display().to_string();
        let source = match fs::read_to_string(&canonical) {
            Ok(source) => source,
            Err(io) => {
                self.loaded.remove(&canonical);
                return Err(CompileError::from(io).into());
            }
        };
        match self.compile_named(&source, &display) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Report each distinct failure once, even when it bubbles
                // through nested require frames.
                let rendered = err.to_string();
                if self.reported.insert(rendered.clone()) {
                    error!(target: "horn::engine", "{}", rendered);
                }
                Err(err)
            }
        }
    }

    /// Compile `query` as a top-level goal and report whether a first
    /// solution exists.
    pub fn run(&mut self, query: &str) -> Result<bool, EngineError> {
        let mut solutions = self.solve(query)?;
        Ok(solutions.next_solution()?.is_some())
    }

    /// Compile `query` and return a solution iterator over its named
    /// variables.
    pub fn solve(&mut self, query: &str) -> Result<Solutions<'_>, EngineError> {
        let goal = {
            let mut parser = Parser::new(query, "<query>", &mut self.store.symbols);
            parser.parse_query()?
        };
        let compiled = compile_query(&mut self.store, &goal, "<query>")?;
        let mut machine = Machine::new();
        machine.set_step_limit(self.step_limit);
        machine.start(&compiled);
        Ok(Solutions {
            machine,
            store: &self.store,
            vars: compiled.vars,
            started: false,
            exhausted: false,
        })
    }

    /// Define (or redefine) a global variable.
    pub fn define_global(&mut self, name: &str, initial: Value) {
        let symbol = self.store.symbols.intern(name);
        self.store.define_global(symbol, initial);
    }

    /// Current value of a global variable.
    pub fn find(&self, name: &str) -> Option<Value> {
        let symbol = self.store.symbols.lookup(name)?;
        self.store.find_global(&symbol).cloned()
    }

    /// Create an empty table predicate.
    pub fn define_table(&mut self, name: &str, arity: usize) {
        let symbol = self.store.symbols.intern(name);
        self.store.define_table(Indicator::new(symbol, arity), Vec::new());
    }

    /// Create a table predicate from a comma-separated UTF-8 file. The
    /// file stem names the predicate; the header row gives the signature
    /// and arity. Rows wider than the header are grouped into declared
    /// struct instances per the implicit struct signature.
    pub fn load_table(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(CompileError::from)?;
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| CompileError::syntax("table file needs a name", display.clone(), 0))?;

        let mut rows = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());
        let Some((_, header)) = rows.next() else {
            return Err(CompileError::syntax("table file is empty", display, 0).into());
        };
        let signature: Vec<Symbol> = header
            .split(',')
            .map(|column| self.store.symbols.intern(column.trim()))
            .collect();
        let arity = signature.len();
        let name = self.store.symbols.intern(stem);
        let table = self
            .store
            .define_table(Indicator::new(name, arity), signature.clone());

        let widths: Vec<usize> = signature
            .iter()
            .map(|ty| self.store.struct_def(ty).map_or(1, |def| def.fields.len()))
            .collect();
        let expanded: usize = widths.iter().sum();

        for (line_index, line) in rows {
            let cells: Vec<Value> = line
                .split(',')
                .map(|cell| parse_cell(&mut self.store.symbols, cell.trim()))
                .collect();
            let row = if cells.len() == arity {
                cells
            } else if cells.len() == expanded {
                let mut grouped = Vec::with_capacity(arity);
                let mut remaining = cells.into_iter();
                for (ty, width) in signature.iter().zip(&widths) {
                    if self.store.struct_def(ty).is_some() {
                        let fields: Vec<Value> = remaining.by_ref().take(*width).collect();
                        grouped.push(Value::Ref(Obj::Struct(Rc::new(StructInst {
                            type_name: ty.clone(),
                            fields,
                        }))));
                    } else {
                        grouped.extend(remaining.by_ref().take(1));
                    }
                }
                grouped
            } else {
                return Err(CompileError::syntax(
                    format!(
                        "row has {} columns, expected {} (or {} with struct columns)",
                        cells.len(),
                        arity,
                        expanded
                    ),
                    display,
                    line_index + 1,
                )
                .into());
            };
            table.assert_row(row);
        }
        Ok(())
    }

    /// Register a host function callable from expression position.
    pub fn register_host_fn(&mut self, name: &str, body: HostFn) {
        let symbol = self.store.symbols.intern(name);
        self.store.register_function(symbol, body);
    }

    /// Register a host constructor for `new name(...)` expressions.
    pub fn register_constructor(&mut self, name: &str, body: HostCtor) {
        let symbol = self.store.symbols.intern(name);
        self.store.register_constructor(symbol, body);
    }

    /// Install a `UserFunction` extension hook by subop index.
    pub fn register_user_op(&mut self, subop: u8, body: HostFn) {
        self.store.register_user_op(subop, body);
    }

    /// Install a top-level source-to-source rewrite.
    pub fn add_transform(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    /// Bound the number of predicate calls per query.
    pub fn set_step_limit(&mut self, limit: Option<u64>) {
        self.step_limit = limit;
    }

    /// Warnings accumulated since the last call.
    pub fn take_warnings(&mut self) -> Vec<CompileWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy solution enumeration for one query. Each `next_solution` resumes
/// the machine from the previous solution's choice points.
pub struct Solutions<'e> {
    machine: Machine,
    store: &'e Store,
    vars: Vec<(Rc<str>, u8)>,
    started: bool,
    exhausted: bool,
}

impl Solutions<'_> {
    /// Bindings of the query's named variables for the next solution, or
    /// `None` when no more solutions exist. Runtime errors unwind the
    /// whole query; the iterator is exhausted afterwards.
    pub fn next_solution(&mut self) -> Result<Option<Vec<(String, Term)>>, RuntimeError> {
        if self.exhausted {
            return Ok(None);
        }
        let found = if self.started {
            self.machine.retry(self.store)
        } else {
            self.started = true;
            self.machine.run(self.store)
        };
        let found = match found {
            Ok(found) => found,
            Err(err) => {
                self.exhausted = true;
                return Err(err);
            }
        };
        if !found {
            self.exhausted = true;
            return Ok(None);
        }
        let bindings = self
            .vars
            .iter()
            .map(|(name, slot)| {
                (
                    name.to_string(),
                    self.machine
                        .readback(self.store, &Value::StackRef(*slot as usize)),
                )
            })
            .collect();
        Ok(Some(bindings))
    }
}

/// Parse one CSV cell: integers, floats, booleans, bare identifiers as
/// symbols, anything else as a string.
fn parse_cell(symbols: &mut crate::runtime::symbol::Interner, cell: &str) -> Value {
    if let Ok(int) = cell.parse::<i64>() {
        return Value::Int(int);
    }
    if let Ok(float) = cell.parse::<f32>() {
        return Value::Float(float);
    }
    match cell {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "" => return Value::Ref(Obj::Null),
        _ => {}
    }
    let mut chars = cell.chars();
    let identifier = chars
        .next()
        .is_some_and(|c| c.is_lowercase() && c.is_alphabetic())
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if identifier {
        Value::Ref(Obj::Symbol(symbols.intern(cell)))
    } else {
        Value::Ref(Obj::Str(cell.into()))
    }
}
