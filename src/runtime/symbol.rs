use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// An interned name. Pointer equality implies name equality, so symbols
/// compare and hash by pointer identity.
#[derive(Clone)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Rc::as_ptr(&self.0) as *const u8 as usize);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Symbol interner.
///
/// Maps names to shared `Rc<str>` handles so that every occurrence of a
/// name in one engine is the same symbol.
#[derive(Debug, Default)]
pub struct Interner {
    symbols: HashMap<String, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning its symbol. Repeated interning of the same
    /// name returns the same symbol.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(symbol) = self.symbols.get(name) {
            return symbol.clone();
        }
        let symbol = Symbol(Rc::from(name));
        self.symbols.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Look up a name without interning it.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        let c = interner.intern("foo");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.name(), "foo");
    }

    #[test]
    fn test_distinct_interners_produce_distinct_symbols() {
        let mut left = Interner::new();
        let mut right = Interner::new();
        // Identity is per-interner; same text from another interner is a
        // different symbol.
        assert_ne!(left.intern("x"), right.intern("x"));
    }
}
