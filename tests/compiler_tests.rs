use horn::bytecode::op_code::{disassemble, OpCode};
use horn::engine::Engine;
use horn::runtime::store::Indicator;
use horn::runtime::symbol::Interner;
use horn::syntax::parser::Parser;

fn engine_with(program: &str) -> Engine {
    let mut engine = Engine::new();
    engine.compile(program).expect("program should compile");
    engine
}

fn clause_code(engine: &Engine, name: &str, arity: usize, index: usize) -> Vec<u8> {
    let symbol = engine.store().symbols.lookup(name).expect("name interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, arity))
        .expect("predicate defined");
    let clause = pred.clause(index).expect("clause present");
    clause.code.clone()
}

fn clause_env_size(engine: &Engine, name: &str, arity: usize, index: usize) -> usize {
    let symbol = engine.store().symbols.lookup(name).expect("name interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, arity))
        .expect("predicate defined");
    pred.clause(index).expect("clause present").env_size
}

#[test]
fn test_zero_arity_fact_is_single_byte() {
    let engine = engine_with("p0.");
    assert_eq!(clause_code(&engine, "p0", 0, 0), vec![OpCode::CNoGoal as u8]);
}

#[test]
fn test_cut_only_body() {
    let engine = engine_with("c0 :- !.");
    assert_eq!(
        clause_code(&engine, "c0", 0, 0),
        vec![OpCode::CCut as u8, OpCode::CNoGoal as u8]
    );
}

#[test]
fn test_fail_body() {
    let engine = engine_with("f0 :- fail.");
    assert_eq!(clause_code(&engine, "f0", 0, 0), vec![OpCode::CFail as u8]);
}

#[test]
fn test_env_size_matches_slot_usage() {
    let engine = engine_with(
        "parent(tom, bob). \
         grandparent(X, Z) :- parent(X, Y), parent(Y, Z).",
    );
    assert_eq!(clause_env_size(&engine, "grandparent", 2, 0), 3);
    assert_eq!(clause_env_size(&engine, "parent", 2, 0), 0);
}

#[test]
fn test_grandparent_bytecode() {
    let engine = engine_with(
        "parent(tom, bob). \
         grandparent(X, Z) :- parent(X, Y), parent(Y, Z).",
    );
    let code = clause_code(&engine, "grandparent", 2, 0);
    assert_eq!(
        code,
        vec![
            OpCode::HeadVarFirst as u8,
            0,
            OpCode::HeadVarFirst as u8,
            1,
            OpCode::CGoal as u8,
            0,
            OpCode::GoalVarMatch as u8,
            0,
            OpCode::GoalVarFirst as u8,
            2,
            OpCode::CCall as u8,
            OpCode::CGoal as u8,
            0,
            OpCode::GoalVarMatch as u8,
            2,
            OpCode::GoalVarMatch as u8,
            1,
            OpCode::CLastCall as u8,
        ]
    );
    insta::assert_snapshot!(disassemble(&code), @r"
    0000 HeadVarFirst 0
    0002 HeadVarFirst 1
    0004 CGoal 0
    0006 GoalVarMatch 0
    0008 GoalVarFirst 2
    0010 CCall
    0011 CGoal 0
    0013 GoalVarMatch 2
    0015 GoalVarMatch 1
    0017 CLastCall
    ");
}

#[test]
fn test_nonvar_on_first_use_folds_to_fail() {
    let engine = engine_with("sn :- nonvar(X), X = 1.");
    let code = clause_code(&engine, "sn", 0, 0);
    assert_eq!(code[0], OpCode::CFail as u8);
}

#[test]
fn test_var_on_first_use_folds_to_noop() {
    let engine = engine_with("sv :- var(X), X = 1.");
    let code = clause_code(&engine, "sv", 0, 0);
    // The first emitted opcode is already the unification goal prelude.
    assert_eq!(code[0], OpCode::CGoal as u8);
}

#[test]
fn test_disjunction_materialises_nested_predicate() {
    let engine = engine_with("q(X) :- X = 5 ; X = 7.");
    let symbol = engine.store().symbols.lookup("q;1").expect("nested name");
    let nested = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 1))
        .expect("nested predicate");
    assert!(nested.is_nested);
    assert_eq!(nested.clause_count(), 2);

    // The nested predicate inherits the enclosing constant pools.
    let parent_symbol = engine.store().symbols.lookup("q").expect("q interned");
    let parent = engine
        .store()
        .lookup_predicate(&Indicator::new(parent_symbol, 1))
        .expect("q/1 defined");
    assert!(std::rc::Rc::ptr_eq(&parent.pools, &nested.pools));
    assert_eq!(parent.pools.borrow().ints, vec![5, 7]);
}

#[test]
fn test_nested_disjunctions_flatten() {
    let engine = engine_with("q(X) :- X = 1 ; X = 2 ; X = 3.");
    let symbol = engine.store().symbols.lookup("q;1").expect("nested name");
    let nested = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 1))
        .expect("nested predicate");
    assert_eq!(nested.clause_count(), 3);
}

#[test]
fn test_head_model_round_trip() {
    let engine = engine_with("s(a, B, 1, \"x\", f(B)) :- q0(B).");
    let symbol = engine.store().symbols.lookup("s").expect("s interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol.clone(), 5))
        .expect("s/5 defined");
    let clause = pred.clause(0).expect("clause present");

    let head = clause.reconstruct_head(&symbol);
    let printed = head.to_string();
    let mut interner = Interner::new();
    let mut parser = Parser::new(format!("{}.", printed), "<round-trip>", &mut interner);
    let reparsed = parser.parse_program().expect("reparse");
    assert_eq!(reparsed.len(), 1);
    assert_eq!(reparsed[0].term.to_string(), printed);
}

#[test]
fn test_signature_recorded() {
    let engine = engine_with("signature s_test(a, a).");
    let symbol = engine.store().symbols.lookup("s_test").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 2))
        .expect("declared");
    let signature = pred.signature.borrow();
    let names: Vec<String> = signature
        .as_ref()
        .expect("signature present")
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["a", "a"]);
}

#[test]
fn test_trace_declaration_sets_flag() {
    let engine = engine_with("trace(p/2). p(1, 2).");
    let symbol = engine.store().symbols.lookup("p").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 2))
        .expect("declared");
    assert!(pred.is_traced.get());

    let engine = engine_with("trace(p/2). notrace(p/2). p(1, 2).");
    let symbol = engine.store().symbols.lookup("p").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 2))
        .expect("declared");
    assert!(!pred.is_traced.get());
}

#[test]
fn test_externally_called_flag() {
    let engine = engine_with("externally_called(api/1). api(1).");
    let symbol = engine.store().symbols.lookup("api").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 1))
        .expect("declared");
    assert!(pred.is_externally_called.get());
}

#[test]
fn test_mandatory_instantiation_warning() {
    let mut engine = engine_with("needs(1).");
    let symbol = engine.store().symbols.lookup("needs").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 1))
        .expect("declared");
    pred.mandatory_instantiation.set(true);

    engine.compile("use_it :- needs(Z), Z = 1.").unwrap();
    let warnings = engine.take_warnings();
    assert!(warnings
        .iter()
        .any(|w| w.message.contains("requires instantiated arguments")));
}

#[test]
fn test_el_assertions_rejected() {
    let mut engine = Engine::new();
    let err = engine.compile("world / people.").unwrap_err();
    assert!(err.to_string().contains("exclusive-logic"));
}

#[test]
fn test_special_predicates_reject_clauses() {
    let mut engine = Engine::new();
    let err = engine.compile("'='(a, b).").unwrap_err();
    assert!(err.to_string().contains("special"));
}

#[test]
fn test_listing_shows_clauses() {
    let engine = engine_with("p(1). p(2).");
    let symbol = engine.store().symbols.lookup("p").expect("interned");
    let listing = engine.listing(&Indicator::new(symbol, 1));
    assert_eq!(listing, "p(1).\np(2).\n");
}
