use std::rc::Rc;

use horn::engine::Engine;
use horn::error::{EngineError, RuntimeError};
use horn::runtime::value::Value;
use horn::syntax::term::Term;

fn engine_with(program: &str) -> Engine {
    let mut engine = Engine::new();
    engine.compile(program).expect("program should compile");
    engine
}

fn first_binding(engine: &mut Engine, query: &str, var: &str) -> Option<Term> {
    let mut solutions = engine.solve(query).expect("query should compile");
    let bindings = solutions.next_solution().expect("query should run")?;
    bindings
        .into_iter()
        .find(|(name, _)| name == var)
        .map(|(_, term)| term)
}

fn all_bindings(engine: &mut Engine, query: &str, var: &str) -> Vec<Term> {
    let mut solutions = engine.solve(query).expect("query should compile");
    let mut out = Vec::new();
    while let Some(bindings) = solutions.next_solution().expect("query should run") {
        if let Some((_, term)) = bindings.into_iter().find(|(name, _)| name == var) {
            out.push(term);
        }
    }
    out
}

#[test]
fn test_facts_and_failure() {
    let mut engine = engine_with("parent(tom, bob). parent(bob, pat).");
    assert!(engine.run("parent(tom, bob)").unwrap());
    assert!(engine.run("parent(bob, pat)").unwrap());
    assert!(!engine.run("parent(tom, pat)").unwrap());
    assert!(!engine.run("parent(tom, bob, extra)").unwrap());
}

#[test]
fn test_rule_chaining() {
    let mut engine = engine_with(
        "parent(tom, bob). parent(bob, pat). \
         grandparent(X, Z) :- parent(X, Y), parent(Y, Z).",
    );
    assert!(engine.run("grandparent(tom, pat)").unwrap());
    assert!(!engine.run("grandparent(bob, bob)").unwrap());
    let binding = first_binding(&mut engine, "grandparent(tom, W)", "W").expect("one solution");
    assert_eq!(binding.to_string(), "pat");
}

// Scenario: struct-typed signatures.
#[test]
fn test_struct_signature_scalar_coercion() {
    let mut engine =
        engine_with("struct a(B, C). signature s_test(a, a). s_test(a(X, Y), a(X, Y)).");
    assert!(engine.run("s_test(1, 1)").unwrap());
}

#[test]
fn test_struct_unification_binds_fields() {
    let mut engine =
        engine_with("struct a(B, C). signature s_test(a, a). s_test(a(X, Y), a(X, Y)).");
    assert!(engine.run("s_test(a(1, 2), a(1, X)), X = 2").unwrap());
    assert_eq!(
        first_binding(&mut engine, "s_test(a(1, 2), a(1, X)), X = 2", "X"),
        Some(Term::Int(2))
    );
    assert!(!engine.run("s_test(a(1, 2), a(2, 2))").unwrap());
}

// Scenario: clause order and backtracking.
#[test]
fn test_clause_order_and_backtracking() {
    let mut engine = engine_with("p(1). p(2). p(3).");
    let solutions = all_bindings(&mut engine, "p(X), X > 1", "X");
    assert_eq!(solutions, vec![Term::Int(2), Term::Int(3)]);
}

// Scenario: disjunction yields both alternatives.
#[test]
fn test_disjunction_alternatives() {
    let mut engine = engine_with("q(X) :- X = 5 ; X = 7.");
    let solutions = all_bindings(&mut engine, "q(Y)", "Y");
    assert_eq!(solutions, vec![Term::Int(5), Term::Int(7)]);
}

#[test]
fn test_disjunction_second_branch_starts_fresh() {
    let mut engine = engine_with("d(X) :- (X = 1, fail ; X = 2).");
    assert_eq!(
        all_bindings(&mut engine, "d(Y)", "Y"),
        vec![Term::Int(2)]
    );
}

// Scenario: cut commits past the guard.
#[test]
fn test_cut_commits() {
    let mut engine = engine_with("r(X) :- X > 0, !, X < 10.");
    assert!(engine.run("r(5)").unwrap());
    assert!(!engine.run("r(-1)").unwrap());
    assert!(!engine.run("r(50)").unwrap());
}

#[test]
fn test_cut_discards_alternatives() {
    let mut engine = engine_with("p(1). p(2). p(3). first(X) :- p(X), !.");
    assert_eq!(all_bindings(&mut engine, "first(X)", "X"), vec![Term::Int(1)]);
}

// Scenario: the delimited term stream.
#[test]
fn test_delimited_stream_asserts_facts() {
    let mut engine = Engine::new();
    engine
        .compile_delimited("delimited_code(a); delimited_code(b);;")
        .expect("delimited stream should compile");
    assert!(engine.run("delimited_code(a)").unwrap());
    assert!(engine.run("delimited_code(b)").unwrap());
    assert!(!engine.run("delimited_code(c)").unwrap());
}

#[test]
fn test_unification_constants() {
    let mut engine = Engine::new();
    assert!(engine.run("X = 5, X = 5").unwrap());
    assert!(!engine.run("X = 5, X = 6").unwrap());
    assert!(engine.run("X = hello, X = hello").unwrap());
    assert!(engine.run("X = \"text\", X = \"text\"").unwrap());
    // Integers and floats compare numerically across tags.
    assert!(engine.run("X = 2, X = 2.0").unwrap());
}

#[test]
fn test_variable_sharing() {
    let mut engine = Engine::new();
    assert!(engine.run("X = Y, X = 3, Y = 3").unwrap());
    assert!(!engine.run("X = Y, X = 3, Y = 4").unwrap());
}

#[test]
fn test_arithmetic() {
    let mut engine = Engine::new();
    assert!(engine.run("X = 2 + 3, X = 5").unwrap());
    assert!(engine.run("X = 2 * 3 - 1, X = 5").unwrap());
    // Division always promotes to float.
    assert!(engine.run("X = 7 / 2, X = 3.5").unwrap());
    // Any float operand promotes the result.
    assert!(engine.run("X = 1 + 0.5, X = 1.5").unwrap());
    assert!(engine.run("X = -(3) + 4, X = 1").unwrap());
}

#[test]
fn test_comparisons() {
    let mut engine = Engine::new();
    assert!(engine.run("1 < 2").unwrap());
    assert!(engine.run("2 =< 2").unwrap());
    assert!(engine.run("3 > 2.5").unwrap());
    assert!(engine.run("2 >= 2").unwrap());
    assert!(!engine.run("2 > 2").unwrap());
    assert!(!engine.run("3 =< 2").unwrap());
}

#[test]
fn test_comparison_type_error() {
    let mut engine = Engine::new();
    let err = engine.run("X = hello, X > 1").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::Type { .. })
    ));
}

#[test]
fn test_meta_call_preserves_arity() {
    let mut engine = engine_with("p(1). p(2). p(3).");
    assert!(engine.run("call(p/1, 2)").unwrap());
    assert!(!engine.run("call(p/1, 9)").unwrap());
    let solutions = all_bindings(&mut engine, "call(p/1, X), X > 1", "X");
    assert_eq!(solutions, vec![Term::Int(2), Term::Int(3)]);
}

#[test]
fn test_meta_call_unknown_predicate() {
    let mut engine = engine_with("p(1).");
    let err = engine.run("P = nothing_here, call(P)").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::UnknownPredicate { .. })
    ));
}

#[test]
fn test_throw_unwinds() {
    let mut engine = Engine::new();
    let err = engine.run("throw(42)").unwrap_err();
    match err {
        EngineError::Runtime(RuntimeError::UserThrow(term)) => {
            assert_eq!(term, Term::Int(42));
        }
        other => panic!("expected UserThrow, got {:?}", other),
    }
}

#[test]
fn test_step_limit() {
    let mut engine = engine_with("loop :- loop.");
    engine.set_step_limit(Some(100));
    let err = engine.run("loop").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::StepLimit)
    ));
}

#[test]
fn test_var_nonvar() {
    let mut engine = engine_with(
        "check_unbound(X) :- var(X). \
         check_bound(X) :- nonvar(X).",
    );
    assert!(engine.run("check_unbound(Y)").unwrap());
    assert!(!engine.run("check_unbound(5)").unwrap());
    assert!(engine.run("check_bound(5)").unwrap());
    assert!(!engine.run("check_bound(Y)").unwrap());
}

#[test]
fn test_type_tests_runtime() {
    let mut engine = engine_with(
        "an_int(X) :- nonvar(X), integer(X). \
         a_number(X) :- nonvar(X), number(X). \
         a_string(X) :- nonvar(X), string(X). \
         a_symbol(X) :- nonvar(X), symbol(X). \
         a_missing(X) :- nonvar(X), missing(X).",
    );
    assert!(engine.run("an_int(5)").unwrap());
    assert!(!engine.run("an_int(5.0)").unwrap());
    assert!(engine.run("a_number(5.0)").unwrap());
    assert!(engine.run("a_string(\"s\")").unwrap());
    assert!(!engine.run("a_string(s)").unwrap());
    assert!(engine.run("a_symbol(s)").unwrap());
    assert!(engine.run("a_missing(null)").unwrap());
}

#[test]
fn test_type_test_static_folds() {
    let mut engine = engine_with(
        "always :- integer(5). \
         never :- integer(hello). \
         unbound_never :- integer(X), X = 1.",
    );
    assert!(engine.run("always").unwrap());
    assert!(!engine.run("never").unwrap());
    // A type test on a first, unbound occurrence can never hold.
    assert!(!engine.run("unbound_never").unwrap());
}

#[test]
fn test_sum_and_count_aggregates() {
    let mut engine = engine_with(
        "p(1). p(2). p(3). \
         total(S) :- unsafe_initialize_zero_int(S), p(X), sum_update_and_repeat(S, X). \
         count(N) :- unsafe_initialize_zero_int(N), p(_), inc_and_repeat(N).",
    );
    assert_eq!(first_binding(&mut engine, "total(S)", "S"), Some(Term::Int(6)));
    assert_eq!(first_binding(&mut engine, "count(N)", "N"), Some(Term::Int(3)));
}

#[test]
fn test_maximize_minimize_through_driving_loop() {
    let mut engine = engine_with(
        "p(1). p(3). p(2). \
         biggest(M) :- unsafe_initialize(M), (p(X), maximize_update(M, X), fail ; true). \
         smallest(M) :- unsafe_initialize(M), (p(X), minimize_update(M, X), fail ; true).",
    );
    assert_eq!(
        first_binding(&mut engine, "biggest(M)", "M"),
        Some(Term::Int(3))
    );
    assert_eq!(
        first_binding(&mut engine, "smallest(M)", "M"),
        Some(Term::Int(1))
    );
}

#[test]
fn test_unsafe_set() {
    let mut engine = engine_with("stamp(X) :- unsafe_initialize(X), unsafe_set(X, 40 + 2).");
    assert_eq!(
        first_binding(&mut engine, "stamp(V)", "V"),
        Some(Term::Int(42))
    );
}

#[test]
fn test_tables_from_facts() {
    let mut engine = engine_with(
        "table(score/2). \
         score(anna, 10). \
         score(bea, 20).",
    );
    // Every asserted fact is queryable verbatim.
    assert!(engine.run("score(anna, 10)").unwrap());
    assert!(engine.run("score(bea, 20)").unwrap());
    assert!(!engine.run("score(anna, 20)").unwrap());
    assert_eq!(
        first_binding(&mut engine, "score(anna, X)", "X"),
        Some(Term::Int(10))
    );
    let names = all_bindings(&mut engine, "score(N, S)", "N");
    assert_eq!(names.len(), 2);
}

#[test]
fn test_table_backtracks_over_rows() {
    let mut engine = engine_with(
        "table(edge/2). \
         edge(a, b). edge(a, c). edge(b, d). \
         reach(X, Y) :- edge(X, Y). \
         reach(X, Z) :- edge(X, Y), reach(Y, Z).",
    );
    assert!(engine.run("reach(a, d)").unwrap());
    assert!(!engine.run("reach(d, a)").unwrap());
    let targets = all_bindings(&mut engine, "edge(a, T)", "T");
    assert_eq!(targets.len(), 2);
}

#[test]
fn test_globals_in_expressions() {
    let mut engine = engine_with("global(counter).");
    engine.define_global("counter", Value::Int(41));
    assert!(engine.run("X = counter + 1, X = 42").unwrap());
    assert!(engine.find("counter").is_some());
}

#[test]
fn test_host_functions() {
    let mut engine = Engine::new();
    engine.compile("function(twice/1).").unwrap();
    engine.register_host_fn(
        "twice",
        Rc::new(|args| match args {
            [Value::Int(i)] => Ok(Value::Int(i * 2)),
            _ => Ok(Value::Ref(horn::runtime::value::Obj::Null)),
        }),
    );
    assert!(engine.run("X = twice(21), X = 42").unwrap());
}

#[test]
fn test_unknown_host_function() {
    let mut engine = Engine::new();
    let err = engine.run("X = no_such_fn(1)").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::UnknownFunction(_))
    ));
}

#[test]
fn test_struct_field_access() {
    let mut engine = engine_with(
        "struct point(X, Y). \
         px(P, V) :- point(P), V = P.x. \
         py(P, V) :- point(P), V = P.y.",
    );
    assert_eq!(
        first_binding(&mut engine, "px(point(7, 8), V)", "V"),
        Some(Term::Int(7))
    );
    assert_eq!(
        first_binding(&mut engine, "py(point(7, 8), V)", "V"),
        Some(Term::Int(8))
    );
    // The generated type test rejects other values.
    assert!(!engine.run("px(5, V)").unwrap());
}

#[test]
fn test_format_expression() {
    let mut engine = engine_with("msg(S) :- S = format(\"n=\", 42).");
    assert_eq!(
        first_binding(&mut engine, "msg(S)", "S"),
        Some(Term::Str("n=42".into()))
    );
}

#[test]
fn test_instantiation_error_in_expression() {
    let mut engine = Engine::new();
    let err = engine.run("X = Y + 1, X = 2").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Runtime(RuntimeError::Instantiation { .. })
    ));
}

#[test]
fn test_singleton_warning() {
    let mut engine = Engine::new();
    engine.compile("lonely(X) :- q0(Y, X).").unwrap();
    let warnings = engine.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("singleton variable Y"));

    engine.compile("fine(_Ignored, X) :- q0(X, X).").unwrap();
    assert!(engine.take_warnings().is_empty());
}

#[test]
fn test_meta_call_through_variable() {
    let mut engine = engine_with("p(1). go :- G = p/1, call(G, 1).");
    assert!(engine.run("go").unwrap());
}

#[test]
fn test_call_failed_is_ordinary_failure() {
    let mut engine = engine_with(
        "try(X) :- X = 1. \
         try(X) :- call_failed(\"fallback probe\"). \
         try(X) :- X = 3.",
    );
    let _ = engine.take_warnings();
    let solutions = all_bindings(&mut engine, "try(Y)", "Y");
    assert_eq!(solutions, vec![Term::Int(1), Term::Int(3)]);
}

#[test]
fn test_report_declaration_compiles() {
    let mut engine = Engine::new();
    engine.compile("report(1 + 2).").expect("report should run");
}

#[test]
fn test_query_reusable_after_failure() {
    let mut engine = engine_with("p(1). p(2).");
    assert!(!engine.run("p(X), X > 99").unwrap());
    assert!(engine.run("p(2)").unwrap());
}
