use std::fs;
use std::path::PathBuf;

use horn::engine::Engine;
use horn::runtime::store::Indicator;
use horn::syntax::term::Term;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("horn_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn solution_count(engine: &mut Engine, query: &str) -> usize {
    let mut solutions = engine.solve(query).expect("query should compile");
    let mut count = 0;
    while solutions.next_solution().expect("query should run").is_some() {
        count += 1;
    }
    count
}

#[test]
fn test_load_table_from_csv() {
    let dir = temp_dir("csv");
    let path = dir.join("points.csv");
    fs::write(&path, "name,score\nanna,10\nbea,20\n").expect("write csv");

    let mut engine = Engine::new();
    engine.load_table(&path).expect("table should load");

    assert!(engine.run("points(anna, 10)").unwrap());
    assert!(engine.run("points(bea, 20)").unwrap());
    assert!(!engine.run("points(anna, 20)").unwrap());
    assert_eq!(solution_count(&mut engine, "points(N, S)"), 2);

    // The header row becomes the signature.
    let symbol = engine.store().symbols.lookup("points").expect("interned");
    let pred = engine
        .store()
        .lookup_predicate(&Indicator::new(symbol, 2))
        .expect("table predicate");
    assert!(pred.is_table());
    let table = pred.table().expect("table extension");
    assert_eq!(table.signature.len(), 2);
    assert_eq!(table.signature[0].name(), "name");
    assert_eq!(table.row_count(), 2);
}

#[test]
fn test_csv_implicit_struct_signature() {
    let dir = temp_dir("struct_csv");
    let path = dir.join("seg.csv");
    // Header arity is 2 (two pt columns); each data row is 4 scalars wide,
    // so cells are grouped into struct instances.
    fs::write(&path, "pt,pt\n1,2,3,4\n5,6,7,8\n").expect("write csv");

    let mut engine = Engine::new();
    engine.compile("struct pt(X, Y).").expect("struct declares");
    engine.load_table(&path).expect("table should load");

    assert!(engine.run("seg(pt(1, 2), pt(3, 4))").unwrap());
    assert!(engine.run("seg(pt(5, 6), pt(7, 8))").unwrap());
    assert!(!engine.run("seg(pt(1, 2), pt(9, 9))").unwrap());
    assert!(engine.run("seg(pt(1, 2), P), P = pt(3, 4)").unwrap());
}

#[test]
fn test_csv_column_mismatch_is_an_error() {
    let dir = temp_dir("bad_csv");
    let path = dir.join("bad.csv");
    fs::write(&path, "a,b\n1,2,3\n").expect("write csv");

    let mut engine = Engine::new();
    let err = engine.load_table(&path).unwrap_err();
    assert!(err.to_string().contains("columns"));
}

#[test]
fn test_require_loads_once() {
    let dir = temp_dir("require");
    fs::write(dir.join("lib.horn"), "lp(1).\n").expect("write lib");
    let main = dir.join("main.horn");
    let lib_ref = dir.join("lib");
    fs::write(
        &main,
        format!(
            "require(\"{0}\").\nrequire(\"{0}\").\nmain_ok :- lp(1).\n",
            lib_ref.display()
        ),
    )
    .expect("write main");

    let mut engine = Engine::new();
    engine.compile_file(&main).expect("main should load");
    assert!(engine.run("main_ok").unwrap());
    // Loading is idempotent per canonical path: one clause, one solution.
    assert_eq!(solution_count(&mut engine, "lp(X)"), 1);
    assert_eq!(
        engine
            .solve("lp(X)")
            .unwrap()
            .next_solution()
            .unwrap()
            .unwrap()[0]
            .1,
        Term::Int(1)
    );
}

#[test]
fn test_compile_file_default_extension() {
    let dir = temp_dir("ext");
    fs::write(dir.join("lib.horn"), "lp(2).\n").expect("write lib");

    let mut engine = Engine::new();
    engine
        .compile_file(dir.join("lib"))
        .expect("extension should default");
    assert!(engine.run("lp(2)").unwrap());

    // A second load through the canonical path is a no-op.
    engine
        .compile_file(dir.join("lib.horn"))
        .expect("reload is idempotent");
    assert_eq!(solution_count(&mut engine, "lp(X)"), 1);
}

#[test]
fn test_table_facts_must_be_ground() {
    let mut engine = Engine::new();
    engine.compile("table(score/2).").unwrap();
    let err = engine.compile("score(anna, X).").unwrap_err();
    assert!(err.to_string().contains("ground"));
}

#[test]
fn test_tables_reject_rules() {
    let mut engine = Engine::new();
    engine.compile("table(score/2).").unwrap();
    let err = engine.compile("score(X, Y) :- X = Y.").unwrap_err();
    assert!(err.to_string().contains("table"));
}
