use criterion::{black_box, criterion_group, criterion_main, Criterion};

use horn::engine::Engine;

fn chain_program(length: usize) -> String {
    let mut program = String::new();
    for i in 0..length {
        program.push_str(&format!("link(n{}, n{}).\n", i, i + 1));
    }
    program.push_str("reach(X, Y) :- link(X, Y).\n");
    program.push_str("reach(X, Z) :- link(X, Y), reach(Y, Z).\n");
    program
}

fn bench_resolution(c: &mut Criterion) {
    c.bench_function("reach_chain_64", |b| {
        let mut engine = Engine::new();
        engine
            .compile(&chain_program(64))
            .expect("program should compile");
        b.iter(|| black_box(engine.run("reach(n0, n64)").expect("query should run")));
    });

    c.bench_function("backtrack_pairs", |b| {
        let mut engine = Engine::new();
        let mut program = String::new();
        for i in 0..32 {
            program.push_str(&format!("item({}).\n", i));
        }
        program.push_str("pair(X, Y) :- item(X), item(Y), X > Y.\n");
        engine.compile(&program).expect("program should compile");
        b.iter(|| black_box(engine.run("pair(31, 30)").expect("query should run")));
    });

    c.bench_function("sum_aggregate", |b| {
        let mut engine = Engine::new();
        let mut program = String::new();
        for i in 0..100 {
            program.push_str(&format!("n({}).\n", i));
        }
        program.push_str(
            "total(S) :- unsafe_initialize_zero_int(S), n(X), sum_update_and_repeat(S, X).\n",
        );
        engine.compile(&program).expect("program should compile");
        b.iter(|| black_box(engine.run("total(4950)").expect("query should run")));
    });
}

fn bench_compile(c: &mut Criterion) {
    let program = chain_program(128);
    c.bench_function("compile_facts_128", |b| {
        b.iter(|| {
            let mut engine = Engine::new();
            engine
                .compile(black_box(&program))
                .expect("program should compile");
        });
    });
}

criterion_group!(benches, bench_resolution, bench_compile);
criterion_main!(benches);
