//! Run with:
//!   cargo bench --bench vm_benchmark

use std::io;

use aq::generator::{
    BinaryOp, ClassDecl, Expr, FunctionDecl, Param, Stmt, TypeName, VarDecl, generate,
};
use aq::{BuiltinRegistry, Program, VMCreateInfo, Vm};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn compile(statements: &[Stmt]) -> Program {
    generate(statements, &BuiltinRegistry::with_defaults()).expect("Generation failed")
}

/// Loads a fresh VM per iteration: globals are written once by constant
/// initialization, so a program only runs once per VM.
fn execute(program: &Program) {
    let mut vm = Vm::new(
        program.clone(),
        BuiltinRegistry::with_defaults(),
        VMCreateInfo::default(),
    )
    .expect("Load failed")
    .with_output(io::sink());
    vm.run().expect("Benchmark failed");
}

fn less(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Lt, lhs, rhs)
}

fn add(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, lhs, rhs)
}

fn sub(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Sub, lhs, rhs)
}

/// Benchmark 1: Counting loop
/// Tests raw dispatch of arithmetic, comparison and branches.
fn bench_counting_loop(c: &mut Criterion) {
    let program = compile(&[
        Stmt::Var(VarDecl::new("i", TypeName::Long).init(Expr::long(0))),
        Stmt::while_loop(
            less(Expr::ident("i"), Expr::long(10_000)),
            vec![Stmt::expr(Expr::assign(
                Expr::ident("i"),
                add(Expr::ident("i"), Expr::long(1)),
            ))],
        ),
    ]);

    c.bench_function("counting_loop_10000", |b| {
        b.iter(|| execute(black_box(&program)));
    });
}

/// Benchmark 2: Recursive countdown
/// Tests frame creation, argument binding and return.
fn bench_recursive_countdown(c: &mut Criterion) {
    let program = compile(&[
        Stmt::Function(FunctionDecl::new(
            "countdown",
            vec![Param::new("n", TypeName::Long)],
            vec![Stmt::if_else(
                Expr::binary(BinaryOp::Gt, Expr::ident("n"), Expr::long(0)),
                vec![Stmt::expr(Expr::call(
                    "countdown",
                    vec![sub(Expr::ident("n"), Expr::long(1))],
                ))],
                None,
            )],
        )),
        Stmt::expr(Expr::call("countdown", vec![Expr::long(100)])),
    ]);

    c.bench_function("recursive_countdown_100", |b| {
        b.iter(|| execute(black_box(&program)));
    });
}

/// Benchmark 3: Object with counter and increment method
/// Tests member access through `this` and method dispatch.
fn bench_counter_increment(c: &mut Criterion) {
    let counter = ClassDecl {
        name: "Counter".into(),
        members: vec![VarDecl::new("count", TypeName::Long).init(Expr::long(0))],
        methods: vec![FunctionDecl::new(
            "increment",
            Vec::new(),
            vec![Stmt::expr(Expr::assign(
                Expr::ident("count"),
                add(Expr::ident("count"), Expr::long(1)),
            ))],
        )],
    };
    let program = compile(&[
        Stmt::Class(counter),
        Stmt::Var(VarDecl::new("counter", TypeName::Class("Counter".into()))),
        Stmt::Var(VarDecl::new("i", TypeName::Long).init(Expr::long(0))),
        Stmt::while_loop(
            less(Expr::ident("i"), Expr::long(100)),
            vec![
                Stmt::expr(Expr::method(Expr::ident("counter"), "increment", Vec::new())),
                Stmt::expr(Expr::assign(
                    Expr::ident("i"),
                    add(Expr::ident("i"), Expr::long(1)),
                )),
            ],
        ),
    ]);

    c.bench_function("counter_increment_100", |b| {
        b.iter(|| execute(black_box(&program)));
    });
}

/// Benchmark 4: Fibonacci (recursive, exponential complexity)
/// Tests deep recursion and return value copies.
fn bench_fibonacci(c: &mut Criterion) {
    let program = compile(&[
        Stmt::Function(FunctionDecl::new(
            "fib",
            vec![Param::new("n", TypeName::Long)],
            vec![
                Stmt::if_else(
                    less(Expr::ident("n"), Expr::long(2)),
                    vec![Stmt::Return(Some(Expr::ident("n")))],
                    None,
                ),
                Stmt::Return(Some(add(
                    Expr::call("fib", vec![sub(Expr::ident("n"), Expr::long(1))]),
                    Expr::call("fib", vec![sub(Expr::ident("n"), Expr::long(2))]),
                ))),
            ],
        )),
        Stmt::expr(Expr::call("fib", vec![Expr::long(12)])),
    ]);

    c.bench_function("fibonacci_12", |b| {
        b.iter(|| execute(black_box(&program)));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_counting_loop, bench_recursive_countdown, bench_counter_increment, bench_fibonacci
}

criterion_main!(benches);
