//! Benchmarks for the fixpoint solver.
//!
//! Each benchmark builds a small program once and measures complete
//! analysis runs (solving plus reporting) under several configurations.
//!
//! Run with:
//! ```bash
//! cargo bench --bench solver
//! ```

use absint_rs::analysis::Analyzer;
use absint_rs::cfg::{Cfg, Ty, VarDecl};
use absint_rs::config::{AnalysisConfig, DomainSet};
use absint_rs::context::ContextPolicy;
use absint_rs::expr::{Expr, LValue, Stmt};
use absint_rs::locks::MutexKind;
use absint_rs::lower::ProgramBuilder;
use absint_rs::privatization::Privatization;
use absint_rs::relational::RelationalKind;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn var(name: &str) -> Expr {
    Expr::var(name)
}

fn num(value: i64) -> Expr {
    Expr::constant(value)
}

/// `depth` nested counting loops, each up to `bound`.
fn nested_loops(depth: usize, bound: i64) -> Cfg {
    let mut body = vec![Stmt::set("sum", var("sum").add(num(1)))];
    for level in (0..depth).rev() {
        let i = format!("i{}", level);
        body = vec![
            Stmt::set(i.as_str(), 0),
            Stmt::while_loop(
                var(&i).lt(num(bound)),
                body.into_iter()
                    .chain([Stmt::set(i.as_str(), var(&i).add(num(1)))])
                    .collect(),
            ),
        ];
    }
    let mut main = vec![Stmt::set("sum", 0)];
    main.extend(body);
    main.push(Stmt::Check(var("sum").ge(num(0))));
    let mut builder = ProgramBuilder::new();
    builder.function("main", &[], main);
    builder.build()
}

/// `threads` workers incrementing a shared counter under a mutex.
fn locked_counter(threads: usize) -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.global_init("counter", 0);
    builder.mutex("m", MutexKind::Default);
    builder.function(
        "worker",
        &[],
        vec![
            Stmt::lock("m"),
            Stmt::set("counter", var("counter").add(num(1))),
            Stmt::unlock("m"),
        ],
    );
    let mut main: Vec<Stmt> = (0..threads).map(|_| Stmt::spawn("worker")).collect();
    main.extend([
        Stmt::lock("m"),
        Stmt::Check(var("counter").ge(num(0))),
        Stmt::unlock("m"),
    ]);
    builder.function("main", &[], main);
    builder.build()
}

fn ackermann() -> Cfg {
    let mut builder = ProgramBuilder::new();
    let params = [VarDecl::new("m", Ty::Int), VarDecl::new("n", Ty::Int)];
    builder.function(
        "ack",
        &params,
        vec![
            Stmt::if_then(var("m").eq(num(0)), vec![Stmt::Return(Some(var("n").add(num(1))))]),
            Stmt::if_then(
                var("n").eq(num(0)),
                vec![
                    Stmt::call_into(LValue::var("r"), "ack", vec![var("m").sub(num(1)), num(1)]),
                    Stmt::Return(Some(var("r"))),
                ],
            ),
            Stmt::call_into(LValue::var("t"), "ack", vec![var("m"), var("n").sub(num(1))]),
            Stmt::call_into(LValue::var("r"), "ack", vec![var("m").sub(num(1)), var("t")]),
            Stmt::Return(Some(var("r"))),
        ],
    );
    builder.function(
        "main",
        &[],
        vec![Stmt::call_into(LValue::var("result"), "ack", vec![num(4), num(1)])],
    );
    builder.build()
}

fn run(cfg: &Cfg, config: &AnalysisConfig) -> usize {
    Analyzer::new(cfg, config.clone())
        .run()
        .map(|r| r.solution.evaluations)
        .unwrap_or(0)
}

// ============================================================================
// Benchmark: Loops
// ============================================================================

fn bench_loops(c: &mut Criterion) {
    let mut group = c.benchmark_group("solver/loops");

    for depth in [1, 2, 3] {
        let cfg = nested_loops(depth, 100);
        let configs = [
            ("interval", AnalysisConfig::default()),
            ("all", AnalysisConfig::default().with_domains(DomainSet::ALL)),
            (
                "octagon",
                AnalysisConfig::default().with_relational(RelationalKind::Octagon),
            ),
        ];
        for (name, config) in &configs {
            group.bench_with_input(BenchmarkId::new(*name, depth), &cfg, |b, cfg| b.iter(|| run(cfg, config)));
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Threads
// ============================================================================

fn bench_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("solver/threads");

    for threads in [2, 8] {
        let cfg = locked_counter(threads);
        for privatization in [
            Privatization::None,
            Privatization::Protection,
            Privatization::MutexMeet,
            Privatization::MutexMeetTid,
            Privatization::LockDigest,
        ] {
            let config = AnalysisConfig::default().with_privatization(privatization);
            group.bench_with_input(
                BenchmarkId::new(privatization.to_string(), threads),
                &cfg,
                |b, cfg| b.iter(|| run(cfg, &config)),
            );
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Contexts
// ============================================================================

fn bench_contexts(c: &mut Criterion) {
    let mut group = c.benchmark_group("solver/contexts");
    let cfg = ackermann();

    for policy in [
        ContextPolicy::Insensitive,
        ContextPolicy::CallString(1),
        ContextPolicy::CallString(2),
        ContextPolicy::CallSite(2),
        ContextPolicy::Gas(3),
    ] {
        let config = AnalysisConfig::default().with_context(policy);
        group.bench_function(policy.to_string(), |b| b.iter(|| run(&cfg, &config)));
    }

    group.finish();
}

criterion_group!(benches, bench_loops, bench_threads, bench_contexts);

criterion_main!(benches);
