use absint_rs::analysis::Analyzer;
use absint_rs::cfg::{Cfg, Ty, VarDecl};
use absint_rs::check::{LockOp, Verdict, Warning};
use absint_rs::config::{AnalysisConfig, DomainSet};
use absint_rs::context::ContextPolicy;
use absint_rs::error::AnalysisError;
use absint_rs::expr::{Cond, Expr, LValue, Stmt};
use absint_rs::locks::MutexKind;
use absint_rs::lower::ProgramBuilder;
use test_log::test;

fn var(name: &str) -> Expr {
    Expr::var(name)
}

fn num(value: i64) -> Expr {
    Expr::constant(value)
}

fn main_only(body: Vec<Stmt>) -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function("main", &[], body);
    builder.build()
}

fn verdicts(cfg: &Cfg, config: AnalysisConfig) -> Vec<Verdict> {
    Analyzer::new(cfg, config).run().unwrap().verdicts()
}

#[test]
fn test_constant_assertion() {
    let cfg = main_only(vec![
        Stmt::set("x", 3),
        Stmt::set("y", 6),
        Stmt::Check(var("x").eq(num(3))),
        Stmt::Check(var("y").eq(num(7))),
    ]);
    assert_eq!(
        verdicts(&cfg, AnalysisConfig::default()),
        vec![Verdict::Proven, Verdict::Refuted]
    );
}

#[test]
fn test_unreachable_check() {
    let cfg = main_only(vec![
        Stmt::set("x", 1),
        Stmt::if_then(var("x").eq(num(3)), vec![Stmt::Check(Cond::False)]),
    ]);
    let result = Analyzer::new(&cfg, AnalysisConfig::default()).run().unwrap();
    let check = &result.report.checks[0];
    assert!(!check.reachable);
    assert_eq!(check.verdict, Verdict::Proven);
}

#[test]
fn test_division_by_known_divisor() {
    // x == 3 && y / x == 2 leaves y in [6, 8]
    let cfg = main_only(vec![
        Stmt::set("x", 3),
        Stmt::Havoc(LValue::var("y")),
        Stmt::Assume(var("y").div(var("x")).eq(num(2))),
        Stmt::Check(var("y").ge(num(6))),
        Stmt::Check(var("y").le(num(8))),
        Stmt::Check(var("y").eq(num(6))),
    ]);
    assert_eq!(
        verdicts(&cfg, AnalysisConfig::default()),
        vec![Verdict::Proven, Verdict::Proven, Verdict::Unknown]
    );
}

#[test]
fn test_remainder_with_congruences() {
    let cfg = main_only(vec![
        Stmt::Havoc(LValue::var("x")),
        Stmt::Assume(
            var("x")
                .gt(num(1))
                .and(var("x").lt(num(5)))
                .and(var("x").modulo(num(2)).eq(num(1))),
        ),
        Stmt::Check(var("x").eq(num(3))),
    ]);
    let precise = AnalysisConfig::default().with_domains(DomainSet::ALL);
    assert_eq!(verdicts(&cfg, precise), vec![Verdict::Proven]);
}

#[test]
fn test_loop_bound_after_narrowing() {
    let cfg = main_only(vec![
        Stmt::set("i", 0),
        Stmt::while_loop(var("i").lt(num(10)), vec![Stmt::set("i", var("i").add(num(1)))]),
        Stmt::Check(var("i").eq(num(10))),
    ]);
    assert_eq!(verdicts(&cfg, AnalysisConfig::default()), vec![Verdict::Proven]);
}

fn two_calls() -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "id",
        &[VarDecl::new("a", Ty::Int)],
        vec![Stmt::Return(Some(var("a")))],
    );
    builder.function(
        "main",
        &[],
        vec![
            Stmt::call_into(LValue::var("x"), "id", vec![num(1)]),
            Stmt::call_into(LValue::var("y"), "id", vec![num(2)]),
            Stmt::Check(var("x").eq(num(1))),
            Stmt::Check(var("y").eq(num(2))),
        ],
    );
    builder.build()
}

#[test]
fn test_call_strings_separate_call_sites() {
    let cfg = two_calls();
    let sensitive = AnalysisConfig::default().with_context(ContextPolicy::CallString(1));
    assert_eq!(verdicts(&cfg, sensitive), vec![Verdict::Proven, Verdict::Proven]);

    let insensitive = AnalysisConfig::default().with_context(ContextPolicy::Insensitive);
    assert_eq!(verdicts(&cfg, insensitive), vec![Verdict::Unknown, Verdict::Unknown]);
}

#[test]
fn test_gas_separates_call_sites() {
    let cfg = two_calls();
    for policy in [ContextPolicy::Gas(15), ContextPolicy::Gas(1), ContextPolicy::CallSite(1)] {
        let config = AnalysisConfig::default().with_context(policy);
        assert_eq!(verdicts(&cfg, config), vec![Verdict::Proven, Verdict::Proven], "{}", policy);
    }
}

/// `f` recurses through two call sites with no bound on the depth.
fn unbounded_recursion() -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "f",
        &[VarDecl::new("n", Ty::Int)],
        vec![Stmt::if_then(
            var("n").gt(num(0)),
            vec![
                Stmt::call("f", vec![var("n").sub(num(1))]),
                Stmt::call("f", vec![var("n").sub(num(2))]),
            ],
        )],
    );
    builder.function(
        "main",
        &[],
        vec![
            Stmt::Havoc(LValue::var("k")),
            Stmt::call("f", vec![var("k")]),
            Stmt::Check(Cond::True),
        ],
    );
    builder.build()
}

#[test]
fn test_contexts_stay_finite_under_recursion() {
    let cfg = unbounded_recursion();
    let entry = cfg.functions["f"].entry;
    // Upper bounds with one call site in `main` and two in `f`.
    for (policy, bound) in [
        (ContextPolicy::Insensitive, 1),
        (ContextPolicy::CallString(2), 1 + 2 + 4),
        (ContextPolicy::CallSite(2), 1 + 2 + 4),
        (ContextPolicy::Gas(3), 1 + 2 + 4 + 1),
    ] {
        let config = AnalysisConfig::default().with_context(policy);
        let result = Analyzer::new(&cfg, config).run().unwrap();
        assert_eq!(result.verdicts(), vec![Verdict::Proven], "{}", policy);
        let contexts = result.solution.contexts(entry).count();
        assert!(contexts >= 1 && contexts <= bound, "{}: {} contexts", policy, contexts);
    }
}

#[test]
fn test_precision_override_per_function() {
    // x = 2 * y; check(x % 2 == 0), in `f` and in `main`
    let even = || {
        vec![
            Stmt::Havoc(LValue::var("y")),
            Stmt::set("x", num(2).mul(var("y"))),
            Stmt::Check(var("x").modulo(num(2)).eq(num(0))),
        ]
    };
    let mut builder = ProgramBuilder::new();
    builder.function("f", &[], even());
    let mut main = even();
    main.push(Stmt::call("f", vec![]));
    builder.function("main", &[], main);
    let cfg = builder.build();

    let uniform = AnalysisConfig::default().with_domains(DomainSet::ALL);
    assert_eq!(verdicts(&cfg, uniform.clone()), vec![Verdict::Proven, Verdict::Proven]);

    let restricted = uniform.with_precision("f", DomainSet::INTERVAL);
    assert_eq!(verdicts(&cfg, restricted), vec![Verdict::Unknown, Verdict::Proven]);
}

/// `ack(m, n)`, followed by `check(1)` in `main`.
fn ackermann(m: i64, n: i64) -> Cfg {
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
        vec![
            Stmt::call_into(LValue::var("result"), "ack", vec![num(m), num(n)]),
            Stmt::Check(Cond::True),
        ],
    );
    builder.build()
}

#[test]
fn test_recursion_terminates_under_every_policy() {
    let cfg = ackermann(4, 1);
    for policy in [
        ContextPolicy::Insensitive,
        ContextPolicy::CallString(2),
        ContextPolicy::CallSite(2),
        ContextPolicy::Gas(3),
    ] {
        let config = AnalysisConfig::default().with_context(policy);
        assert_eq!(verdicts(&cfg, config), vec![Verdict::Proven], "{}", policy);
    }
}

#[test]
fn test_ackermann_long_call_strings() {
    let cfg = ackermann(4, 1);
    let config = AnalysisConfig::default().with_context(ContextPolicy::CallString(10));
    assert_eq!(verdicts(&cfg, config), vec![Verdict::Proven]);
}

fn double_lock(kind: MutexKind) -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.mutex("m", kind);
    builder.function(
        "main",
        &[],
        vec![Stmt::lock("m"), Stmt::lock("m"), Stmt::unlock("m")],
    );
    builder.build()
}

fn lock_verdicts(cfg: &Cfg) -> (Vec<Verdict>, Vec<Warning>) {
    let result = Analyzer::new(cfg, AnalysisConfig::default()).run().unwrap();
    let locks = result
        .report
        .locks
        .iter()
        .filter(|l| l.op == LockOp::Lock)
        .map(|l| l.verdict)
        .collect();
    (locks, result.report.warnings)
}

#[test]
fn test_double_lock() {
    for kind in [MutexKind::Default, MutexKind::ErrorCheck] {
        let (locks, warnings) = lock_verdicts(&double_lock(kind));
        assert_eq!(locks, vec![Verdict::Proven, Verdict::Refuted]);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, Warning::DoubleLock { definite: true, .. })));
    }

    let (locks, warnings) = lock_verdicts(&double_lock(MutexKind::Recursive));
    assert_eq!(locks, vec![Verdict::Proven, Verdict::Proven]);
    assert!(warnings.is_empty());
}

#[test]
fn test_possible_double_lock() {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "main",
        &[],
        vec![
            Stmt::Havoc(LValue::var("c")),
            Stmt::if_then(var("c").truthy(), vec![Stmt::lock("m")]),
            Stmt::lock("m"),
        ],
    );
    let (locks, _) = lock_verdicts(&builder.build());
    assert_eq!(locks, vec![Verdict::Proven, Verdict::Unknown]);
}

#[test]
fn test_configuration_errors() {
    let cfg = main_only(vec![]);
    let missing = AnalysisConfig::default().with_entry_points(["start"]);
    assert_eq!(
        Analyzer::new(&cfg, missing).run().unwrap_err(),
        AnalysisError::UnknownFunction("start".to_string())
    );

    let mut builder = ProgramBuilder::new();
    builder.function("main", &[], vec![Stmt::call("nowhere", vec![])]);
    let broken = builder.build();
    assert!(matches!(
        Analyzer::new(&broken, AnalysisConfig::default()).run(),
        Err(AnalysisError::MalformedCfg(_))
    ));
}

#[test]
fn test_evaluation_ceiling() {
    let cfg = main_only(vec![
        Stmt::set("i", 0),
        Stmt::while_loop(var("i").lt(num(100)), vec![Stmt::set("i", var("i").add(num(1)))]),
    ]);
    let config = AnalysisConfig::default().with_max_evaluations(5);
    assert!(matches!(
        Analyzer::new(&cfg, config).run(),
        Err(AnalysisError::NonTermination { evaluations: 5 })
    ));
}

#[test]
fn test_invariant_export() {
    let cfg = main_only(vec![
        Stmt::set("i", 0),
        Stmt::while_loop(var("i").lt(num(10)), vec![Stmt::set("i", var("i").add(num(1)))]),
    ]);
    let config = AnalysisConfig::default().with_export_invariants(true);
    let result = Analyzer::new(&cfg, config).run().unwrap();
    let invariants = result.invariants.unwrap();
    let head = *cfg.loop_heads().iter().next().unwrap();
    let invariant = invariants.at(head).unwrap();
    assert_eq!(invariant.expression, "i <= 10 && i >= 0");
}
