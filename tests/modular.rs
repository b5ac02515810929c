use absint_rs::analysis::Analyzer;
use absint_rs::cfg::{Cfg, Ty, VarDecl};
use absint_rs::check::Verdict;
use absint_rs::config::AnalysisConfig;
use absint_rs::expr::{Expr, LValue, Stmt};
use absint_rs::lower::ProgramBuilder;
use absint_rs::pointer::Cell;
use test_log::test;

fn var(name: &str) -> Expr {
    Expr::var(name)
}

fn num(value: i64) -> Expr {
    Expr::constant(value)
}

/// `helper(p)` writes through `p` and to a global, and returns 7.
fn writer() -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.global_init("g", 0);
    builder.function(
        "helper",
        &[VarDecl::new("p", Ty::ptr(Ty::Int))],
        vec![
            Stmt::assign(LValue::deref(var("p")), num(5)),
            Stmt::set("g", 1),
            Stmt::Return(Some(num(7))),
        ],
    );
    builder.function(
        "main",
        &[],
        vec![
            Stmt::set("x", 0),
            Stmt::call_into(LValue::var("r"), "helper", vec![Expr::addr_of(LValue::var("x"))]),
            Stmt::Check(var("r").eq(num(7))),
            Stmt::Check(var("x").eq(num(5))),
            Stmt::Check(var("g").eq(num(1))),
            Stmt::Check(var("x").ge(num(0))),
        ],
    );
    builder.build()
}

#[test]
fn test_modular_result_is_sound_for_contextual_result() {
    let cfg = writer();
    let contextual = Analyzer::new(&cfg, AnalysisConfig::default()).run().unwrap();
    let modular = Analyzer::new(&cfg, AnalysisConfig::default().with_modular_functions(["helper"]))
        .run()
        .unwrap();

    assert_eq!(contextual.verdicts(), vec![Verdict::Proven; 4]);
    assert_eq!(
        modular.verdicts(),
        vec![Verdict::Proven, Verdict::Unknown, Verdict::Unknown, Verdict::Proven]
    );
    for (m, c) in modular.verdicts().iter().zip(contextual.verdicts()) {
        if *m == Verdict::Proven {
            assert_eq!(c, Verdict::Proven);
        }
    }

    let summary = modular.solution.summary("helper").unwrap();
    assert!(summary.returns);
    assert!(summary.writes.contains_key(&Cell::global("g")));
    assert!(summary.writes.contains_key(&Cell::opaque("helper", "p")));
}

#[test]
fn test_opaque_pointers_may_alias() {
    let mut builder = ProgramBuilder::new();
    let params = [VarDecl::new("a", Ty::ptr(Ty::Int)), VarDecl::new("b", Ty::ptr(Ty::Int))];
    builder.function(
        "same",
        &params,
        vec![
            Stmt::Check(var("a").eq(var("b"))),
            Stmt::Alloc(LValue::var("p")),
            Stmt::Alloc(LValue::var("q")),
            Stmt::Check(var("p").eq(var("q"))),
        ],
    );
    builder.function("main", &[], vec![]);
    let cfg = builder.build();
    let config = AnalysisConfig::default().with_modular_auto();
    let result = Analyzer::new(&cfg, config).run().unwrap();
    assert_eq!(result.verdicts(), vec![Verdict::Unknown, Verdict::Refuted]);
}

#[test]
fn test_recursive_summary_converges() {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "down",
        &[VarDecl::new("n", Ty::Int)],
        vec![
            Stmt::if_then(var("n").le(num(0)), vec![Stmt::Return(Some(num(0)))]),
            Stmt::call_into(LValue::var("r"), "down", vec![var("n").sub(num(1))]),
            Stmt::Return(Some(var("r").add(num(1)))),
        ],
    );
    builder.function(
        "main",
        &[],
        vec![
            Stmt::call_into(LValue::var("v"), "down", vec![num(3)]),
            Stmt::Check(var("v").ge(num(0))),
        ],
    );
    let cfg = builder.build();
    let config = AnalysisConfig::default().with_modular_functions(["down"]);
    let result = Analyzer::new(&cfg, config).run().unwrap();
    // The return value is unbounded or top, but the call returns.
    assert_ne!(result.verdicts()[0], Verdict::Refuted);
    assert!(result.report.checks[0].reachable);
}
