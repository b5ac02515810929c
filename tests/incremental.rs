use absint_rs::analysis::Analyzer;
use absint_rs::cfg::{Cfg, Ty, VarDecl};
use absint_rs::check::Verdict;
use absint_rs::config::AnalysisConfig;
use absint_rs::expr::{Expr, Stmt};
use absint_rs::lower::ProgramBuilder;
use test_log::test;

/// `x = value; f(x)` where `f(a)` checks `a == 2`.
fn program(value: i64) -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "f",
        &[VarDecl::new("a", Ty::Int)],
        vec![Stmt::Check(Expr::var("a").eq(Expr::constant(2)))],
    );
    builder.function(
        "main",
        &[],
        vec![Stmt::set("x", value), Stmt::call("f", vec![Expr::var("x")])],
    );
    builder.build()
}

#[test]
fn test_unchanged_rerun_matches_full_run() {
    let cfg = program(2);
    let analyzer = Analyzer::new(&cfg, AnalysisConfig::default());
    let full = analyzer.run().unwrap();
    let again = analyzer.rerun(&cfg, full.snapshot()).unwrap();
    assert_eq!(again.verdicts(), full.verdicts());
    assert_eq!(again.solution.states, full.solution.states);
}

#[test]
fn test_rerun_keeps_previous_start_states() {
    let old = program(1);
    let new = program(2);
    let config = AnalysisConfig::default();

    let before = Analyzer::new(&old, config.clone()).run().unwrap();
    assert_eq!(before.verdicts(), vec![Verdict::Refuted]);

    let fresh = Analyzer::new(&new, config.clone()).run().unwrap();
    assert_eq!(fresh.verdicts(), vec![Verdict::Proven]);

    // The start state of `f` is joined with the one from the old program.
    let rerun = Analyzer::new(&new, config).rerun(&old, before.snapshot()).unwrap();
    assert_eq!(rerun.verdicts(), vec![Verdict::Unknown]);
}
