//! Analyse one of the built-in scenario programs and print the verdicts.
//!
//! Run with:
//! ```bash
//! cargo run --example analyze -- counter --privatization mutex-meet
//! cargo run --example analyze -- loop --domains interval,congruence,octagon --witness
//! cargo run --example analyze -- ackermann --context call-string:2
//! ```

use absint_rs::analysis::Analyzer;
use absint_rs::cfg::{Cfg, Ty, VarDecl};
use absint_rs::config::AnalysisConfig;
use absint_rs::context::ContextPolicy;
use absint_rs::expr::{Expr, LValue, Stmt};
use absint_rs::locks::MutexKind;
use absint_rs::lower::ProgramBuilder;
use absint_rs::privatization::Privatization;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Two threads incrementing a counter under a mutex
    Counter,
    /// Two threads incrementing a counter without synchronisation
    Race,
    /// A counting loop
    Loop,
    /// Ackermann's function
    Ackermann,
    /// A function writing through a pointer parameter
    Pointer,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Abstract interpretation of built-in scenario programs")]
struct Cli {
    /// Program to analyse
    #[arg(value_enum, default_value = "counter")]
    scenario: Scenario,

    /// Comma-separated domains (interval, congruence, octagon, polyhedra)
    #[arg(long, default_value = "interval")]
    domains: String,

    /// Context policy (insensitive, call-string:K, call-site:K, gas:K)
    #[arg(long, default_value = "call-string:1")]
    context: ContextPolicy,

    /// Privatization strategy for globals shared by threads
    #[arg(long, default_value = "protection")]
    privatization: Privatization,

    /// Functions to analyse modularly
    #[arg(long, value_delimiter = ',')]
    modular: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Print loop invariants and preconditions as JSON
    #[arg(long)]
    witness: bool,
}

fn var(name: &str) -> Expr {
    Expr::var(name)
}

fn num(value: i64) -> Expr {
    Expr::constant(value)
}

fn counter(locked: bool) -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.global_init("counter", 0);
    builder.mutex("m", MutexKind::Default);
    let increment = Stmt::set("counter", var("counter").add(num(1)));
    let body = if locked {
        vec![Stmt::lock("m"), increment, Stmt::unlock("m")]
    } else {
        vec![increment]
    };
    builder.function("worker", &[], body);
    builder.function(
        "main",
        &[],
        vec![
            Stmt::spawn("worker"),
            Stmt::spawn("worker"),
            Stmt::lock("m"),
            Stmt::Check(var("counter").ge(num(0))),
            Stmt::Check(var("counter").le(num(2))),
            Stmt::unlock("m"),
        ],
    );
    builder.build()
}

fn counting_loop() -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "main",
        &[],
        vec![
            Stmt::set("i", 0),
            Stmt::set("j", 0),
            Stmt::while_loop(
                var("i").lt(num(100)),
                vec![
                    Stmt::set("i", var("i").add(num(2))),
                    Stmt::set("j", var("j").add(num(2))),
                ],
            ),
            Stmt::Check(var("i").eq(num(100))),
            Stmt::Check(var("i").eq(var("j"))),
        ],
    );
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
        vec![
            Stmt::call_into(LValue::var("result"), "ack", vec![num(2), num(1)]),
            Stmt::Check(var("result").ge(num(1))),
        ],
    );
    builder.build()
}

fn pointer() -> Cfg {
    let mut builder = ProgramBuilder::new();
    builder.function(
        "store",
        &[VarDecl::new("p", Ty::ptr(Ty::Int))],
        vec![
            Stmt::assign(LValue::deref(var("p")), num(5)),
            Stmt::Return(Some(num(7))),
        ],
    );
    builder.function(
        "main",
        &[],
        vec![
            Stmt::set("x", 0),
            Stmt::call_into(LValue::var("r"), "store", vec![Expr::addr_of(LValue::var("x"))]),
            Stmt::Check(var("r").eq(num(7))),
            Stmt::Check(var("x").eq(num(5))),
        ],
    );
    builder.build()
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let cli = Cli::parse();

    let cfg = match cli.scenario {
        Scenario::Counter => counter(true),
        Scenario::Race => counter(false),
        Scenario::Loop => counting_loop(),
        Scenario::Ackermann => ackermann(),
        Scenario::Pointer => pointer(),
    };

    let config = AnalysisConfig::default()
        .with_domain_names(&cli.domains)?
        .with_context(cli.context)
        .with_privatization(cli.privatization)
        .with_modular_functions(cli.modular.iter().cloned())
        .with_export_invariants(cli.witness);

    let time_total = std::time::Instant::now();
    let result = Analyzer::new(&cfg, config).run()?;
    let time_total = time_total.elapsed();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result.report)?);
    } else {
        for check in &result.report.checks {
            let location = check.location.map_or_else(|| check.node.to_string(), |l| l.to_string());
            let note = if check.reachable { "" } else { " (unreachable)" };
            println!("{:>8}  {}: {}{}", check.verdict.to_string(), location, check.condition, note);
        }
        for lock in &result.report.locks {
            println!("{:>8}  {:?} {} at {}", lock.verdict.to_string(), lock.op, lock.mutex, lock.edge);
        }
        for warning in result.warnings() {
            println!("warning: {}", warning);
        }
    }

    if let Some(invariants) = &result.invariants {
        println!("{}", invariants.to_json()?);
    }

    println!(
        "Done in {:.3} s ({} evaluations)",
        time_total.as_secs_f64(),
        result.solution.evaluations
    );

    Ok(())
}
