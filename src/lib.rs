//! # absint-rs: abstract interpretation of multi-threaded programs
//!
//! **`absint-rs`** computes sound over-approximations of the reachable states
//! of a program given as a control-flow graph, and uses them to decide
//! assertions, lock misuse and data races.
//!
//! ## What does it compute?
//!
//! For every program point and every *context* (a bounded abstraction of the
//! call history and of the running thread) the engine computes an abstract
//! [`State`][crate::state::State]: intervals and congruences for integers,
//! optional relations between locals (octagons, affine equalities), address
//! sets for pointers and the locks held. A check is **proven** only if every
//! concrete state described by the abstraction satisfies it.
//!
//! ## Key Features
//!
//! - **Pluggable domains**: interval, congruence, octagon and polyhedra-like
//!   relational domains, selected per run and restricted per function.
//! - **Threads**: thread creation, joins and mutexes, with several
//!   *privatization* strategies deciding when a write to a global becomes
//!   visible to other threads.
//! - **Context sensitivity**: call strings, call sites or gas-bounded chains.
//! - **Modular mode**: functions analysed once, without their callers.
//! - **Incremental mode**: re-analysis of an edited program from a previous fixpoint.
//!
//! ## Basic Usage
//!
//! ```rust
//! use absint_rs::analysis::Analyzer;
//! use absint_rs::check::Verdict;
//! use absint_rs::config::AnalysisConfig;
//! use absint_rs::expr::{Expr, Stmt};
//! use absint_rs::lower::ProgramBuilder;
//!
//! // 1. Build the program: x = 3; y = 6; check(x == 3)
//! let mut builder = ProgramBuilder::new();
//! builder.function(
//!     "main",
//!     &[],
//!     vec![
//!         Stmt::set("x", 3),
//!         Stmt::set("y", 6),
//!         Stmt::Check(Expr::var("x").eq(Expr::constant(3))),
//!     ],
//! );
//! let cfg = builder.build();
//!
//! // 2. Analyse it
//! let result = Analyzer::new(&cfg, AnalysisConfig::default()).run().unwrap();
//!
//! // 3. Inspect the verdicts
//! assert_eq!(result.verdicts(), vec![Verdict::Proven]);
//! ```
//!
//! ## Core Components
//!
//! - **[`solver`]**: the worklist fixpoint solver with widening, narrowing and side effects.
//! - **[`state`]**: the abstract state and its transfer functions.
//! - **[`privatization`]**: visibility of globals across threads.
//! - **[`analysis`]**: the [`Analyzer`][crate::analysis::Analyzer] facade.

pub mod affine;
pub mod analysis;
pub mod array;
pub mod cfg;
pub mod check;
pub mod config;
pub mod congruence;
pub mod context;
pub mod domain;
pub mod error;
pub mod expr;
pub mod incremental;
pub mod int;
pub mod interval;
pub mod locks;
pub mod lower;
pub mod modular;
pub mod octagon;
pub mod pointer;
pub mod privatization;
pub mod relational;
pub mod solver;
pub mod state;
pub mod types;
pub mod value;
pub mod witness;
