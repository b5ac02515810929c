//! Entry point of the engine: configuration checks, solving and reporting.

use crate::cfg::Cfg;
use crate::check::{self, CheckResult, Report, Verdict, Warning};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::incremental::{self, IncrementalDelta, Snapshot};
use crate::pointer::Cell;
use crate::solver::{Solution, Solver};
use crate::state::State;
use crate::types::{CheckId, NodeId};
use crate::witness::{self, InvariantExport};

/// Everything an analysis run produces.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub solution: Solution,
    pub report: Report,
    /// Present if the configuration asks for invariant export
    pub invariants: Option<InvariantExport>,
}

impl AnalysisResult {
    pub fn check(&self, id: CheckId) -> Option<&CheckResult> {
        self.report.checks.iter().find(|c| c.id == id)
    }

    /// Verdicts of all checks, in program order.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.report.checks.iter().map(|c| c.verdict).collect()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.report.warnings
    }

    /// Whether a race is reported on the global `name` or one of its fields.
    pub fn has_race(&self, name: &str) -> bool {
        let global = Cell::global(name);
        self.report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Race { cell, .. } if cell.is_within(&global)))
    }

    /// Join over every context of the state at `node`.
    pub fn state_at(&self, node: NodeId) -> State {
        self.solution.state_at(node)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(&self.solution)
    }
}

/// Runs the engine on one program.
pub struct Analyzer<'a> {
    cfg: &'a Cfg,
    config: AnalysisConfig,
}

impl<'a> Analyzer<'a> {
    pub fn new(cfg: &'a Cfg, config: AnalysisConfig) -> Self {
        Analyzer { cfg, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        self.cfg.validate()?;
        self.config.validate(self.cfg)
    }

    /// Analyse from scratch.
    pub fn run(&self) -> Result<AnalysisResult> {
        self.validate()?;
        log::info!(
            "analysing {} function(s), {} node(s) with {} / {} / {}",
            self.cfg.functions.len(),
            self.cfg.num_nodes(),
            self.config.domains,
            self.config.context,
            self.config.privatization
        );
        let solution = Solver::new(self.cfg, &self.config).solve()?;
        Ok(self.report(solution))
    }

    /// Analyse the program again after an edit, reusing the result on `old`.
    pub fn rerun(&self, old: &Cfg, previous: Snapshot) -> Result<AnalysisResult> {
        self.validate()?;
        let delta = IncrementalDelta::diff(old, self.cfg);
        let solution = incremental::resolve(self.cfg, &self.config, previous, &delta)?;
        Ok(self.report(solution))
    }

    fn report(&self, solution: Solution) -> AnalysisResult {
        let report = check::collect(self.cfg, &self.config, &solution);
        let invariants = self.config.export_invariants.then(|| witness::export(&solution, self.cfg));
        log::info!(
            "reported {} check(s), {} warning(s)",
            report.checks.len(),
            report.warnings.len()
        );
        AnalysisResult {
            solution,
            report,
            invariants,
        }
    }
}
