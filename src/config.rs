//! Analysis configuration.
//!
//! [`AnalysisConfig`] is a plain struct with sensible defaults and `with_*`
//! builder methods. Every enumerated option also parses from the names used on
//! the command line (`call-string:10`, `mutex-meet`, `octagon`, ...).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cfg::Cfg;
use crate::context::ContextPolicy;
use crate::error::AnalysisError;
use crate::privatization::Privatization;
use crate::relational::RelationalKind;

/// Non-relational integer domains that are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainSet {
    pub interval: bool,
    pub congruence: bool,
}

impl DomainSet {
    pub const INTERVAL: DomainSet = DomainSet {
        interval: true,
        congruence: false,
    };
    pub const ALL: DomainSet = DomainSet {
        interval: true,
        congruence: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.interval && !self.congruence
    }

    /// Whether every domain in `self` is also in `other`.
    pub fn is_subset(&self, other: &DomainSet) -> bool {
        (!self.interval || other.interval) && (!self.congruence || other.congruence)
    }
}

impl Default for DomainSet {
    fn default() -> Self {
        DomainSet::INTERVAL
    }
}

/// Comma-separated list of `interval` and `congruence`.
impl FromStr for DomainSet {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = DomainSet {
            interval: false,
            congruence: false,
        };
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "interval" | "intervals" => set.interval = true,
                "congruence" | "congruences" => set.congruence = true,
                other => return Err(AnalysisError::UnknownDomain(other.to_string())),
            }
        }
        Ok(set)
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.interval {
            names.push("interval");
        }
        if self.congruence {
            names.push("congruence");
        }
        write!(f, "{}", names.join(","))
    }
}

/// Functions analysed in isolation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModularConfig {
    pub functions: Vec<String>,
    /// Analyse every function except the entry points modularly.
    pub auto: bool,
}

impl ModularConfig {
    pub fn is_enabled(&self) -> bool {
        self.auto || !self.functions.is_empty()
    }
}

/// Configuration options for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Non-relational integer domains (default: interval)
    pub domains: DomainSet,
    /// Relational domain over local integer variables (default: none)
    pub relational: RelationalKind,
    /// Context policy (default: call-string of length 5)
    pub context: ContextPolicy,
    /// Privatization of globals in multi-threaded code (default: protection)
    pub privatization: Privatization,
    pub modular: ModularConfig,
    /// Per-function restriction of `domains`
    pub precision: BTreeMap<String, DomainSet>,
    /// Functions whose entry is seeded with the initial state (default: `main`)
    pub entry_points: Vec<String>,
    /// Updates of a widening point before widening kicks in (default: 3)
    pub widening_delay: u32,
    /// Descending rounds after the first fixpoint (default: 2)
    pub narrowing_iterations: u32,
    /// Ceiling on node evaluations before giving up (default: 10 million)
    pub max_evaluations: usize,
    /// Summary updates of a recursive modular function before it becomes top (default: 3)
    pub modular_unroll_bound: u32,
    /// Partition arrays by the last written index (default: true)
    pub array_partitioning: bool,
    /// Collect invariants for witness export (default: false)
    pub export_invariants: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            domains: DomainSet::default(),
            relational: RelationalKind::None,
            context: ContextPolicy::CallString(5),
            privatization: Privatization::Protection,
            modular: ModularConfig::default(),
            precision: BTreeMap::new(),
            entry_points: vec!["main".to_string()],
            widening_delay: 3,
            narrowing_iterations: 2,
            max_evaluations: 10_000_000,
            modular_unroll_bound: 3,
            array_partitioning: true,
            export_invariants: false,
        }
    }
}

impl AnalysisConfig {
    pub fn with_domains(mut self, domains: DomainSet) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_relational(mut self, relational: RelationalKind) -> Self {
        self.relational = relational;
        self
    }

    pub fn with_context(mut self, context: ContextPolicy) -> Self {
        self.context = context;
        self
    }

    pub fn with_privatization(mut self, privatization: Privatization) -> Self {
        self.privatization = privatization;
        self
    }

    pub fn with_modular_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modular.functions = functions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modular_auto(mut self) -> Self {
        self.modular.auto = true;
        self
    }

    pub fn with_precision(mut self, function: impl Into<String>, domains: DomainSet) -> Self {
        self.precision.insert(function.into(), domains);
        self
    }

    pub fn with_entry_points<I, S>(mut self, entry_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points = entry_points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_widening_delay(mut self, delay: u32) -> Self {
        self.widening_delay = delay;
        self
    }

    pub fn with_narrowing_iterations(mut self, iterations: u32) -> Self {
        self.narrowing_iterations = iterations;
        self
    }

    pub fn with_max_evaluations(mut self, max: usize) -> Self {
        self.max_evaluations = max;
        self
    }

    pub fn with_array_partitioning(mut self, enabled: bool) -> Self {
        self.array_partitioning = enabled;
        self
    }

    pub fn with_export_invariants(mut self, enabled: bool) -> Self {
        self.export_invariants = enabled;
        self
    }

    /// Parse a list of domain names, non-relational and relational mixed
    /// (e.g. `"interval,congruence,octagon"`).
    pub fn with_domain_names(mut self, names: &str) -> Result<Self, AnalysisError> {
        let mut domains = DomainSet {
            interval: false,
            congruence: false,
        };
        let mut relational = RelationalKind::None;
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.parse::<DomainSet>() {
                Ok(set) => {
                    domains.interval |= set.interval;
                    domains.congruence |= set.congruence;
                }
                Err(_) => {
                    let kind: RelationalKind = name.parse()?;
                    if relational != RelationalKind::None && relational != kind {
                        return Err(AnalysisError::ConflictingOptions(format!(
                            "relational domains `{}` and `{}` both selected",
                            relational, kind
                        )));
                    }
                    relational = kind;
                }
            }
        }
        self.domains = if domains.is_empty() { DomainSet::INTERVAL } else { domains };
        self.relational = relational;
        Ok(self)
    }

    /// Domains active for cells of `function`.
    pub fn domains_for(&self, function: &str) -> DomainSet {
        self.precision.get(function).copied().unwrap_or(self.domains)
    }

    /// Whether `function` is analysed modularly.
    pub fn is_modular(&self, function: &str) -> bool {
        if self.entry_points.iter().any(|e| e == function) {
            return false;
        }
        self.modular.auto || self.modular.functions.iter().any(|f| f == function)
    }

    /// Reject inconsistent options before the solver starts.
    pub fn validate(&self, cfg: &Cfg) -> Result<(), AnalysisError> {
        if self.domains.is_empty() {
            return Err(AnalysisError::ConflictingOptions("no integer domain enabled".to_string()));
        }
        self.context.validate()?;
        if self.max_evaluations == 0 {
            return Err(AnalysisError::ConflictingOptions(
                "evaluation ceiling must be positive".to_string(),
            ));
        }
        if self.entry_points.is_empty() {
            return Err(AnalysisError::ConflictingOptions("no entry point".to_string()));
        }
        for entry in &self.entry_points {
            if cfg.function(entry).is_none() {
                return Err(AnalysisError::UnknownFunction(entry.clone()));
            }
        }
        for function in &self.modular.functions {
            if cfg.function(function).is_none() {
                return Err(AnalysisError::UnknownFunction(function.clone()));
            }
            if self.entry_points.contains(function) {
                return Err(AnalysisError::ConflictingOptions(format!(
                    "`{}` is both an entry point and modular",
                    function
                )));
            }
        }
        for (function, domains) in &self.precision {
            if cfg.function(function).is_none() {
                return Err(AnalysisError::UnknownFunction(function.clone()));
            }
            if domains.is_empty() || !domains.is_subset(&self.domains) {
                return Err(AnalysisError::ConflictingOptions(format!(
                    "precision of `{}` ({}) is not a non-empty subset of ({})",
                    function, domains, self.domains
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::lower::ProgramBuilder;

    fn program() -> Cfg {
        let mut b = ProgramBuilder::new();
        b.function("main", &[], vec![]);
        b.function("helper", &[], vec![]);
        b.build()
    }

    #[test]
    fn test_parse_domain_names() {
        let config = AnalysisConfig::default()
            .with_domain_names("interval, congruence, octagon")
            .unwrap();
        assert_eq!(config.domains, DomainSet::ALL);
        assert_eq!(config.relational, RelationalKind::Octagon);

        let err = AnalysisConfig::default().with_domain_names("interval,sign").unwrap_err();
        assert_eq!(err, AnalysisError::UnknownDomain("sign".to_string()));

        let err = AnalysisConfig::default().with_domain_names("octagon,polyhedra").unwrap_err();
        assert!(matches!(err, AnalysisError::ConflictingOptions(_)));
    }

    #[test]
    fn test_validate() {
        let cfg = program();
        assert!(AnalysisConfig::default().validate(&cfg).is_ok());

        let bad_entry = AnalysisConfig::default().with_entry_points(["start"]);
        assert_eq!(
            bad_entry.validate(&cfg),
            Err(AnalysisError::UnknownFunction("start".to_string()))
        );

        let override_too_wide = AnalysisConfig::default().with_precision("helper", DomainSet::ALL);
        assert!(matches!(
            override_too_wide.validate(&cfg),
            Err(AnalysisError::ConflictingOptions(_))
        ));

        let zero_gas = AnalysisConfig::default().with_context(ContextPolicy::Gas(0));
        assert!(matches!(zero_gas.validate(&cfg), Err(AnalysisError::ConflictingOptions(_))));

        let modular_main = AnalysisConfig::default().with_modular_functions(["main"]);
        assert!(matches!(
            modular_main.validate(&cfg),
            Err(AnalysisError::ConflictingOptions(_))
        ));
    }

    #[test]
    fn test_modular_selection() {
        let config = AnalysisConfig::default().with_modular_auto();
        assert!(config.is_modular("helper"));
        assert!(!config.is_modular("main"));
    }
}
