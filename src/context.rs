//! Context policies: how a callee's analysis instance is chosen at a call.
//!
//! A [`Context`] pairs the executing thread with a policy-specific call
//! history. Every policy yields a finite set of contexts for any program,
//! including unbounded recursion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::types::{EdgeId, ThreadId};

/// Which call history distinguishes analysis instances of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextPolicy {
    /// One context per function (per thread).
    Insensitive,
    /// The last `n` call sites, oldest evicted first.
    CallString(usize),
    /// The last `n` call sites, consecutive recursive self-calls from the same site collapsed.
    CallSite(usize),
    /// Full chain of calls while gas remains; each re-entry of a function costs one unit.
    Gas(u32),
}

impl ContextPolicy {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        match self {
            ContextPolicy::CallString(0) | ContextPolicy::CallSite(0) => Err(AnalysisError::ConflictingOptions(
                format!("context policy `{}` needs a positive length", self),
            )),
            ContextPolicy::Gas(0) => Err(AnalysisError::ConflictingOptions(
                "gas policy needs a positive budget".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Context of a root (entry point or thread function).
    pub fn root(&self, thread: ThreadId, function: &str) -> Context {
        let history = match self {
            ContextPolicy::Insensitive => History::Insensitive,
            ContextPolicy::CallString(_) => History::CallString(Vec::new()),
            ContextPolicy::CallSite(_) => History::CallSite(Vec::new()),
            ContextPolicy::Gas(gas) => History::Gas {
                chain: vec![Frame::root(function)],
                gas: *gas,
            },
        };
        Context { thread, history }
    }

    /// Context for `callee` called from `caller_fn` in `caller` at `site`.
    pub fn callee(&self, caller: &Context, site: EdgeId, caller_fn: &str, callee: &str) -> Context {
        let history = match (self, &caller.history) {
            (ContextPolicy::CallString(n), History::CallString(sites)) => {
                let mut sites = sites.clone();
                sites.push(site);
                if sites.len() > *n {
                    sites.drain(..sites.len() - n);
                }
                History::CallString(sites)
            }
            (ContextPolicy::CallSite(n), History::CallSite(sites)) => {
                let mut sites = sites.clone();
                let recursive_repeat = caller_fn == callee && sites.last() == Some(&site);
                if !recursive_repeat {
                    sites.push(site);
                    if sites.len() > *n {
                        sites.drain(..sites.len() - n);
                    }
                }
                History::CallSite(sites)
            }
            (ContextPolicy::Gas(_), History::Gas { chain, gas }) => {
                let reentry = chain.iter().any(|f| f.function == callee);
                let gas = if reentry { gas - 1 } else { *gas };
                if gas == 0 {
                    History::Exhausted
                } else {
                    let mut chain = chain.clone();
                    chain.push(Frame {
                        site: Some(site),
                        function: callee.to_string(),
                    });
                    History::Gas { chain, gas }
                }
            }
            (ContextPolicy::Gas(_), History::Exhausted) => History::Exhausted,
            // Modular roots and mismatched histories fall back to the root context.
            _ => return self.root(caller.thread.clone(), callee),
        };
        Context {
            thread: caller.thread.clone(),
            history,
        }
    }
}

impl Default for ContextPolicy {
    fn default() -> Self {
        ContextPolicy::CallString(5)
    }
}

impl FromStr for ContextPolicy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AnalysisError::UnknownContextPolicy(s.to_string());
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };
        match (name, arg) {
            ("insensitive", None) => Ok(ContextPolicy::Insensitive),
            ("call-string", Some(n)) => n.parse().map(ContextPolicy::CallString).map_err(|_| err()),
            ("call-site", Some(n)) => n.parse().map(ContextPolicy::CallSite).map_err(|_| err()),
            ("gas", Some(n)) => n.parse().map(ContextPolicy::Gas).map_err(|_| err()),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for ContextPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPolicy::Insensitive => write!(f, "insensitive"),
            ContextPolicy::CallString(n) => write!(f, "call-string:{}", n),
            ContextPolicy::CallSite(n) => write!(f, "call-site:{}", n),
            ContextPolicy::Gas(n) => write!(f, "gas:{}", n),
        }
    }
}

/// Policy-specific part of a context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum History {
    Insensitive,
    CallString(Vec<EdgeId>),
    CallSite(Vec<EdgeId>),
    Gas { chain: Vec<Frame>, gas: u32 },
    /// All gas-exhausted contexts of a function merged into one.
    Exhausted,
    /// A function analysed in isolation.
    Modular,
}

/// One call on a gas chain: the call site (none for a root) and the function entered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub site: Option<EdgeId>,
    pub function: String,
}

impl Frame {
    fn root(function: &str) -> Self {
        Frame {
            site: None,
            function: function.to_string(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.site {
            Some(site) => write!(f, "{}@{}", self.function, site),
            None => write!(f, "{}", self.function),
        }
    }
}

/// Analysis instance of a function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Context {
    pub thread: ThreadId,
    pub history: History,
}

impl Context {
    pub fn modular() -> Self {
        Context {
            thread: ThreadId::Main,
            history: History::Modular,
        }
    }

    pub fn is_modular(&self) -> bool {
        self.history == History::Modular
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.thread)?;
        match &self.history {
            History::Insensitive => write!(f, "*"),
            History::CallString(sites) | History::CallSite(sites) => {
                let sites: Vec<String> = sites.iter().map(|s| s.to_string()).collect();
                write!(f, "<{}>", sites.join(","))
            }
            History::Gas { chain, gas } => {
                let chain: Vec<String> = chain.iter().map(|c| c.to_string()).collect();
                write!(f, "{} (gas {})", chain.join("→"), gas)
            }
            History::Exhausted => write!(f, "exhausted"),
            History::Modular => write!(f, "modular"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;

    /// Contexts reachable from `main` when `f` calls itself at `sites` forever.
    fn recursive_contexts(policy: ContextPolicy, sites: &[EdgeId], depth: usize) -> BTreeSet<Context> {
        let main = policy.root(ThreadId::Main, "main");
        let first = policy.callee(&main, EdgeId::new(100), "main", "f");
        let mut seen = BTreeSet::from([first.clone()]);
        let mut frontier = vec![first];
        for _ in 0..depth {
            let mut next = Vec::new();
            for ctx in &frontier {
                for site in sites {
                    let callee = policy.callee(ctx, *site, "f", "f");
                    if seen.insert(callee.clone()) {
                        next.push(callee);
                    }
                }
            }
            frontier = next;
        }
        seen
    }

    #[test]
    fn test_parse() {
        assert_eq!("call-string:10".parse::<ContextPolicy>().unwrap(), ContextPolicy::CallString(10));
        assert_eq!("call-site:2".parse::<ContextPolicy>().unwrap(), ContextPolicy::CallSite(2));
        assert_eq!("gas:15".parse::<ContextPolicy>().unwrap(), ContextPolicy::Gas(15));
        assert_eq!("insensitive".parse::<ContextPolicy>().unwrap(), ContextPolicy::Insensitive);
        assert!(matches!(
            "call-string".parse::<ContextPolicy>(),
            Err(AnalysisError::UnknownContextPolicy(_))
        ));
        assert_eq!(ContextPolicy::Gas(3).to_string(), "gas:3");
    }

    #[test]
    fn test_call_string_evicts_oldest() {
        let policy = ContextPolicy::CallString(2);
        let main = policy.root(ThreadId::Main, "main");
        let a = policy.callee(&main, EdgeId::new(1), "main", "f");
        let b = policy.callee(&a, EdgeId::new(2), "f", "g");
        let c = policy.callee(&b, EdgeId::new(3), "g", "h");
        assert_eq!(c.history, History::CallString(vec![EdgeId::new(2), EdgeId::new(3)]));
    }

    #[test]
    fn test_call_site_collapses_recursion() {
        let policy = ContextPolicy::CallSite(2);
        let main = policy.root(ThreadId::Main, "main");
        let first = policy.callee(&main, EdgeId::new(1), "main", "f");
        let rec = policy.callee(&first, EdgeId::new(7), "f", "f");
        let rec2 = policy.callee(&rec, EdgeId::new(7), "f", "f");
        assert_eq!(rec, rec2);
    }

    #[test]
    fn test_gas_exhausts() {
        let policy = ContextPolicy::Gas(2);
        let main = policy.root(ThreadId::Main, "main");
        let f1 = policy.callee(&main, EdgeId::new(1), "main", "f");
        let f2 = policy.callee(&f1, EdgeId::new(2), "f", "f");
        assert!(matches!(f2.history, History::Gas { gas: 1, .. }));
        let f3 = policy.callee(&f2, EdgeId::new(2), "f", "f");
        assert_eq!(f3.history, History::Exhausted);
        assert_eq!(policy.callee(&f3, EdgeId::new(2), "f", "f").history, History::Exhausted);
    }

    #[test]
    fn test_gas_separates_call_sites() {
        let policy = ContextPolicy::Gas(3);
        let main = policy.root(ThreadId::Main, "main");
        let first = policy.callee(&main, EdgeId::new(1), "main", "id");
        let second = policy.callee(&main, EdgeId::new(2), "main", "id");
        assert_ne!(first, second);
        // Neither call re-enters `id`, so no gas is spent.
        assert!(matches!(first.history, History::Gas { gas: 3, .. }));
        assert!(matches!(second.history, History::Gas { gas: 3, .. }));
    }

    #[test]
    fn test_finite_under_unbounded_recursion() {
        let sites = [EdgeId::new(1), EdgeId::new(2), EdgeId::new(3)];
        for (policy, bound) in [
            (ContextPolicy::Insensitive, 1),
            (ContextPolicy::CallString(3), 1 + 3 + 9 + 27),
            (ContextPolicy::CallSite(2), 1 + 3 + 9),
            (ContextPolicy::Gas(4), 1 + 3 + 9 + 27 + 1),
        ] {
            let shallow = recursive_contexts(policy, &sites, 10);
            let deep = recursive_contexts(policy, &sites, 40);
            assert_eq!(shallow, deep, "{} keeps growing", policy);
            assert!(deep.len() <= bound, "{}: {} contexts", policy, deep.len());
        }
    }
}
