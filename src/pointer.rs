//! Memory cells and points-to sets.
//!
//! A [`Cell`] is an abstract memory location: a variable, a heap allocation
//! site or an opaque object reachable from a modular function's parameter,
//! followed by a path of struct fields. An [`AddrSet`] is the may-point-to set
//! of a pointer value.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Lattice;
use crate::int::Truth;
use crate::types::EdgeId;

/// Root object of a memory cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Base {
    /// Local variable or parameter of a function
    Local { function: String, name: String },
    /// Global variable
    Global(String),
    /// Heap objects allocated at an edge (summarizes every object from that site)
    Heap(EdgeId),
    /// Unknown caller-owned object reached through a parameter of a modular function
    Opaque { function: String, param: String },
}

impl Base {
    /// Whether the base stands for exactly one concrete object.
    pub fn is_unique(&self) -> bool {
        matches!(self, Base::Local { .. } | Base::Global(_))
    }
}

/// Abstract memory location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub base: Base,
    pub path: Vec<String>,
}

impl Cell {
    pub fn local(function: &str, name: &str) -> Self {
        Cell {
            base: Base::Local {
                function: function.to_string(),
                name: name.to_string(),
            },
            path: Vec::new(),
        }
    }

    pub fn global(name: &str) -> Self {
        Cell {
            base: Base::Global(name.to_string()),
            path: Vec::new(),
        }
    }

    pub fn heap(site: EdgeId) -> Self {
        Cell {
            base: Base::Heap(site),
            path: Vec::new(),
        }
    }

    pub fn opaque(function: &str, param: &str) -> Self {
        Cell {
            base: Base::Opaque {
                function: function.to_string(),
                param: param.to_string(),
            },
            path: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Cell {
            base: self.base.clone(),
            path,
        }
    }

    /// Whether `self` is `other` or one of its fields.
    pub fn is_within(&self, other: &Cell) -> bool {
        self.base == other.base && self.path.starts_with(&other.path)
    }

    pub fn is_global(&self) -> bool {
        matches!(self.base, Base::Global(_))
    }

    pub fn is_heap(&self) -> bool {
        matches!(self.base, Base::Heap(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.base, Base::Opaque { .. })
    }

    pub fn is_local_of(&self, function: &str) -> bool {
        matches!(&self.base, Base::Local { function: f, .. } if f == function)
    }

    /// Whether the cell is a plain local scalar variable (no field path).
    pub fn local_var(&self) -> Option<(&str, &str)> {
        match &self.base {
            Base::Local { function, name } if self.path.is_empty() => Some((function, name)),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            Base::Local { name, .. } => write!(f, "{}", name)?,
            Base::Global(name) => write!(f, "{}", name)?,
            Base::Heap(site) => write!(f, "heap@{}", site)?,
            Base::Opaque { param, .. } => write!(f, "(*{})", param)?,
        }
        for field in &self.path {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

/// A possible pointer target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    Null,
    Cell(Cell),
}

/// May-point-to set. `Set(∅)` is bottom; `Top` may point anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddrSet {
    Top,
    Set(BTreeSet<Target>),
}

impl AddrSet {
    pub fn null() -> Self {
        AddrSet::Set(BTreeSet::from([Target::Null]))
    }

    pub fn cell(cell: Cell) -> Self {
        AddrSet::Set(BTreeSet::from([Target::Cell(cell)]))
    }

    /// Pointer parameter of a modular function: null or the opaque object.
    pub fn opaque(function: &str, param: &str) -> Self {
        AddrSet::Set(BTreeSet::from([Target::Null, Target::Cell(Cell::opaque(function, param))]))
    }

    pub fn targets(&self) -> Option<&BTreeSet<Target>> {
        match self {
            AddrSet::Top => None,
            AddrSet::Set(set) => Some(set),
        }
    }

    /// Cells the pointer may refer to (`None` when unknown).
    pub fn cells(&self) -> Option<Vec<&Cell>> {
        self.targets().map(|set| {
            set.iter()
                .filter_map(|t| match t {
                    Target::Cell(c) => Some(c),
                    Target::Null => None,
                })
                .collect()
        })
    }

    /// The only possible cell, if it denotes exactly one concrete object.
    pub fn must_cell(&self) -> Option<&Cell> {
        match self.targets() {
            Some(set) if set.len() == 1 => match set.iter().next() {
                Some(Target::Cell(c)) if c.base.is_unique() => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    /// Address of field `name` of every target.
    pub fn field(&self, name: &str) -> AddrSet {
        match self {
            AddrSet::Top => AddrSet::Top,
            AddrSet::Set(set) => AddrSet::Set(
                set.iter()
                    .filter_map(|t| match t {
                        Target::Cell(c) => Some(Target::Cell(c.field(name))),
                        Target::Null => None,
                    })
                    .collect(),
            ),
        }
    }

    pub fn may_be_null(&self) -> bool {
        match self {
            AddrSet::Top => true,
            AddrSet::Set(set) => set.contains(&Target::Null),
        }
    }

    /// Pointer equality.
    ///
    /// Definite only for unique objects: heap sites summarize many objects and
    /// opaque objects may alias anything the caller can reach.
    pub fn eq_truth(&self, other: &AddrSet) -> Truth {
        let (a, b) = match (self.targets(), other.targets()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Truth::Unknown,
        };
        if a.is_empty() || b.is_empty() {
            return Truth::Unknown;
        }
        if a.len() == 1 && a == b {
            return match a.iter().next() {
                Some(Target::Null) => Truth::True,
                Some(Target::Cell(c)) if c.base.is_unique() => Truth::True,
                _ => Truth::Unknown,
            };
        }
        let may_alias = a.iter().any(|x| b.iter().any(|y| may_alias(x, y)));
        if may_alias {
            Truth::Unknown
        } else {
            Truth::False
        }
    }
}

fn may_alias(a: &Target, b: &Target) -> bool {
    match (a, b) {
        (Target::Null, Target::Null) => true,
        (Target::Null, _) | (_, Target::Null) => false,
        (Target::Cell(x), Target::Cell(y)) => match (&x.base, &y.base) {
            // The caller's objects cannot be this function's fresh allocations.
            (Base::Opaque { .. }, Base::Heap(_)) | (Base::Heap(_), Base::Opaque { .. }) => false,
            (Base::Opaque { .. }, Base::Local { .. }) | (Base::Local { .. }, Base::Opaque { .. }) => false,
            (Base::Opaque { .. }, _) | (_, Base::Opaque { .. }) => true,
            _ => x == y,
        },
    }
}

impl Lattice for AddrSet {
    fn bottom() -> Self {
        AddrSet::Set(BTreeSet::new())
    }

    fn top() -> Self {
        AddrSet::Top
    }

    fn is_bottom(&self) -> bool {
        matches!(self, AddrSet::Set(s) if s.is_empty())
    }

    fn is_top(&self) -> bool {
        matches!(self, AddrSet::Top)
    }

    fn le(&self, other: &Self) -> bool {
        match (self, other) {
            (_, AddrSet::Top) => true,
            (AddrSet::Top, _) => false,
            (AddrSet::Set(a), AddrSet::Set(b)) => a.is_subset(b),
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (AddrSet::Set(a), AddrSet::Set(b)) => AddrSet::Set(a.union(b).cloned().collect()),
            _ => AddrSet::Top,
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (AddrSet::Top, x) | (x, AddrSet::Top) => x.clone(),
            (AddrSet::Set(a), AddrSet::Set(b)) => AddrSet::Set(a.intersection(b).cloned().collect()),
        }
    }

    /// Targets come from a finite set of program objects.
    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }
}

impl fmt::Display for AddrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrSet::Top => write!(f, "⊤"),
            AddrSet::Set(set) => {
                let items: Vec<String> = set
                    .iter()
                    .map(|t| match t {
                        Target::Null => "NULL".to_string(),
                        Target::Cell(c) => format!("&{}", c),
                    })
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::tests::test_lattice_axioms;

    #[test]
    fn test_pointer_equality() {
        let x = AddrSet::cell(Cell::local("main", "x"));
        let y = AddrSet::cell(Cell::local("main", "y"));
        assert_eq!(x.eq_truth(&x), Truth::True);
        assert_eq!(x.eq_truth(&y), Truth::False);
        assert_eq!(AddrSet::null().eq_truth(&x), Truth::False);

        // Distinct allocation sites never alias; one site may hold many objects.
        let h1 = AddrSet::cell(Cell::heap(EdgeId::new(1)));
        let h2 = AddrSet::cell(Cell::heap(EdgeId::new(2)));
        assert_eq!(h1.eq_truth(&h2), Truth::False);
        assert_eq!(h1.eq_truth(&h1), Truth::Unknown);

        // Two opaque objects of the same type may or may not be the same.
        let p = AddrSet::opaque("f", "p");
        let q = AddrSet::opaque("f", "q");
        assert_eq!(p.eq_truth(&q), Truth::Unknown);
        assert_eq!(p.eq_truth(&h1), Truth::False);
    }

    #[test]
    fn test_fields() {
        let s = AddrSet::cell(Cell::global("s"));
        let f = s.field("next");
        assert_eq!(f.must_cell(), Some(&Cell::global("s").field("next")));
        assert!(Cell::global("s").field("next").is_within(&Cell::global("s")));
        assert_eq!(Cell::local("main", "a").field("b").to_string(), "a.b");
    }

    #[test]
    fn test_addr_lattice_axioms() {
        let samples = vec![
            AddrSet::bottom(),
            AddrSet::top(),
            AddrSet::null(),
            AddrSet::cell(Cell::global("g")),
            AddrSet::cell(Cell::heap(EdgeId::new(3))),
            AddrSet::opaque("f", "p"),
        ];
        test_lattice_axioms(&samples);
    }
}
