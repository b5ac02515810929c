//! Values stored in memory cells.

use std::fmt;

use crate::array::ArrayValue;
use crate::domain::Lattice;
use crate::int::IntValue;
use crate::pointer::AddrSet;

/// Abstract value of one memory cell.
///
/// Kinds are closed: transfer functions match exhaustively, and joining values
/// of different kinds gives `Top`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bottom,
    Int(IntValue),
    Addr(AddrSet),
    Array(Box<ArrayValue>),
    Top,
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Int(IntValue::constant(value))
    }

    pub fn as_int(&self) -> IntValue {
        match self {
            Value::Int(v) => *v,
            Value::Bottom => IntValue::bottom(),
            Value::Addr(a) if a.is_bottom() => IntValue::bottom(),
            Value::Addr(AddrSet::Set(set)) if set.iter().all(|t| *t == crate::pointer::Target::Null) => {
                IntValue::constant(0)
            }
            _ => IntValue::top(),
        }
    }

    pub fn as_addr(&self) -> AddrSet {
        match self {
            Value::Addr(a) => a.clone(),
            Value::Bottom => AddrSet::bottom(),
            Value::Int(v) if v.is_bottom() => AddrSet::bottom(),
            Value::Int(v) if v.as_constant() == Some(0) => AddrSet::null(),
            _ => AddrSet::Top,
        }
    }

    /// Top value shaped like `self` (arrays keep their length).
    pub fn havoc(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(Box::new(a.havoc())),
            Value::Addr(_) => Value::Addr(AddrSet::Top),
            _ => Value::Top,
        }
    }
}

impl From<IntValue> for Value {
    fn from(v: IntValue) -> Self {
        Value::Int(v)
    }
}

impl From<AddrSet> for Value {
    fn from(a: AddrSet) -> Self {
        Value::Addr(a)
    }
}

impl Lattice for Value {
    fn bottom() -> Self {
        Value::Bottom
    }

    fn top() -> Self {
        Value::Top
    }

    fn is_bottom(&self) -> bool {
        match self {
            Value::Bottom => true,
            Value::Int(v) => v.is_bottom(),
            Value::Addr(a) => a.is_bottom(),
            Value::Array(a) => a.is_bottom(),
            Value::Top => false,
        }
    }

    fn is_top(&self) -> bool {
        match self {
            Value::Top => true,
            Value::Int(v) => v.is_top(),
            Value::Addr(a) => a.is_top(),
            Value::Array(a) => a.is_top(),
            Value::Bottom => false,
        }
    }

    fn le(&self, other: &Self) -> bool {
        if self.is_bottom() || matches!(other, Value::Top) {
            return true;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.le(b),
            (Value::Addr(a), Value::Addr(b)) => a.le(b),
            (Value::Array(a), Value::Array(b)) => a.le(b),
            (Value::Int(a), Value::Addr(b)) => a.as_constant() == Some(0) && b.may_be_null(),
            _ => false,
        }
    }

    fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.join(b)),
            (Value::Addr(a), Value::Addr(b)) => Value::Addr(a.join(b)),
            (Value::Array(a), Value::Array(b)) => Value::Array(Box::new(a.join(b))),
            // A literal 0 stored into a pointer is the null pointer.
            (Value::Int(i), Value::Addr(a)) | (Value::Addr(a), Value::Int(i)) if i.as_constant() == Some(0) => {
                Value::Addr(a.join(&AddrSet::null()))
            }
            _ => Value::Top,
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Value::Top, x) | (x, Value::Top) => x.clone(),
            (Value::Int(a), Value::Int(b)) => Value::Int(a.meet(b)),
            (Value::Addr(a), Value::Addr(b)) => Value::Addr(a.meet(b)),
            (Value::Array(a), Value::Array(b)) => Value::Array(Box::new(a.meet(b))),
            _ => Value::Bottom,
        }
    }

    fn widen(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.widen(b)),
            (Value::Array(a), Value::Array(b)) => Value::Array(Box::new(a.widen(b))),
            _ => self.join(other),
        }
    }

    fn narrow(&self, other: &Self) -> Self {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.narrow(b)),
            (Value::Array(a), Value::Array(b)) => Value::Array(Box::new(a.narrow(b))),
            (Value::Top, x) => x.clone(),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bottom => write!(f, "⊥"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Addr(a) => write!(f, "{}", a),
            Value::Array(a) => write!(f, "{}", a),
            Value::Top => write!(f, "⊤"),
        }
    }
}
