//! Expressions, conditions, lvalues and structured statements.
//!
//! The engine consumes a [`Cfg`][crate::cfg::Cfg] whose edges carry these
//! expression trees. [`Stmt`] is the structured form accepted by
//! [`ProgramBuilder`][crate::lower::ProgramBuilder].

use std::fmt;

/// Integer expression (right-hand side of assignments).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Constant value
    Const(i64),
    /// Read of an lvalue
    Read(Box<LValue>),
    /// Address of an lvalue: `&lv`
    AddrOf(Box<LValue>),
    /// Null pointer
    Null,
    /// Non-deterministic value (e.g. `rand()` or an unmodelled input)
    Unknown,
    /// Construct the front end could not translate; evaluates to top
    Unsupported(String),
    /// Addition: e1 + e2
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction: e1 - e2
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication: e1 * e2
    Mul(Box<Expr>, Box<Expr>),
    /// Truncating division: e1 / e2
    Div(Box<Expr>, Box<Expr>),
    /// Remainder: e1 % e2 (sign of the dividend)
    Mod(Box<Expr>, Box<Expr>),
    /// Negation: -e
    Neg(Box<Expr>),
    /// Boolean condition used as an integer (0 or 1)
    Truth(Box<Cond>),
}

impl Expr {
    /// Read of a named variable.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Read(Box::new(LValue::Var(name.into())))
    }

    pub fn constant(value: i64) -> Self {
        Expr::Const(value)
    }

    pub fn read(lv: LValue) -> Self {
        Expr::Read(Box::new(lv))
    }

    pub fn addr_of(lv: LValue) -> Self {
        Expr::AddrOf(Box::new(lv))
    }

    pub fn add(self, other: Self) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Self) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Self) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn div(self, other: Self) -> Self {
        Expr::Div(Box::new(self), Box::new(other))
    }

    pub fn modulo(self, other: Self) -> Self {
        Expr::Mod(Box::new(self), Box::new(other))
    }

    pub fn neg(self) -> Self {
        Expr::Neg(Box::new(self))
    }

    pub fn truth(cond: Cond) -> Self {
        Expr::Truth(Box::new(cond))
    }

    pub fn eq(self, other: Self) -> Cond {
        Cond::Eq(self, other)
    }

    pub fn neq(self, other: Self) -> Cond {
        Cond::Neq(self, other)
    }

    pub fn lt(self, other: Self) -> Cond {
        Cond::Lt(self, other)
    }

    pub fn le(self, other: Self) -> Cond {
        Cond::Le(self, other)
    }

    pub fn gt(self, other: Self) -> Cond {
        Cond::Gt(self, other)
    }

    pub fn ge(self, other: Self) -> Cond {
        Cond::Ge(self, other)
    }

    /// C truthiness: `e != 0`.
    pub fn truthy(self) -> Cond {
        Cond::Neq(self, Expr::Const(0))
    }

    /// Lvalues read by this expression (not including address-taken ones).
    pub fn reads(&self) -> Vec<&LValue> {
        let mut out = Vec::new();
        self.collect_reads(&mut out);
        out
    }

    fn collect_reads<'a>(&'a self, out: &mut Vec<&'a LValue>) {
        match self {
            Expr::Const(_) | Expr::Null | Expr::Unknown | Expr::Unsupported(_) => {}
            Expr::Read(lv) => {
                out.push(lv);
                lv.collect_inner_reads(out);
            }
            Expr::AddrOf(lv) => lv.collect_inner_reads(out),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Mod(a, b) => {
                a.collect_reads(out);
                b.collect_reads(out);
            }
            Expr::Neg(e) => e.collect_reads(out),
            Expr::Truth(c) => c.collect_reads(out),
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Const(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Read(lv) => write!(f, "{}", lv),
            Expr::AddrOf(lv) => write!(f, "&{}", lv),
            Expr::Null => write!(f, "NULL"),
            Expr::Unknown => write!(f, "?"),
            Expr::Unsupported(what) => write!(f, "<{}>", what),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
            Expr::Div(a, b) => write!(f, "({} / {})", a, b),
            Expr::Mod(a, b) => write!(f, "({} % {})", a, b),
            Expr::Neg(e) => write!(f, "-{}", e),
            Expr::Truth(c) => write!(f, "({})", c),
        }
    }
}

/// Memory location designator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LValue {
    /// Local or global variable
    Var(String),
    /// Struct field: `lv.field`
    Field(Box<LValue>, String),
    /// Array element: `lv[index]`
    Index(Box<LValue>, Box<Expr>),
    /// Pointer dereference: `*e`
    Deref(Box<Expr>),
}

impl LValue {
    pub fn var(name: impl Into<String>) -> Self {
        LValue::Var(name.into())
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        LValue::Field(Box::new(self), name.into())
    }

    pub fn index(self, index: Expr) -> Self {
        LValue::Index(Box::new(self), Box::new(index))
    }

    pub fn deref(ptr: Expr) -> Self {
        LValue::Deref(Box::new(ptr))
    }

    /// `p->field`
    pub fn arrow(ptr: Expr, field: impl Into<String>) -> Self {
        LValue::deref(ptr).field(field)
    }

    /// Name of the root variable, if the lvalue does not go through a pointer.
    pub fn root_var(&self) -> Option<&str> {
        match self {
            LValue::Var(v) => Some(v),
            LValue::Field(base, _) | LValue::Index(base, _) => base.root_var(),
            LValue::Deref(_) => None,
        }
    }

    fn collect_inner_reads<'a>(&'a self, out: &mut Vec<&'a LValue>) {
        match self {
            LValue::Var(_) => {}
            LValue::Field(base, _) => base.collect_inner_reads(out),
            LValue::Index(base, idx) => {
                base.collect_inner_reads(out);
                idx.collect_reads(out);
            }
            LValue::Deref(e) => e.collect_reads(out),
        }
    }
}

impl fmt::Display for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LValue::Var(v) => write!(f, "{}", v),
            LValue::Field(base, field) => write!(f, "{}.{}", base, field),
            LValue::Index(base, idx) => write!(f, "{}[{}]", base, idx),
            LValue::Deref(e) => write!(f, "*{}", e),
        }
    }
}

/// Boolean condition (guards and assertions).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cond {
    True,
    False,
    Eq(Expr, Expr),
    Neq(Expr, Expr),
    Lt(Expr, Expr),
    Le(Expr, Expr),
    Gt(Expr, Expr),
    Ge(Expr, Expr),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    pub fn not(self) -> Self {
        Cond::Not(Box::new(self))
    }

    pub fn and(self, other: Self) -> Self {
        Cond::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Self) -> Self {
        Cond::Or(Box::new(self), Box::new(other))
    }

    /// Push negations down to the comparisons (De Morgan).
    pub fn negate(&self) -> Cond {
        match self {
            Cond::True => Cond::False,
            Cond::False => Cond::True,
            Cond::Eq(a, b) => Cond::Neq(a.clone(), b.clone()),
            Cond::Neq(a, b) => Cond::Eq(a.clone(), b.clone()),
            Cond::Lt(a, b) => Cond::Ge(a.clone(), b.clone()),
            Cond::Le(a, b) => Cond::Gt(a.clone(), b.clone()),
            Cond::Gt(a, b) => Cond::Le(a.clone(), b.clone()),
            Cond::Ge(a, b) => Cond::Lt(a.clone(), b.clone()),
            Cond::Not(inner) => (**inner).clone(),
            Cond::And(p, q) => Cond::Or(Box::new(p.negate()), Box::new(q.negate())),
            Cond::Or(p, q) => Cond::And(Box::new(p.negate()), Box::new(q.negate())),
        }
    }

    fn collect_reads<'a>(&'a self, out: &mut Vec<&'a LValue>) {
        match self {
            Cond::True | Cond::False => {}
            Cond::Eq(a, b) | Cond::Neq(a, b) | Cond::Lt(a, b) | Cond::Le(a, b) | Cond::Gt(a, b) | Cond::Ge(a, b) => {
                a.collect_reads(out);
                b.collect_reads(out);
            }
            Cond::Not(c) => c.collect_reads(out),
            Cond::And(p, q) | Cond::Or(p, q) => {
                p.collect_reads(out);
                q.collect_reads(out);
            }
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::True => write!(f, "1"),
            Cond::False => write!(f, "0"),
            Cond::Eq(a, b) => write!(f, "{} == {}", a, b),
            Cond::Neq(a, b) => write!(f, "{} != {}", a, b),
            Cond::Lt(a, b) => write!(f, "{} < {}", a, b),
            Cond::Le(a, b) => write!(f, "{} <= {}", a, b),
            Cond::Gt(a, b) => write!(f, "{} > {}", a, b),
            Cond::Ge(a, b) => write!(f, "{} >= {}", a, b),
            Cond::Not(c) => write!(f, "!({})", c),
            Cond::And(p, q) => write!(f, "({} && {})", p, q),
            Cond::Or(p, q) => write!(f, "({} || {})", p, q),
        }
    }
}

/// Structured program statements, lowered into CFG edges.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Skip (no-op)
    Skip,
    /// Assignment: lv := expr
    Assign(LValue, Expr),
    /// Sequence of statements
    Block(Vec<Stmt>),
    /// Conditional: if (cond) then s1 else s2
    If(Cond, Box<Stmt>, Box<Stmt>),
    /// While loop: while (cond) do s
    While(Cond, Box<Stmt>),
    /// Checked assertion, producing a verdict
    Check(Cond),
    /// Assumption: assume(cond)
    Assume(Cond),
    /// Havoc: lv := * (non-deterministic)
    Havoc(LValue),
    /// Heap allocation: lv := malloc(..)
    Alloc(LValue),
    /// Function call, optionally storing the result
    Call {
        ret: Option<LValue>,
        callee: String,
        args: Vec<Expr>,
    },
    /// Return from the current function
    Return(Option<Expr>),
    /// Mutex acquisition
    Lock(String),
    /// Mutex release
    Unlock(String),
    /// Thread creation running `function(arg)`
    Spawn { function: String, arg: Option<Expr> },
    /// Join of the thread(s) running `function`
    Join(String),
}

impl Stmt {
    pub fn assign(lv: LValue, expr: Expr) -> Self {
        Stmt::Assign(lv, expr)
    }

    /// `name := expr`
    pub fn set(name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        Stmt::Assign(LValue::Var(name.into()), expr.into())
    }

    pub fn if_then(cond: Cond, then: Vec<Stmt>) -> Self {
        Stmt::If(cond, Box::new(Stmt::Block(then)), Box::new(Stmt::Skip))
    }

    pub fn if_else(cond: Cond, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> Self {
        Stmt::If(cond, Box::new(Stmt::Block(then)), Box::new(Stmt::Block(otherwise)))
    }

    pub fn while_loop(cond: Cond, body: Vec<Stmt>) -> Self {
        Stmt::While(cond, Box::new(Stmt::Block(body)))
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Stmt::Call {
            ret: None,
            callee: callee.into(),
            args,
        }
    }

    pub fn call_into(ret: LValue, callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Stmt::Call {
            ret: Some(ret),
            callee: callee.into(),
            args,
        }
    }

    pub fn spawn(function: impl Into<String>) -> Self {
        Stmt::Spawn {
            function: function.into(),
            arg: None,
        }
    }

    pub fn lock(mutex: impl Into<String>) -> Self {
        Stmt::Lock(mutex.into())
    }

    pub fn unlock(mutex: impl Into<String>) -> Self {
        Stmt::Unlock(mutex.into())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_negate_de_morgan() {
        let c = Expr::var("x").lt(Expr::constant(3)).and(Expr::var("y").eq(Expr::constant(0)));
        let n = c.negate();
        assert_eq!(
            n,
            Cond::Or(
                Box::new(Expr::var("x").ge(Expr::constant(3))),
                Box::new(Expr::var("y").neq(Expr::constant(0)))
            )
        );
        assert_eq!(n.negate(), c);
    }

    #[test]
    fn test_reads() {
        // a[i] + *p
        let e = Expr::read(LValue::var("a").index(Expr::var("i"))).add(Expr::read(LValue::deref(Expr::var("p"))));
        let reads: Vec<String> = e.reads().iter().map(|lv| lv.to_string()).collect();
        assert_eq!(reads, vec!["a[i]", "i", "*p", "p"]);
    }

    #[test]
    fn test_display() {
        let lv = LValue::arrow(Expr::var("n"), "next");
        assert_eq!(lv.to_string(), "*n.next");
        assert_eq!(Expr::var("x").sub(Expr::constant(1)).to_string(), "(x - 1)");
    }
}
