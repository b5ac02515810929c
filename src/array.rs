//! Partitioned arrays.
//!
//! An array is either summarized by a single value, or split at the index of
//! the last constant-index write into three segments: indices below it, the
//! index itself, and indices above it. Writing at another constant index moves
//! the split point and folds the old middle into the side it now belongs to,
//! so consecutive initialization `a[0] = v; a[1] = v; ...` stays exact.

use std::fmt;

use crate::domain::Lattice;
use crate::interval::{Bound, Interval};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayValue {
    /// Declared length, if known
    pub len: Option<i64>,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    Whole(Value),
    Partitioned {
        at: i64,
        left: Value,
        mid: Value,
        right: Value,
    },
}

impl ArrayValue {
    pub fn new(len: Option<i64>, element: Value) -> Self {
        Self {
            len,
            layout: Layout::Whole(element),
        }
    }

    pub fn havoc(&self) -> Self {
        Self::new(self.len, Value::Top)
    }

    fn last_index(&self) -> Option<i64> {
        self.len.map(|l| l - 1)
    }

    /// Index range of the array (all non-negative indices if the length is unknown).
    fn domain(&self) -> Interval {
        match self.last_index() {
            Some(last) => Interval::range(0, last),
            None => Interval::at_least(0),
        }
    }

    /// Segments as (index range, value).
    fn segments(&self) -> Vec<(Interval, &Value)> {
        let domain = self.domain();
        match &self.layout {
            Layout::Whole(v) => vec![(domain, v)],
            Layout::Partitioned { at, left, mid, right } => vec![
                (domain.meet(&Interval::at_most(at - 1)), left),
                (domain.meet(&Interval::constant(*at)), mid),
                (domain.meet(&Interval::at_least(at + 1)), right),
            ],
        }
    }

    /// Value of the segment containing `index`.
    fn value_at(&self, index: i64) -> Value {
        match &self.layout {
            Layout::Whole(v) => v.clone(),
            Layout::Partitioned { at, left, mid, right } => {
                if index < *at {
                    left.clone()
                } else if index == *at {
                    mid.clone()
                } else {
                    right.clone()
                }
            }
        }
    }

    /// Join of the segments overlapping `index`.
    pub fn read(&self, index: &Interval) -> Value {
        let index = index.meet(&self.domain());
        self.segments()
            .into_iter()
            .filter(|(range, _)| !range.meet(&index).is_empty())
            .fold(Value::Bottom, |acc, (_, v)| acc.join(v))
    }

    /// Store `value` at `index`; constant indices repartition when enabled.
    pub fn write(&self, index: &Interval, value: Value, partitioning: bool) -> ArrayValue {
        let index = index.meet(&self.domain());
        if index.is_empty() {
            return self.clone();
        }
        match index.as_constant() {
            Some(k) if partitioning => self.write_at(k, value),
            Some(k) if self.len == Some(1) && k == 0 => ArrayValue::new(self.len, value),
            _ => self.write_weak(&index, value),
        }
    }

    fn write_at(&self, k: i64, value: Value) -> ArrayValue {
        let left_empty = k <= 0;
        let right_empty = self.last_index().map_or(false, |last| k >= last);
        let (left, right) = match &self.layout {
            Layout::Whole(w) => (w.clone(), w.clone()),
            Layout::Partitioned { at, left, mid, right } => {
                if k == *at {
                    (left.clone(), right.clone())
                } else if k > *at {
                    // (at, k) was part of the old right segment
                    let mut new_left = left.join(mid);
                    if k > at + 1 {
                        new_left = new_left.join(right);
                    }
                    (new_left, right.clone())
                } else {
                    let mut new_right = right.join(mid);
                    if k < at - 1 {
                        new_right = new_right.join(left);
                    }
                    (left.clone(), new_right)
                }
            }
        };
        ArrayValue {
            len: self.len,
            layout: Layout::Partitioned {
                at: k,
                left: if left_empty { Value::Bottom } else { left },
                mid: value,
                right: if right_empty { Value::Bottom } else { right },
            },
        }
    }

    fn write_weak(&self, index: &Interval, value: Value) -> ArrayValue {
        let layout = match &self.layout {
            Layout::Whole(w) => Layout::Whole(w.join(&value)),
            Layout::Partitioned { at, left, mid, right } => {
                let touches = |range: Interval| !range.meet(index).is_empty();
                let update = |v: &Value, range: Interval| if touches(range) { v.join(&value) } else { v.clone() };
                Layout::Partitioned {
                    at: *at,
                    left: update(left, Interval::at_most(at - 1)),
                    mid: update(mid, Interval::constant(*at)),
                    right: update(right, Interval::at_least(at + 1)),
                }
            }
        };
        ArrayValue { len: self.len, layout }
    }

    fn split_points(&self, other: &ArrayValue) -> Vec<i64> {
        let mut points = Vec::new();
        for layout in [&self.layout, &other.layout] {
            if let Layout::Partitioned { at, .. } = layout {
                points.push(*at);
            }
        }
        points.sort_unstable();
        points.dedup();
        points
    }

    /// One representative index per region of the common refinement of both layouts.
    fn regions(&self, other: &ArrayValue) -> Vec<i64> {
        let domain = self.domain();
        let points = self.split_points(other);
        let mut reps = Vec::new();
        let mut prev: Option<i64> = None;
        for p in &points {
            let below = match prev {
                Some(q) => Interval::range(q + 1, p - 1),
                None => Interval::at_most(p - 1),
            };
            reps.extend(representative(&below.meet(&domain)));
            reps.extend(representative(&Interval::constant(*p).meet(&domain)));
            prev = Some(*p);
        }
        let tail = match prev {
            Some(q) => Interval::at_least(q + 1),
            None => Interval::top(),
        };
        reps.extend(representative(&tail.meet(&domain)));
        reps
    }

    /// Combine two arrays segment-wise over a layout split at `at`.
    fn combine(&self, other: &ArrayValue, f: impl Fn(&Value, &Value) -> Value) -> ArrayValue {
        let len = match (self.len, other.len) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        };
        let layout = match self.split_points(other).first() {
            None => Layout::Whole(f(&self.value_at(0), &other.value_at(0))),
            Some(&at) => {
                let side = |a: &ArrayValue, range: Interval| a.read(&range);
                Layout::Partitioned {
                    at,
                    left: f(&side(self, Interval::at_most(at - 1)), &side(other, Interval::at_most(at - 1))),
                    mid: f(&self.value_at(at), &other.value_at(at)),
                    right: f(&side(self, Interval::at_least(at + 1)), &side(other, Interval::at_least(at + 1))),
                }
            }
        };
        ArrayValue { len, layout }
    }

    fn all_segments(&self, pred: impl Fn(&Value) -> bool) -> bool {
        self.segments()
            .into_iter()
            .filter(|(range, _)| !range.is_empty())
            .all(|(_, v)| pred(v))
    }
}

fn representative(range: &Interval) -> Option<i64> {
    if range.is_empty() {
        return None;
    }
    match (range.low, range.high) {
        (Bound::Finite(l), _) => Some(l),
        (_, Bound::Finite(h)) => Some(h),
        _ => Some(0),
    }
}

impl Lattice for ArrayValue {
    fn bottom() -> Self {
        ArrayValue::new(None, Value::Bottom)
    }

    fn top() -> Self {
        ArrayValue::new(None, Value::Top)
    }

    fn is_bottom(&self) -> bool {
        self.all_segments(|v| v.is_bottom())
    }

    fn is_top(&self) -> bool {
        self.all_segments(|v| v.is_top())
    }

    fn le(&self, other: &Self) -> bool {
        if other.len.is_some() && self.len != other.len && !self.is_bottom() {
            return false;
        }
        self.regions(other)
            .into_iter()
            .all(|i| self.value_at(i).le(&other.value_at(i)))
    }

    /// Joining layouts split at different points keeps the lower split point.
    fn join(&self, other: &Self) -> Self {
        self.combine(other, |a, b| a.join(b))
    }

    fn meet(&self, other: &Self) -> Self {
        let mut result = self.combine(other, |a, b| a.meet(b));
        result.len = self.len.or(other.len);
        result
    }

    /// A moving split point collapses the array to one summary value.
    fn widen(&self, other: &Self) -> Self {
        let same_split = match (&self.layout, &other.layout) {
            (Layout::Partitioned { at: a, .. }, Layout::Partitioned { at: b, .. }) => a == b,
            (Layout::Whole(_), Layout::Whole(_)) => true,
            _ => self.is_bottom(),
        };
        if same_split {
            self.combine(other, |a, b| a.widen(b))
        } else {
            let all = Interval::top();
            ArrayValue::new(self.len, self.read(&all).widen(&self.read(&all).join(&other.read(&all))))
        }
    }

    fn narrow(&self, other: &Self) -> Self {
        if self.split_points(other).len() > 1 {
            return self.clone();
        }
        self.combine(other, |a, b| a.narrow(b))
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layout {
            Layout::Whole(v) => write!(f, "[{}]", v),
            Layout::Partitioned { at, left, mid, right } => {
                write!(f, "[<{}: {} | {}: {} | >{}: {}]", at, left, at, mid, at, right)
            }
        }
    }
}
