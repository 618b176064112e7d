//! Scan predicates
//!
//! Predicates arrive already translated from the host query; the table only
//! evaluates them and picks the cheapest access path:
//!
//! - equality on every key property: point lookup
//! - bounds (or equality) on the leading key property: ordered range over
//!   the key index
//! - anything else: full scan
//!
//! The full predicate is evaluated on every candidate row regardless of the
//! access path, so a plan only has to produce a superset.

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use crate::model::{EntityTypeDescriptor, Key, Row, Value};

/// Filter over the rows of one table. Indices are property positions.
#[derive(Clone)]
pub enum Predicate {
    Eq(usize, Value),
    Range {
        index: usize,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    In(usize, Vec<Value>),
    IsNull(usize),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Custom(Arc<dyn Fn(&Row) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn eq(index: usize, value: impl Into<Value>) -> Self {
        Predicate::Eq(index, value.into())
    }

    /// Inclusive range `[lower, upper]`
    pub fn between(index: usize, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Predicate::Range {
            index,
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    pub fn greater_than(index: usize, value: impl Into<Value>) -> Self {
        Predicate::Range {
            index,
            lower: Bound::Excluded(value.into()),
            upper: Bound::Unbounded,
        }
    }

    pub fn less_than(index: usize, value: impl Into<Value>) -> Self {
        Predicate::Range {
            index,
            lower: Bound::Unbounded,
            upper: Bound::Excluded(value.into()),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut terms) => {
                terms.push(other);
                Predicate::And(terms)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut terms) => {
                terms.push(other);
                Predicate::Or(terms)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against a row. NULL only matches `IsNull`.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq(index, value) => non_null(row, *index).is_some_and(|v| v == value),
            Predicate::Range { index, lower, upper } => {
                non_null(row, *index).is_some_and(|v| within(v, lower, upper))
            }
            Predicate::In(index, values) => {
                non_null(row, *index).is_some_and(|v| values.contains(v))
            }
            Predicate::IsNull(index) => row.get(*index).map_or(true, Value::is_null),
            Predicate::And(terms) => terms.iter().all(|p| p.matches(row)),
            Predicate::Or(terms) => terms.iter().any(|p| p.matches(row)),
            Predicate::Not(inner) => !inner.matches(row),
            Predicate::Custom(f) => f(row),
        }
    }

    /// Convert constants to the declared property types so they compare
    /// equal to stored values (`Int(5)` vs a `UInt32` column, say).
    /// Constants that do not convert are kept and simply never match.
    pub(crate) fn bind(&self, descriptor: &EntityTypeDescriptor) -> Predicate {
        let coerce = |index: usize, value: &Value| -> Value {
            descriptor
                .property(index)
                .and_then(|p| p.property_type.coerce(value.clone()).ok())
                .unwrap_or_else(|| value.clone())
        };
        let coerce_bound = |index: usize, bound: &Bound<Value>| -> Bound<Value> {
            match bound {
                Bound::Included(v) => Bound::Included(coerce(index, v)),
                Bound::Excluded(v) => Bound::Excluded(coerce(index, v)),
                Bound::Unbounded => Bound::Unbounded,
            }
        };

        match self {
            Predicate::Eq(index, value) => Predicate::Eq(*index, coerce(*index, value)),
            Predicate::Range { index, lower, upper } => Predicate::Range {
                index: *index,
                lower: coerce_bound(*index, lower),
                upper: coerce_bound(*index, upper),
            },
            Predicate::In(index, values) => {
                Predicate::In(*index, values.iter().map(|v| coerce(*index, v)).collect())
            }
            Predicate::IsNull(index) => Predicate::IsNull(*index),
            Predicate::And(terms) => Predicate::And(terms.iter().map(|p| p.bind(descriptor)).collect()),
            Predicate::Or(terms) => Predicate::Or(terms.iter().map(|p| p.bind(descriptor)).collect()),
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.bind(descriptor))),
            Predicate::Custom(f) => Predicate::Custom(Arc::clone(f)),
        }
    }

    /// Choose an access path for a bound predicate
    pub(crate) fn plan(&self, descriptor: &EntityTypeDescriptor) -> ScanPlan {
        let conjuncts = self.conjuncts();
        let key_indices = descriptor.key_indices();

        let equal_to = |index: usize| {
            conjuncts.iter().find_map(|p| match p {
                Predicate::Eq(i, value) if *i == index && !value.is_null() => Some(value.clone()),
                _ => None,
            })
        };

        let point: Option<Vec<Value>> = key_indices.iter().map(|&i| equal_to(i)).collect();
        if let Some(values) = point {
            return ScanPlan::Point(Key::new(values));
        }

        let Some(&leading) = key_indices.first() else {
            return ScanPlan::Full;
        };
        if let Some(value) = equal_to(leading) {
            return ScanPlan::Range {
                lower: Bound::Included(value.clone()),
                upper: Bound::Included(value),
            };
        }
        for p in conjuncts {
            if let Predicate::Range { index, lower, upper } = p {
                if *index == leading {
                    return ScanPlan::Range {
                        lower: lower.clone(),
                        upper: upper.clone(),
                    };
                }
            }
        }

        ScanPlan::Full
    }

    /// Top-level AND terms (flattened)
    fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(terms) => terms.iter().flat_map(|p| p.conjuncts()).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(index, value) => write!(f, "${} = {}", index, value),
            Predicate::Range { index, lower, upper } => {
                write!(f, "${} in {:?}..{:?}", index, lower, upper)
            }
            Predicate::In(index, values) => write!(f, "${} in {:?}", index, values),
            Predicate::IsNull(index) => write!(f, "${} is null", index),
            Predicate::And(terms) => f.debug_tuple("And").field(terms).finish(),
            Predicate::Or(terms) => f.debug_tuple("Or").field(terms).finish(),
            Predicate::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Predicate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Access path chosen for a scan
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScanPlan {
    Point(Key),

    /// Bounds on the leading key component
    Range {
        lower: Bound<Value>,
        upper: Bound<Value>,
    },

    Full,
}

fn non_null(row: &Row, index: usize) -> Option<&Value> {
    row.get(index).filter(|v| !v.is_null())
}

pub(crate) fn within(value: &Value, lower: &Bound<Value>, upper: &Bound<Value>) -> bool {
    let above = match lower {
        Bound::Included(l) => value >= l,
        Bound::Excluded(l) => value > l,
        Bound::Unbounded => true,
    };
    above && below(value, upper)
}

pub(crate) fn below(value: &Value, upper: &Bound<Value>) -> bool {
    match upper {
        Bound::Included(u) => value <= u,
        Bound::Excluded(u) => value < u,
        Bound::Unbounded => true,
    }
}
