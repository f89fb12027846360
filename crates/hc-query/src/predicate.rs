//! Query predicates over metadata attributes.

use std::cmp::Ordering;
use std::fmt;

use hc_types::{AttrValue, Attributes};
use serde::{Deserialize, Serialize};

use crate::error::QueryResult;
use crate::parser::Parser;

/// Comparison operator in a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Whether `ordering` (row value vs literal) satisfies this operator.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed where-clause.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: AttrValue,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parse a where-clause such as `owner = 'qa' AND size >= 1024`.
    pub fn parse(input: &str) -> QueryResult<Self> {
        Parser::new(input)?.parse()
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<AttrValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against one row's attributes.
    ///
    /// A comparison is false when the row lacks the field or the values are
    /// not comparable, whatever the operator.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Self::Compare { field, op, value } => attributes
                .get(field)
                .and_then(|actual| actual.compare(value))
                .map(|ordering| op.holds(ordering))
                .unwrap_or(false),
            Self::And(a, b) => a.matches(attributes) && b.matches(attributes),
            Self::Or(a, b) => a.matches(attributes) || b.matches(attributes),
            Self::Not(inner) => !inner.matches(attributes),
        }
    }

    /// Every `(field, literal)` comparison in the tree, left to right.
    pub fn comparisons(&self) -> Vec<(&str, &AttrValue)> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<(&'a str, &'a AttrValue)>) {
        match self {
            Self::Compare { field, value, .. } => out.push((field, value)),
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_comparisons(out);
                b.collect_comparisons(out);
            }
            Self::Not(inner) => inner.collect_comparisons(out),
        }
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, field: &str) -> fmt::Result {
    let bare = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !field.starts_with(|c: char| c.is_ascii_digit())
        && !["and", "or", "not"].contains(&field.to_ascii_lowercase().as_str());
    if bare {
        f.write_str(field)
    } else {
        write!(f, "\"{field}\"")
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { field, op, value } => {
                write_field(f, field)?;
                write!(f, " {op} {value}")
            }
            Self::And(a, b) => write!(f, "({a} AND {b})"),
            Self::Or(a, b) => write!(f, "({a} OR {b})"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn comparison_operators() {
        let attrs = row(&[("n", AttrValue::Long(5))]);
        assert!(Predicate::compare("n", CompareOp::Eq, 5i64).matches(&attrs));
        assert!(Predicate::compare("n", CompareOp::Ne, 4i64).matches(&attrs));
        assert!(Predicate::compare("n", CompareOp::Lt, 6i64).matches(&attrs));
        assert!(Predicate::compare("n", CompareOp::Le, 5i64).matches(&attrs));
        assert!(Predicate::compare("n", CompareOp::Gt, 4i64).matches(&attrs));
        assert!(Predicate::compare("n", CompareOp::Ge, 5i64).matches(&attrs));
        assert!(!Predicate::compare("n", CompareOp::Gt, 5i64).matches(&attrs));
    }

    #[test]
    fn missing_field_never_matches() {
        let attrs = row(&[("other", "x".into())]);
        assert!(!Predicate::compare("n", CompareOp::Eq, 1i64).matches(&attrs));
        assert!(!Predicate::compare("n", CompareOp::Ne, 1i64).matches(&attrs));
    }

    #[test]
    fn incomparable_types_never_match() {
        let attrs = row(&[("n", "five".into())]);
        assert!(!Predicate::compare("n", CompareOp::Ne, 5i64).matches(&attrs));
    }

    #[test]
    fn long_compares_with_double() {
        let attrs = row(&[("ratio", AttrValue::Double(2.5))]);
        assert!(Predicate::compare("ratio", CompareOp::Gt, 2i64).matches(&attrs));
    }

    #[test]
    fn boolean_combinators() {
        let attrs = row(&[("a", AttrValue::Long(1)), ("b", "x".into())]);
        let a = Predicate::compare("a", CompareOp::Eq, 1i64);
        let b = Predicate::compare("b", CompareOp::Eq, "y");
        assert!(!a.clone().and(b.clone()).matches(&attrs));
        assert!(a.clone().or(b.clone()).matches(&attrs));
        assert!(b.not().matches(&attrs));
    }

    #[test]
    fn display_reparses_to_same_tree() {
        let pred = Predicate::compare("owner", CompareOp::Eq, "o'brien")
            .and(Predicate::compare("size", CompareOp::Ge, 10i64).not())
            .or(Predicate::compare("weird field", CompareOp::Ne, vec![0xabu8]));
        let text = pred.to_string();
        assert_eq!(Predicate::parse(&text).unwrap(), pred);
    }

    #[test]
    fn comparisons_in_order() {
        let pred = Predicate::parse("a = 1 AND (b = 'x' OR NOT c < 2.5)").unwrap();
        let fields: Vec<&str> = pred.comparisons().into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
