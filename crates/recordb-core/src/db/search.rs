//! Search conditions over stored columns.

use crate::value::{RecordId, Value};
use derive_more::Display;
use std::cmp::Ordering;

///
/// Operator
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Operator {
    #[display("=")]
    Equals,
    #[display("!=")]
    NotEquals,
    #[display(">")]
    Greater,
    #[display(">=")]
    GreaterOrEqual,
    #[display("<")]
    Lower,
    #[display("<=")]
    LowerOrEqual,
    #[display("like")]
    Like,
    #[display("ilike")]
    ILike,
    #[display("in")]
    In,
    #[display("is null")]
    IsNull,
}

///
/// Clause
///

#[derive(Clone, Debug, PartialEq)]
pub struct Clause {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Clause {
    /// Evaluate against a stored value; `ID` clauses receive the identifier
    /// as an integer.
    #[must_use]
    pub fn matches(&self, stored: &Value) -> bool {
        let expected = normalize(stored, &self.value);

        match self.operator {
            Operator::Equals => values_equal(stored, &expected),
            Operator::NotEquals => !values_equal(stored, &expected),
            Operator::Greater => stored.compare(&expected) == Some(Ordering::Greater),
            Operator::GreaterOrEqual => matches!(
                stored.compare(&expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lower => stored.compare(&expected) == Some(Ordering::Less),
            Operator::LowerOrEqual => matches!(
                stored.compare(&expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Like => like(stored, &expected, false),
            Operator::ILike => like(stored, &expected, true),
            Operator::In => match &expected {
                Value::List(items) => items
                    .iter()
                    .any(|item| values_equal(stored, &normalize(stored, item))),
                Value::Ids(ids) => stored.first_id().is_some_and(|id| ids.contains(&id)),
                _ => false,
            },
            Operator::IsNull => stored.is_null() == expected.as_bool().unwrap_or(true),
        }
    }
}

///
/// Condition
///
/// Conjunction of clauses. The empty condition matches every record.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Start a condition on `field`.
    #[must_use]
    pub fn field(field: &str) -> ConditionField {
        Self::default().and_field(field)
    }

    /// Continue the conjunction with a clause on `field`.
    #[must_use]
    pub fn and_field(self, field: &str) -> ConditionField {
        ConditionField {
            condition: self,
            field: field.to_string(),
        }
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Field names referenced by the condition.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.field.as_str())
    }
}

///
/// ConditionField
///
/// A condition awaiting the operator for its last clause.
///

#[derive(Debug)]
#[must_use]
pub struct ConditionField {
    condition: Condition,
    field: String,
}

impl ConditionField {
    fn push(mut self, operator: Operator, value: Value) -> Condition {
        self.condition.clauses.push(Clause {
            field: self.field,
            operator,
            value,
        });
        self.condition
    }

    pub fn equals(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Equals, value.into())
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::NotEquals, value.into())
    }

    pub fn greater(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Greater, value.into())
    }

    pub fn greater_or_equal(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::GreaterOrEqual, value.into())
    }

    pub fn lower(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::Lower, value.into())
    }

    pub fn lower_or_equal(self, value: impl Into<Value>) -> Condition {
        self.push(Operator::LowerOrEqual, value.into())
    }

    /// SQL-style pattern: `%` matches any run, `_` any single character.
    pub fn like(self, pattern: &str) -> Condition {
        self.push(Operator::Like, Value::from(pattern))
    }

    pub fn ilike(self, pattern: &str) -> Condition {
        self.push(Operator::ILike, Value::from(pattern))
    }

    pub fn is_in(self, values: Vec<Value>) -> Condition {
        self.push(Operator::In, Value::List(values))
    }

    pub fn is_null(self) -> Condition {
        self.push(Operator::IsNull, Value::Bool(true))
    }

    pub fn is_not_null(self) -> Condition {
        self.push(Operator::IsNull, Value::Bool(false))
    }
}

/// Search limit from a loosely-typed argument.
///
/// `Int(n)` limits to `n` (negatives read as zero); `Bool(false)` means no
/// limit; `Null` and anything else fall back to `default`.
#[must_use]
pub fn convert_limit(value: &Value, default: usize) -> Option<usize> {
    match value {
        Value::Int(n) => Some(usize::try_from(*n).unwrap_or(0)),
        Value::Bool(false) => None,
        _ => Some(default),
    }
}

// A to-one column stores `Ids`; let callers compare it with a bare integer id.
fn normalize(stored: &Value, expected: &Value) -> Value {
    if let (Value::Ids(_), Value::Int(n)) = (stored, expected)
        && let Ok(id) = u64::try_from(*n)
    {
        return Value::Ids(vec![RecordId(id)]);
    }

    expected.clone()
}

fn values_equal(stored: &Value, expected: &Value) -> bool {
    match (stored, expected) {
        (Value::Ids(a), Value::Ids(b)) => a == b,
        (Value::Null, Value::Ids(b)) | (Value::Ids(b), Value::Null) => b.is_empty(),
        _ => stored.compare(expected) == Some(Ordering::Equal) || stored == expected,
    }
}

fn like(stored: &Value, pattern: &Value, fold_case: bool) -> bool {
    let (Some(text), Some(pattern)) = (stored.as_text(), pattern.as_text()) else {
        return false;
    };
    if fold_case {
        let text: Vec<char> = text.to_lowercase().chars().collect();
        let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
        wildcard_match(&text, &pattern)
    } else {
        let text: Vec<char> = text.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        wildcard_match(&text, &pattern)
    }
}

// Iterative matcher with single-star backtracking.
fn wildcard_match(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }

    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(condition: &Condition) -> &Clause {
        &condition.clauses()[0]
    }

    #[test]
    fn convert_limit_follows_argument_kind() {
        assert_eq!(convert_limit(&Value::Int(12), 80), Some(12));
        assert_eq!(convert_limit(&Value::Bool(false), 80), None);
        assert_eq!(convert_limit(&Value::Int(0), 80), Some(0));
        assert_eq!(convert_limit(&Value::Null, 80), Some(80));
    }

    #[test]
    fn like_supports_percent_and_underscore() {
        let c = Condition::field("Name").like("J_hn%");

        assert!(clause(&c).matches(&Value::from("John Smith")));
        assert!(clause(&c).matches(&Value::from("Jahn")));
        assert!(!clause(&c).matches(&Value::from("john")));
        assert!(!clause(&c).matches(&Value::from("Jon")));
    }

    #[test]
    fn ilike_ignores_case() {
        let c = Condition::field("Email").ilike("%@EXAMPLE.com");

        assert!(clause(&c).matches(&Value::from("jsmith@example.com")));
    }

    #[test]
    fn many2one_compares_with_bare_id() {
        let c = Condition::field("Profile").equals(3);

        assert!(clause(&c).matches(&Value::Ids(vec![RecordId(3)])));
        assert!(!clause(&c).matches(&Value::Ids(vec![RecordId(4)])));
        assert!(!clause(&c).matches(&Value::Null));
    }

    #[test]
    fn ordering_operators_compare_numbers() {
        let c = Condition::field("Age").greater_or_equal(24);

        assert!(clause(&c).matches(&Value::Int(24)));
        assert!(clause(&c).matches(&Value::Float(30.5)));
        assert!(!clause(&c).matches(&Value::Int(23)));
        assert!(!clause(&c).matches(&Value::Null));
    }

    #[test]
    fn is_null_and_in() {
        assert!(clause(&Condition::field("Nums").is_null()).matches(&Value::Null));
        assert!(clause(&Condition::field("Nums").is_not_null()).matches(&Value::Int(1)));

        let c = Condition::field("Name").is_in(vec![Value::from("Jane"), Value::from("Will")]);
        assert!(clause(&c).matches(&Value::from("Will")));
        assert!(!clause(&c).matches(&Value::from("John")));
    }

    #[test]
    fn conditions_chain_as_conjunction() {
        let c = Condition::field("Name")
            .equals("John")
            .and_field("Age")
            .lower(30);

        assert_eq!(c.fields().collect::<Vec<_>>(), vec!["Name", "Age"]);
    }
}
