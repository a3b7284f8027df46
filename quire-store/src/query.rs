//! Row filters and sort orders.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use crate::Row;

/// Conjunction of column equality tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column == value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((column.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Whether `row` passes every clause. Missing columns compare as null.
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

/// Sort order for `select`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Compare two rows on this column.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = compare_values(
            a.get(&self.column).unwrap_or(&Value::Null),
            b.get(&self.column).unwrap_or(&Value::Null),
        );
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Total order over JSON scalars: nulls first, then booleans, numbers,
/// strings. Strings that both parse as RFC 3339 timestamps compare as
/// instants, since serialized fractional seconds vary in width.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_matches_all_clauses() {
        let filter = Filter::new().eq("book_id", "b1").eq("order", 2);
        assert!(filter.matches(&row(json!({"book_id": "b1", "order": 2}))));
        assert!(!filter.matches(&row(json!({"book_id": "b1", "order": 3}))));
        assert!(!filter.matches(&row(json!({"order": 2}))));
        assert!(Filter::new().matches(&row(json!({}))));
    }

    #[test]
    fn test_numeric_order() {
        let by = OrderBy::asc("order");
        let a = row(json!({"order": 2}));
        let b = row(json!({"order": 10}));
        assert_eq!(by.compare(&a, &b), Ordering::Less);
        assert_eq!(OrderBy::desc("order").compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_timestamps_compare_as_instants() {
        let by = OrderBy::asc("created_at");
        let whole = row(json!({"created_at": "2024-05-01T10:00:00Z"}));
        let later = row(json!({"created_at": "2024-05-01T10:00:00.500Z"}));
        assert_eq!(by.compare(&whole, &later), Ordering::Less);
    }
}
