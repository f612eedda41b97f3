//! Filter expressions over feedback entries
//!
//! The model describes a selection as a small JSON expression which is
//! parsed and evaluated here:
//!
//! ```json
//! {"all": [
//!     {"field": "property_id", "op": "in", "value": [1, 2]},
//!     {"not": {"field": "agent_feedback", "op": "contains", "value": "slow"}}
//! ]}
//! ```

use crate::error::AssistantError;
use crate::feedback::FeedbackEntry;
use crate::llm;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    All { all: Vec<FilterExpr> },
    Any { any: Vec<FilterExpr> },
    Not { not: Box<FilterExpr> },
    Condition { field: String, op: FilterOp, value: Value },
}

impl FilterExpr {
    /// Parse model output, tolerating a surrounding code fence
    pub fn parse(raw: &str) -> Result<Self> {
        let body = llm::strip_code_fence(raw);
        serde_json::from_str(body)
            .map_err(|e| AssistantError::InvalidQuery(format!("not a valid filter expression: {}", e)))
    }

    pub fn matches(&self, entry: &Value) -> bool {
        match self {
            FilterExpr::All { all } => all.iter().all(|e| e.matches(entry)),
            FilterExpr::Any { any } => any.iter().any(|e| e.matches(entry)),
            FilterExpr::Not { not } => !not.matches(entry),
            FilterExpr::Condition { field, op, value } => match entry.get(field) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
        }
    }

    pub fn apply(&self, entries: &[FeedbackEntry]) -> Vec<FeedbackEntry> {
        entries
            .iter()
            .filter(|entry| self.matches(&entry.to_value()))
            .cloned()
            .collect()
    }
}

fn compare(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    match op {
        FilterOp::Eq => loosely_equal(actual, expected),
        FilterOp::Ne => !loosely_equal(actual, expected),
        FilterOp::In => match expected {
            Value::Array(options) => options.iter().any(|o| loosely_equal(actual, o)),
            single => loosely_equal(actual, single),
        },
        FilterOp::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
            _ => false,
        },
        FilterOp::Gt => order(actual, expected) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(order(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => order(actual, expected) == Some(Ordering::Less),
        FilterOp::Lte => matches!(order(actual, expected), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers and numeric strings compare by value
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::tests::sample_entries;
    use serde_json::json;

    fn property_ids(entries: &[FeedbackEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.property_id).collect()
    }

    #[test]
    fn test_condition_ops() {
        let entries = sample_entries();

        let eq = FilterExpr::parse(r#"{"field": "agent_id", "op": "eq", "value": 3}"#).unwrap();
        assert_eq!(property_ids(&eq.apply(&entries)), vec![1, 2]);

        let gte = FilterExpr::parse(r#"{"field": "property_id", "op": "gte", "value": 2}"#).unwrap();
        assert_eq!(property_ids(&gte.apply(&entries)), vec![2, 2, 4]);

        let within = FilterExpr::parse(r#"{"field": "property_id", "op": "in", "value": ["4", 1]}"#).unwrap();
        assert_eq!(property_ids(&within.apply(&entries)), vec![1, 4]);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let expr = FilterExpr::parse(
            r#"```json
            {"field": "agent_feedback", "op": "contains", "value": "RESPONSIVE"}
            ```"#,
        )
        .unwrap();
        assert_eq!(property_ids(&expr.apply(&sample_entries())), vec![1]);
    }

    #[test]
    fn test_nested_expression() {
        let expr: FilterExpr = serde_json::from_value(json!({
            "all": [
                {"field": "property_id", "op": "eq", "value": 2},
                {"not": {"field": "agent_feedback", "op": "contains", "value": "slow"}}
            ]
        }))
        .unwrap();
        let selected = expr.apply(&sample_entries());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].agent_id, 5);

        let either: FilterExpr = serde_json::from_value(json!({
            "any": [
                {"field": "agent_id", "op": "eq", "value": 1},
                {"field": "agent_id", "op": "eq", "value": 5}
            ]
        }))
        .unwrap();
        assert_eq!(property_ids(&either.apply(&sample_entries())), vec![2, 4]);
    }

    #[test]
    fn test_unknown_field_never_matches() {
        let expr = FilterExpr::parse(r#"{"field": "rating", "op": "ne", "value": 5}"#).unwrap();
        assert!(expr.apply(&sample_entries()).is_empty());
    }

    #[test]
    fn test_invalid_expression() {
        assert!(FilterExpr::parse("[entry for entry in data]").is_err());
        assert!(FilterExpr::parse(r#"{"field": "agent_id", "op": "like", "value": 1}"#).is_err());
    }
}
