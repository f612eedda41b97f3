//! Core data models shared across the router and the backends

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One result row, column name → JSON value, in SELECT column order
pub type Row = serde_json::Map<String, serde_json::Value>;

//
// ================= Routing =================
//

/// Backend a business question is sent to
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Similarity search over property PDFs
    Documents,
    /// Generated SQL over the sales table
    Sales,
    /// Customer and agent feedback collection
    Feedback,
}

impl Destination {
    /// Accepts both the function-schema names and the descriptive names
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "faiss" | "documents" | "pdf" => Some(Destination::Documents),
            "sql" | "sales" | "csv" => Some(Destination::Sales),
            "firestore" | "feedback" | "json" => Some(Destination::Feedback),
            _ => None,
        }
    }

    pub fn schema_name(&self) -> &'static str {
        match self {
            Destination::Documents => "faiss",
            Destination::Sales => "sql",
            Destination::Feedback => "firestore",
        }
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Destination::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown destination: {}", raw)))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Destination::Documents => "documents",
            Destination::Sales => "sales",
            Destination::Feedback => "feedback",
        };
        write!(f, "{}", s)
    }
}

/// Arguments of the forced `route_query` function call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteDecision {
    pub destination: Destination,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub property_mention: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub agent_mention: Option<String>,
}

impl RouteDecision {
    /// Used whenever the routing call fails
    pub fn fallback() -> Self {
        Self {
            destination: Destination::Sales,
            property_mention: None,
            agent_mention: None,
        }
    }
}

fn non_empty_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

//
// ================= Backend results =================
//

/// What a backend produced for a question
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    /// Structured rows, still to be phrased by the model
    Rows(Vec<Row>),
    /// Final or diagnostic text, returned as-is
    Text(String),
    /// Nothing usable
    Empty,
}

impl BackendOutcome {
    pub fn is_empty(&self) -> bool {
        match self {
            BackendOutcome::Rows(rows) => rows.is_empty(),
            BackendOutcome::Text(text) => text.trim().is_empty(),
            BackendOutcome::Empty => true,
        }
    }
}
