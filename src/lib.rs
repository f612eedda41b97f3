//! Portfolio Insights Assistant
//!
//! A conversational business-intelligence assistant for a real-estate
//! portfolio that:
//! - Tells small talk apart from business questions
//! - Routes business questions to sales data (SQL), property PDFs
//!   (vector search) or customer feedback (document store)
//! - Resolves property/agent mentions against the conversation so far
//! - Has the model phrase the final answer from the retrieved data
//!
//! TURN:
//! CLASSIFY → ROUTE → QUERY BACKEND → PHRASE ANSWER

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod documents;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod memory;
pub mod models;
pub mod sales;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AssistantError, Result};

// Re-export common types
pub use agent::Assistant;
pub use bootstrap::AssistantContext;
pub use config::AssistantConfig;
pub use models::*;
