//! Final phrasing of answers by the model

use crate::llm::{self, ChatModel};
use crate::models::Row;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

/// Rows passed to the model for summarization
pub const MAX_SUMMARY_ROWS: usize = 10;
/// Columns kept per row, taken from the first row
pub const MAX_SUMMARY_COLUMNS: usize = 5;

pub const FRIENDLY_FALLBACK: &str = "Hello! I'm here to help you analyze your property portfolio, \
from sales performance to agent effectiveness and customer feedback. \
Let me know what you'd like to explore today.";

pub const NATURAL_ANSWER_FAILED: &str = "There was an error while generating the final answer.";

const FRIENDLY_PROMPT: &str = r#"You are a friendly and professional assistant that helps business owners manage and analyze the performance of their real estate portfolio.

The user said:
"{message}"

Respond in one of these ways:

1. For a greeting or small talk, acknowledge it politely and guide the user toward a property-related question, such as top-selling properties, feedback trends or agent performance.

2. If the user asks what data or capabilities you have, explain that you can access:
- Property sales data (CSV)
- Customer and agent feedback (JSON)
- Property descriptions and amenities (PDFs)

Mention that you can analyze best-selling properties, agent performance, feedback trends and overall business performance.

Keep the tone helpful, business-focused and brief."#;

const SUMMARY_PROMPT: &str = r#"You are a helpful assistant. Summarize the result below in a user-friendly format.

- The user is a business owner looking for insights into their real estate portfolio.
- The data describes properties that were sold.
- Do NOT say "assumed", "not available" or "not provided" when values such as prices, dates or city names are present.
- Use plain text, no italics.

Question:
{question}

Data:
{data}

Answer:"#;

#[instrument(name = "generate_friendly_reply", skip(model))]
pub async fn generate_friendly_reply(model: &dyn ChatModel, message: &str) -> String {
    let prompt = FRIENDLY_PROMPT.replace("{message}", message);
    match llm::ask(model, &prompt, 0.5).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Failed to generate friendly reply: {}", e);
            FRIENDLY_FALLBACK.to_string()
        }
    }
}

/// First [`MAX_SUMMARY_ROWS`] rows, each reduced to the first
/// [`MAX_SUMMARY_COLUMNS`] columns of the first row
pub fn truncate_rows(rows: &[Row]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let keep: Vec<&String> = first.keys().take(MAX_SUMMARY_COLUMNS).collect();

    rows.iter()
        .take(MAX_SUMMARY_ROWS)
        .map(|row| {
            keep.iter()
                .filter_map(|key| row.get(key.as_str()).map(|v| ((*key).clone(), v.clone())))
                .collect()
        })
        .collect()
}

#[instrument(name = "generate_natural_answer", skip(model, rows))]
pub async fn generate_natural_answer(model: &dyn ChatModel, question: &str, rows: &[Row]) -> String {
    info!("Generating human-readable answer from {} rows", rows.len());

    let truncated: Vec<Value> = truncate_rows(rows).into_iter().map(Value::Object).collect();
    let data = serde_json::to_string_pretty(&truncated).unwrap_or_else(|_| "[]".to_string());

    let prompt = SUMMARY_PROMPT
        .replace("{question}", question)
        .replace("{data}", &data);

    match llm::ask(model, &prompt, 0.3).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("Failed to generate answer: {}", e);
            NATURAL_ANSWER_FAILED.to_string()
        }
    }
}
