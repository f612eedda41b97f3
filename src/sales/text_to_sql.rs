//! Natural language → SQL with bounded regeneration
//!
//! The model writes a SQLite query against the sales table. When execution
//! fails, the failing query and its error are sent back for a corrected
//! version, up to `max_retries` attempts.

use crate::classifier::needs_chat_context;
use crate::llm::{self, ChatModel};
use crate::memory::Transcript;
use crate::models::BackendOutcome;
use crate::sales::SalesStore;
use tracing::{error, info, instrument, warn};

pub const CAPABILITIES_MESSAGE: &str = "I can help you analyze your property data. \
I have access to sales data (CSV), customer and agent feedback (JSON), and property descriptions (PDFs). \
Let me know what insights you're looking for.";

pub const SQL_GENERATION_FAILED: &str = "Failed to generate SQL.";

const SQL_SYSTEM_PROMPT: &str = r#"You convert natural language questions into valid SQLite queries.

The database has one table, `real_estate`, with these columns:
- purchase_id (INTEGER): unique identifier of a purchase transaction.
- property_id (INTEGER): identifier of an apartment complex or property.
- house_id (INTEGER): identifier of a house or unit within a property. House ids repeat across properties; a house is identified by property_id together with house_id.
- date (TEXT): purchase date, formatted YYYY-MM-DD.
- city (TEXT): Connecticut city where the house is located.
- agent_id (INTEGER): identifier of the selling agent (not sequential).
- expected_sale_price (REAL): expected price, typically between 300,000 and 1,000,000.
- actual_sale_price (REAL): price the house actually sold for, similar range.
- number_of_days_on_listing (INTEGER): days listed before the sale.
- number_of_beds (INTEGER): bedrooms (2, 3 or 4).
- number_of_baths (INTEGER): bathrooms (2, 3 or 4).

Rules:
- Return one valid SQLite query over this schema.
- For "top N", "most", "least", "frequent" or "popular" questions, aggregate (e.g. COUNT) and sort (e.g. ORDER BY COUNT(*) DESC).
- For metrics such as profit or price across several houses, aggregate with AVG() or SUM().
- Always alias aggregated columns (e.g. AS house_count, AS most_common_city).
- Return only the SQL. No explanations, markdown or comments."#;

/// Ask the model for SQL. With a previous query and its error, the request
/// becomes a repair request. Returns an empty string on failure.
#[instrument(name = "generate_sql_query", skip(model))]
pub async fn generate_sql_query(
    model: &dyn ChatModel,
    question: &str,
    previous_query: Option<&str>,
    error_message: Option<&str>,
) -> String {
    let request = match (previous_query, error_message) {
        (Some(query), Some(error_message)) => {
            warn!("[SQL] Previous query failed. Regenerating with error context.");
            format!(
                "The following SQL query gave an error:\n\n{}\n\nThe error was:\n{}\n\n\
                 Please fix it and return a valid query using proper column aliases.",
                query, error_message
            )
        }
        _ => question.to_string(),
    };

    info!("[SQL] Generating SQL for: {}", request);
    match llm::ask_with_system(model, SQL_SYSTEM_PROMPT, &request, 0.0).await {
        Ok(reply) => llm::strip_code_fence(&reply).to_string(),
        Err(e) => {
            error!("[SQL] Failed to generate SQL: {}", e);
            String::new()
        }
    }
}

fn looks_like_sql(reply: &str) -> bool {
    let lowered = reply.trim_start().to_lowercase();
    lowered.starts_with("select") || lowered.starts_with("with")
}

/// Resolve context and mentions into the question, then generate and run
/// SQL with bounded regeneration.
#[instrument(name = "handle_user_question", skip(model, store, transcript))]
pub async fn handle_sales_question(
    model: &dyn ChatModel,
    store: &SalesStore,
    question: &str,
    property_mention: Option<&str>,
    agent_mention: Option<&str>,
    transcript: &Transcript,
    max_retries: u32,
) -> BackendOutcome {
    info!("[SQL] Handling user question: {}", question);

    let mut question = question.to_string();

    if needs_chat_context(model, &question, transcript).await {
        info!("[SQL] Injecting chat memory into question...");
        question = format!(
            "Conversation so far:\n{}\n\nNow answer this: {}",
            transcript.format_pairs(),
            question
        );
    }

    if let Some(property) = property_mention {
        question = format!("The user is referring to {}. {}", property, question);
    }
    if let Some(agent) = agent_mention {
        question = format!("The user is referring to {}. {}", agent, question);
    }

    let mut sql_query: Option<String> = None;
    let mut error_message: Option<String> = None;

    for attempt in 1..=max_retries {
        let generated = generate_sql_query(
            model,
            &question,
            sql_query.as_deref(),
            error_message.as_deref(),
        )
        .await;

        if generated.is_empty() {
            error!("[SQL] No SQL query was generated.");
            return BackendOutcome::Text(SQL_GENERATION_FAILED.to_string());
        }

        info!("[SQL] Attempt {}: Generated query:\n{}", attempt, generated);

        if !looks_like_sql(&generated) {
            warn!("[SQL] Detected non-SQL response from the model.");
            return BackendOutcome::Text(CAPABILITIES_MESSAGE.to_string());
        }

        match store.fetch_rows(&generated).await {
            Ok(rows) if !rows.is_empty() => {
                info!("[SQL] Query successful. Rows returned: {}", rows.len());
                return BackendOutcome::Rows(rows);
            }
            Ok(_) => {
                warn!("[SQL] Query executed but returned no rows.");
                return BackendOutcome::Empty;
            }
            Err(e) => {
                warn!("[SQL] Query failed on attempt {}: {}", attempt, e);
                error_message = Some(e.to_string());
                sql_query = Some(generated);
            }
        }
    }

    error!("[SQL] Query failed after maximum retries.");
    BackendOutcome::Empty
}
