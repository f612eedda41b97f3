//! Answering questions over the feedback collection
//!
//! Mentions from the router win over mentions inferred from the question
//! and history. With ids, entries are selected directly; without them the
//! model either summarizes traits across the dataset or writes a filter.

use crate::classifier::{classify_feedback_focus, classify_feedback_query, FeedbackFocus, FeedbackQueryType};
use crate::feedback::{FeedbackEntry, FeedbackStore, FilterExpr};
use crate::llm::{self, ChatModel};
use crate::memory::Transcript;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

pub const EMPTY_DATASET: &str = "The feedback dataset is empty.";
pub const NO_RELEVANT_FEEDBACK: &str = "Couldn't find relevant feedback in the dataset.";
pub const TRAIT_SUMMARY_FAILED: &str = "Could not identify specific traits from feedback.";
pub const ANALYSIS_FAILED: &str = "There was an error while summarizing the feedback.";

pub const TRAIT_SUMMARY_MAX_ENTRIES: usize = 100;
pub const ANALYSIS_MAX_ENTRIES: usize = 120;

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"\d+").expect("valid integer regex");
}

const MENTIONS_PROMPT: &str = r#"You extract all mentioned property and agent IDs from the user's current question and chat history.

Respond with a JSON object:
- "property_id": a list of property numbers (e.g. [5, 10, 12]) or null if none found
- "agent_id": a list of agent numbers (e.g. [1, 3]) or null if none found

Do not return strings like "property 1", only the numbers.
If nothing is mentioned, return {"property_id": null, "agent_id": null}.

--- Chat History ---
{history}
--- Current Question ---
{question}"#;

const FILTER_PROMPT: &str = r#"Translate a natural language question into a JSON filter expression over feedback entries.

Each entry has: property_id (int), agent_id (int), property_feedback (str), agent_feedback (str).

Expression forms:
- {"field": "<name>", "op": "<op>", "value": <value>} where op is one of eq, ne, in, contains, gt, gte, lt, lte
  ("contains" is a case-insensitive substring match on text; "in" takes a list)
- {"all": [<expr>, ...]} every sub-expression matches
- {"any": [<expr>, ...]} at least one sub-expression matches
- {"not": <expr>}

Return only the JSON expression."#;

const TRAIT_SUMMARY_PROMPT: &str = r#"You read feedback entries and answer the question: "{question}"

Each entry has property_id, agent_id, property_feedback and agent_feedback.

Identify the specific agents or properties that demonstrate the trait(s) asked about (like "clear communication").
Only refer to agent numbers when necessary (e.g. Agent 3); otherwise say "multiple agents" or "some agents".

Use only the {max_entries} entries below:
{data}

Answer:"#;

const ANALYSIS_PROMPT: &str = r#"Summarize relevant real estate feedback.

User question:
{question}

Chat history:
{history}

Feedback data:
{data}

Answer clearly and concisely."#;

/// Ids the model found in the question and history, before normalization
#[derive(Debug, Default, Deserialize)]
pub struct InferredMentions {
    #[serde(default)]
    pub property_id: Value,
    #[serde(default)]
    pub agent_id: Value,
}

#[instrument(name = "infer_mentions_and_context", skip(model, transcript))]
pub async fn infer_mentions(model: &dyn ChatModel, question: &str, transcript: &Transcript) -> InferredMentions {
    let prompt = MENTIONS_PROMPT
        .replace("{history}", &transcript.format_pairs())
        .replace("{question}", question);

    let reply = match llm::ask(model, &prompt, 0.0).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("[FEEDBACK] Failed to infer mentions: {}", e);
            return InferredMentions::default();
        }
    };

    match serde_json::from_str(llm::strip_code_fence(&reply)) {
        Ok(mentions) => mentions,
        Err(e) => {
            warn!("[FEEDBACK] Unparseable mention reply {:?}: {}", reply, e);
            InferredMentions::default()
        }
    }
}

/// Every integer id carried by a mention value: all numbers in a string,
/// integers and numeric strings in a list, or a single integer.
pub fn normalize_ids(value: &Value) -> Vec<i64> {
    match value {
        Value::String(text) => INTEGER
            .find_iter(text)
            .filter_map(|m| m.as_str().parse().ok())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect(),
        Value::Number(n) => n.as_i64().into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Raw filter text from the model, `None` when the call failed
#[instrument(name = "generate_filter_code", skip(model))]
pub async fn generate_filter(model: &dyn ChatModel, question: &str) -> Option<String> {
    match llm::ask_with_system(model, FILTER_PROMPT, question, 0.0).await {
        Ok(raw) => {
            info!("[FEEDBACK] Generated filter: {}", raw);
            Some(raw)
        }
        Err(e) => {
            error!("[FEEDBACK] Failed to generate filter: {}", e);
            None
        }
    }
}

fn entries_json(entries: &[Value]) -> String {
    serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
}

#[instrument(name = "extract_trait_summary", skip(model, data))]
pub async fn extract_trait_summary(
    model: &dyn ChatModel,
    question: &str,
    data: &[FeedbackEntry],
    max_entries: usize,
) -> String {
    let entries: Vec<Value> = data.iter().take(max_entries).map(FeedbackEntry::to_value).collect();
    let prompt = TRAIT_SUMMARY_PROMPT
        .replace("{question}", question)
        .replace("{max_entries}", &max_entries.to_string())
        .replace("{data}", &entries_json(&entries));

    match llm::ask(model, &prompt, 0.5).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("[FEEDBACK] Failed to extract traits: {}", e);
            TRAIT_SUMMARY_FAILED.to_string()
        }
    }
}

/// Summarize selected entries; the feedback text not in focus is dropped
#[instrument(name = "generate_feedback_analysis", skip(model, data, transcript))]
pub async fn generate_feedback_analysis(
    model: &dyn ChatModel,
    question: &str,
    data: &[FeedbackEntry],
    transcript: &Transcript,
    focus: FeedbackFocus,
    max_entries: usize,
) -> String {
    let entries: Vec<Value> = data
        .iter()
        .take(max_entries)
        .map(|entry| {
            let mut value = entry.to_value();
            if let Some(object) = value.as_object_mut() {
                match focus {
                    FeedbackFocus::Property => {
                        object.remove("agent_feedback");
                    }
                    FeedbackFocus::Agent => {
                        object.remove("property_feedback");
                    }
                    FeedbackFocus::Both => {}
                }
            }
            value
        })
        .collect();

    let prompt = ANALYSIS_PROMPT
        .replace("{question}", question)
        .replace("{history}", &transcript.format_pairs())
        .replace("{data}", &entries_json(&entries));

    match llm::ask(model, &prompt, 0.5).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("[FEEDBACK] Failed to summarize feedback: {}", e);
            ANALYSIS_FAILED.to_string()
        }
    }
}

#[instrument(name = "handle_user_feedback_query", skip(model, store, transcript))]
pub async fn handle_feedback_query(
    model: &dyn ChatModel,
    store: &dyn FeedbackStore,
    collection: &str,
    question: &str,
    property_mention: Option<&str>,
    agent_mention: Option<&str>,
    transcript: &Transcript,
) -> Result<String> {
    info!("[FEEDBACK] Handling feedback query: {}", question);

    let data = store.fetch_all(collection).await?;
    if data.is_empty() {
        return Ok(EMPTY_DATASET.to_string());
    }

    let inferred = infer_mentions(model, question, transcript).await;
    let property_ids = match property_mention {
        Some(mention) => normalize_ids(&Value::from(mention)),
        None => normalize_ids(&inferred.property_id),
    };
    let agent_ids = match agent_mention {
        Some(mention) => normalize_ids(&Value::from(mention)),
        None => normalize_ids(&inferred.agent_id),
    };

    let query_type = classify_feedback_query(model, question).await;
    let focus = classify_feedback_focus(model, question).await;

    info!("[FEEDBACK] Query type: {:?}, focus: {:?}", query_type, focus);
    info!("[FEEDBACK] Property IDs: {:?}, Agent IDs: {:?}", property_ids, agent_ids);

    if query_type == FeedbackQueryType::Analysis && property_ids.is_empty() && agent_ids.is_empty() {
        return Ok(extract_trait_summary(model, question, &data, TRAIT_SUMMARY_MAX_ENTRIES).await);
    }

    let selected: Vec<FeedbackEntry> = match (property_ids.is_empty(), agent_ids.is_empty()) {
        (false, false) => data
            .into_iter()
            .filter(|e| property_ids.contains(&e.property_id) && agent_ids.contains(&e.agent_id))
            .collect(),
        (false, true) => data
            .into_iter()
            .filter(|e| property_ids.contains(&e.property_id))
            .collect(),
        (true, false) => data
            .into_iter()
            .filter(|e| agent_ids.contains(&e.agent_id))
            .collect(),
        (true, true) => match generate_filter(model, question).await {
            Some(raw) => match FilterExpr::parse(&raw) {
                Ok(filter) => filter.apply(&data),
                Err(e) => {
                    error!("[FEEDBACK] Error evaluating generated filter: {}", e);
                    return Ok(format!("Generated filter failed: {}", e));
                }
            },
            None => Vec::new(),
        },
    };

    if selected.is_empty() {
        return Ok(NO_RELEVANT_FEEDBACK.to_string());
    }

    Ok(generate_feedback_analysis(model, question, &selected, transcript, focus, ANALYSIS_MAX_ENTRIES).await)
}
