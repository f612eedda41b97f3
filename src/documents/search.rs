//! Retrieval over the property indexes and answer generation from the
//! retrieved excerpts.

use super::{property_key, PropertyIndexes, ScoredChunk};
use crate::classifier::should_use_chat_history;
use crate::error::AssistantError;
use crate::llm::{self, ChatMessage, ChatModel, Embedder};
use crate::memory::Transcript;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

/// Chunks taken from each matching property
const CHUNKS_PER_PROPERTY: usize = 2;

pub const DEFAULT_REQUESTED_COUNT: usize = 3;

pub const ANSWER_FAILED: &str = "There was an error while generating the answer.";

lazy_static! {
    static ref PROPERTY_MENTION: Regex =
        Regex::new(r"property\s*(?:id)?\s*(\d+)").expect("valid property mention regex");
    static ref FIRST_NUMBER: Regex = Regex::new(r"\d+").expect("valid number regex");
}

const MENTION_PROMPT: &str = r#"You are an assistant that extracts property references from the user's current question and the past conversation history.

- Return property identifiers only in the form "property 1", "property 2", etc.
- If the question is vague or refers to previously discussed properties, take the property ids from the chat history.
- If the question is standalone, extract the property numbers stated in it.
- If nothing is mentioned or implied, return an empty list.

Respond strictly with a JSON list, like ["property 5", "property 9"] or []."#;

const COUNT_PROMPT: &str = r#"You extract how many properties the user is asking for in their question.

- If they mention an exact number, return that number.
- If no number is mentioned, return 3.

Respond with only the number."#;

const ANSWER_PROMPT: &str = r#"You are a real estate assistant that answers property-related questions using the provided PDF excerpts.

Select ONLY the properties that clearly satisfy the user's request. If the user asks for properties with a "community hall", include only those that explicitly mention one.

Question:
{question}

Context:
"""{context}"""

Instructions:
- Return exactly {count} properties that match the user's query.
- Do not include properties that lack the requested feature.
- If fewer than {count} properties match, return as many as are available.
- Keep the response concise and clearly formatted.

Answer:"#;

/// Context assembled from the matching property excerpts
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentContext {
    /// `PROPERTY {key}:` blocks, one per property
    pub context: String,
    /// Property keys in the order they appear in the context
    pub properties: Vec<String>,
}

/// Scan free text for property references, normalized to `property N`
fn scan_property_mentions(text: &str) -> Vec<String> {
    PROPERTY_MENTION
        .captures_iter(&text.to_lowercase())
        .filter_map(|caps| caps.get(1).map(|m| format!("property {}", m.as_str())))
        .collect()
}

/// Ask the model which properties the question is about
#[instrument(name = "extract_property_mentions", skip(model, transcript))]
pub async fn extract_property_mentions(
    model: &dyn ChatModel,
    question: &str,
    transcript: Option<&Transcript>,
) -> Vec<String> {
    let user_content = match transcript {
        Some(transcript) if !transcript.is_empty() => {
            let history = transcript.format_pairs();
            info!("[DOCS] Passing chat history:\n{}", history);
            format!("{}\n{}", history, question)
        }
        _ => question.to_string(),
    };

    let messages = [ChatMessage::system(MENTION_PROMPT), ChatMessage::user(user_content)];
    info!("[DOCS] Extracting property mentions from: {}", question);

    match model.complete(&messages, 0.0).await {
        Ok(reply) => {
            let mentions = scan_property_mentions(&reply);
            info!("[DOCS] Cleaned property mentions: {:?}", mentions);
            mentions
        }
        Err(e) => {
            warn!("[DOCS] Failed to extract mentions: {}", e);
            Vec::new()
        }
    }
}

/// Index keys for the mentioned properties, deduplicated in mention order
fn mention_keys(mentions: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for mention in mentions {
        let Some(number) = PROPERTY_MENTION
            .captures(mention)
            .and_then(|caps| caps.get(1))
        else {
            continue;
        };
        let key = property_key(number.as_str());
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Find excerpts for the question. Mentioned properties are searched
/// directly; otherwise every index is searched and the best
/// `max_results` properties are kept. Returns `None` when nothing matched.
#[instrument(name = "search_property_pdfs", skip(model, embedder, indexes, transcript))]
pub async fn search_property_documents(
    model: &dyn ChatModel,
    embedder: &dyn Embedder,
    indexes: &PropertyIndexes,
    question: &str,
    transcript: &Transcript,
    max_results: usize,
) -> Result<Option<DocumentContext>> {
    info!("[DOCS] Searching PDFs for: {}", question);

    let use_memory = should_use_chat_history(model, question).await;
    info!("[DOCS] Use chat history? {}", use_memory);

    let history = use_memory.then_some(transcript);
    let mentions = extract_property_mentions(model, question, history).await;
    let keys = mention_keys(&mentions);

    if indexes.is_empty() {
        warn!("[DOCS] No property documents are indexed");
        return Ok(None);
    }

    let query = embedder
        .embed(&[question.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AssistantError::LlmError("Embedder returned no query vector".to_string()))?;

    let mut grouped: Vec<(String, Vec<ScoredChunk>)> = Vec::new();

    if !keys.is_empty() {
        info!("[DOCS] Valid keys: {:?}", keys);
        for key in keys {
            match indexes.get(&key) {
                Some(index) => {
                    let hits = index.search(&query, CHUNKS_PER_PROPERTY);
                    if !hits.is_empty() {
                        grouped.push((key, hits));
                    }
                }
                None => warn!("[DOCS] Property key not found: {}", key),
            }
        }
    } else {
        warn!("[DOCS] No valid property IDs found. Running similarity search across all properties.");

        let mut ranked: Vec<(&String, ScoredChunk)> = indexes
            .iter()
            .flat_map(|(key, index)| {
                index
                    .search(&query, CHUNKS_PER_PROPERTY)
                    .into_iter()
                    .map(move |hit| (key, hit))
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (key, hit) in ranked {
            match grouped.iter().position(|(k, _)| k == key) {
                Some(i) => {
                    let chunks = &mut grouped[i].1;
                    if chunks.len() < CHUNKS_PER_PROPERTY {
                        chunks.push(hit);
                    }
                }
                None if grouped.len() < max_results => grouped.push((key.clone(), vec![hit])),
                None => {}
            }
        }
    }

    if grouped.is_empty() {
        return Ok(None);
    }

    let context = grouped
        .iter()
        .map(|(key, chunks)| {
            let body = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n");
            format!("PROPERTY {}:\n{}", key, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    info!("[DOCS] Assembled context for answer.");
    Ok(Some(DocumentContext {
        context,
        properties: grouped.into_iter().map(|(key, _)| key).collect(),
    }))
}

/// How many properties the user wants listed
pub async fn extract_requested_count(model: &dyn ChatModel, question: &str, default: usize) -> usize {
    match llm::ask_with_system(model, COUNT_PROMPT, question, 0.0).await {
        Ok(reply) => FIRST_NUMBER
            .find(&reply)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default),
        Err(e) => {
            warn!("[DOCS] Count extraction failed: {}", e);
            default
        }
    }
}

#[instrument(name = "generate_answer_from_context", skip(model, context))]
pub async fn generate_answer_from_context(model: &dyn ChatModel, question: &str, context: &str) -> String {
    let count = extract_requested_count(model, question, DEFAULT_REQUESTED_COUNT).await;

    let prompt = ANSWER_PROMPT
        .replace("{question}", question)
        .replace("{context}", context)
        .replace("{count}", &count.to_string());

    match llm::ask(model, &prompt, 0.3).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("[DOCS] Error generating final answer: {}", e);
            ANSWER_FAILED.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const MENTION_NEEDLE: &str = "extracts property references";
    const HISTORY_NEEDLE: &str = "only be understood with the previous chat history";
    const COUNT_NEEDLE: &str = "how many properties the user is asking for";
    const ANSWER_NEEDLE: &str = "using the provided PDF excerpts";

    /// One dimension per amenity keyword
    struct AmenityEmbedder;

    const AMENITIES: [&str; 5] = ["pool", "rooftop", "hall", "parking", "library"];

    #[async_trait]
    impl Embedder for AmenityEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lowered = text.to_lowercase();
                    AMENITIES
                        .iter()
                        .map(|word| lowered.matches(word).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    async fn sample_indexes() -> PropertyIndexes {
        let mut indexes = PropertyIndexes::new();
        let docs = [
            ("Property_ID_1", "Rooftop pool with skyline views."),
            ("Property_ID_2", "Community hall next to the pool."),
            ("Property_ID_3", "Covered parking for every unit."),
            ("Property_ID_4", "Quiet library on the ground floor."),
        ];
        for (key, text) in docs {
            indexes
                .insert_document(key, text, &AmenityEmbedder, 1000, 200)
                .await
                .unwrap();
        }
        indexes
    }

    #[test]
    fn test_scan_property_mentions() {
        assert_eq!(
            scan_property_mentions(r#"["Property 5", "property id 12", "PROPERTY9"]"#),
            vec!["property 5", "property 12", "property 9"]
        );
        assert!(scan_property_mentions("[]").is_empty());
    }

    #[test]
    fn test_mention_keys_are_deduplicated() {
        let mentions = vec!["property 3".to_string(), "property 3".to_string(), "property 1".to_string()];
        assert_eq!(mention_keys(&mentions), vec!["Property_ID_3", "Property_ID_1"]);
    }

    #[tokio::test]
    async fn test_mention_extraction_failure_is_empty() {
        let model = crate::testing::ScriptedModel::new().fail(MENTION_NEEDLE);
        assert!(extract_property_mentions(&model, "property 4 amenities?", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_passed_when_needed() {
        let model = crate::testing::ScriptedModel::new()
            .reply(HISTORY_NEEDLE, "yes")
            .reply(MENTION_NEEDLE, r#"["property 2"]"#);
        let mut transcript = Transcript::new();
        transcript.push("Tell me about property 2", "It has a community hall.");

        let indexes = sample_indexes().await;
        let found = search_property_documents(
            &model, &AmenityEmbedder, &indexes, "Does it have a pool?", &transcript, 3,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(found.properties, vec!["Property_ID_2"]);
        assert!(model.prompts_matching(MENTION_NEEDLE)[0].contains("User: Tell me about property 2"));
    }

    #[tokio::test]
    async fn test_mentioned_properties_only() {
        let model = crate::testing::ScriptedModel::new()
            .reply(MENTION_NEEDLE, r#"["property 2", "property 42"]"#);
        let indexes = sample_indexes().await;

        let found = search_property_documents(
            &model, &AmenityEmbedder, &indexes, "Amenities of property 2 and 42?", &Transcript::new(), 3,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(found.properties, vec!["Property_ID_2"]);
        assert_eq!(found.context, "PROPERTY Property_ID_2:\nCommunity hall next to the pool.");
    }

    #[tokio::test]
    async fn test_search_across_all_properties_keeps_best() {
        let model = crate::testing::ScriptedModel::new().reply(MENTION_NEEDLE, "[]");
        let indexes = sample_indexes().await;

        let found = search_property_documents(
            &model, &AmenityEmbedder, &indexes, "Which ones have a rooftop pool?", &Transcript::new(), 2,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(found.properties, vec!["Property_ID_1", "Property_ID_2"]);
        assert!(found.context.starts_with("PROPERTY Property_ID_1:\nRooftop pool"));
        assert!(found.context.contains("\n\nPROPERTY Property_ID_2:\n"));
    }

    #[tokio::test]
    async fn test_unknown_property_yields_none() {
        let model = crate::testing::ScriptedModel::new().reply(MENTION_NEEDLE, r#"["property 77"]"#);
        let indexes = sample_indexes().await;

        let found = search_property_documents(
            &model, &AmenityEmbedder, &indexes, "property 77 parking?", &Transcript::new(), 3,
        )
        .await
        .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_requested_count() {
        let model = crate::testing::ScriptedModel::new().reply(COUNT_NEEDLE, "5");
        assert_eq!(extract_requested_count(&model, "Top 5 with a gym", 3).await, 5);

        let wordy = crate::testing::ScriptedModel::new().reply(COUNT_NEEDLE, "none given");
        assert_eq!(extract_requested_count(&wordy, "Any with a gym?", 3).await, 3);

        let broken = crate::testing::ScriptedModel::new();
        assert_eq!(extract_requested_count(&broken, "Any with a gym?", 3).await, 3);
    }

    #[tokio::test]
    async fn test_answer_uses_count_and_context() {
        let model = crate::testing::ScriptedModel::new()
            .reply(COUNT_NEEDLE, "2")
            .reply(ANSWER_NEEDLE, "Property_ID_1 has a rooftop pool.");

        let answer = generate_answer_from_context(
            &model,
            "Two properties with a pool?",
            "PROPERTY Property_ID_1:\nRooftop pool",
        )
        .await;

        assert_eq!(answer, "Property_ID_1 has a rooftop pool.");
        let prompt = &model.prompts_matching(ANSWER_NEEDLE)[0];
        assert!(prompt.contains("Return exactly 2 properties"));
        assert!(prompt.contains("PROPERTY Property_ID_1:"));
    }

    #[tokio::test]
    async fn test_answer_failure() {
        let model = crate::testing::ScriptedModel::new().reply(COUNT_NEEDLE, "3");
        assert_eq!(
            generate_answer_from_context(&model, "Pools?", "PROPERTY Property_ID_1:\nPool").await,
            ANSWER_FAILED
        );
    }
}
