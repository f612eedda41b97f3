//! Turn orchestration
//!
//! CLASSIFY → ROUTE → QUERY BACKEND → PHRASE ANSWER
//!
//! A turn never fails: every step degrades to a fixed message.

pub mod answer;
pub mod router;

pub use answer::{generate_friendly_reply, generate_natural_answer};
pub use router::route_query;

use crate::classifier::{classify_message, MessageKind};
use crate::documents::{generate_answer_from_context, search_property_documents, PropertyIndexes};
use crate::feedback::{handle_feedback_query, FeedbackStore};
use crate::llm::{ChatModel, Embedder};
use crate::memory::Transcript;
use crate::models::{BackendOutcome, Destination, RouteDecision};
use crate::sales::{handle_sales_question, SalesStore};
use crate::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const BACKEND_ERROR: &str = "An error occurred while processing your query.";

/// Default number of properties gathered when no property is mentioned
pub const DOCUMENT_MAX_RESULTS: usize = 3;

pub fn no_relevant_information(question: &str) -> String {
    format!("Sorry, no relevant information found for: **{}**.", question)
}

/// Answers one question at a time against the three backends
pub struct Assistant {
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    sales: SalesStore,
    documents: PropertyIndexes,
    feedback: Arc<dyn FeedbackStore>,
    feedback_collection: String,
    sql_max_retries: u32,
}

impl Assistant {
    pub fn new(
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        sales: SalesStore,
        documents: PropertyIndexes,
        feedback: Arc<dyn FeedbackStore>,
        feedback_collection: impl Into<String>,
        sql_max_retries: u32,
    ) -> Self {
        Self {
            model,
            embedder,
            sales,
            documents,
            feedback,
            feedback_collection: feedback_collection.into(),
            sql_max_retries: sql_max_retries.max(1),
        }
    }

    pub fn sales(&self) -> &SalesStore {
        &self.sales
    }

    pub fn documents(&self) -> &PropertyIndexes {
        &self.documents
    }

    /// Answer `question` given the conversation so far
    pub async fn handle_turn(&self, question: &str, transcript: &Transcript) -> String {
        info!("Handling new question: {}", question);
        let model = self.model.as_ref();

        if classify_message(model, question).await == MessageKind::General {
            return generate_friendly_reply(model, question).await;
        }

        let outcome = self.run_query(question, transcript).await;
        if is_usable(&outcome) {
            return self.finish(question, outcome).await;
        }

        if !transcript.is_empty() {
            info!("Trying fallback with full chat history...");
            let retry = self.run_query(question, transcript).await;
            if !retry.is_empty() {
                return self.finish(question, retry).await;
            }
        }

        no_relevant_information(question)
    }

    async fn finish(&self, question: &str, outcome: BackendOutcome) -> String {
        match outcome {
            BackendOutcome::Rows(rows) => generate_natural_answer(self.model.as_ref(), question, &rows).await,
            BackendOutcome::Text(text) => text,
            BackendOutcome::Empty => no_relevant_information(question),
        }
    }

    /// Route and dispatch; backend errors become a fixed message
    async fn run_query(&self, question: &str, transcript: &Transcript) -> BackendOutcome {
        let decision = route_query(self.model.as_ref(), question, transcript).await;

        match self.dispatch(question, &decision, transcript).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(destination = %decision.destination, "Query error during handler execution: {}", e);
                BackendOutcome::Text(BACKEND_ERROR.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        question: &str,
        decision: &RouteDecision,
        transcript: &Transcript,
    ) -> Result<BackendOutcome> {
        let model = self.model.as_ref();
        let property = decision.property_mention.as_deref();
        let agent = decision.agent_mention.as_deref();

        match decision.destination {
            Destination::Sales => {
                info!("Routing to sales backend...");
                Ok(handle_sales_question(
                    model,
                    &self.sales,
                    question,
                    property,
                    agent,
                    transcript,
                    self.sql_max_retries,
                )
                .await)
            }
            Destination::Feedback => {
                info!("Routing to feedback backend...");
                let text = handle_feedback_query(
                    model,
                    self.feedback.as_ref(),
                    &self.feedback_collection,
                    question,
                    property,
                    agent,
                    transcript,
                )
                .await?;
                Ok(BackendOutcome::Text(text))
            }
            Destination::Documents => {
                info!("Routing to document backend...");
                let found = search_property_documents(
                    model,
                    self.embedder.as_ref(),
                    &self.documents,
                    question,
                    transcript,
                    DOCUMENT_MAX_RESULTS,
                )
                .await?;

                match found {
                    Some(found) => {
                        info!(properties = ?found.properties, "Passing document context to the model");
                        Ok(BackendOutcome::Text(
                            generate_answer_from_context(model, question, &found.context).await,
                        ))
                    }
                    None => {
                        warn!("Document search returned no context");
                        Ok(BackendOutcome::Empty)
                    }
                }
            }
        }
    }
}

/// Non-empty, and text that does not admit "no relevant" results
fn is_usable(outcome: &BackendOutcome) -> bool {
    match outcome {
        BackendOutcome::Text(text) => !text.trim().is_empty() && !text.to_lowercase().contains("no relevant"),
        other => !other.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::tests::seeded_store;
    use crate::feedback::InMemoryFeedbackStore;
    use crate::sales::tests::loaded_store;
    use crate::testing::{HashEmbedder, ScriptedModel};
    use serde_json::json;

    const CLASSIFY: &str = "message classification assistant";
    const SQL: &str = "convert natural language questions into valid SQLite";
    const SUMMARY: &str = "Summarize the result below";

    async fn assistant(model: ScriptedModel) -> (Assistant, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let mut documents = PropertyIndexes::new();
        documents
            .insert_document(
                "Property_ID_1",
                "Rooftop pool and a community hall.",
                &HashEmbedder,
                1000,
                200,
            )
            .await
            .unwrap();

        let assistant = Assistant::new(
            model.clone(),
            Arc::new(HashEmbedder),
            loaded_store().await,
            documents,
            Arc::new(seeded_store().await),
            "feedback_feedback",
            3,
        );
        (assistant, model)
    }

    #[test]
    fn test_usable_outcomes() {
        assert!(is_usable(&BackendOutcome::Text("Agent 3 was responsive.".into())));
        assert!(!is_usable(&BackendOutcome::Text("Sorry, No Relevant data".into())));
        assert!(!is_usable(&BackendOutcome::Empty));
        assert!(!is_usable(&BackendOutcome::Rows(vec![])));
    }

    #[tokio::test]
    async fn test_general_message_gets_friendly_reply() {
        let (assistant, model) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "general")
                .reply("friendly and professional assistant", "Hi! Ask me about your sales."),
        )
        .await;

        let answer = assistant.handle_turn("hello", &Transcript::new()).await;
        assert_eq!(answer, "Hi! Ask me about your sales.");
        // No routing for small talk
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_sales_rows_are_summarized() {
        let (assistant, model) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "sql"}))
                .reply(SQL, "SELECT city, COUNT(*) AS sales_count FROM real_estate GROUP BY city ORDER BY sales_count DESC LIMIT 1")
                .reply(SUMMARY, "Hartford sold the most houses."),
        )
        .await;

        let answer = assistant.handle_turn("Which city sold the most?", &Transcript::new()).await;
        assert_eq!(answer, "Hartford sold the most houses.");
        assert!(model.prompts_matching(SUMMARY)[0].contains("\"sales_count\": 2"));
    }

    #[tokio::test]
    async fn test_routing_failure_uses_sales_backend() {
        let (assistant, _) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .reply(SQL, "SELECT city FROM real_estate WHERE property_id = 7")
                .reply(SUMMARY, "Property 7 is in Stamford."),
        )
        .await;

        let answer = assistant.handle_turn("Where is property 7?", &Transcript::new()).await;
        assert_eq!(answer, "Property 7 is in Stamford.");
    }

    #[tokio::test]
    async fn test_feedback_text_returned_as_is() {
        let (assistant, _) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "firestore", "agent_mention": "agent 1"}))
                .reply("classify real estate feedback questions", "filter")
                .reply("Summarize relevant real estate feedback", "Agent 1 came across as pushy."),
        )
        .await;

        let answer = assistant.handle_turn("How was agent 1?", &Transcript::new()).await;
        assert_eq!(answer, "Agent 1 came across as pushy.");
    }

    #[tokio::test]
    async fn test_documents_answer() {
        let (assistant, _) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "faiss"}))
                .reply("extracts property references", r#"["property 1"]"#)
                .reply("how many properties the user is asking for", "1")
                .reply("using the provided PDF excerpts", "Property 1 has a rooftop pool."),
        )
        .await;

        let answer = assistant.handle_turn("Does property 1 have a pool?", &Transcript::new()).await;
        assert_eq!(answer, "Property 1 has a rooftop pool.");
    }

    #[tokio::test]
    async fn test_nothing_found_without_history() {
        let (assistant, _) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "sql"}))
                .reply(SQL, "SELECT * FROM real_estate WHERE city = 'Boston'"),
        )
        .await;

        let answer = assistant.handle_turn("Sales in Boston?", &Transcript::new()).await;
        assert_eq!(answer, "Sorry, no relevant information found for: **Sales in Boston?**.");
    }

    #[tokio::test]
    async fn test_retry_with_history_accepts_any_result() {
        let (assistant, model) = assistant(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "faiss"}))
                .route(json!({"destination": "sql"}))
                .reply("extracts property references", r#"["property 99"]"#)
                .reply(SQL, "SELECT city FROM real_estate WHERE property_id = 9")
                .reply(SUMMARY, "That property is in New Haven."),
        )
        .await;

        let mut transcript = Transcript::new();
        transcript.push("Tell me about property 9", "It is a three-bed house.");

        let answer = assistant.handle_turn("Where is it?", &transcript).await;
        assert_eq!(answer, "That property is in New Haven.");
        assert_eq!(model.prompts_matching("routing agent").len(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_message() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl FeedbackStore for BrokenStore {
            async fn fetch_all(&self, _collection: &str) -> Result<Vec<crate::feedback::FeedbackEntry>> {
                Err(crate::error::AssistantError::FeedbackStoreError("offline".into()))
            }

            async fn put(&self, _: &str, _: &str, _: crate::feedback::FeedbackEntry) -> Result<()> {
                Ok(())
            }
        }

        let model = Arc::new(
            ScriptedModel::new()
                .reply(CLASSIFY, "business")
                .route(json!({"destination": "firestore"})),
        );
        let assistant = Assistant::new(
            model,
            Arc::new(HashEmbedder),
            loaded_store().await,
            PropertyIndexes::new(),
            Arc::new(BrokenStore),
            "feedback_feedback",
            3,
        );

        assert_eq!(assistant.handle_turn("Feedback?", &Transcript::new()).await, BACKEND_ERROR);

        let empty = Assistant::new(
            Arc::new(ScriptedModel::new().reply(CLASSIFY, "business").route(json!({"destination": "feedback"}))),
            Arc::new(HashEmbedder),
            loaded_store().await,
            PropertyIndexes::new(),
            Arc::new(InMemoryFeedbackStore::new()),
            "feedback_feedback",
            3,
        );
        assert_eq!(
            empty.handle_turn("Feedback?", &Transcript::new()).await,
            crate::feedback::query::EMPTY_DATASET
        );
    }
}
