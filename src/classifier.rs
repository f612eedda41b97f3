//! Interaction classifiers
//!
//! One-word labelling calls delegated to the model. Each classifier has a
//! fixed fallback label that is used when the call fails or the reply is
//! not one of the expected words.

use crate::llm::{self, ChatModel};
use crate::memory::Transcript;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Greetings, small talk, "what can you do"
    General,
    /// Questions about properties, sales, agents or feedback
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackQueryType {
    /// Traits and overall impressions across the dataset
    Analysis,
    /// Specific entries or records
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackFocus {
    Property,
    Agent,
    Both,
}

const MESSAGE_KIND_PROMPT: &str = r#"You are a message classification assistant.

Decide whether the message below is general small talk (greetings, "how are you", "what's up", "what can you do") or a business question about properties, real estate sales, or agents.

Message: "{message}"

Reply with exactly one word: "general" or "business"."#;

const FEEDBACK_QUERY_TYPE_PROMPT: &str = r#"You classify real estate feedback questions into one of two types.

analysis: the question asks which agents or properties show a trait or behaviour ("Which agent was responsive?", "Who communicated clearly?", "Which property had the best reviews?") or asks for overall impressions.

filter: the question asks for specific entries or records ("What did people say about property 3?", "Show me feedback for agent 1").

Reply with one word only: analysis or filter."#;

const FEEDBACK_FOCUS_PROMPT: &str = r#"You decide what a feedback question is about.

Return 'property' if it asks about feedback on a property, 'agent' if it asks about an agent, and 'both' if it asks about both.

Examples:
- "What did people say about property 5?" -> property
- "Was agent 3 helpful?" -> agent
- "Feedback on property 2 and its agent" -> both

Reply with one word only: property, agent, or both."#;

const NEEDS_CONTEXT_PROMPT: &str = r#"You decide whether the user's current question depends on earlier conversation context.

Prior conversation:
{history}

Current question:
{question}

Reply with one word only: "yes" if it needs the earlier context, otherwise "no"."#;

const DOCUMENT_HISTORY_PROMPT: &str = r#"You decide whether a user's question can only be understood with the previous chat history.

- Vague references such as "those properties", "the one mentioned earlier", "this property", "it" or "them" need history: reply "yes".
- Standalone or general questions such as "what do customers say in general", "list top properties", "what are agent reviews" do not: reply "no".
- Phrases like "in general", "overall" or "typically" do not need history unless tied to a specific earlier reference.

Reply with only "yes" or "no"."#;

fn normalized(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
        .to_lowercase()
}

/// Small talk or business question; failures count as business
#[instrument(name = "is_general_message", skip(model))]
pub async fn classify_message(model: &dyn ChatModel, message: &str) -> MessageKind {
    let prompt = MESSAGE_KIND_PROMPT.replace("{message}", message);

    match llm::ask(model, &prompt, 0.0).await {
        Ok(reply) if normalized(&reply) == "general" => MessageKind::General,
        Ok(_) => MessageKind::Business,
        Err(e) => {
            warn!("Failed to classify message type: {}", e);
            MessageKind::Business
        }
    }
}

#[instrument(name = "classify_query_type", skip(model))]
pub async fn classify_feedback_query(model: &dyn ChatModel, question: &str) -> FeedbackQueryType {
    match llm::ask_with_system(model, FEEDBACK_QUERY_TYPE_PROMPT, question, 0.0).await {
        Ok(reply) => match normalized(&reply).as_str() {
            "analysis" => FeedbackQueryType::Analysis,
            _ => FeedbackQueryType::Filter,
        },
        Err(e) => {
            warn!("[FEEDBACK] Failed to classify query type: {}", e);
            FeedbackQueryType::Filter
        }
    }
}

#[instrument(name = "classify_feedback_focus", skip(model))]
pub async fn classify_feedback_focus(model: &dyn ChatModel, question: &str) -> FeedbackFocus {
    match llm::ask_with_system(model, FEEDBACK_FOCUS_PROMPT, question, 0.0).await {
        Ok(reply) => match normalized(&reply).as_str() {
            "property" => FeedbackFocus::Property,
            "agent" => FeedbackFocus::Agent,
            _ => FeedbackFocus::Both,
        },
        Err(e) => {
            warn!("[FEEDBACK] Failed to classify feedback focus: {}", e);
            FeedbackFocus::Both
        }
    }
}

/// Whether the sales question leans on earlier turns. An empty transcript
/// short-circuits to `false` without a model call.
#[instrument(name = "needs_chat_context", skip(model, transcript))]
pub async fn needs_chat_context(
    model: &dyn ChatModel,
    question: &str,
    transcript: &Transcript,
) -> bool {
    if transcript.is_empty() {
        return false;
    }

    let prompt = NEEDS_CONTEXT_PROMPT
        .replace("{history}", &transcript.format_pairs())
        .replace("{question}", question);

    info!("[SQL] Determining if chat context is needed...");
    match llm::ask(model, &prompt, 0.0).await {
        Ok(reply) => normalized(&reply) == "yes",
        Err(e) => {
            warn!("[SQL] Context check failed: {}", e);
            false
        }
    }
}

/// Whether the document search should resolve mentions against history
#[instrument(name = "should_use_chat_history", skip(model))]
pub async fn should_use_chat_history(model: &dyn ChatModel, question: &str) -> bool {
    match llm::ask_with_system(model, DOCUMENT_HISTORY_PROMPT, question, 0.0).await {
        Ok(reply) => normalized(&reply) == "yes",
        Err(e) => {
            warn!("[DOCS] Error checking memory use: {}", e);
            false
        }
    }
}
