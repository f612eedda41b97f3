//! Backend routing via a forced function call

use crate::llm::{ChatMessage, ChatModel, FunctionSpec};
use crate::memory::Transcript;
use crate::models::{Destination, RouteDecision};
use serde_json::json;
use tracing::{error, info, instrument};

const ROUTER_SYSTEM_PROMPT: &str = r#"You are a routing agent that picks the best backend (faiss, sql, firestore) to answer the user's question.

- 'faiss': property descriptions, amenities, furnishing (PDFs)
- 'sql': property prices, sale data, cities, beds/baths (CSV)
- 'firestore': agent or property feedback (JSON)

Use the chat history to resolve vague references and infer property/agent mentions."#;

pub const ROUTE_FUNCTION_NAME: &str = "route_query";

pub fn route_function() -> FunctionSpec {
    FunctionSpec {
        name: ROUTE_FUNCTION_NAME.to_string(),
        description: "Route the user's question to the correct data source and extract inferred mentions."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "destination": {
                    "type": "string",
                    "enum": [
                        Destination::Documents.schema_name(),
                        Destination::Sales.schema_name(),
                        Destination::Feedback.schema_name()
                    ],
                    "description": "Choose: faiss (PDF), sql (CSV), or firestore (JSON feedback)"
                },
                "property_mention": {
                    "type": "string",
                    "description": "Mentioned or inferred property ID (e.g., 'property 5')"
                },
                "agent_mention": {
                    "type": "string",
                    "description": "Mentioned or inferred agent ID (e.g., 'agent 3')"
                }
            },
            "required": ["destination"]
        }),
    }
}

/// Pick a backend and extract mentions. Falls back to the sales backend
/// with no mentions when the call fails or returns unusable arguments.
#[instrument(name = "route_query_with_function_call", skip(model, transcript))]
pub async fn route_query(model: &dyn ChatModel, question: &str, transcript: &Transcript) -> RouteDecision {
    info!("Routing the query...");

    let mut messages = vec![ChatMessage::system(ROUTER_SYSTEM_PROMPT)];
    messages.extend(transcript.as_chat_messages());
    messages.push(ChatMessage::user(question));

    let arguments = match model.call_function(&messages, &route_function(), 0.0).await {
        Ok(arguments) => arguments,
        Err(e) => {
            error!("Failed to route query: {}", e);
            return RouteDecision::fallback();
        }
    };

    match serde_json::from_value::<RouteDecision>(arguments) {
        Ok(decision) => {
            info!(
                destination = %decision.destination,
                property = ?decision.property_mention,
                agent = ?decision.agent_mention,
                "Routing decision"
            );
            decision
        }
        Err(e) => {
            error!("Unusable routing arguments: {}", e);
            RouteDecision::fallback()
        }
    }
}
