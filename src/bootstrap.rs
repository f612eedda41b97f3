//! Startup wiring: model client, data ingestion, session storage

use crate::agent::Assistant;
use crate::config::AssistantConfig;
use crate::documents::PropertyIndexes;
use crate::feedback::{
    upload_feedback_dir, FeedbackStore, InMemoryFeedbackStore, JsonFileFeedbackStore,
};
use crate::llm::OpenAiClient;
use crate::memory::SessionStore;
use crate::sales::SalesStore;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a chat surface needs to serve turns
pub struct AssistantContext {
    pub assistant: Arc<Assistant>,
    pub sessions: Arc<SessionStore>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub config: AssistantConfig,
}

impl AssistantContext {
    /// Build the client and load the three backends. A missing or broken
    /// data source leaves its backend empty instead of aborting startup;
    /// only an unusable client or sales database is fatal.
    pub async fn bootstrap(config: AssistantConfig) -> Result<Self> {
        let client = Arc::new(OpenAiClient::new(
            config.api_key.clone(),
            &config.llm_base_url,
            config.chat_model.clone(),
            config.embedding_model.clone(),
        )?);
        if config.api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; model calls will fall back to defaults");
        }

        let sales = SalesStore::connect(&config.sales_db_url).await?;
        if config.sales_csv_path.is_file() {
            match sales.load_csv(&config.sales_csv_path).await {
                Ok(rows) => info!(rows, path = %config.sales_csv_path.display(), "[SQL] Sales data loaded"),
                Err(e) => warn!(path = %config.sales_csv_path.display(), "[SQL] Failed to load sales CSV: {}", e),
            }
        } else {
            warn!(path = %config.sales_csv_path.display(), "[SQL] Sales CSV not found, using existing table");
        }

        let documents = if config.property_pdf_dir.is_dir() {
            match PropertyIndexes::build_from_folder(
                &config.property_pdf_dir,
                client.as_ref(),
                config.chunk_size,
                config.chunk_overlap,
            )
            .await
            {
                Ok(indexes) => indexes,
                Err(e) => {
                    warn!("[DOCS] Failed to build property indexes: {}", e);
                    PropertyIndexes::new()
                }
            }
        } else {
            warn!(path = %config.property_pdf_dir.display(), "[DOCS] Property PDF folder not found");
            PropertyIndexes::new()
        };

        let feedback: Arc<dyn FeedbackStore> =
            match JsonFileFeedbackStore::open(&config.feedback_store_path).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("[FEEDBACK] Falling back to an in-memory feedback store: {}", e);
                    Arc::new(InMemoryFeedbackStore::new())
                }
            };
        if config.feedback_dir.is_dir() {
            match upload_feedback_dir(feedback.as_ref(), &config.feedback_dir).await {
                Ok(uploaded) => info!(entries = uploaded, "[FEEDBACK] Feedback uploaded"),
                Err(e) => warn!("[FEEDBACK] Failed to upload feedback: {}", e),
            }
        } else {
            warn!(path = %config.feedback_dir.display(), "[FEEDBACK] Feedback folder not found");
        }

        let sessions = Arc::new(
            SessionStore::from_url(config.session_db_url.as_deref())
                .with_turn_limit(config.max_history_turns),
        );

        let assistant = Assistant::new(
            client.clone(),
            client,
            sales,
            documents,
            feedback.clone(),
            config.feedback_collection.clone(),
            config.sql_max_retries,
        );

        info!("Assistant ready");
        Ok(Self {
            assistant: Arc::new(assistant),
            sessions,
            feedback,
            config,
        })
    }
}
