//! Chat session storage
//!
//! Keeps one transcript per chat id, either in memory or in SQLite.
//! Persistence failures never fail a turn; they are logged and the
//! session degrades to an empty transcript.

use crate::error::AssistantError;
use crate::memory::store::{Transcript, Turn};
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

enum SessionBackend {
    InMemory {
        transcripts: Arc<RwLock<HashMap<String, Transcript>>>,
    },
    Sqlite {
        pool: SqlitePool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

pub struct SessionStore {
    backend: SessionBackend,
    /// In-memory transcripts keep at most this many turns per chat
    turn_limit: Option<usize>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        info!("Session backend: in-memory");
        Self {
            backend: SessionBackend::InMemory {
                transcripts: Arc::new(RwLock::new(HashMap::new())),
            },
            turn_limit: None,
        }
    }

    pub fn sqlite(pool: SqlitePool) -> Self {
        info!("Session backend: sqlite");
        Self {
            backend: SessionBackend::Sqlite {
                pool,
                schema_ready: Arc::new(OnceCell::new()),
            },
            turn_limit: None,
        }
    }

    pub fn with_turn_limit(mut self, max_turns: usize) -> Self {
        self.turn_limit = Some(max_turns.max(1));
        self
    }

    /// SQLite when a URL is given and reachable, in-memory otherwise
    pub fn from_url(url: Option<&str>) -> Self {
        let Some(url) = url else {
            return Self::in_memory();
        };

        let pool = SqliteConnectOptions::from_str(url).map(|options| {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_lazy_with(options.create_if_missing(true))
        });

        match pool {
            Ok(pool) => Self::sqlite(pool),
            Err(error) => {
                warn!(
                    "Failed to initialize sqlite session backend, falling back to in-memory: {}",
                    error
                );
                Self::in_memory()
            }
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let SessionBackend::Sqlite { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_turns (
                      chat_id TEXT NOT NULL,
                      turn_index INTEGER NOT NULL,
                      question TEXT NOT NULL,
                      answer TEXT NOT NULL,
                      created_at TEXT NOT NULL,
                      PRIMARY KEY (chat_id, turn_index)
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::DatabaseError(format!(
                    "Failed to initialize chat session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    pub async fn try_load(&self, chat_id: &str) -> Result<Transcript> {
        match &self.backend {
            SessionBackend::InMemory { transcripts } => {
                let locked = transcripts.read().await;
                Ok(locked.get(chat_id).cloned().unwrap_or_default())
            }
            SessionBackend::Sqlite { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    r#"
                    SELECT question, answer, created_at
                    FROM chat_turns
                    WHERE chat_id = ?
                    ORDER BY turn_index ASC
                    "#,
                )
                .bind(chat_id)
                .fetch_all(pool)
                .await?;

                let turns = rows
                    .into_iter()
                    .map(|row| Turn {
                        question: row.try_get("question").unwrap_or_default(),
                        answer: row.try_get("answer").unwrap_or_default(),
                        created_at: row
                            .try_get("created_at")
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    })
                    .collect();

                Ok(Transcript::from_turns(turns))
            }
        }
    }

    pub async fn try_append(&self, chat_id: &str, turn: Turn) -> Result<()> {
        match &self.backend {
            SessionBackend::InMemory { transcripts } => {
                let mut locked = transcripts.write().await;
                let transcript = locked.entry(chat_id.to_string()).or_default();
                transcript.push_turn(turn);
                if let Some(limit) = self.turn_limit {
                    if transcript.len() > limit {
                        *transcript = transcript.recent(limit);
                    }
                }
                Ok(())
            }
            SessionBackend::Sqlite { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                sqlx::query(
                    r#"
                    INSERT INTO chat_turns (chat_id, turn_index, question, answer, created_at)
                    VALUES (
                      ?1,
                      (SELECT COALESCE(MAX(turn_index), 0) + 1 FROM chat_turns WHERE chat_id = ?1),
                      ?2, ?3, ?4
                    )
                    "#,
                )
                .bind(chat_id)
                .bind(&turn.question)
                .bind(&turn.answer)
                .bind(turn.created_at)
                .execute(pool)
                .await?;

                Ok(())
            }
        }
    }

    pub async fn try_reset(&self, chat_id: &str) -> Result<()> {
        match &self.backend {
            SessionBackend::InMemory { transcripts } => {
                transcripts.write().await.remove(chat_id);
                Ok(())
            }
            SessionBackend::Sqlite { pool, .. } => {
                self.ensure_schema_if_needed().await?;
                sqlx::query("DELETE FROM chat_turns WHERE chat_id = ?")
                    .bind(chat_id)
                    .execute(pool)
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn load(&self, chat_id: &str) -> Transcript {
        match self.try_load(chat_id).await {
            Ok(transcript) => transcript,
            Err(error) => {
                warn!("Session load failed, continuing without history: {}", error);
                Transcript::new()
            }
        }
    }

    pub async fn append(&self, chat_id: &str, turn: Turn) {
        if let Err(error) = self.try_append(chat_id, turn).await {
            warn!("Session save failed, answer will still be returned: {}", error);
        }
    }

    pub async fn reset(&self, chat_id: &str) {
        match self.try_reset(chat_id).await {
            Ok(()) => info!(chat_id, "[Session] Chat history reset"),
            Err(error) => warn!("Session reset failed: {}", error),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
