//! Runtime configuration loaded from the environment (and `.env` via dotenv)

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_FEEDBACK_COLLECTION: &str = "feedback_feedback";

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub llm_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,

    pub sales_csv_path: PathBuf,
    pub sales_db_url: String,
    pub property_pdf_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub feedback_store_path: PathBuf,
    pub feedback_collection: String,
    pub session_db_url: Option<String>,

    pub sql_max_retries: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_history_turns: usize,
    pub port: u16,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            sales_csv_path: PathBuf::from("data/real_estate_data.csv"),
            sales_db_url: "sqlite://real_estate.db".to_string(),
            property_pdf_dir: PathBuf::from("data/Property_details"),
            feedback_dir: PathBuf::from("data/Feedback"),
            feedback_store_path: PathBuf::from("feedback_store.json"),
            feedback_collection: DEFAULT_FEEDBACK_COLLECTION.to_string(),
            session_db_url: None,
            sql_max_retries: 3,
            chunk_size: 1000,
            chunk_overlap: 200,
            max_history_turns: 10,
            port: 8080,
        }
    }
}

impl AssistantConfig {
    /// Read every setting from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            llm_base_url: string_var("LLM_BASE_URL", &defaults.llm_base_url),
            chat_model: string_var("CHAT_MODEL", &defaults.chat_model),
            embedding_model: string_var("EMBEDDING_MODEL", &defaults.embedding_model),
            sales_csv_path: path_var("SALES_CSV_PATH", defaults.sales_csv_path),
            sales_db_url: string_var("SALES_DB_URL", &defaults.sales_db_url),
            property_pdf_dir: path_var("PROPERTY_PDF_DIR", defaults.property_pdf_dir),
            feedback_dir: path_var("FEEDBACK_DIR", defaults.feedback_dir),
            feedback_store_path: path_var("FEEDBACK_STORE_PATH", defaults.feedback_store_path),
            feedback_collection: string_var("FEEDBACK_COLLECTION", &defaults.feedback_collection),
            session_db_url: env::var("SESSION_DB_URL").ok().filter(|v| !v.trim().is_empty()),
            sql_max_retries: parsed_var("SQL_MAX_RETRIES", defaults.sql_max_retries)?,
            chunk_size: parsed_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parsed_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            max_history_turns: parsed_var("MAX_HISTORY_TURNS", defaults.max_history_turns)?,
            port: match env::var("PORT").or_else(|_| env::var("API_PORT")) {
                Ok(raw) => parse_value("PORT", &raw)?,
                Err(_) => defaults.port,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sql_max_retries == 0 {
            return Err(AssistantError::ConfigError(
                "SQL_MAX_RETRIES must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(AssistantError::ConfigError(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

fn string_var(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn path_var(name: &str, default: PathBuf) -> PathBuf {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(name, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AssistantError::ConfigError(format!("{} has an invalid value: {}", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AssistantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sql_max_retries, 3);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.feedback_collection, "feedback_feedback");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let config = AssistantConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..AssistantConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = AssistantConfig {
            sql_max_retries: 0,
            ..AssistantConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_value_reports_variable() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
