//! Property document backend
//!
//! Each property PDF becomes its own vector index of embedded text chunks,
//! keyed by the file stem (e.g. `Property_ID_5`).

pub mod chunker;
pub mod index;
pub mod search;

pub use chunker::split_text;
pub use index::{ScoredChunk, VectorIndex};
pub use search::{generate_answer_from_context, search_property_documents, DocumentContext};

use crate::error::AssistantError;
use crate::llm::Embedder;
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Key under which a property's index is stored
pub fn property_key(property_number: &str) -> String {
    format!("Property_ID_{}", property_number)
}

#[derive(Debug, Clone, Default)]
pub struct PropertyIndexes {
    indexes: BTreeMap<String, VectorIndex>,
}

impl PropertyIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&VectorIndex> {
        self.indexes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VectorIndex)> {
        self.indexes.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.indexes.keys()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Chunk, embed and index one document under `key`, replacing any
    /// previous index for it. Returns the number of chunks stored.
    pub async fn insert_document(
        &mut self,
        key: &str,
        text: &str,
        embedder: &dyn Embedder,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<usize> {
        let chunks = split_text(text, chunk_size, overlap);
        if chunks.is_empty() {
            warn!(key, "[DOCS] Document has no extractable text, skipping");
            return Ok(0);
        }

        let embeddings = embedder.embed(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(AssistantError::IngestError(format!(
                "Embedder returned {} vectors for {} chunks of {}",
                embeddings.len(),
                chunks.len(),
                key
            )));
        }

        let mut index = VectorIndex::new();
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            index.insert(chunk, embedding);
        }

        let stored = index.len();
        self.indexes.insert(key.to_string(), index);
        Ok(stored)
    }

    /// Build one index per `*.pdf` file in `dir`
    #[instrument(name = "create_property_indexes", skip(embedder))]
    pub async fn build_from_folder(
        dir: &Path,
        embedder: &dyn Embedder,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self> {
        let mut indexes = Self::new();

        for path in pdf_files(dir)? {
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let text = extract_pdf_text(path.clone()).await?;
            let stored = indexes
                .insert_document(&key, &text, embedder, chunk_size, overlap)
                .await?;
            info!(key = %key, chunks = stored, "[DOCS] Indexed property document");
        }

        info!(properties = indexes.len(), "[DOCS] Property indexes ready");
        Ok(indexes)
    }
}

fn pdf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| AssistantError::IngestError(format!("Cannot read {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Extract the text of every page; runs on the blocking pool
pub async fn extract_pdf_text(path: PathBuf) -> Result<String> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
        .await
        .map_err(|e| AssistantError::IngestError(format!("PDF extraction task failed: {}", e)))?
        .map_err(|e| AssistantError::IngestError(format!("Cannot extract text from {}: {}", display, e)))
}
