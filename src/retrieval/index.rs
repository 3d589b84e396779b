//! In-memory policy chunk index.
//!
//! Built lazily, once: concurrent callers race to `ensure_indexed` and one
//! builder wins. Chunks carry provenance tags so retrieval can be scoped to
//! a policy id, then a policy file, then a product id.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::catalog::PolicyEntry;
use crate::error::RetrievalError;
use crate::retrieval::embedder::{Embedder, cosine_distance};

/// Default chunk window, in characters.
pub const CHUNK_SIZE: usize = 1000;
/// Overlap between consecutive windows.
pub const CHUNK_OVERLAP: usize = 200;

/// Provenance for one indexed chunk.
#[derive(Debug, Clone)]
pub struct ChunkTag {
    /// Source file name (e.g. `policy_md_pro_001.txt`).
    pub source: String,
    pub policy_id: String,
    pub product_id: String,
    pub chunk_index: usize,
}

struct IndexedChunk {
    content: String,
    tag: ChunkTag,
    embedding: Vec<f32>,
}

/// A retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub content: String,
    pub tag: ChunkTag,
    pub distance: f32,
}

/// Scope filter with fixed precedence: policy id, then policy file,
/// then product id, then unscoped.
#[derive(Debug, Clone)]
pub enum ExcerptFilter {
    PolicyId(String),
    PolicyFile(String),
    ProductId(String),
    Unscoped,
}

impl ExcerptFilter {
    /// Build the narrowest available filter from a claim's resolution.
    pub fn scoped(
        policy_id: Option<&str>,
        policy_file: Option<&str>,
        product_id: Option<&str>,
    ) -> Self {
        if let Some(id) = policy_id.filter(|s| !s.is_empty()) {
            return Self::PolicyId(id.to_string());
        }
        if let Some(file) = policy_file.filter(|s| !s.is_empty()) {
            return Self::PolicyFile(file.to_string());
        }
        if let Some(id) = product_id.filter(|s| !s.is_empty()) {
            return Self::ProductId(id.to_string());
        }
        Self::Unscoped
    }

    fn matches(&self, tag: &ChunkTag) -> bool {
        match self {
            Self::PolicyId(id) => &tag.policy_id == id,
            Self::PolicyFile(file) => &tag.source == file,
            Self::ProductId(id) => &tag.product_id == id,
            Self::Unscoped => true,
        }
    }
}

/// Split text into fixed-size overlapping windows.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 || overlap >= size {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += size - overlap;
    }
    chunks
}

/// Lazily-built vector index over the policy documents directory.
pub struct PolicyIndex {
    policies_dir: PathBuf,
    entries: Vec<PolicyEntry>,
    embedder: Arc<dyn Embedder>,
    chunks: OnceCell<Vec<IndexedChunk>>,
}

impl PolicyIndex {
    pub fn new(
        policies_dir: PathBuf,
        entries: Vec<PolicyEntry>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            policies_dir,
            entries,
            embedder,
            chunks: OnceCell::new(),
        }
    }

    /// Build the index if it isn't built yet. Returns the chunk count.
    pub async fn ensure_indexed(&self) -> Result<usize, RetrievalError> {
        let chunks = self
            .chunks
            .get_or_try_init(|| self.build())
            .await?;
        Ok(chunks.len())
    }

    async fn build(&self) -> Result<Vec<IndexedChunk>, RetrievalError> {
        if !self.policies_dir.exists() {
            warn!(dir = %self.policies_dir.display(), "Policies directory missing; index is empty");
            return Ok(Vec::new());
        }

        let mut indexed = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.policies_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable policy file");
                    continue;
                }
            };

            let meta = self.entries.iter().find(|e| e.policy_file == file_name);
            let product_label = meta
                .and_then(|e| e.product_name.clone())
                .unwrap_or_else(|| {
                    file_name
                        .trim_start_matches("policy_")
                        .trim_end_matches(".txt")
                        .replace('_', " ")
                });

            let chunks = chunk_text(&content, CHUNK_SIZE, CHUNK_OVERLAP);
            // Prefix each chunk with its product context so the bag-of-tokens
            // embedder can discriminate between policies.
            let texts: Vec<String> = chunks
                .iter()
                .map(|c| format!("Policy for {product_label}: {c}"))
                .collect();
            let embeddings = self.embedder.embed(&texts);

            for (i, (text, embedding)) in texts.into_iter().zip(embeddings).enumerate() {
                indexed.push(IndexedChunk {
                    content: text,
                    tag: ChunkTag {
                        source: file_name.clone(),
                        policy_id: meta.map(|e| e.policy_id.clone()).unwrap_or_default(),
                        product_id: meta.map(|e| e.product_id.clone()).unwrap_or_default(),
                        chunk_index: i,
                    },
                    embedding,
                });
            }
        }

        info!(
            chunks = indexed.len(),
            embedder = self.embedder.name(),
            "Policy index built"
        );
        Ok(indexed)
    }

    /// Query the index for the `k` nearest chunks under a scope filter.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: &ExcerptFilter,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let chunks = self.chunks.get_or_try_init(|| self.build()).await?;

        let query_embedding = &self.embedder.embed(&[text.to_string()])[0];
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| filter.matches(&c.tag))
            .map(|c| ScoredChunk {
                content: c.content.clone(),
                tag: c.tag.clone(),
                distance: cosine_distance(query_embedding, &c.embedding),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        debug!(query = text, hits = scored.len(), "Index query");
        Ok(scored)
    }
}
