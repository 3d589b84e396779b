//! Policy text retrieval.
//!
//! Policy documents are chunked into overlapping windows, embedded, and
//! queried per claim to ground the analysis stage in authoritative text.

mod embedder;
mod index;
mod retriever;

pub use embedder::{Embedder, HashEmbedder};
pub use index::{ChunkTag, ExcerptFilter, PolicyIndex, ScoredChunk, chunk_text};
pub use retriever::Retriever;
