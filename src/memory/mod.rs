//! Reference corpora and similarity retrieval.
//!
//! Each persona owns a [`Corpus`]: its reference documents split into
//! overlapping windows ([`chunker::chunk_text`]) and embedded once at
//! startup. The corpus is immutable afterwards. Retrieval goes through the
//! [`RetrievalService`] trait so the dispatch pipeline never sees vectors;
//! [`EmbeddingRetrieval`] is the production implementation.

pub mod chunker;
pub mod embedder;
pub mod search;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use self::embedder::{Embedder, EmbedderError};

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One embedded reference window.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    /// Window text.
    pub text: String,
    /// Embedding of `text`.
    pub embedding: Vec<f32>,
}

/// A persona's reference snippets, immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    persona: String,
    snippets: Vec<Snippet>,
}

impl Corpus {
    /// Wrap already-embedded snippets.
    pub fn new(persona: impl Into<String>, snippets: Vec<Snippet>) -> Self {
        Self {
            persona: persona.into(),
            snippets,
        }
    }

    /// A corpus without snippets. Retrieval against it always comes back empty.
    pub fn empty(persona: impl Into<String>) -> Self {
        Self::new(persona, Vec::new())
    }

    /// Ingest `<dir>/**/*.<ext>`, chunk every document and embed every window.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::MissingDirectory` when `dir` does not exist,
    /// `CorpusError::Io` on read failure and `CorpusError::Embedding` when
    /// any window cannot be embedded.
    pub async fn build(
        persona: &str,
        dir: &Path,
        ext: &str,
        chunk_size: usize,
        overlap: usize,
        embedder: &dyn Embedder,
    ) -> Result<Self, CorpusError> {
        if !dir.is_dir() {
            return Err(CorpusError::MissingDirectory(dir.to_path_buf()));
        }
        let documents = chunker::load_documents(dir, ext)?;

        let mut snippets = Vec::new();
        for document in &documents {
            for text in chunker::chunk_text(document, chunk_size, overlap) {
                let embedding = embedder.embed(&text).await.map_err(|source| {
                    CorpusError::Embedding {
                        persona: persona.to_owned(),
                        source,
                    }
                })?;
                snippets.push(Snippet { text, embedding });
            }
        }

        info!(
            persona,
            documents = documents.len(),
            snippets = snippets.len(),
            model = embedder.model_id(),
            "corpus embedded"
        );
        Ok(Self::new(persona, snippets))
    }

    /// Key of the owning persona.
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// All snippets, in ingestion order.
    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    /// Number of snippets.
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Whether the corpus has no snippets.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building a corpus at startup.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// The persona's reference directory does not exist.
    #[error("reference directory {0} does not exist")]
    MissingDirectory(PathBuf),

    /// A directory entry or document could not be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },

    /// A window could not be embedded.
    #[error("embedding corpus of '{persona}' failed: {source}")]
    Embedding {
        /// Persona key.
        persona: String,
        /// Embedder failure.
        #[source]
        source: EmbedderError,
    },
}

/// Errors from a similarity search.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The query could not be embedded.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// Similarity search over a persona corpus.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Snippets scoring at least `threshold` against `query`, best first.
    ///
    /// Nothing clearing the threshold is an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError`] when the backend cannot score the query.
    async fn similarity_search(
        &self,
        corpus: &Corpus,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<String>, RetrievalError>;
}

/// Retrieval by embedding the query and ranking snippets by cosine similarity.
#[derive(Clone)]
pub struct EmbeddingRetrieval {
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for EmbeddingRetrieval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRetrieval")
            .field("model", &self.embedder.model_id())
            .finish()
    }
}

impl EmbeddingRetrieval {
    /// Use `embedder` for queries. It must be the model the corpus was built with.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl RetrievalService for EmbeddingRetrieval {
    async fn similarity_search(
        &self,
        corpus: &Corpus,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<String>, RetrievalError> {
        if corpus.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let ranked = search::rank(corpus, &vector, threshold);
        debug!(
            persona = corpus.persona(),
            matches = ranked.len(),
            best = ranked.first().map(|(score, _)| *score),
            "similarity search"
        );
        Ok(ranked.into_iter().map(|(_, text)| text).collect())
    }
}
