//! Corpus construction and embedding retrieval with a keyword embedder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use legion::memory::embedder::{Embedder, EmbedderError};
use legion::memory::{Corpus, CorpusError, EmbeddingRetrieval, RetrievalService, Snippet};

/// Maps text onto a (docker, compose, bake) keyword vector.
#[derive(Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

fn flag(text: &str, word: &str) -> f32 {
    if text.to_lowercase().contains(word) {
        1.0
    } else {
        0.0
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedderError::Unavailable("offline".to_owned()));
        }
        Ok(vec![flag(text, "docker"), flag(text, "compose"), flag(text, "bake")])
    }

    fn model_id(&self) -> &str {
        "keyword"
    }
}

fn snippet(text: &str, embedding: [f32; 3]) -> Snippet {
    Snippet {
        text: text.to_owned(),
        embedding: embedding.to_vec(),
    }
}

#[tokio::test]
async fn build_embeds_every_window() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("compose.md"), "docker compose up").expect("write");
    std::fs::write(dir.path().join("bake.md"), "docker bake").expect("write");
    let embedder = KeywordEmbedder::default();

    let corpus = Corpus::build("bill", dir.path(), "md", 512, 210, &embedder)
        .await
        .expect("corpus builds");

    assert_eq!(corpus.persona(), "bill");
    assert_eq!(corpus.len(), 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(corpus.snippets()[0].text, "docker bake");
    assert_eq!(corpus.snippets()[0].embedding, vec![1.0, 0.0, 1.0]);
}

#[tokio::test]
async fn missing_directory_is_fatal() {
    let dir = tempfile::tempdir().expect("temp dir");
    let embedder = KeywordEmbedder::default();

    let err = Corpus::build("milo", &dir.path().join("milo"), "md", 512, 210, &embedder)
        .await
        .expect_err("missing directory");

    assert!(matches!(err, CorpusError::MissingDirectory(_)));
}

#[tokio::test]
async fn embedding_failure_names_the_persona() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("a.md"), "docker").expect("write");
    let embedder = KeywordEmbedder {
        fail: true,
        ..KeywordEmbedder::default()
    };

    let err = Corpus::build("bob", dir.path(), "md", 512, 210, &embedder)
        .await
        .expect_err("embedding fails");

    assert!(matches!(err, CorpusError::Embedding { ref persona, .. } if persona == "bob"));
}

#[tokio::test]
async fn retrieval_applies_the_threshold_and_orders_best_first() {
    let corpus = Corpus::new(
        "bill",
        vec![
            snippet("plain docker", [1.0, 0.0, 0.0]),
            snippet("compose file", [1.0, 1.0, 0.0]),
            snippet("bake file", [0.0, 0.0, 1.0]),
        ],
    );
    let retrieval = EmbeddingRetrieval::new(Arc::new(KeywordEmbedder::default()));

    let hits = retrieval
        .similarity_search(&corpus, "docker compose", 0.7)
        .await
        .expect("search succeeds");

    // "compose file" scores 1.0, "plain docker" ~0.707, "bake file" 0.
    assert_eq!(hits, vec!["compose file".to_owned(), "plain docker".to_owned()]);
}

#[tokio::test]
async fn nothing_above_threshold_is_empty_not_an_error() {
    let corpus = Corpus::new("milo", vec![snippet("bake file", [0.0, 0.0, 1.0])]);
    let retrieval = EmbeddingRetrieval::new(Arc::new(KeywordEmbedder::default()));

    let hits = retrieval
        .similarity_search(&corpus, "docker compose", 0.7)
        .await
        .expect("search succeeds");

    assert!(hits.is_empty());
}

#[tokio::test]
async fn empty_corpus_skips_the_embedder() {
    let embedder = Arc::new(KeywordEmbedder::default());
    let retrieval = EmbeddingRetrieval::new(embedder.clone());

    let hits = retrieval
        .similarity_search(&Corpus::empty("bob"), "anything", 0.0)
        .await
        .expect("search succeeds");

    assert!(hits.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn query_embedding_failure_is_reported() {
    let corpus = Corpus::new("bob", vec![snippet("x", [1.0, 0.0, 0.0])]);
    let retrieval = EmbeddingRetrieval::new(Arc::new(KeywordEmbedder {
        fail: true,
        ..KeywordEmbedder::default()
    }));

    assert!(retrieval
        .similarity_search(&corpus, "docker", 0.7)
        .await
        .is_err());
}
