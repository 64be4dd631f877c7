//! Cosine-similarity ranking over a persona corpus.

use super::Corpus;

/// Cosine similarity of two vectors.
///
/// Returns `0.0` for vectors of different length or with zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Snippets whose similarity to `query` is at least `threshold`, best first.
///
/// Ties keep corpus order.
pub fn rank(corpus: &Corpus, query: &[f32], threshold: f32) -> Vec<(f32, String)> {
    let mut scored: Vec<(f32, String)> = corpus
        .snippets()
        .iter()
        .filter_map(|snippet| {
            let score = cosine_similarity(query, &snippet.embedding);
            (score >= threshold).then(|| (score, snippet.text.clone()))
        })
        .collect();

    // Stable sort, descending.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
}
