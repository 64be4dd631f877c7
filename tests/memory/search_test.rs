//! Cosine ranking.

use legion::memory::search::{cosine_similarity, rank};
use legion::memory::{Corpus, Snippet};

#[test]
fn similarity_is_scale_invariant() {
    let a = [1.0, 2.0, 3.0];
    let b = [2.0, 4.0, 6.0];
    assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
}

#[test]
fn opposite_vectors_score_minus_one() {
    assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
}

#[test]
fn threshold_is_inclusive_and_ties_keep_corpus_order() {
    let corpus = Corpus::new(
        "bob",
        vec![
            Snippet {
                text: "first".to_owned(),
                embedding: vec![1.0, 0.0],
            },
            Snippet {
                text: "second".to_owned(),
                embedding: vec![2.0, 0.0],
            },
            Snippet {
                text: "off axis".to_owned(),
                embedding: vec![0.0, 1.0],
            },
        ],
    );

    let ranked = rank(&corpus, &[1.0, 0.0], 1.0);

    let texts: Vec<&str> = ranked.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
}
