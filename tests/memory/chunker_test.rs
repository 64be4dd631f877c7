//! Sliding-window chunking and document discovery.

use legion::memory::chunker::{chunk_text, load_documents};

#[test]
fn windows_start_every_step_and_cover_the_tail() {
    let text = "a".repeat(1000);

    let chunks = chunk_text(&text, 512, 210);

    let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
    assert_eq!(lengths, vec![512, 512, 396, 94]);
    // Starts at 0, 302, 604 and 906; the last window reaches the end.
    assert_eq!(906usize.saturating_add(lengths[3]), 1000);
}

#[test]
fn consecutive_windows_share_the_overlap() {
    let text: String = ('a'..='z').cycle().take(100).collect();

    let chunks = chunk_text(&text, 30, 10);

    for pair in chunks.windows(2) {
        let tail: String = pair[0].chars().skip(20).collect();
        let head: String = pair[1].chars().take(10).collect();
        assert_eq!(tail, head);
    }
    assert!(text.ends_with(chunks.last().expect("at least one chunk").as_str()));
}

#[test]
fn short_text_is_a_single_window() {
    assert_eq!(chunk_text("hello", 512, 210), vec!["hello".to_owned()]);
}

#[test]
fn degenerate_sizes_yield_nothing() {
    assert!(chunk_text("", 512, 210).is_empty());
    assert!(chunk_text("abc", 0, 0).is_empty());
    assert!(chunk_text("abc", 10, 10).is_empty());
}

#[test]
fn load_documents_filters_by_extension_recursively() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("b.md"), "second").expect("write b");
    std::fs::write(dir.path().join("a.md"), "first").expect("write a");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");
    std::fs::create_dir(dir.path().join("nested")).expect("nested dir");
    std::fs::write(dir.path().join("nested").join("c.md"), "third").expect("write c");

    let documents = load_documents(dir.path(), "md").expect("documents load");

    assert_eq!(documents, vec!["first", "second", "third"]);
}

#[test]
fn load_documents_of_empty_directory_is_empty() {
    let dir = tempfile::tempdir().expect("temp dir");
    assert!(load_documents(dir.path(), "md").expect("walks").is_empty());
}
