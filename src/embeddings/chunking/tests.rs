use super::*;

fn numbered_log(lines: usize, width: usize) -> String {
    (0..lines)
        .map(|i| format!("{:0width$} log line", i, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn chunking_is_deterministic() {
    let text = numbered_log(50, 4);
    let config = ChunkingConfig {
        chunk_size: 120,
        overlap: 30,
    };

    let first = chunk_log("app.log", &text, &config).expect("chunk_log should succeed");
    let second = chunk_log("app.log", &text, &config).expect("chunk_log should succeed");

    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn every_line_is_covered() {
    let text = numbered_log(40, 4);
    let config = ChunkingConfig {
        chunk_size: 100,
        overlap: 25,
    };

    let chunks = chunk_log("app.log", &text, &config).expect("chunk_log should succeed");

    let mut covered = vec![false; 40];
    for chunk in &chunks {
        for line in chunk.line_start..=chunk.line_end {
            covered[line - 1] = true;
        }
    }
    assert!(covered.iter().all(|c| *c), "every source line must land in a chunk");

    // Line ranges never run backwards and chunks stay in file order.
    for window in chunks.windows(2) {
        assert!(window[1].line_start > window[0].line_start);
        assert!(window[1].line_start <= window[0].line_end + 1);
    }
}

#[test]
fn adjacent_chunks_overlap() {
    let text = numbered_log(30, 4);
    let config = ChunkingConfig {
        chunk_size: 100,
        overlap: 40,
    };

    let chunks = chunk_log("app.log", &text, &config).expect("chunk_log should succeed");
    assert!(chunks.len() > 1);

    for window in chunks.windows(2) {
        assert!(
            window[1].line_start <= window[0].line_end,
            "chunk starting at line {} does not overlap previous ending at {}",
            window[1].line_start,
            window[0].line_end
        );
    }
}

#[test]
fn overlap_must_be_smaller_than_chunk_size() {
    let config = ChunkingConfig {
        chunk_size: 100,
        overlap: 100,
    };

    let result = chunk_log("app.log", "some text", &config);
    assert!(matches!(result, Err(crate::LensError::Config(_))));
}

#[test]
fn empty_input_produces_no_chunks() {
    let config = ChunkingConfig::default();

    let chunks = chunk_log("app.log", "", &config).expect("chunk_log should succeed");
    assert!(chunks.is_empty());

    let chunks = chunk_log("app.log", "\n\n   \n", &config).expect("chunk_log should succeed");
    assert!(chunks.is_empty());
}

#[test]
fn chunk_ids_are_stable_provenance() {
    let text = numbered_log(10, 2);
    let config = ChunkingConfig {
        chunk_size: 1000,
        overlap: 0,
    };

    let chunks = chunk_log("server.log", &text, &config).expect("chunk_log should succeed");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "server.log:1-10");
    assert_eq!(chunks[0].source_file, "server.log");
    assert_eq!(chunks[0].line_start, 1);
    assert_eq!(chunks[0].line_end, 10);
}

#[test]
fn content_hash_matches_text() {
    let text = numbered_log(20, 3);
    let config = ChunkingConfig {
        chunk_size: 150,
        overlap: 20,
    };

    let chunks = chunk_log("app.log", &text, &config).expect("chunk_log should succeed");
    for chunk in &chunks {
        assert_eq!(chunk.content_hash, content_hash(&chunk.text));
    }
}

#[test]
fn oversized_single_line_still_progresses() {
    let long_line = "x".repeat(500);
    let text = format!("{long_line}\nshort line\n{long_line}");
    let config = ChunkingConfig {
        chunk_size: 100,
        overlap: 50,
    };

    let chunks = chunk_log("big.log", &text, &config).expect("chunk_log should succeed");

    // The first line alone exceeds the budget; the chunker must close the
    // chunk at the line boundary and keep making progress, never splitting
    // mid-line.
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 1));
    assert_eq!((chunks[1].line_start, chunks[1].line_end), (2, 3));
}

#[test]
fn ten_line_log_with_small_chunks() {
    // 10 lines at ~12 chars each, 40-char chunks with 10-char overlap.
    let text = (0..10)
        .map(|i| format!("line {i} error"))
        .collect::<Vec<_>>()
        .join("\n");
    let config = ChunkingConfig {
        chunk_size: 40,
        overlap: 10,
    };

    let chunks = chunk_log("short.log", &text, &config).expect("chunk_log should succeed");

    assert!(chunks.len() > 1, "expected multiple overlapping chunks");
    assert_eq!(chunks[0].line_start, 1);
    assert_eq!(chunks.last().expect("non-empty").line_end, 10);
}

#[test]
fn timestamp_range_extraction() {
    let text = "2024-01-15T10:30:45Z started\n2024-01-15 10:31:02 finished\nno timestamp here";
    let range = timestamp_range(text).expect("timestamps should be found");

    assert_eq!(range.0, "2024-01-15T10:30:45Z");
    assert_eq!(range.1, "2024-01-15T10:31:02");
}

#[test]
fn timestamp_range_absent() {
    assert_eq!(timestamp_range("nothing to see"), None);
}

#[test]
fn apache_timestamps_are_normalized() {
    let text = r#"127.0.0.1 - - [15/Jan/2024:10:30:45 +0000] "GET / HTTP/1.1" 200"#;
    let range = timestamp_range(text).expect("timestamp should be found");
    assert_eq!(range.0, "2024-01-15T10:30:45");
}
