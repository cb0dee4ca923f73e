use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;

use quadchain::documents::{ChunkBuilder, ChunkingConfig, load_directory};

fn config(threads: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 60,
        overlap: 0,
        separators: vec!["\n\n".into(), ". ".into(), " ".into()],
        min_len: 10,
        max_len: 200,
        clean_text: false,
        parallel_threads: threads,
        ..ChunkingConfig::default()
    }
}

fn write_corpus(temp: &TempDir) {
    let dir = temp.path();
    fs::write(
        dir.join("a_manual.txt"),
        "Open the intake valve before starting the pump.\n\nCheck the oil level daily.\u{000C}\
         Replace the filter cartridge every five hundred hours.",
    )
    .unwrap();
    fs::write(
        dir.join("b_scan.jsonl"),
        concat!(
            r#"{"source": "scan.pdf", "page": 3, "text": "The cooling loop holds forty litres of coolant."}"#,
            "\n\n",
            r#"{"source": "scan.pdf", "page": 4, "text": "Drain the loop every two years."}"#,
            "\n"
        ),
    )
    .unwrap();
    fs::write(dir.join("ignored.csv"), "a,b,c\n").unwrap();
    fs::create_dir_all(dir.join(".hidden")).unwrap();
    fs::write(dir.join(".hidden/notes.txt"), "Should never be read at all.").unwrap();
}

#[test]
fn test_directory_build_keeps_page_lineage() {
    let temp = TempDir::new().unwrap();
    write_corpus(&temp);

    let corpus = load_directory(temp.path()).unwrap();
    let sources: Vec<&str> = corpus.files.iter().map(|f| f.source.as_str()).collect();
    assert_eq!(sources, vec!["a_manual.txt", "b_scan.jsonl"]);
    assert_eq!(corpus.pages.len(), 4);

    let build = ChunkBuilder::new(config(2)).build(&corpus.pages);
    assert_eq!(build.stats.pages, 4);
    assert_eq!(build.stats.chunks, build.chunks.len());

    let ids: Vec<u32> = build.chunks.iter().map(|c| c.chunk_id.value()).collect();
    assert_eq!(ids, (0..build.chunks.len() as u32).collect::<Vec<_>>());

    let first = &build.chunks[0];
    assert_eq!(first.source, "a_manual.txt");
    assert_eq!(first.page, Some(1));
    assert_eq!(first.text, "Open the intake valve before starting the pump.");

    let pages: BTreeSet<(String, Option<u32>)> = build
        .chunks
        .iter()
        .map(|c| (c.source.clone(), c.page))
        .collect();
    assert!(pages.contains(&("a_manual.txt".to_string(), Some(2))));
    assert!(pages.contains(&("scan.pdf".to_string(), Some(3))));
    assert!(pages.contains(&("scan.pdf".to_string(), Some(4))));

    // Without overlap, offsets address the chunk text inside its page.
    for chunk in &build.chunks {
        let page = corpus
            .pages
            .iter()
            .find(|p| p.source == chunk.source && p.page == chunk.page)
            .unwrap();
        let slice: String = page
            .text
            .chars()
            .skip(chunk.char_offset_start)
            .take(chunk.char_offset_end - chunk.char_offset_start)
            .collect();
        assert_eq!(slice, chunk.text);
    }
}

#[test]
fn test_thread_count_does_not_change_output() {
    let temp = TempDir::new().unwrap();
    write_corpus(&temp);
    let corpus = load_directory(temp.path()).unwrap();

    let single = ChunkBuilder::new(config(1)).build(&corpus.pages);
    let parallel = ChunkBuilder::new(config(4)).build(&corpus.pages);
    assert_eq!(single.chunks, parallel.chunks);
    assert_eq!(single.stats, parallel.stats);
}

#[test]
fn test_rebuild_is_identical() {
    let temp = TempDir::new().unwrap();
    write_corpus(&temp);
    let corpus = load_directory(temp.path()).unwrap();
    let builder = ChunkBuilder::new(config(2));

    let first = builder.build(&corpus.pages);
    let second = builder.build(&corpus.pages);
    assert_eq!(first.chunks, second.chunks);
}

#[test]
fn test_malformed_page_record_reports_line() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("pages.jsonl"),
        "{\"source\": \"x\", \"text\": \"Fine line.\"}\nnot json\n",
    )
    .unwrap();

    let err = load_directory(temp.path()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}
