//! Chunk builder throughput.
//!
//! Run with: cargo bench --bench chunk_builder_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use quadchain::documents::{ChunkBuilder, ChunkingConfig, SourcePage};

const EN: &str = "The compressor keeps the oil pressure at three bar during normal operation. \
Maintenance crews inspect the bearings every spring and replace worn seals. ";
const ZH: &str = "壓縮機在正常運轉時維持三巴的油壓。維修人員每年春季檢查軸承並更換磨損的密封件。";

fn pages(count: usize) -> Vec<SourcePage> {
    (0..count)
        .map(|i| {
            let body = if i % 2 == 0 { EN } else { ZH };
            let text = (0..12)
                .map(|p| format!("{}\n\n", body.repeat(1 + p % 3)))
                .collect::<String>();
            SourcePage::new(format!("doc{}.txt", i / 4), Some(i as u32 % 4 + 1), text)
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_build");
    for count in [16, 128] {
        let input = pages(count);
        let bytes: usize = input.iter().map(|p| p.text.len()).sum();
        group.throughput(Throughput::Bytes(bytes as u64));

        for threads in [1, 4] {
            let builder = ChunkBuilder::new(ChunkingConfig {
                parallel_threads: threads,
                ..ChunkingConfig::default()
            });
            group.bench_with_input(
                BenchmarkId::new(format!("threads_{threads}"), count),
                &input,
                |b, input| b.iter(|| black_box(builder.build(input))),
            );
        }
    }
    group.finish();
}

fn bench_segments(c: &mut Criterion) {
    let builder = ChunkBuilder::new(ChunkingConfig::default());
    let text = EN.repeat(200);
    c.bench_function("segments_single_page", |b| {
        b.iter(|| black_box(builder.segments(black_box(&text))))
    });
}

criterion_group!(benches, bench_build, bench_segments);
criterion_main!(benches);
