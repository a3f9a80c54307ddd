use criterion::{Criterion, criterion_group, criterion_main};
use policy_rag::embeddings::chunking::{ChunkingConfig, chunk_document};
use policy_rag::prompt::build_prompt;
use policy_rag::retrieval::rank;
use policy_rag::store::Record;
use std::hint::black_box;

const PARAGRAPH: &str = "Employees accrue annual leave at a rate of two days per month. \
    Leave requests must be submitted at least two weeks in advance! \
    Can unused leave be carried over? Up to five days may roll into the next year. \
    Remote work is permitted up to three days per week with manager approval. \
    Expense claims require itemized receipts and must be filed within thirty days. ";

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = PARAGRAPH.repeat(400);
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_document(black_box(&document), black_box(&config)))
    });

    let chunks: Vec<String> = chunk_document(&document, &config)
        .into_iter()
        .map(|chunk| chunk.content)
        .collect();
    let records: Vec<Record> = (0..2000)
        .map(|i| Record {
            chunk: format!("chunk {}", i),
            embedding: (0..384).map(|d| ((i * 31 + d) % 97) as f32 / 97.0).collect(),
        })
        .collect();
    let query: Vec<f32> = (0..384).map(|d| (d % 13) as f32 / 13.0).collect();

    c.bench_function("rank_2000x384", |b| {
        b.iter(|| rank(black_box(records.clone()), black_box(&query), 5))
    });

    c.bench_function("build_prompt", |b| {
        b.iter(|| build_prompt(black_box(&chunks[..5]), black_box("Can leave be carried over?")))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
