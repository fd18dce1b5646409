use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use folio_store::{Doc, NewBlock, Schema, SequentialIdGenerator, StoreConfig};

fn new_doc() -> Doc {
    let config = StoreConfig {
        capture_timeout_ms: 0,
        ..StoreConfig::default()
    };
    let mut doc = Doc::new("bench", yrs::Doc::new(), Arc::new(Schema::default_schema()), config)
        .with_id_generator(Box::new(SequentialIdGenerator::from_seed("bench")));
    doc.load().unwrap();
    doc.add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    doc.add_block(NewBlock::new("folio:note").with_id("note"), Some("page"), None)
        .unwrap();
    doc
}

/// A note holding `width` paragraphs, each nesting `depth` lists
fn populated_doc(width: usize, depth: usize) -> Doc {
    let mut doc = new_doc();
    let paragraphs = (0..width)
        .map(|i| NewBlock::new("folio:paragraph").with_id(format!("p{}", i)))
        .collect();
    doc.add_blocks(paragraphs, Some("note"), None).unwrap();
    for i in 0..width {
        let mut parent = format!("p{}", i);
        for level in 0..depth {
            let id = format!("p{}-{}", i, level);
            doc.add_block(NewBlock::new("folio:list").with_id(id.clone()), Some(&parent), None)
                .unwrap();
            parent = id;
        }
    }
    doc
}

fn bulk_insert(c: &mut Criterion) {
    c.bench_function("add_blocks_100", |b| {
        b.iter(|| {
            let mut doc = new_doc();
            let blocks = (0..100).map(|_| NewBlock::new("folio:paragraph")).collect();
            black_box(doc.add_blocks(blocks, Some("note"), None).unwrap())
        })
    });
}

fn parent_lookup(c: &mut Criterion) {
    let doc = populated_doc(50, 10);

    c.bench_function("get_parent_deep", |b| {
        b.iter(|| doc.get_parent(black_box("p49-9")))
    });
}

fn move_run(c: &mut Criterion) {
    let mut doc = populated_doc(50, 0);

    c.bench_function("move_blocks_10", |b| {
        b.iter(|| {
            let ids: Vec<String> = (0..10).map(|i| format!("p{}", i)).collect();
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            doc.move_blocks(black_box(&ids), "note", None, true).unwrap()
        })
    });
}

criterion_group!(benches, bulk_insert, parent_lookup, move_run);
criterion_main!(benches);
