#![forbid(unsafe_code)]

use criterion::{Criterion, criterion_group, criterion_main};
use e2s_block::MemoryByteDevice;
use e2s_core::{DEFAULT_MAX_BLOCKS, Ext2Volume, OpenOptions};
use e2s_harness::{ImageBuilder, ROOT_INO, fixture_dir, load_sparse_fixture};
use e2s_types::{Cx, InodeNumber};
use std::hint::black_box;

fn open(bytes: Vec<u8>) -> Ext2Volume {
    Ext2Volume::from_device(
        &Cx::for_testing(),
        Box::new(MemoryByteDevice::new(bytes)),
        &OpenOptions::default(),
    )
    .expect("open volume")
}

fn bench_fixture_queries(c: &mut Criterion) {
    let bytes = load_sparse_fixture(&fixture_dir().join("ext2_multigroup_1k.json"))
        .expect("load multigroup fixture");
    let vol = open(bytes);
    let cx = Cx::for_testing();
    let logs = vol.resolve_path(&cx, "/logs").expect("logs").0;

    c.bench_function("list_directory_75_entries", |b| {
        b.iter(|| vol.list_directory(&cx, black_box(logs)).expect("list"));
    });

    c.bench_function("search_multigroup", |b| {
        b.iter(|| vol.search_by_name(&cx, black_box("target")).expect("search"));
    });
}

fn bench_block_map(c: &mut Criterion) {
    let mut builder = ImageBuilder::new().blocks_count(4096);
    let big = builder.file(ROOT_INO, "big.bin", 1024 * 1024);
    let vol = open(builder.build().expect("build").into_bytes());
    let cx = Cx::for_testing();
    let ino = InodeNumber(u64::from(big));

    c.bench_function("block_map_1mib_double_indirect", |b| {
        b.iter(|| {
            vol.block_map(&cx, black_box(ino), DEFAULT_MAX_BLOCKS)
                .expect("block map")
        });
    });
}

criterion_group!(traversal, bench_fixture_queries, bench_block_map);
criterion_main!(traversal);
