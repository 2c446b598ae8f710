//! Criterion benchmarks for idb-engine's core storage kernel operations.
//!
//! Benchmarks cover:
//! - FIL header parsing (`FilHeader::parse`)
//! - Page checksum validation and recalculation (CRC-32C)
//! - Buffer pool hit/miss latency
//! - B+-tree insert and point-lookup throughput

use byteorder::{BigEndian, ByteOrder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::NamedTempFile;

use idb::innodb::btree::BTree;
use idb::innodb::buffer_pool::BufferPool;
use idb::innodb::checksum::{recalculate_checksum, validate_checksum};
use idb::innodb::constants::*;
use idb::innodb::page::FilHeader;
use idb::innodb::row::{ColumnDef, Row, Schema, Value};
use idb::innodb::tablespace::{Tablespace, TablespaceKind};

const PAGE_SIZE: u32 = 16384;
const PS: usize = PAGE_SIZE as usize;

// ---------------------------------------------------------------------------
// Synthetic page builder
// ---------------------------------------------------------------------------

/// Build a minimal INDEX-shaped page with a valid CRC-32C checksum.
fn build_index_page(page_num: u32, space_id: u32, lsn: u64) -> Vec<u8> {
    let mut page = vec![0u8; PS];

    BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], page_num);
    BigEndian::write_u32(&mut page[FIL_PAGE_PREV..], FIL_NULL);
    BigEndian::write_u32(&mut page[FIL_PAGE_NEXT..], FIL_NULL);
    BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], lsn);
    BigEndian::write_u16(&mut page[FIL_PAGE_TYPE..], 17855); // INDEX
    BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_ID..], space_id);

    let ph = FIL_PAGE_DATA;
    BigEndian::write_u16(&mut page[ph + PAGE_N_DIR_SLOTS..], 2);
    BigEndian::write_u16(&mut page[ph + PAGE_N_HEAP..], 0x8002);
    BigEndian::write_u16(&mut page[ph + PAGE_N_RECS..], 0);
    BigEndian::write_u16(&mut page[ph + PAGE_LEVEL..], 0);
    BigEndian::write_u64(&mut page[ph + PAGE_INDEX_ID..], 42);

    let trailer = PS - SIZE_FIL_TRAILER;
    BigEndian::write_u32(&mut page[trailer + 4..], (lsn & 0xFFFF_FFFF) as u32);

    recalculate_checksum(&mut page, PAGE_SIZE);
    page
}

// ---------------------------------------------------------------------------
// Benchmark: FilHeader::parse
// ---------------------------------------------------------------------------

fn bench_fil_header_parse(c: &mut Criterion) {
    let page = build_index_page(1, 1, 5000);

    c.bench_function("fil_header_parse_single_page", |b| {
        b.iter(|| {
            black_box(FilHeader::parse(black_box(&page)).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark: checksum validation and recalculation
// ---------------------------------------------------------------------------

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");

    let page = build_index_page(1, 1, 5000);
    group.bench_function("validate_crc32c", |b| {
        b.iter(|| {
            black_box(validate_checksum(black_box(&page), PAGE_SIZE));
        });
    });

    group.bench_function("recalculate_crc32c", |b| {
        b.iter_batched(
            || page.clone(),
            |mut p| {
                recalculate_checksum(black_box(&mut p), PAGE_SIZE);
                p
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: buffer pool hit/miss
// ---------------------------------------------------------------------------

fn bench_buffer_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    group.bench_function("cold_miss", |b| {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        let pool = BufferPool::new(ts, 64);
        let mut next_page = 0u32;
        b.iter(|| {
            let page_no = next_page % 64;
            next_page = next_page.wrapping_add(1);
            black_box(pool.get_page(black_box(page_no)).unwrap());
        });
    });

    group.bench_function("warm_hit", |b| {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        let pool = BufferPool::new(ts, 64);
        pool.get_page(0).unwrap();
        b.iter(|| {
            black_box(pool.get_page(black_box(0)).unwrap());
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: B+-tree insert and lookup
// ---------------------------------------------------------------------------

fn demo_schema() -> Schema {
    Schema::new(vec![ColumnDef::big_int("id"), ColumnDef::varchar("value", false)])
}

fn bench_btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for n in [100u64, 1_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let tmp = NamedTempFile::new().unwrap();
                    let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
                    let pool = BufferPool::new(ts, 4096);
                    let tree = BTree::create(&pool, demo_schema(), 1).unwrap();
                    (tmp, pool, tree)
                },
                |(_tmp, pool, tree)| {
                    for i in 0..n {
                        tree.insert(
                            &pool,
                            Row::new(vec![
                                Value::BigInt(i as i64),
                                Value::VarChar(format!("row-{i}")),
                            ]),
                        )
                        .unwrap();
                    }
                    black_box(&tree);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_btree_find(c: &mut Criterion) {
    let tmp = NamedTempFile::new().unwrap();
    let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
    let pool = BufferPool::new(ts, 4096);
    let tree = BTree::create(&pool, demo_schema(), 1).unwrap();
    for i in 0..1_000i64 {
        tree.insert(&pool, Row::new(vec![Value::BigInt(i), Value::VarChar(format!("row-{i}"))]))
            .unwrap();
    }

    c.bench_function("btree_find_mid_key", |b| {
        b.iter(|| {
            black_box(tree.find(&pool, black_box(&Value::BigInt(500))).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_fil_header_parse,
    bench_checksum,
    bench_buffer_pool,
    bench_btree_insert,
    bench_btree_find,
);
criterion_main!(benches);
