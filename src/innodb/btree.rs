//! Clustered B+-tree index (C9): insert, point lookup, range scan, and
//! soft delete over a chain of INDEX pages.
//!
//! Built on the pieces below it rather than against raw tablespace I/O:
//! [`crate::innodb::segment::Segment`] supplies pages (fragment array first,
//! whole extents once a segment matures), [`crate::innodb::row`] turns typed
//! [`Row`]s into the bytes [`crate::innodb::record`] expects, and
//! [`crate::innodb::index`] already parses the INDEX/FSEG headers every page
//! here carries. This module is the write side that assembles those parts
//! into a tree: it owns page layout (infimum/supremum, the record heap, the
//! slot directory) and the split/promote algorithm that keeps the tree
//! balanced.
//!
//! Internal (non-leaf) pages reuse the exact same record machinery as leaf
//! pages: a node-pointer entry is just a two-column row, `(key, child page
//! number)`, encoded against a synthetic [`Schema`]. That means a single
//! page-assembly routine serves both leaf and internal pages; only the
//! schema and the `level` field differ.
//!
//! A root split never hands the root's page number to anyone else. The
//! root's old content moves into two freshly allocated children; the root
//! page itself is rewritten in place as an internal page with two entries.
//! This is the one case the usual "split in place, allocate a right
//! sibling" path can't handle, since the root can't pick up a `prev`/`next`
//! sibling of its own.

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};

use crate::innodb::buffer_pool::BufferPool;
use crate::innodb::constants::*;
use crate::innodb::index::{FsegHeader, IndexHeader};
use crate::innodb::page::FilHeader;
use crate::innodb::page_types::PageType;
use crate::innodb::record::{walk_compact_records, CompactRecordHeader, RecordType};
use crate::innodb::row::{decode_row, encode_row, ColumnDef, EncodedRecord, Row, Schema, Value};
use crate::innodb::segment::Segment;
use crate::EngineError;

/// Which kind of index a [`BTree`] is, and the duplicate-key policy that
/// follows from it (spec §7): the clustered index's primary key must be
/// unique and raises [`EngineError::DuplicatePrimaryKey`] on a collision; a
/// secondary-unique index raises the distinct [`EngineError::KeyExists`]
/// instead; a non-unique secondary index has no duplicate-key concept at all
/// and simply accepts the new row alongside the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Clustered,
    Secondary { unique: bool },
}

/// A table's index: one tree, rooted at a page number that never changes for
/// the tree's lifetime. [`IndexKind`] distinguishes the clustered index
/// (leaf rows are full table rows, keyed by the primary key) from a
/// secondary index (leaf rows are indexed columns plus primary key columns,
/// keyed by the indexed columns) — both are the same on-disk structure and
/// the same insert/split/search machinery below; only the duplicate-key
/// policy differs.
pub struct BTree {
    pub index_id: u64,
    pub root_page_no: u32,
    pub leaf_schema: Schema,
    kind: IndexKind,
    space_id: u32,
    page_size: usize,
    leaf_segment: Segment,
    internal_segment: Segment,
}

/// Internal-page rows are `(key, child_page_no)` pairs against this
/// synthetic two-column schema, built from the leaf schema's key column.
fn internal_schema(leaf_schema: &Schema) -> Schema {
    Schema::new(vec![leaf_schema.columns[0].clone(), ColumnDef::big_int("__child_page")])
}

fn internal_row(key: Value, child: u32) -> Row {
    Row::new(vec![key, Value::BigInt(child as i64)])
}

fn internal_child(row: &Row) -> u32 {
    match row.values[1] {
        Value::BigInt(v) => v as u32,
        _ => unreachable!("internal rows always carry a BigInt child pointer"),
    }
}

/// Indices (into a sorted record list) that become page-directory slot
/// owners: every 8th record, per [`PAGE_DIR_SLOT_MAX_N_OWNED`]. Whatever is
/// left over is folded into supremum's slot, same as the boundary slots
/// InnoDB never forces into the 4..8 range.
fn slot_owners(n: usize) -> Vec<usize> {
    let mut owners = Vec::new();
    let mut i = PAGE_DIR_SLOT_MAX_N_OWNED as usize - 1;
    while i < n {
        owners.push(i);
        i += PAGE_DIR_SLOT_MAX_N_OWNED as usize;
    }
    owners
}

fn encode_entries(schema: &Schema, rows: &[Row]) -> Result<Vec<EncodedRecord>, EngineError> {
    rows.iter().enumerate().map(|(i, r)| encode_row(schema, r, (i + 2) as u16, 0)).collect()
}

/// Total page bytes `rows` would occupy, including the directory and
/// trailer. Used to decide whether an insert fits or forces a split,
/// without building the page twice.
fn page_bytes_needed(schema: &Schema, rows: &[Row]) -> Result<usize, EngineError> {
    let encoded = encode_entries(schema, rows)?;
    let body: usize = encoded.iter().map(|e| e.len()).sum();
    let n_slots = 2 + slot_owners(rows.len()).len();
    Ok(PAGE_NEW_SUPREMUM + 8 + body + n_slots * PAGE_DIR_SLOT_SIZE + SIZE_FIL_TRAILER)
}

struct PageMeta {
    index_id: u64,
    level: u16,
    page_no: u32,
    prev: u32,
    next: u32,
    space_id: u32,
    leaf_fseg: FsegHeader,
    internal_fseg: FsegHeader,
}

/// Assemble one complete INDEX page: FIL header/trailer area, INDEX header,
/// both FSEG headers, infimum/supremum, the record heap (in `rows`' order,
/// which callers always keep sorted ascending by key), and the page
/// directory. The checksum is left at zero; it is recomputed when the page
/// is eventually flushed through the tablespace, same as every other
/// mutable page in this crate.
fn build_page(schema: &Schema, rows: &[Row], meta: &PageMeta, page_size: usize) -> Result<Vec<u8>, EngineError> {
    let mut page = vec![0u8; page_size];

    FilHeader {
        checksum: 0,
        page_number: meta.page_no,
        prev_page: meta.prev,
        next_page: meta.next,
        lsn: 0,
        page_type: PageType::Index,
        flush_lsn: 0,
        space_id: meta.space_id,
    }
    .encode(&mut page);

    meta.leaf_fseg.encode_leaf(&mut page);
    meta.internal_fseg.encode_internal(&mut page);

    let encoded = encode_entries(schema, rows)?;

    let first_origin = PAGE_NEW_SUPREMUM + 8;
    let mut extra_start = first_origin - REC_N_NEW_EXTRA_BYTES;
    let mut origins = Vec::with_capacity(encoded.len());
    for rec in &encoded {
        origins.push(extra_start + REC_N_NEW_EXTRA_BYTES);
        extra_start += rec.len();
    }
    let heap_top = extra_start + REC_N_NEW_EXTRA_BYTES;

    let rec_type = if meta.level == 0 { RecordType::Ordinary } else { RecordType::NodePtr };
    for (i, rec) in encoded.iter().enumerate() {
        let mut buf = rec.bytes.clone();
        let next_origin = origins.get(i + 1).copied().unwrap_or(PAGE_NEW_SUPREMUM);
        let next_offset = (next_origin as i64 - origins[i] as i64) as i16;
        let mut hdr = CompactRecordHeader::parse(&buf[0..REC_N_NEW_EXTRA_BYTES])
            .expect("encode_row just wrote a 5-byte header here");
        hdr.next_offset = next_offset;
        hdr.heap_no = (i + 2) as u16;
        hdr.rec_type = rec_type;
        hdr.encode(&mut buf[0..REC_N_NEW_EXTRA_BYTES]);
        let rec_extra_start = origins[i] - REC_N_NEW_EXTRA_BYTES;
        let end = rec_extra_start + buf.len();
        if end > page_size {
            return Err(EngineError::PageCorrupted(meta.page_no));
        }
        page[rec_extra_start..end].copy_from_slice(&buf);
    }

    let owners = slot_owners(rows.len());
    for &owner_idx in &owners {
        let extra_start = origins[owner_idx] - REC_N_NEW_EXTRA_BYTES;
        let mut hdr = CompactRecordHeader::parse(&page[extra_start..extra_start + REC_N_NEW_EXTRA_BYTES]).unwrap();
        hdr.n_owned = PAGE_DIR_SLOT_MAX_N_OWNED;
        hdr.encode(&mut page[extra_start..extra_start + REC_N_NEW_EXTRA_BYTES]);
    }
    let remainder = rows.len() - owners.len() * PAGE_DIR_SLOT_MAX_N_OWNED as usize;

    let infimum_next = origins.first().copied().unwrap_or(PAGE_NEW_SUPREMUM);
    CompactRecordHeader {
        n_owned: 1,
        delete_mark: false,
        min_rec: false,
        heap_no: 0,
        rec_type: RecordType::Infimum,
        next_offset: (infimum_next as i64 - PAGE_NEW_INFIMUM as i64) as i16,
    }
    .encode(&mut page[PAGE_NEW_INFIMUM - REC_N_NEW_EXTRA_BYTES..PAGE_NEW_INFIMUM]);
    page[PAGE_NEW_INFIMUM..PAGE_NEW_INFIMUM + 8].copy_from_slice(b"infimum\0");

    CompactRecordHeader {
        n_owned: (remainder + 1) as u8,
        delete_mark: false,
        min_rec: false,
        heap_no: 1,
        rec_type: RecordType::Supremum,
        next_offset: 0,
    }
    .encode(&mut page[PAGE_NEW_SUPREMUM - REC_N_NEW_EXTRA_BYTES..PAGE_NEW_SUPREMUM]);
    page[PAGE_NEW_SUPREMUM..PAGE_NEW_SUPREMUM + 8].copy_from_slice(b"supremum");

    let n_slots = 2 + owners.len();
    let trailer_start = page_size - SIZE_FIL_TRAILER;
    if trailer_start < heap_top + n_slots * PAGE_DIR_SLOT_SIZE {
        return Err(EngineError::PageCorrupted(meta.page_no));
    }
    let slot_dir_start = trailer_start - n_slots * PAGE_DIR_SLOT_SIZE;
    let mut slot_origins = Vec::with_capacity(n_slots);
    slot_origins.push(PAGE_NEW_INFIMUM);
    for &oi in &owners {
        slot_origins.push(origins[oi]);
    }
    slot_origins.push(PAGE_NEW_SUPREMUM);
    for (i, &origin) in slot_origins.iter().enumerate() {
        BigEndian::write_u16(&mut page[slot_dir_start + i * PAGE_DIR_SLOT_SIZE..], origin as u16);
    }

    let mut header = IndexHeader::new_leaf(meta.index_id);
    header.level = meta.level;
    header.n_recs = rows.len() as u16;
    header.n_heap_raw = 0x8000 | (rows.len() as u16 + 2);
    header.heap_top = heap_top as u16;
    header.n_dir_slots = n_slots as u16;
    header.encode(&mut page);

    Ok(page)
}

fn decode_page_rows(schema: &Schema, page: &[u8]) -> Result<Vec<(usize, CompactRecordHeader, Row)>, EngineError> {
    walk_compact_records(page)
        .into_iter()
        .map(|rec| {
            let row = decode_row(schema, page, rec.offset)?;
            Ok((rec.offset, rec.header, row))
        })
        .collect()
}

impl BTree {
    /// Create a brand-new, empty tree: two fresh segments (leaf and
    /// internal page chains) and a single empty leaf page as root.
    pub fn create(pool: &BufferPool, leaf_schema: Schema, index_id: u64) -> Result<Self, EngineError> {
        Self::create_with_kind(pool, leaf_schema, index_id, IndexKind::Clustered)
    }

    /// Create a brand-new secondary index: same page layout and
    /// insert/split machinery as a clustered tree, but leaf rows are keyed
    /// by the indexed columns rather than the primary key, and duplicate
    /// keys are handled per `unique` (spec §7) instead of always being
    /// fatal.
    pub fn create_secondary(
        pool: &BufferPool,
        leaf_schema: Schema,
        index_id: u64,
        unique: bool,
    ) -> Result<Self, EngineError> {
        Self::create_with_kind(pool, leaf_schema, index_id, IndexKind::Secondary { unique })
    }

    fn create_with_kind(
        pool: &BufferPool,
        leaf_schema: Schema,
        index_id: u64,
        kind: IndexKind,
    ) -> Result<Self, EngineError> {
        let (leaf_segment, internal_segment, space_id, page_size) =
            pool.with_tablespace(|ts| -> Result<(Segment, Segment, u32, usize), EngineError> {
                let leaf_segment = Segment::create(ts)?;
                let internal_segment = Segment::create(ts)?;
                Ok((leaf_segment, internal_segment, ts.space_id(), ts.page_size() as usize))
            })?;
        let root_page_no = pool.with_tablespace(|ts| leaf_segment.allocate_page(ts))?;

        let tree = BTree {
            index_id,
            root_page_no,
            leaf_schema,
            kind,
            space_id,
            page_size,
            leaf_segment,
            internal_segment,
        };
        tree.write_page(pool, root_page_no, &tree.leaf_schema.clone(), &[], 0, FIL_NULL, FIL_NULL)?;
        Ok(tree)
    }

    /// Reopen a tree whose root page number is already known. The leaf
    /// schema has no on-disk representation here (no SDI in this crate —
    /// see DESIGN.md), so the caller supplies it, same as it supplied it to
    /// `create`. Reopens as clustered; use [`BTree::open_secondary`] for a
    /// secondary index, since `IndexKind` isn't persisted either.
    pub fn open(pool: &BufferPool, root_page_no: u32, leaf_schema: Schema) -> Result<Self, EngineError> {
        Self::open_with_kind(pool, root_page_no, leaf_schema, IndexKind::Clustered)
    }

    /// Reopen a secondary index whose root page number is already known.
    pub fn open_secondary(
        pool: &BufferPool,
        root_page_no: u32,
        leaf_schema: Schema,
        unique: bool,
    ) -> Result<Self, EngineError> {
        Self::open_with_kind(pool, root_page_no, leaf_schema, IndexKind::Secondary { unique })
    }

    fn open_with_kind(
        pool: &BufferPool,
        root_page_no: u32,
        leaf_schema: Schema,
        kind: IndexKind,
    ) -> Result<Self, EngineError> {
        let (index_id, leaf_fseg, internal_fseg, space_id, page_size) = {
            let frame = pool.get_page(root_page_no)?;
            let page = frame.read();
            let header = IndexHeader::parse(&page).ok_or(EngineError::PageCorrupted(root_page_no))?;
            let leaf_fseg = FsegHeader::parse_leaf(&page).ok_or(EngineError::PageCorrupted(root_page_no))?;
            let internal_fseg = FsegHeader::parse_internal(&page).ok_or(EngineError::PageCorrupted(root_page_no))?;
            (header.index_id, leaf_fseg.clone(), internal_fseg.clone(), leaf_fseg.space_id, page.len())
        };

        let (leaf_segment, internal_segment) =
            pool.with_tablespace(|ts| -> Result<(Segment, Segment), EngineError> {
                let leaf_index = (leaf_fseg.offset as usize - INODE_ARR_OFFSET) / INODE_ENTRY_SIZE;
                let internal_index = (internal_fseg.offset as usize - INODE_ARR_OFFSET) / INODE_ENTRY_SIZE;
                let leaf_segment = Segment::open(ts, leaf_fseg.page_no, leaf_index)?;
                let internal_segment = Segment::open(ts, internal_fseg.page_no, internal_index)?;
                Ok((leaf_segment, internal_segment))
            })?;

        Ok(BTree { index_id, root_page_no, leaf_schema, kind, space_id, page_size, leaf_segment, internal_segment })
    }

    fn schema_for_level(&self, level: u16) -> Schema {
        if level == 0 { self.leaf_schema.clone() } else { internal_schema(&self.leaf_schema) }
    }

    /// Run `f`, and if it fails with an I/O-level error (a corrupted page or
    /// a failed read/write), attach this tree's id, `page_no`, and `op` so
    /// the failure can be traced back to the page it happened on. Errors
    /// that are already tree-level (a duplicate key, a missing row) pass
    /// through unchanged — they aren't failures of the storage underneath.
    fn with_page_ctx<T>(
        &self,
        op: &'static str,
        page_no: u32,
        f: impl FnOnce() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        f().map_err(|err| match err {
            EngineError::IoError(_) | EngineError::PageCorrupted(_) | EngineError::BufferPoolFull(_) => {
                err.in_tree_op(op, self.index_id as u32, page_no)
            }
            other => other,
        })
    }

    fn page_meta(&self, page_no: u32, level: u16, prev: u32, next: u32) -> PageMeta {
        PageMeta {
            index_id: self.index_id,
            level,
            page_no,
            prev,
            next,
            space_id: self.space_id,
            leaf_fseg: FsegHeader {
                space_id: self.space_id,
                page_no: self.leaf_segment.inode_page_no,
                offset: (INODE_ARR_OFFSET + self.leaf_segment.inode_index * INODE_ENTRY_SIZE) as u16,
            },
            internal_fseg: FsegHeader {
                space_id: self.space_id,
                page_no: self.internal_segment.inode_page_no,
                offset: (INODE_ARR_OFFSET + self.internal_segment.inode_index * INODE_ENTRY_SIZE) as u16,
            },
        }
    }

    fn write_page(
        &self,
        pool: &BufferPool,
        page_no: u32,
        schema: &Schema,
        rows: &[Row],
        level: u16,
        prev: u32,
        next: u32,
    ) -> Result<(), EngineError> {
        self.with_page_ctx("write_page", page_no, || {
            let meta = self.page_meta(page_no, level, prev, next);
            let bytes = build_page(schema, rows, &meta, self.page_size)?;
            let frame = pool.get_page(page_no)?;
            frame.write().copy_from_slice(&bytes);
            Ok(())
        })
    }

    fn alloc_page(&self, pool: &BufferPool, leaf: bool) -> Result<u32, EngineError> {
        self.with_page_ctx("alloc_page", self.root_page_no, || {
            pool.with_tablespace(|ts| {
                if leaf { self.leaf_segment.allocate_page(ts) } else { self.internal_segment.allocate_page(ts) }
            })
        })
    }

    fn relink_prev(&self, pool: &BufferPool, page_no: u32, new_prev: u32) -> Result<(), EngineError> {
        self.with_page_ctx("relink_prev", page_no, || {
            let frame = pool.get_page(page_no)?;
            let mut page = frame.write();
            BigEndian::write_u32(&mut page[FIL_PAGE_PREV..], new_prev);
            Ok(())
        })
    }

    fn read_leaf(&self, pool: &BufferPool, page_no: u32) -> Result<(Vec<Row>, u32, u32), EngineError> {
        self.with_page_ctx("read_leaf", page_no, || {
            let frame = pool.get_page(page_no)?;
            let page = frame.read();
            let fil = FilHeader::parse(&page).ok_or(EngineError::PageCorrupted(page_no))?;
            let rows = decode_page_rows(&self.leaf_schema, &page)?
                .into_iter()
                .filter(|(_, h, _)| !h.delete_mark)
                .map(|(_, _, r)| r)
                .collect();
            Ok((rows, fil.prev_page, fil.next_page))
        })
    }

    fn read_internal(&self, pool: &BufferPool, page_no: u32) -> Result<(Vec<Row>, u16, u32, u32), EngineError> {
        self.with_page_ctx("read_internal", page_no, || {
            let frame = pool.get_page(page_no)?;
            let page = frame.read();
            let fil = FilHeader::parse(&page).ok_or(EngineError::PageCorrupted(page_no))?;
            let header = IndexHeader::parse(&page).ok_or(EngineError::PageCorrupted(page_no))?;
            let schema = internal_schema(&self.leaf_schema);
            let rows = decode_page_rows(&schema, &page)?.into_iter().map(|(_, _, r)| r).collect();
            Ok((rows, header.level, fil.prev_page, fil.next_page))
        })
    }

    /// Path of page numbers from the root down to the leaf that should hold
    /// `key`, inclusive of both ends.
    fn descend_path(&self, pool: &BufferPool, key: &Value) -> Result<Vec<u32>, EngineError> {
        let mut path = vec![self.root_page_no];
        loop {
            let page_no = *path.last().unwrap();
            let is_leaf = self.with_page_ctx("descend", page_no, || {
                let frame = pool.get_page(page_no)?;
                let page = frame.read();
                Ok(IndexHeader::parse(&page).ok_or(EngineError::PageCorrupted(page_no))?.is_leaf())
            })?;
            if is_leaf {
                return Ok(path);
            }
            let (entries, _, _, _) = self.read_internal(pool, page_no)?;
            path.push(Self::choose_child(&entries, key)?);
        }
    }

    /// Rightmost entry whose key is `<=` the search key, since a node
    /// pointer's key is always its subtree's minimum.
    fn choose_child(entries: &[Row], key: &Value) -> Result<u32, EngineError> {
        let mut chosen = None;
        for row in entries {
            if row.primary_key().compare(key) != Ordering::Greater {
                chosen = Some(row);
            } else {
                break;
            }
        }
        chosen.or_else(|| entries.first()).map(internal_child).ok_or(EngineError::PageCorrupted(0))
    }

    fn leftmost_leaf(&self, pool: &BufferPool) -> Result<u32, EngineError> {
        let mut page_no = self.root_page_no;
        loop {
            let is_leaf = self.with_page_ctx("leftmost_leaf", page_no, || {
                let frame = pool.get_page(page_no)?;
                let page = frame.read();
                Ok(IndexHeader::parse(&page).ok_or(EngineError::PageCorrupted(page_no))?.is_leaf())
            })?;
            if is_leaf {
                return Ok(page_no);
            }
            let (entries, _, _, _) = self.read_internal(pool, page_no)?;
            page_no = internal_child(entries.first().ok_or(EngineError::PageCorrupted(page_no))?);
        }
    }

    /// Insert `row`, keyed by its column-0 value. On a clustered tree, fails
    /// with [`EngineError::DuplicatePrimaryKey`] if that key is already
    /// present and live (not soft-deleted) on its target leaf. On a
    /// secondary-unique tree, fails with [`EngineError::KeyExists`] instead.
    /// On a non-unique secondary tree, duplicate keys are not an error at
    /// all — the row is simply added alongside the existing ones.
    pub fn insert(&self, pool: &BufferPool, row: Row) -> Result<(), EngineError> {
        let key = row.primary_key().clone();
        let path = self.descend_path(pool, &key)?;
        self.insert_leaf_row(pool, &path, row)
    }

    fn insert_leaf_row(&self, pool: &BufferPool, path: &[u32], row: Row) -> Result<(), EngineError> {
        let leaf_no = *path.last().unwrap();
        let (mut rows, prev, next) = self.read_leaf(pool, leaf_no)?;

        let key = row.primary_key().clone();
        let is_duplicate = rows.iter().any(|r| r.primary_key().compare(&key) == Ordering::Equal);
        if is_duplicate {
            match self.kind {
                IndexKind::Clustered => return Err(EngineError::DuplicatePrimaryKey(format!("{key:?}"))),
                IndexKind::Secondary { unique: true } => return Err(EngineError::KeyExists(format!("{key:?}"))),
                IndexKind::Secondary { unique: false } => {}
            }
        }
        let pos = rows.partition_point(|r| r.primary_key().compare(&key) == Ordering::Less);
        rows.insert(pos, row);

        if page_bytes_needed(&self.leaf_schema, &rows)? <= self.page_size {
            return self.write_page(pool, leaf_no, &self.leaf_schema, &rows, 0, prev, next);
        }

        let mid = rows.len() / 2;
        let right = rows.split_off(mid);
        let left = rows;
        let promoted_key = right[0].primary_key().clone();

        if path.len() == 1 {
            return self.split_root(pool, left, right, 0);
        }

        let new_leaf_no = self.alloc_page(pool, true)?;
        self.write_page(pool, leaf_no, &self.leaf_schema, &left, 0, prev, new_leaf_no)?;
        self.write_page(pool, new_leaf_no, &self.leaf_schema, &right, 0, leaf_no, next)?;
        if next != FIL_NULL {
            self.relink_prev(pool, next, new_leaf_no)?;
        }

        self.promote(pool, &path[..path.len() - 1], promoted_key, new_leaf_no)
    }

    /// Insert a freshly-created `(key, child_no)` node pointer into the
    /// page at the tail of `ancestor_path`, splitting (and recursing
    /// upward) as needed.
    fn promote(&self, pool: &BufferPool, ancestor_path: &[u32], key: Value, child_no: u32) -> Result<(), EngineError> {
        let parent_no = *ancestor_path.last().unwrap();
        let (mut entries, level, prev, next) = self.read_internal(pool, parent_no)?;

        let pos = entries.partition_point(|r| r.primary_key().compare(&key) == Ordering::Less);
        entries.insert(pos, internal_row(key, child_no));

        let schema = internal_schema(&self.leaf_schema);
        if page_bytes_needed(&schema, &entries)? <= self.page_size {
            return self.write_page(pool, parent_no, &schema, &entries, level, prev, next);
        }

        let mid = entries.len() / 2;
        let right = entries.split_off(mid);
        let left = entries;
        let promoted_key = right[0].primary_key().clone();

        if ancestor_path.len() == 1 {
            return self.split_root(pool, left, right, level);
        }

        let new_node_no = self.alloc_page(pool, false)?;
        self.write_page(pool, parent_no, &schema, &left, level, prev, new_node_no)?;
        self.write_page(pool, new_node_no, &schema, &right, level, parent_no, next)?;
        if next != FIL_NULL {
            self.relink_prev(pool, next, new_node_no)?;
        }

        self.promote(pool, &ancestor_path[..ancestor_path.len() - 1], promoted_key, new_node_no)
    }

    /// Split the root: its old content (now partitioned into `left`/`right`,
    /// each at `child_level`) moves into two fresh pages; the root page
    /// itself is rewritten in place as an internal page one level higher,
    /// pointing at both.
    fn split_root(&self, pool: &BufferPool, left: Vec<Row>, right: Vec<Row>, child_level: u16) -> Result<(), EngineError> {
        let is_leaf_child = child_level == 0;
        let left_no = self.alloc_page(pool, is_leaf_child)?;
        let right_no = self.alloc_page(pool, is_leaf_child)?;
        let child_schema = self.schema_for_level(child_level);

        self.write_page(pool, left_no, &child_schema, &left, child_level, FIL_NULL, right_no)?;
        self.write_page(pool, right_no, &child_schema, &right, child_level, left_no, FIL_NULL)?;

        let left_key = left[0].primary_key().clone();
        let right_key = right[0].primary_key().clone();
        let root_entries = vec![internal_row(left_key, left_no), internal_row(right_key, right_no)];
        let root_schema = internal_schema(&self.leaf_schema);
        self.write_page(pool, self.root_page_no, &root_schema, &root_entries, child_level + 1, FIL_NULL, FIL_NULL)
    }

    /// Point lookup. Returns `None` for a key that was never inserted or
    /// has since been soft-deleted.
    pub fn find(&self, pool: &BufferPool, key: &Value) -> Result<Option<Row>, EngineError> {
        let leaf_no = *self.descend_path(pool, key)?.last().unwrap();
        let (rows, _, _) = self.read_leaf(pool, leaf_no)?;
        Ok(rows.into_iter().find(|r| r.primary_key().compare(key) == Ordering::Equal))
    }

    /// Like [`BTree::find`], but a miss is [`EngineError::KeyNotFound`]
    /// instead of `None` — for callers that treat a missing key as
    /// exceptional rather than a normal branch.
    pub fn get(&self, pool: &BufferPool, key: &Value) -> Result<Row, EngineError> {
        self.find(pool, key)?.ok_or(EngineError::KeyNotFound)
    }

    /// Rows with `from <= key <= to` (either bound `None` means unbounded),
    /// walked leaf-to-leaf via the sibling chain rather than re-descending
    /// from the root for each page.
    pub fn range(&self, pool: &BufferPool, from: Option<&Value>, to: Option<&Value>) -> Result<Vec<Row>, EngineError> {
        let mut leaf_no = match from {
            Some(key) => *self.descend_path(pool, key)?.last().unwrap(),
            None => self.leftmost_leaf(pool)?,
        };

        let mut out = Vec::new();
        loop {
            let (rows, _, next) = self.read_leaf(pool, leaf_no)?;
            for row in rows {
                let key = row.primary_key();
                if let Some(f) = from {
                    if key.compare(f) == Ordering::Less {
                        continue;
                    }
                }
                if let Some(t) = to {
                    if key.compare(t) == Ordering::Greater {
                        return Ok(out);
                    }
                }
                out.push(row);
            }
            if next == FIL_NULL {
                return Ok(out);
            }
            leaf_no = next;
        }
    }

    /// Every live row in key order.
    pub fn scan_all(&self, pool: &BufferPool) -> Result<Vec<Row>, EngineError> {
        self.range(pool, None, None)
    }

    /// Soft-delete: sets the record's delete-mark bit rather than removing
    /// it from the page. A later rewrite of that page (from an unrelated
    /// insert or split) drops marked records for good, same as InnoDB's own
    /// purge eventually reclaiming the space. Returns `false` if `key` was
    /// not present (or already deleted).
    pub fn delete(&self, pool: &BufferPool, key: &Value) -> Result<bool, EngineError> {
        let leaf_no = *self.descend_path(pool, key)?.last().unwrap();
        self.with_page_ctx("delete", leaf_no, || {
            let frame = pool.get_page(leaf_no)?;
            let mut page = frame.write();
            let records = decode_page_rows(&self.leaf_schema, &page)?;
            let Some((offset, header, _)) = records
                .iter()
                .find(|(_, h, r)| !h.delete_mark && r.primary_key().compare(key) == Ordering::Equal)
            else {
                return Ok(false);
            };
            let mut marked = header.clone();
            marked.delete_mark = true;
            let extra_start = offset - REC_N_NEW_EXTRA_BYTES;
            marked.encode(&mut page[extra_start..extra_start + REC_N_NEW_EXTRA_BYTES]);
            Ok(true)
        })
    }

    /// Height of the tree, root inclusive (1 for a tree with only a leaf
    /// root). Diagnostic only.
    pub fn height(&self, pool: &BufferPool) -> Result<u32, EngineError> {
        self.with_page_ctx("height", self.root_page_no, || {
            let frame = pool.get_page(self.root_page_no)?;
            let page = frame.read();
            let header = IndexHeader::parse(&page).ok_or(EngineError::PageCorrupted(self.root_page_no))?;
            Ok(header.level as u32 + 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::tablespace::{Tablespace, TablespaceKind};
    use tempfile::NamedTempFile;

    fn schema() -> Schema {
        Schema::new(vec![ColumnDef::big_int("id"), ColumnDef::varchar("payload", false)])
    }

    fn pool() -> (NamedTempFile, BufferPool) {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        (tmp, BufferPool::new(ts, 64))
    }

    fn row(id: i64, payload_len: usize) -> Row {
        Row::new(vec![Value::BigInt(id), Value::VarChar("x".repeat(payload_len))])
    }

    #[test]
    fn insert_then_find_round_trips() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();
        tree.insert(&pool, row(7, 10)).unwrap();

        let found = tree.find(&pool, &Value::BigInt(7)).unwrap().unwrap();
        assert_eq!(found.primary_key(), &Value::BigInt(7));
        assert!(tree.find(&pool, &Value::BigInt(8)).unwrap().is_none());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();
        let err = tree.insert(&pool, row(1, 4)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePrimaryKey(_)));
    }

    #[test]
    fn secondary_unique_duplicate_key_raises_key_exists() {
        let (_tmp, pool) = pool();
        let tree = BTree::create_secondary(&pool, schema(), 1, true).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();
        let err = tree.insert(&pool, row(1, 4)).unwrap_err();
        assert!(matches!(err, EngineError::KeyExists(_)));
    }

    #[test]
    fn secondary_non_unique_allows_duplicate_keys() {
        let (_tmp, pool) = pool();
        let tree = BTree::create_secondary(&pool, schema(), 1, false).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();

        let scanned = tree.scan_all(&pool).unwrap();
        assert_eq!(scanned.len(), 2, "non-unique secondary index must keep both rows for a repeated key");
    }

    #[test]
    fn many_inserts_split_and_stay_ordered() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();

        let mut ids: Vec<i64> = (0..400).collect();
        // Insert out of order so the tree exercises splits on both edges.
        ids.sort_by_key(|&id| (id * 2654435761) as u32);
        for id in &ids {
            tree.insert(&pool, row(*id, 120)).unwrap();
        }

        assert!(tree.height(&pool).unwrap() > 1, "400 wide rows must force at least one split");

        let scanned = tree.scan_all(&pool).unwrap();
        assert_eq!(scanned.len(), 400);
        let keys: Vec<i64> = scanned
            .iter()
            .map(|r| match r.primary_key() {
                Value::BigInt(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "scan must return rows in ascending key order");
    }

    #[test]
    fn range_scan_respects_bounds() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();
        for id in 0..50 {
            tree.insert(&pool, row(id, 8)).unwrap();
        }

        let slice = tree.range(&pool, Some(&Value::BigInt(10)), Some(&Value::BigInt(20))).unwrap();
        assert_eq!(slice.len(), 11);
        assert_eq!(slice.first().unwrap().primary_key(), &Value::BigInt(10));
        assert_eq!(slice.last().unwrap().primary_key(), &Value::BigInt(20));
    }

    #[test]
    fn delete_hides_row_from_find_and_scan() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();
        tree.insert(&pool, row(2, 4)).unwrap();

        assert!(tree.delete(&pool, &Value::BigInt(1)).unwrap());
        assert!(!tree.delete(&pool, &Value::BigInt(1)).unwrap());
        assert!(tree.find(&pool, &Value::BigInt(1)).unwrap().is_none());
        assert_eq!(tree.scan_all(&pool).unwrap().len(), 1);
    }

    #[test]
    fn io_error_reading_a_missing_page_is_wrapped_with_tree_context() {
        let (_tmp, pool) = pool();
        let mut tree = BTree::create(&pool, schema(), 3).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();

        // Point the root at a page number past the tablespace's preallocated
        // extent so the read underneath fails with a real I/O error, then
        // confirm `height` attaches this tree's id and the offending page
        // rather than letting a bare IoError bubble up.
        let bogus_page = 900_000_000u32;
        tree.root_page_no = bogus_page;

        let err = tree.height(&pool).unwrap_err();
        match err {
            EngineError::TreeOp { op, tree: tree_id, page, source } => {
                assert_eq!(op, "height");
                assert_eq!(tree_id, 3);
                assert_eq!(page, bogus_page);
                assert!(matches!(*source, EngineError::IoError(_)));
            }
            other => panic!("expected TreeOp, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_key_error_is_not_wrapped() {
        let (_tmp, pool) = pool();
        let tree = BTree::create(&pool, schema(), 1).unwrap();
        tree.insert(&pool, row(1, 4)).unwrap();
        let err = tree.insert(&pool, row(1, 4)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePrimaryKey(_)), "tree-level errors should pass through in_tree_op untouched");
    }

    #[test]
    fn reopen_recovers_existing_tree() {
        let (_tmp, pool) = pool();
        let root_page_no = {
            let tree = BTree::create(&pool, schema(), 9).unwrap();
            tree.insert(&pool, row(1, 4)).unwrap();
            tree.root_page_no
        };
        let reopened = BTree::open(&pool, root_page_no, schema()).unwrap();
        assert_eq!(reopened.index_id, 9);
        assert!(reopened.find(&pool, &Value::BigInt(1)).unwrap().is_some());
    }
}
