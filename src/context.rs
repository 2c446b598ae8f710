//! Engine-wide configuration and the shared handle that replaces this
//! crate's would-be global state.
//!
//! The source this crate is modeled on kept a package-level `Logger` and a
//! package-level LRU cache singleton; both made the storage kernel
//! impossible to run twice in one process and impossible to unit-test in
//! isolation. [`DatabaseContext`] is the fix: one value, constructed once,
//! owning the buffer pool and prefetch manager and passed by reference (or
//! `Arc`-cloned) into every [`crate::innodb::btree::BTree`] and
//! [`crate::innodb::segment::Segment`] call a caller makes.

use std::path::PathBuf;
use std::time::Duration;

use crate::innodb::buffer_pool::BufferPool;
use crate::innodb::btree::BTree;
use crate::innodb::constants::SIZE_PAGE_DEFAULT;
use crate::innodb::prefetch::{PrefetchManager, PrefetchRequest};
use crate::innodb::row::Schema;
use crate::innodb::tablespace::{Tablespace, TablespaceKind};
use crate::EngineError;

/// Every externally-tunable knob the storage kernel recognizes. Nothing in
/// `idb` reads an environment variable or a CLI flag directly; a caller
/// (the `idb-engine` demonstration binary, or any other embedder) builds
/// one of these and hands it to [`DatabaseContext::create`]/`open`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Buffer pool size in bytes. Frame count = this / 16384.
    pub buffer_pool_size: u64,
    /// Percentage of resident frames in the LRU's Young sublist.
    pub young_list_pct: u8,
    /// Percentage of resident frames in the LRU's Old sublist.
    pub old_list_pct: u8,
    /// Dwell time (ms) a frame must sit in Old before a hit promotes it.
    pub old_blocks_time_ms: u64,
    /// Dirty-frame ratio at which background flush would activate.
    pub flush_threshold: f64,
    /// Pages fetched per triggered read-ahead request.
    pub prefetch_size: u32,
    /// Worker threads draining the prefetch queue.
    pub prefetch_workers: usize,
    /// Maximum outstanding prefetch requests before the drop policy kicks in.
    pub prefetch_queue_max: usize,
    /// Directory holding per-table `.ibd` files.
    pub data_dir: PathBuf,
    /// Directory holding the system tablespace (`ibdata1`).
    pub base_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buffer_pool_size: 128 * 1024 * 1024,
            young_list_pct: 63,
            old_list_pct: 37,
            old_blocks_time_ms: 1000,
            flush_threshold: 0.75,
            prefetch_size: 64,
            prefetch_workers: 4,
            prefetch_queue_max: 64,
            data_dir: PathBuf::from("."),
            base_dir: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    /// Frame count the configured `buffer_pool_size` implies, assuming the
    /// default 16 KiB page.
    pub fn frame_count(&self) -> usize {
        (self.buffer_pool_size / SIZE_PAGE_DEFAULT as u64).max(1) as usize
    }
}

/// The shared handle threaded through every call into this crate's storage
/// kernel: one buffer pool over one open tablespace, plus the prefetch
/// manager riding on top of it.
///
/// A process that needs more than one open tablespace constructs more than
/// one `DatabaseContext` — there is deliberately no registry keyed by
/// `space_id` inside this type, since [`BufferPool`] itself owns exactly
/// one [`Tablespace`] and this crate's scope stops at a single clustered
/// tree per context (see DESIGN.md).
pub struct DatabaseContext {
    pool: BufferPool,
    prefetch: PrefetchManager,
    config: EngineConfig,
}

impl DatabaseContext {
    /// Create a brand-new tablespace at `path` and open it through a fresh
    /// buffer pool and prefetch manager sized from `config`.
    pub fn create(
        path: impl AsRef<std::path::Path>,
        space_id: u32,
        kind: TablespaceKind,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let tablespace = Tablespace::create(path, space_id, kind)?;
        Ok(Self::from_tablespace(tablespace, config))
    }

    /// Open an existing tablespace at `path`.
    pub fn open(path: impl AsRef<std::path::Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let tablespace = Tablespace::open(path)?;
        Ok(Self::from_tablespace(tablespace, config))
    }

    fn from_tablespace(tablespace: Tablespace, config: EngineConfig) -> Self {
        let pool = BufferPool::new(tablespace, config.frame_count());
        let prefetch = PrefetchManager::new(pool.clone(), config.prefetch_workers, config.prefetch_queue_max);
        DatabaseContext { pool, prefetch, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared buffer pool. Clone this (it is `Arc`-backed) to hand to
    /// code that outlives the context, or borrow it for one call.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Create a new clustered index over this context's tablespace.
    pub fn create_tree(&self, leaf_schema: Schema, index_id: u64) -> Result<BTree, EngineError> {
        BTree::create(&self.pool, leaf_schema, index_id)
    }

    /// Reopen a clustered index whose root page is already known.
    pub fn open_tree(&self, root_page_no: u32, leaf_schema: Schema) -> Result<BTree, EngineError> {
        BTree::open(&self.pool, root_page_no, leaf_schema)
    }

    /// Create a new secondary index over this context's tablespace.
    /// `leaf_schema` is the indexed columns followed by the primary key
    /// columns; `unique` selects the duplicate-key policy (spec §7).
    pub fn create_secondary_tree(
        &self,
        leaf_schema: Schema,
        index_id: u64,
        unique: bool,
    ) -> Result<BTree, EngineError> {
        BTree::create_secondary(&self.pool, leaf_schema, index_id, unique)
    }

    /// Reopen a secondary index whose root page is already known.
    pub fn open_secondary_tree(
        &self,
        root_page_no: u32,
        leaf_schema: Schema,
        unique: bool,
    ) -> Result<BTree, EngineError> {
        BTree::open_secondary(&self.pool, root_page_no, leaf_schema, unique)
    }

    /// Trigger speculative read-ahead of `[start_page, end_page]` at
    /// `priority` (clamped to 1..=10), with a deadline `ttl` from now.
    /// Returns immediately; warming happens on a prefetch worker thread.
    pub fn trigger_prefetch(&self, start_page: u32, end_page: u32, priority: u8, ttl: Duration) {
        let space_id = self.pool.with_tablespace(|ts| ts.space_id());
        self.prefetch
            .trigger_prefetch(PrefetchRequest::new(space_id, start_page, end_page, priority, ttl));
    }

    /// Flush every dirty frame back to the tablespace.
    pub fn flush_all(&self) -> Result<(), EngineError> {
        self.pool.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::row::{ColumnDef, Row, Value};
    use tempfile::NamedTempFile;

    #[test]
    fn config_frame_count_divides_by_page_size() {
        let mut config = EngineConfig::default();
        config.buffer_pool_size = 16384 * 10;
        assert_eq!(config.frame_count(), 10);
    }

    #[test]
    fn create_open_insert_and_find_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let ctx = DatabaseContext::create(tmp.path(), 1, TablespaceKind::User, EngineConfig::default()).unwrap();

        let schema = Schema::new(vec![ColumnDef::big_int("id"), ColumnDef::varchar("name", true)]);
        let tree = ctx.create_tree(schema, 1).unwrap();
        tree.insert(ctx.pool(), Row::new(vec![Value::BigInt(1), Value::VarChar("a".into())])).unwrap();

        let found = tree.find(ctx.pool(), &Value::BigInt(1)).unwrap().unwrap();
        assert_eq!(found.primary_key(), &Value::BigInt(1));
    }
}
