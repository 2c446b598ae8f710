//! `idb`: a storage kernel modeled on InnoDB's on-disk engine.
//!
//! Three subsystems interlock here:
//!
//! - [`innodb::buffer_pool`] — a fixed-size page cache ([`innodb::block_file`]
//!   does the raw I/O) ordered by a midpoint-insertion LRU ([`innodb::lru`])
//!   and warmed ahead of demand by [`innodb::prefetch`].
//! - [`innodb::tablespace`], [`innodb::fsp`], [`innodb::segment`] — the
//!   extent/segment/page allocator built on the FSP/XDES/INODE structures.
//! - [`innodb::btree`] — the clustered B+-tree that stores rows
//!   ([`innodb::row`], [`innodb::record`]) in key order.
//!
//! [`context`] threads configuration and the shared buffer pool through all
//! three instead of relying on package-level statics.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`innodb::page`] | FIL header/trailer, FSP header codecs |
//! | [`innodb::page_types`] | the on-disk page type tag |
//! | [`innodb::checksum`] | CRC-32C (and legacy fold) page checksums |
//! | [`innodb::constants`] | byte offsets for every on-disk structure |
//! | [`innodb::block_file`] | page-granular file I/O |
//! | [`innodb::buffer_pool`] | fixed-capacity page cache |
//! | [`innodb::lru`] | midpoint-insertion Young/Old list |
//! | [`innodb::prefetch`] | priority-queued read-ahead worker pool |
//! | [`innodb::fsp`] | extent descriptors (XDES) |
//! | [`innodb::segment`] | file segments (INODE), fragment/extent allocation |
//! | [`innodb::tablespace`] | one open `.ibd`/`ibdata1` file and its allocator |
//! | [`innodb::index`] | INDEX page header and FSEG header codecs |
//! | [`innodb::record`] | Compact record header and variable-length prefix |
//! | [`innodb::row`] | schema-driven row encode/decode over records |
//! | [`innodb::btree`] | clustered B+-tree insert/search/scan/delete |
//!
//! ## Quick example
//!
//! ```no_run
//! use idb::context::{DatabaseContext, EngineConfig};
//! use idb::innodb::row::{ColumnDef, Row, Schema, Value};
//! use idb::innodb::tablespace::TablespaceKind;
//!
//! let ctx = DatabaseContext::create("ibdata1", 1, TablespaceKind::System, EngineConfig::default()).unwrap();
//! let schema = Schema::new(vec![ColumnDef::big_int("id"), ColumnDef::varchar("name", true)]);
//! let tree = ctx.create_tree(schema, 1).unwrap();
//! tree.insert(ctx.pool(), Row::new(vec![Value::BigInt(1), Value::VarChar("a".into())])).unwrap();
//! ```

pub mod context;
pub mod innodb;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

use thiserror::Error;

/// Errors surfaced by the storage kernel.
///
/// `Deadlock` and `Timeout` are reserved for the lock manager, which sits
/// outside this crate's scope; no operation here raises them today.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("page {0} not found in tablespace")]
    PageNotFound(u32),
    #[error("page {0} failed checksum or structural validation")]
    PageCorrupted(u32),
    #[error("buffer pool full: {0}")]
    BufferPoolFull(String),
    #[error("tablespace exhausted: {0}")]
    TablespaceFull(String),
    #[error("key already exists: {0}")]
    KeyExists(String),
    #[error("duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),
    #[error("key not found")]
    KeyNotFound,
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("deadlock detected")]
    Deadlock,
    #[error("operation timed out")]
    Timeout,
    #[error("{op} failed on tree {tree} page {page}: {source}")]
    TreeOp {
        op: &'static str,
        tree: u32,
        page: u32,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Wrap a lower-level error with the B+-tree operation context that
    /// produced it: `IoError`/`PageCorrupted` otherwise bubble up unchanged,
    /// but the tree layer attaches `tree=<id>, page=<no>, op=<...>` before
    /// handing them further up.
    pub fn in_tree_op(self, op: &'static str, tree: u32, page: u32) -> EngineError {
        EngineError::TreeOp { op, tree, page, source: Box::new(self) }
    }
}
