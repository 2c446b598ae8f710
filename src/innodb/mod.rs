//! InnoDB on-disk structures: pages, the buffer pool, the extent/segment
//! allocator, and the clustered B+-tree built on top of them.
//!
//! Start with [`tablespace::Tablespace`] to open or create a `.ibd`/`ibdata1`
//! file, wrap it in a [`buffer_pool::BufferPool`] (or, more commonly, go
//! through [`crate::context::DatabaseContext`], which builds both), and use
//! [`btree::BTree`] to insert, find, scan, and delete rows.

pub mod block_file;
pub mod btree;
pub mod buffer_pool;
pub mod checksum;
pub mod constants;
pub mod fsp;
pub mod index;
pub mod lru;
pub mod page;
pub mod page_types;
pub mod prefetch;
pub mod record;
pub mod row;
pub mod segment;
pub mod tablespace;
