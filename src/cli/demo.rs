//! Implementation of `idb-engine demo`.

use std::path::Path;

use colored::Colorize;
use tracing::info;

use idb::context::{DatabaseContext, EngineConfig};
use idb::innodb::constants::SIZE_PAGE_DEFAULT;
use idb::innodb::row::{ColumnDef, Row, Schema, Value};
use idb::innodb::tablespace::TablespaceKind;
use idb::EngineError;

pub struct DemoOptions {
    pub rows: u32,
    pub pool_frames: usize,
}

/// Create a tablespace, build a clustered tree over the fixed demo schema,
/// insert `opts.rows` rows, scan them back, and print a summary.
pub fn execute(path: &Path, opts: &DemoOptions) -> Result<(), EngineError> {
    let config = EngineConfig {
        buffer_pool_size: opts.pool_frames as u64 * SIZE_PAGE_DEFAULT as u64,
        ..EngineConfig::default()
    };
    let ctx = DatabaseContext::create(path, 1, TablespaceKind::User, config)?;

    let schema = Schema::new(vec![ColumnDef::big_int("id"), ColumnDef::varchar("value", true)]);
    let tree = ctx.create_tree(schema, 1)?;
    info!(rows = opts.rows, "inserting demo rows");

    for i in 0..opts.rows {
        let row = Row::new(vec![Value::BigInt(i as i64), Value::VarChar(format!("row-{i}"))]);
        tree.insert(ctx.pool(), row)?;
    }

    let scanned = tree.scan_all(ctx.pool())?;
    let height = tree.height(ctx.pool())?;
    ctx.flush_all()?;

    println!("{}", "idb-engine demo".bold());
    println!("  tablespace: {}", path.display());
    println!("  rows inserted: {}", opts.rows);
    println!("  rows scanned:  {}", scanned.len());
    println!("  tree height:   {}", height);
    println!("  buffer pool hit ratio: {:.2}", ctx.pool().hit_ratio());
    if let (Some(first), Some(last)) = (scanned.first(), scanned.last()) {
        println!("  first key: {:?}  last key: {:?}", first.primary_key(), last.primary_key());
    }

    Ok(())
}
