//! Implementation of `idb-engine info`.

use std::path::Path;

use colored::Colorize;

use idb::innodb::constants::{FIL_PAGE_DATA, FSP_HEADER_SIZE};
use idb::innodb::page::FspHeader;
use idb::innodb::tablespace::Tablespace;
use idb::util::hex;
use idb::EngineError;

/// Open an existing tablespace and print its FSP header fields.
pub fn execute(path: &Path) -> Result<(), EngineError> {
    let mut ts = Tablespace::open(path)?;
    let page0 = ts.load_page(0)?;
    let fsp = FspHeader::parse(&page0).ok_or(EngineError::PageCorrupted(0))?;

    println!("{}", "tablespace info".bold());
    println!("  path:        {}", path.display());
    println!("  page size:   {}", ts.page_size());
    println!("  space id:    {}", fsp.space_id);
    println!("  size:        {} pages", fsp.size);
    println!("  free limit:  {}", fsp.free_limit);
    println!("  frag n used: {}", fsp.frag_n_used);

    println!("\n{}", "fsp header bytes".bold());
    let header_bytes = &page0[FIL_PAGE_DATA..FIL_PAGE_DATA + FSP_HEADER_SIZE];
    println!("{}", hex::hex_dump(header_bytes, FIL_PAGE_DATA as u64));

    Ok(())
}
