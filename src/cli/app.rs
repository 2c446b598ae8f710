//! Command-line surface for the `idb-engine` demonstration binary.
//!
//! Deliberately small next to the library it fronts: the core kernel has no
//! schema catalog (no `.frm` parsing — see DESIGN.md), so every subcommand
//! here works against one fixed demo schema, `(id BIGINT, value VARCHAR)`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "idb-engine", version, about = "InnoDB-style storage kernel demo")]
pub struct Cli {
    /// Control ANSI color in output.
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a tablespace, build a clustered tree, insert rows, and scan
    /// them back, printing a summary of each step.
    Demo {
        /// Path to the tablespace file to create. Overwritten if present.
        path: PathBuf,
        /// Number of demo rows to insert.
        #[arg(long, default_value_t = 200)]
        rows: u32,
        /// Buffer pool capacity in frames.
        #[arg(long, default_value_t = 64)]
        pool_frames: usize,
    },
    /// Open an existing tablespace and print its FSP header.
    Info {
        /// Path to an existing tablespace file.
        path: PathBuf,
    },
}
