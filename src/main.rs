#[cfg(not(feature = "cli"))]
compile_error!("The `idb-engine` binary requires the `cli` feature. Build with `--features cli`.");

use std::process;

use clap::Parser;
use colored::Colorize;

use idb::cli::app::{Cli, ColorMode, Commands};
use idb::cli::{demo, info};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {}
    }

    let result = match cli.command {
        Commands::Demo { path, rows, pool_frames } => {
            demo::execute(&path, &demo::DemoOptions { rows, pool_frames })
        }
        Commands::Info { path } => info::execute(&path),
    };

    if let Err(e) = result {
        eprintln!("{} {e}", "error:".red().bold());
        process::exit(1);
    }
}
