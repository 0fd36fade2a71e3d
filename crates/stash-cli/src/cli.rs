use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stash",
    about = "Stash -- cache-aside store for binary media assets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML). Defaults to ./stash.toml when present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store directory (default `./stash-data`); overrides `store.root`.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve assets: serve from the store or fetch and persist
    Resolve(ResolveArgs),
    /// List stored records
    Ls,
    /// Delete stored records
    Rm(RmArgs),
    /// Show store statistics and schema
    Stat,
    /// Reclaim space held by deleted records
    Compact,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Asset names; all configured assets when empty
    pub names: Vec<String>,

    /// Fetch from this base URL; overrides `fetch.base_url`
    #[arg(long, conflicts_with = "source_dir")]
    pub base_url: Option<String>,

    /// Fetch from this local directory; overrides `fetch.dir`
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Attempts per variant for transient failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Fetch + join timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true)]
    pub names: Vec<String>,
}
