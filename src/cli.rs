//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::protocol::Category;

#[derive(Debug, Parser)]
#[command(
    name = "card-image-review",
    version,
    about = "Source, score, and hand-pick card images from a media-search service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Review a batch of entities and pick an image for each.
    Review(ReviewArgs),
    /// Print the search queries generated for one entity.
    Queries {
        #[arg(long)]
        id: i64,
    },
    /// Review-surface port leases.
    Ports {
        #[command(subcommand)]
        action: PortsCommands,
    },
    /// Session staging directories.
    Staging {
        #[command(subcommand)]
        action: StagingCommands,
    },
    /// Per-category count of entities with a committed image.
    Status,
}

#[derive(Clone, Debug, Args)]
pub struct ReviewArgs {
    /// Category code to review (R, S, P, I, M, N, A, B, C, D, T); all categories when omitted
    #[arg(long, value_parser = parse_category)]
    pub category: Option<Category>,

    /// Entities per category batch
    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Offset of the batch within the category listing
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Explicit entity ids, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["category", "start"])]
    pub ids: Vec<i64>,

    /// Review on the terminal instead of the browser
    #[arg(long)]
    pub headless: bool,

    /// Serve the browser surface without opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

#[derive(Clone, Debug, Subcommand)]
pub enum PortsCommands {
    /// List live leases after purging stale ones.
    List,
    /// Forget the lease on one port.
    Release { port: u16 },
    /// Forget every lease.
    Clear,
}

#[derive(Clone, Debug, Subcommand)]
pub enum StagingCommands {
    /// Remove staging directories left behind by crashed runs.
    Clean {
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_category(value: &str) -> Result<Category, String> {
    let trimmed = value.trim();
    if trimmed.chars().count() != 1 {
        return Err(format!("expected a one-letter category code, got '{value}'"));
    }
    match Category::from_code(trimmed) {
        Category::Other(code) => Err(format!("unknown category code '{code}'")),
        category => Ok(category),
    }
}
