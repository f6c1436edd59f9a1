//! CLI command definitions and parsing
use crate::storage::Usefulness;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "amem",
    version,
    author = "neur0map",
    about = "Adaptive retrieval memory for agent tools",
    long_about = "amem stores text per workspace, retrieves the most relevant chunks for a query \
                  with nearest-neighbor search and diversity reranking, organizes recurring topics \
                  into a concept hierarchy, and reweights results from usage feedback."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/amem/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a file or directory into a workspace
    Index {
        workspace: String,

        /// File or directory to index
        path: PathBuf,

        /// Concept labels to tag every indexed file with
        #[arg(long, value_delimiter = ',')]
        concepts: Vec<String>,

        /// Only index files directly inside the directory
        #[arg(long)]
        no_recursive: bool,

        /// File extensions to include (defaults to common text and source files)
        #[arg(short, long, value_delimiter = ',')]
        extensions: Vec<String>,
    },

    /// Search a workspace
    Search {
        workspace: String,

        query: String,

        /// Number of results to return
        #[arg(short, default_value = "8")]
        k: usize,

        /// Show the score breakdown of every hit
        #[arg(long)]
        explain: bool,

        /// Rank by semantic similarity only
        #[arg(long)]
        baseline: bool,

        /// Ignore the concept hierarchy
        #[arg(long)]
        no_concepts: bool,

        /// Favor recently changed sources
        #[arg(long)]
        recency: bool,

        /// Disable MMR diversity selection
        #[arg(long)]
        no_mmr: bool,

        /// Metadata filter, FIELD=VALUE or FIELD^=PREFIX[,PREFIX...] (repeatable)
        #[arg(short, long = "filter", value_name = "EXPR")]
        filters: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Record how useful a source was for a query
    Feedback {
        workspace: String,

        query: String,

        /// Source path or item id
        source: String,

        /// useful, neutral or notuseful
        usefulness: Usefulness,

        /// Time spent on the result in milliseconds
        #[arg(long, default_value = "0")]
        dwell: u64,

        /// 1-based rank the result was shown at
        #[arg(long, default_value = "0")]
        rank: u32,
    },

    /// Show workspace statistics
    Stats {
        workspace: String,

        /// Show statistics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List known workspaces
    Workspaces,

    /// Resolve the concept path of a label or query
    ConceptPath { workspace: String, text: String },

    /// Print the concept hierarchy of a workspace
    Concepts {
        workspace: String,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the index metadata of a workspace as JSON lines
    Snapshot {
        workspace: String,

        /// Output file (defaults to <data_dir>/snapshots/<workspace>/index.jsonl)
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
