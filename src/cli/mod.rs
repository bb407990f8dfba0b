//! CLI command definitions and parsing
use crate::config::{Config, ErrorPolicy};
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lexembed",
    version,
    author = "neur0map",
    about = "Resumable chunk-and-embed pipeline for JSONL legal corpora",
    long_about = "Lexembed splits every document of a JSONL corpus into token-bounded chunks, \
                  embeds them with a local sentence-embedding model and appends the results to \
                  an output directory. Interrupted runs resume where they left off."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lexembed/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk and embed every corpus document not yet in the output
    Run(RunArgs),

    /// Show what an output directory holds
    Status {
        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Settings for a run; each flag overrides the configuration file
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// JSONL corpus file
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Embedding model (e.g., "BAAI/bge-small-en-v1.5")
    #[arg(short, long)]
    pub model: Option<String>,

    /// Maximum tokens per chunk, header included
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Documents read and chunked per batch
    #[arg(long)]
    pub chunking_batch_size: Option<usize>,

    /// Chunks per model invocation
    #[arg(long)]
    pub embedding_batch_size: Option<usize>,

    /// Concurrent chunking workers (0 = available parallelism)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// What to do with malformed corpus records
    #[arg(long, value_parser = ["skip", "abort"])]
    pub on_malformed: Option<String>,

    /// Profile to apply (defined under [profiles] in the config file)
    #[arg(short, long)]
    pub profile: Option<String>,
}

impl RunArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(input) = &self.input {
            config.corpus.path = input.clone();
        }
        if let Some(output) = &self.output {
            config.output.dir = output.clone();
        }
        if let Some(model) = &self.model {
            config.embedding.model = model.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.chunk_size = chunk_size;
        }
        if let Some(batch_size) = self.chunking_batch_size {
            config.chunking.batch_size = batch_size;
        }
        if let Some(batch_size) = self.embedding_batch_size {
            config.embedding.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.chunking.workers = workers;
        }
        if let Some(policy) = &self.on_malformed {
            config.corpus.on_malformed = policy.parse::<ErrorPolicy>()?;
        }
        Ok(())
    }
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
