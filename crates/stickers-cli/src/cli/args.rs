use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stickers_core::{DEFAULT_CACHE_DIR, DEFAULT_CONCURRENCY, DEFAULT_RETRIES};

#[derive(Parser)]
#[command(
    name = "stickers",
    version,
    about = "Compile the sticker pack directory into a single JSON artifact"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the partials artifact from the input file, fetching uncached manifests
    Compile(CompileArgs),
    /// Check the input file against the directory schema
    Validate(ValidateArgs),
    /// Reverse the order of entries in the input file
    Reverse(ReverseArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CompileArgs {
    /// YAML file mapping pack ids to metadata
    #[arg(short = 'i', long = "input-file")]
    pub input_file: PathBuf,

    /// Where to write the JSON artifact
    #[arg(short = 'o', long = "output-file")]
    pub output_file: PathBuf,

    /// Directory holding one cached partial per pack
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    /// Maximum simultaneous manifest fetches
    #[arg(long, env = "STICKERS_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Retries per pack after the first failed fetch
    #[arg(long, env = "STICKERS_MAX_RETRIES", default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Manifest API base URL
    #[arg(long, env = "STICKERS_API_URL")]
    pub api_url: Option<String>,

    /// Disable the progress line on stderr
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// YAML file to validate
    #[arg(short = 'i', long = "input-file")]
    pub input_file: PathBuf,

    /// Previously published artifact; fails if too many packs disappeared
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Packs allowed to disappear relative to --baseline
    #[arg(long, default_value_t = 5)]
    pub max_deletions: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ReverseArgs {
    /// YAML file to reverse
    #[arg(short = 'i', long = "input-file")]
    pub input_file: PathBuf,

    /// Where to write the reversed file
    #[arg(short = 'o', long = "output-file", default_value = "output.yml")]
    pub output_file: PathBuf,
}
