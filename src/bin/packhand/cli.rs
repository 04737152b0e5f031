//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use packhand::util::shell::{ColorChoice, Verbosity};

/// packhand - detect and build applications with ecosystem plugins
#[derive(Parser)]
#[command(name = "packhand")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output settings shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub verbosity: Verbosity,
    pub color: ColorChoice,
}

impl Cli {
    /// Output settings from the global flags.
    pub fn output(&self) -> Output {
        let verbosity = if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        };
        let color = if self.no_color {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        };
        Output { verbosity, color }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Report which plugins apply to an application
    Detect(DetectArgs),

    /// Detect, then build the application with the selected plugin
    Build(BuildArgs),

    /// List plugins in selection order
    Plugins,

    /// Inspect and clean build caches
    Cache(CacheArgs),
}

#[derive(Args)]
pub struct AppArgs {
    /// Application source directory
    #[arg(long, default_value = ".")]
    pub app: PathBuf,
}

#[derive(Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Detect policy: "first" stops at the first eligible plugin, "all"
    /// evaluates every plugin
    #[arg(long)]
    pub policy: Option<String>,

    /// Only consider this plugin
    #[arg(long)]
    pub plugin: Option<String>,
}

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Only consider this plugin
    #[arg(long)]
    pub plugin: Option<String>,

    /// Detect policy ("first" or "all")
    #[arg(long)]
    pub policy: Option<String>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stream tool output as it is produced
    #[arg(long)]
    pub stream: bool,

    /// Cache directory
    #[arg(long, env = "BP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List(CacheTarget),

    /// Remove all cache entries
    Clean(CacheTarget),

    /// Print the cache directory
    Path(CacheTarget),
}

#[derive(Args)]
pub struct CacheTarget {
    #[command(flatten)]
    pub app: AppArgs,

    /// Cache directory
    #[arg(long, env = "BP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}
