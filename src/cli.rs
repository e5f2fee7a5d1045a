use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "edgeform")]
#[command(version)]
#[command(about = "Converge k3s edge nodes to their declared role", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: /etc/edgeform/config.toml, then ~/.config/edgeform/config.toml)
    #[arg(short, long, global = true, env = "EDGEFORM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the facts detected on this host
    Facts {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile a role into its resource catalog
    Compile(RoleArgs),

    /// Show the order resources would be applied in, without touching the host
    Plan(RoleArgs),

    /// Converge this host to a role
    Apply(ApplyArgs),

    /// Show the summary of the last apply
    Report {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RoleArgs {
    /// Role or class to converge, e.g. `pi_worker` or `profiles::base`
    #[arg(short, long)]
    pub role: Option<String>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: RoleArgs,

    /// Dry run - check every resource and show what would change
    #[arg(short, long, alias = "dry-run")]
    pub noop: bool,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Give up on the run after this many seconds (0 disables)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Also list resources that were already in sync
    #[arg(long)]
    pub show_unchanged: bool,
}
