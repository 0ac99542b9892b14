use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tmsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative configuration sync for load-balancer appliances", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (default: tmsync.toml in the config directory)
    #[arg(short, long, global = true, env = "TMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the requests that turn one config into another, offline
    Plan(PlanArgs),

    /// Converge a partition on every configured device
    Deploy(DeployArgs),

    /// List partitions of a device
    Partitions(DeviceArgs),

    /// Save the running configuration of a device
    Save(SaveArgs),

    /// Inspect or clear persisted state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Deploy
// ============================================================================

/// Config transition shared by plan and deploy
#[derive(Args)]
pub struct TransitionArgs {
    /// Partition (tenant) to reconcile
    #[arg(short, long)]
    pub partition: String,

    /// Config applied last (JSON); omit for a fresh partition
    #[arg(long)]
    pub from: Option<PathBuf>,

    /// Desired config (JSON); omit to tear the partition down
    #[arg(long)]
    pub to: Option<PathBuf>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub transition: TransitionArgs,

    /// Live listings (JSON object of kind -> list response); omit for an empty device
    #[arg(long)]
    pub live: Option<PathBuf>,

    /// Print the batch as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub transition: TransitionArgs,

    /// Only deploy to the device with this URL
    #[arg(short, long)]
    pub device: Option<String>,

    /// Create the partition before reconciling
    #[arg(long)]
    pub create_partition: bool,

    /// Remove the partition after reconciling
    #[arg(long, conflicts_with = "create_partition")]
    pub delete_partition: bool,

    /// Record the applied config under this client key; without --from,
    /// start from the config recorded there
    #[arg(long)]
    pub state_key: Option<String>,

    /// Plan against each device without applying
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Device commands
// ============================================================================

#[derive(Args)]
pub struct DeviceArgs {
    /// Device URL (default: every configured device)
    #[arg(short, long)]
    pub device: Option<String>,
}

#[derive(Args)]
pub struct SaveArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Only save these partitions
    pub partitions: Vec<String>,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// Show state persisted under a client key
    Show {
        /// Client key
        key: String,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Delete state persisted under a client key
    Clear {
        /// Client key
        key: String,

        #[command(flatten)]
        device: DeviceArgs,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
