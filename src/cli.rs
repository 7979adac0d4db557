use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "podlink",
    version,
    about = "Live shells and log tails for Kubernetes containers."
)]
pub struct CliArgs {
    /// kubeconfig context to use instead of the current one
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_filter: String,

    /// Append tracing output to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SessionCommand {
    /// Open an interactive shell in a container
    Shell {
        #[command(flatten)]
        target: TargetArgs,

        /// Command to run instead of the configured shell
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Follow a container's log output
    Logs {
        #[command(flatten)]
        target: TargetArgs,

        /// Only start from the last N lines
        #[arg(long)]
        tail: Option<i64>,

        /// Prefix every line with its timestamp
        #[arg(long)]
        timestamps: bool,

        /// Show logs of the previous container instance
        #[arg(short, long)]
        previous: bool,

        /// Directory log exports are written to
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Pod name
    pub pod: String,

    /// Namespace (defaults to the context namespace)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Container (defaults to the pod's default container)
    #[arg(short, long)]
    pub container: Option<String>,
}
