mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunArgs, run::RunExit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "melody",
    about = "Preview, update or destroy the Pulumi stacks of every project in a flow file",
    version,
    propagate_version = true
)]
struct Cli {
    /// Infrastructure root holding flows/ and projects/ (default: auto-detect)
    #[arg(long, global = true, env = "MELODY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Pulumi CLI binary (overrides pulumi.binary in melody.yaml)
    #[arg(long, global = true, env = "MELODY_PULUMI")]
    pulumi: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stack operation for each project of a flow, in order
    Run(RunArgs),

    /// List the projects a flow file would run
    Steps {
        /// Flow file under flows/ (default: defaults.flow_spec in melody.yaml)
        #[arg(long)]
        flow_spec: Option<String>,
    },

    /// Print the qualified stack name for org, project and stack
    StackName {
        org: String,
        project: String,
        stack: String,
    },

    /// Inspect and validate melody.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // Logs go to stderr so `--json` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(&root, cli.pulumi.as_deref(), args, cli.json),
        Commands::Steps { flow_spec } => cmd::steps::run(&root, flow_spec.as_deref(), cli.json),
        Commands::StackName {
            org,
            project,
            stack,
        } => cmd::stack::run(&org, &project, &stack, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e.downcast_ref::<RunExit>().map_or(1, RunExit::exit_code);
        std::process::exit(code);
    }
}
