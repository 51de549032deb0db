use clap::{Parser, Subcommand};

mod commands;
mod scenario;

#[derive(Parser)]
#[command(
    name = "shardctl",
    about = "Explain shardgrid shard placement filter decisions",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one shard copy against every node of a scenario.
    ///
    /// The scenario is a TOML file describing nodes, indices, shard copies
    /// and cluster settings. One decision is printed per node, with the
    /// reason it was reached.
    Explain {
        /// Path to the scenario file
        #[arg(short, long)]
        scenario: String,
        /// Index name
        #[arg(short, long)]
        index: String,
        /// Shard ordinal
        #[arg(long, default_value_t = 0)]
        shard: u32,
        /// Explain a replica copy instead of the primary
        #[arg(long)]
        replica: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate allocation filter settings in a TOML file of
    /// fully-qualified keys.
    Validate {
        #[arg(short = 'f', long)]
        settings: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shardctl=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            scenario,
            index,
            shard,
            replica,
            json,
        } => commands::explain::explain(&scenario, &index, shard, replica, json),
        Commands::Validate { settings } => commands::validate::validate(&settings),
    }
}
