use clap::{Parser, Subcommand};
use sluice::{
    commands::{info, init, run},
    logger, GlobalOpts,
};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Filter pipeline host for embedded Python plugins",
    long_about = "Sluice runs reading batches through chains of Python filter plugins hosted in an embedded interpreter."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new chain file
    Init {
        /// Optional filename for the chain (default: chain.yaml)
        file: Option<String>,
    },
    /// Run filter chains from a YAML definition
    Run(run::RunCommand),
    /// Load a plugin and print the metadata it reports
    Info {
        /// Plugin module name to query
        plugin: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger with verbosity level, log_python flag, and no_stdout flag
    if let Err(e) = logger::init_with_verbosity(
        cli.global.verbosity_level(),
        cli.global.log_python,
        cli.global.no_stdout,
    ) {
        eprintln!("Warning: Failed to initialize logger: {}", e);
    }

    match cli.command {
        Commands::Init { file } => {
            init::handle_init(file, cli.global);
        }
        Commands::Run(cmd) => {
            if let Err(e) = run::handle_run(cmd, cli.global) {
                logger::error(&format!("Run command failed: {}", e));
                std::process::exit(1);
            }
        }
        Commands::Info { plugin } => {
            if let Err(e) = info::handle_info(&plugin, &cli.global) {
                logger::error(&format!("Info command failed: {}", e));
                std::process::exit(1);
            }
        }
    }
}
