use clap::{Parser, Subcommand};
use paddock::config::ConfigLoader;
use paddock::daemon;
use std::path::PathBuf;
use tracing::{debug, error, trace};

#[derive(Parser)]
#[command(name = "paddock")]
#[command(about = "Provision, run and stream workloads on this host", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "paddock.toml")]
        config: PathBuf,
    },
    /// Stop every workload and exit a running daemon
    Shutdown {
        /// Process id of the daemon
        #[arg(long)]
        pid: i32,
    },
    /// Reload a running daemon's configuration
    Reload {
        /// Process id of the daemon
        #[arg(long)]
        pid: i32,
    },
    /// Print the version
    Version,
}

async fn configured_log_level(command: &Commands) -> String {
    if let Commands::Run { config } = command {
        if let Ok(loader) = ConfigLoader::load(Some(config)).await {
            return loader.get_config().log_level;
        }
    }
    "info".to_string()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => configured_log_level(&cli.command).await,
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,hyper=debug,tower=debug".to_string(), // -vvv shows everything including dependencies
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("paddock started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run { config } => daemon::run(Some(&config)).await,
        Commands::Shutdown { pid } => daemon::signals::send_shutdown(pid).map_err(Into::into),
        Commands::Reload { pid } => daemon::signals::send_reload(pid).map_err(Into::into),
        Commands::Version => {
            println!("paddock {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
