use clap::{Parser, Subcommand};

use burstwriter::daemon;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the lines of stdin through a buffered writer until end of input or a signal
    Daemon {
        /// The config file
        #[arg(long)]
        config: String,

        /// The writer to run, needed only if the config file has several [default: the only one]
        #[arg(long)]
        writer: Option<String>,
    },
    /// Print the resolved configuration of a writer
    Config {
        /// The config file
        #[arg(long)]
        config: String,

        /// The writer to show [default: the only one]
        #[arg(long)]
        writer: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Daemon { config, writer } => daemon::daemon_mode(config, writer.as_deref()),
        Commands::Config { config, writer } => daemon::config_mode(config, writer.as_deref()),
    };

    // The modes install the logger before returning, also on error.
    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
