use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bz", about = "Bazaar blog, shop and live chat backend", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true, default_value = "~/.bazaar/config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST and live-feed server
    Serve {
        /// Override the configured port
        #[arg(long, short)]
        port: Option<u16>,

        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the data directory (`:memory:` for a throwaway store)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Server checks
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Validate bind and auth settings without starting
    Preflight,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file and the resolved runtime config
    Show,
}

#[derive(Subcommand)]
enum DbAction {
    /// Record counts per table
    Stats,
    /// Run SQLite integrity checks
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bz_server::init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
        } => commands::server::start(port, host, data_dir, &cli.config).await,

        Commands::Server { action } => match action {
            ServerAction::Preflight => commands::server::preflight(&cli.config).await,
        },

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&cli.config).await,
        },

        Commands::Db { action } => match action {
            DbAction::Stats => commands::db::stats(&cli.config).await,
            DbAction::Check => commands::db::check(&cli.config).await,
        },
    }
}
