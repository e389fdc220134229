use clap::{Parser, Subcommand};
use portrait_core::Brand;
use tracing_subscriber::EnvFilter;

mod commands;
mod util;

use util::parse_brand;

#[derive(Parser)]
#[command(
    name = "portrait",
    version,
    about = "Data Portrait CLI: link retail accounts and fetch purchase history through the API"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "PORTRAIT_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Fetch a brand's purchase history once (may answer link_required)
    History {
        /// amazon, wayfair, officedepot or goodreads
        #[arg(value_parser = parse_brand)]
        brand: Brand,
    },
    /// Fetch the details of one order
    Detail {
        #[arg(value_parser = parse_brand)]
        brand: Brand,
        order_id: String,
    },
    /// Check once whether a hosted link has been completed
    Poll {
        link_id: String,
    },
    /// Hosted sign-in link operations
    Link {
        #[command(subcommand)]
        command: commands::link::LinkCommands,
    },
    /// Fetch history, completing the hosted sign-in first when required
    Connect(commands::connect::ConnectArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Diagnostics go to stderr so stdout stays pipeable JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();
    let client = util::client();

    let code = match cli.command {
        Commands::Health => commands::health::run(&client, &api_url).await,
        Commands::History { brand } => commands::history::history(&client, &api_url, brand).await,
        Commands::Detail { brand, order_id } => {
            commands::history::detail(&client, &api_url, brand, &order_id).await
        }
        Commands::Poll { link_id } => commands::link::poll(&client, &api_url, &link_id).await,
        Commands::Link { command } => commands::link::run(&client, &api_url, command).await,
        Commands::Connect(args) => commands::connect::run(&client, &api_url, args).await,
    };

    std::process::exit(code);
}
