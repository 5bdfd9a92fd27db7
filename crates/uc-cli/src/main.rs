use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uc_core::store::PgSourceStore;
use uuid::Uuid;

mod rules_file;

#[derive(Parser)]
#[command(name = "uc", version, about = "unusual personalization service CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the public content lookup service
    ContentApi,
    /// Run the authenticated source management service
    DashboardApi,
    /// Apply database migrations
    Migrate,
    /// Evaluate a rules file offline and print the matching replacements
    Match(MatchArgs),
    /// Development bearer tokens for the dashboard API
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Args, Clone)]
struct MatchArgs {
    /// JSON array of sources
    #[arg(long)]
    rules: PathBuf,

    #[arg(long)]
    user_id: Uuid,

    #[arg(long)]
    referrer: Option<String>,

    #[arg(long)]
    url: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Mint a dashboard bearer token for local development
    Issue {
        #[arg(long)]
        user_id: Uuid,

        #[arg(long, default_value_t = 3600)]
        ttl_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ContentApi => {
            let config = uc_content_api::load_config()?;
            uc_content_api::run(config).await?;
        }
        Commands::DashboardApi => {
            let config = uc_dashboard_api::load_config()?;
            uc_dashboard_api::run(config).await?;
        }
        Commands::Migrate => {
            uc_core::logging::init("uc-cli");
            let database_url = uc_core::config::required_env("DATABASE_URL")?;
            let store = PgSourceStore::connect(&database_url, 1).await?;
            store.migrate().await?;
        }
        Commands::Match(args) => {
            let sources = rules_file::load(&args.rules, args.user_id)?;
            let outcome = rules_file::evaluate(
                sources,
                args.user_id,
                args.referrer.as_deref(),
                args.url.as_deref(),
            )
            .await?;
            let rendered = if args.pretty {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string(&outcome)?
            };
            println!("{rendered}");
        }
        Commands::Token { command } => match command {
            TokenCommand::Issue {
                user_id,
                ttl_seconds,
            } => {
                let jwt_config = uc_dashboard_api::jwt_config_from_env()?;
                let token = uc_core::auth::issue_token(user_id, ttl_seconds, &jwt_config)?;
                println!("{token}");
            }
        },
    }

    Ok(())
}
