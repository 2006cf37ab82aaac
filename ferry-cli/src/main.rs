use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Ferry CLI - project archive tools")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "ferry.toml", env = "FERRY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export a project from the local store into an archive file
    Export {
        /// Numeric project id
        #[arg(short, long)]
        project: i64,

        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the manifest and contents of an archive file
    Inspect {
        /// Archive path
        #[arg(short, long)]
        input: PathBuf,

        /// Also list every dataset, model and suite
        #[arg(short, long)]
        verbose: bool,
    },

    /// Import an archive file into the local store
    Import {
        /// Archive path
        #[arg(short, long)]
        input: PathBuf,

        /// Project key the archive is expected to carry
        #[arg(short = 'k', long)]
        expect_key: String,

        /// Identity mapping entry, archive user to destination login (repeatable)
        #[arg(short, long = "map", value_name = "FROM=TO")]
        mappings: Vec<String>,

        /// Store the project under a different key
        #[arg(long)]
        project_key: Option<String>,
    },

    /// Mint a bearer token signed with the configured secret
    Token {
        /// Login to put in the token subject
        #[arg(short, long)]
        login: String,

        /// Roles to grant (comma-separated)
        #[arg(short, long, default_value = "ROLE_ADMIN")]
        roles: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export { project, output } => {
            commands::run_export(&cli.config, project, &output).await?;
        }
        Commands::Inspect { input, verbose } => {
            commands::run_inspect(&input, verbose)?;
        }
        Commands::Import {
            input,
            expect_key,
            mappings,
            project_key,
        } => {
            commands::run_import(&cli.config, &input, &expect_key, &mappings, project_key).await?;
        }
        Commands::Token { login, roles } => {
            commands::run_token(&cli.config, &login, &roles)?;
        }
    }

    Ok(())
}
