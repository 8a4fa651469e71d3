//! connector-auth CLI binary entry point.

use clap::Parser;
use connector_auth::auth::scopes;
use connector_auth::cli::{AuthCommands, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CONNECTOR_AUTH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Auth(auth_args) => run_auth(cli.config.as_deref(), auth_args.command).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_auth(
    config: Option<&std::path::Path>,
    command: AuthCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = connector_auth::cli::auth::load_registry(config)?;
    match command {
        AuthCommands::Login(args) => {
            connector_auth::cli::auth::handle_login(registry, &args.provider, scopes(args.scopes))
                .await
        }
        AuthCommands::Token(args) => {
            let result = connector_auth::cli::auth::handle_token(&registry, &args.provider).await;
            registry.shutdown();
            result
        }
        AuthCommands::Status => connector_auth::cli::auth::handle_status(&registry),
        AuthCommands::Logout(args) => connector_auth::cli::auth::handle_logout(
            &registry,
            &args.provider,
            args.session.as_deref(),
        ),
    }
}
