//! CLI entry point for connector-auth.

pub mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Connector authentication CLI
#[derive(Parser, Debug)]
#[command(name = "connector-auth", version, about = "Sign in to connector providers")]
pub struct Cli {
    /// Config file (defaults to config.toml in the store directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authentication management
    Auth(AuthArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Auth subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Sign in through the browser
    Login(LoginArgs),
    /// Sign in with a personal token read from stdin
    Token(TokenArgs),
    /// Show sessions of every configured provider
    Status,
    /// Sign out of a provider
    Logout(LogoutArgs),
}

/// Arguments for `connector-auth auth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Provider id (github, figma, jira, ...)
    pub provider: String,

    /// Scope to request; repeat for several (defaults to the provider's)
    #[arg(long = "scope")]
    pub scopes: Vec<String>,
}

/// Arguments for `connector-auth auth token`.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Provider id
    pub provider: String,
}

/// Arguments for `connector-auth auth logout`.
#[derive(Parser, Debug)]
pub struct LogoutArgs {
    /// Provider id
    pub provider: String,

    /// Only remove this session (defaults to every session of the provider)
    #[arg(long)]
    pub session: Option<String>,
}
