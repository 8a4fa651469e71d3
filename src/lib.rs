//! connector-auth: sign-in and token lifecycle for third-party connectors
//!
//! Runs the browser authorization-code flow for connector providers
//! (GitHub, Figma, Jira and any OAuth 2.0 provider described by a
//! [`config::ProviderConfig`]), keeps the resulting sessions in a host
//! secret store, and refreshes tokens single-flight when a provider call
//! reports an authorization failure.
//!
//! # Quick Start
//!
//! ```no_run
//! use connector_auth::prelude::*;
//!
//! # async fn example() -> connector_auth::error::Result<()> {
//! let registry = ProviderRegistry::from_config(AuthConfig::from_env())?;
//! let session = registry
//!     .get_session("github", &scopes(["repo"]), SessionMode::CreateIfNone)
//!     .await?;
//! println!("{:?}", session.map(|s| s.account.label));
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod prelude;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
