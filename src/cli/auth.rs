//! CLI auth command handlers for login, token, status, and logout.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::{CallbackOutcome, CredentialKind, ProviderRegistry, Scopes, SessionMode};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::host::{BrowserLauncher, Prompter, SystemBrowser};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Prompter for an interactive terminal.
///
/// Retries are not offered: the login command reads the redirect URI from
/// stdin, so a second reader would race it. Run the command again instead.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn inform(&self, message: &str) {
        eprintln!("{message}");
    }

    async fn confirm(&self, message: &str, _action: &str) -> bool {
        eprintln!("{message}");
        false
    }

    async fn choose_one(&self, title: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            return None;
        }
        eprintln!("{title}:");
        for (i, option) in options.iter().enumerate() {
            eprintln!("  {}) {option}", i + 1);
        }
        eprint!("> ");
        let line = read_line().await?;
        let choice: usize = line.parse().ok()?;
        (1..=options.len()).contains(&choice).then(|| choice - 1)
    }
}

/// Prints the authorize URL, then tries the system browser.
struct PrintingBrowser;

impl BrowserLauncher for PrintingBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        println!("Visit: {url}");
        if let Err(e) = SystemBrowser.open(url) {
            tracing::debug!(error = %e, "could not open browser; continuing with printed url");
        }
        Ok(())
    }
}

async fn read_line() -> Option<String> {
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    match stdin.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Load config (file, then environment) and build the registry.
pub fn load_registry(config_path: Option<&Path>) -> Result<ProviderRegistry, AuthError> {
    let _ = dotenvy::dotenv();
    let base = AuthConfig::default();
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base.store_dir.join("config.toml"));
    let config = AuthConfig::load_from_path(&path)?.apply_env(|key| std::env::var(key).ok());
    if config.providers.is_empty() {
        return Err(AuthError::Configuration(format!(
            "no providers configured; add them to {} or set CONNECTOR_AUTH_PRESETS",
            path.display()
        )));
    }
    ProviderRegistry::builder()
        .secret_store(Arc::new(crate::auth::FileSecretStore::new(
            config.store_dir.clone(),
        )))
        .config(config)
        .browser(Arc::new(PrintingBrowser))
        .prompter(Arc::new(TerminalPrompter))
        .build()
}

/// Handle `connector-auth auth login <provider>`.
pub async fn handle_login(registry: ProviderRegistry, provider: &str, scopes: Scopes) -> CliResult {
    let registry = Arc::new(registry);
    let mut flow = tokio::spawn({
        let registry = registry.clone();
        let provider = provider.to_string();
        async move {
            registry
                .get_session(&provider, &scopes, SessionMode::CreateIfNone)
                .await
        }
    });

    println!("After approving, paste the redirect URI here (empty line cancels):");
    let outcome = loop {
        tokio::select! {
            joined = &mut flow => break joined?,
            line = read_line() => {
                let line = line.unwrap_or_default();
                if line.is_empty() {
                    registry.cancel_sign_in(provider)?;
                    continue;
                }
                match registry.handle_callback_uri(&line).await {
                    CallbackOutcome::Completed | CallbackOutcome::Rejected(_) => {}
                    CallbackOutcome::Ignored | CallbackOutcome::Late => {
                        eprintln!("That URI does not belong to the pending sign-in; try again.");
                    }
                }
            }
        }
    };

    match outcome {
        Ok(Some(session)) => {
            println!("Signed in to {provider} as {}", session.account.label);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e.user_message().into()),
    }
}

/// Handle `connector-auth auth token <provider>`.
pub async fn handle_token(registry: &ProviderRegistry, provider: &str) -> CliResult {
    eprint!("Paste a personal token for {provider}: ");
    let Some(token) = read_line().await.filter(|t| !t.is_empty()) else {
        return Err("no token provided".into());
    };
    match registry.sign_in_with_token(provider, &token).await {
        Ok(session) => {
            println!("Signed in to {provider} as {}", session.account.label);
            Ok(())
        }
        Err(e) => Err(e.user_message().into()),
    }
}

/// Handle `connector-auth auth status`.
pub fn handle_status(registry: &ProviderRegistry) -> CliResult {
    println!("Connector sessions\n");
    for provider in registry.providers() {
        let sessions = registry.list_sessions(Some(&provider.id), None)?;
        if sessions.is_empty() {
            println!("  {}: not signed in", provider.display_name);
            continue;
        }
        for session in sessions {
            let kind = match session.credential.kind {
                CredentialKind::OAuth => "oauth",
                CredentialKind::PersonalToken => "personal token",
            };
            let expiry = match session.credential.expires_at {
                Some(at) if at > chrono::Utc::now() => {
                    format!("expires {}", at.format("%Y-%m-%d %H:%M"))
                }
                Some(_) if session.credential.refresh_token.is_some() => {
                    "expired (will refresh)".to_string()
                }
                Some(_) => "expired".to_string(),
                None => "no expiry".to_string(),
            };
            let resource = session
                .credential
                .resource
                .as_ref()
                .map(|r| format!(" [{}]", r.name))
                .unwrap_or_default();
            println!(
                "  {}: {}{resource} ({kind}, {expiry}) id={}",
                provider.display_name, session.account.label, session.id
            );
        }
    }
    Ok(())
}

/// Handle `connector-auth auth logout <provider>`.
pub fn handle_logout(
    registry: &ProviderRegistry,
    provider: &str,
    session_id: Option<&str>,
) -> CliResult {
    let targets: Vec<String> = match session_id {
        Some(id) => vec![id.to_string()],
        None => registry
            .list_sessions(Some(provider), None)?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };
    for id in &targets {
        registry.sign_out(provider, id)?;
    }
    println!("Signed out of {provider}");
    Ok(())
}
