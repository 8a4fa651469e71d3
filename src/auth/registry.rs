//! The registry that owns every provider's flow, refresh gate and sessions.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::callback::CallbackRouter;
use super::credential::Scopes;
use super::exchange::{CredentialExchange, ExchangeClient};
use super::flow::{CallbackOutcome, FlowCoordinator};
use super::refresh::TokenRefreshGate;
use super::session::{Session, SessionChange, SessionMode};
use super::sessions::SessionStore;
use super::store::{FileSecretStore, SecretStore};
use crate::config::{AuthConfig, ProviderConfig};
use crate::error::{AuthError, AuthFailure};
use crate::host::{BrowserLauncher, HeadlessPrompter, Prompter, SystemBrowser};

struct ProviderEntry {
    config: ProviderConfig,
    exchange: Arc<dyn CredentialExchange>,
    coordinator: Arc<FlowCoordinator>,
    gate: Arc<TokenRefreshGate>,
    sessions: Arc<SessionStore>,
}

/// Entry point for connector features: sessions, sign-in and wrapped calls.
///
/// # Example
/// ```no_run
/// use connector_auth::auth::{scopes, ProviderRegistry, SessionMode};
/// use connector_auth::config::AuthConfig;
///
/// # async fn example() -> Result<(), connector_auth::error::AuthError> {
/// let registry = ProviderRegistry::from_config(AuthConfig::from_env())?;
/// let session = registry
///     .get_session("github", &scopes(["repo"]), SessionMode::CreateIfNone)
///     .await?;
/// if let Some(session) = session {
///     println!("signed in as {}", session.account.label);
/// }
/// registry.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct ProviderRegistry {
    app_scheme: String,
    entries: BTreeMap<String, ProviderEntry>,
    router: CallbackRouter,
    prompter: Arc<dyn Prompter>,
    shutdown: CancellationToken,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Build with the file secret store, the system browser and a headless prompter.
    pub fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        let secrets = Arc::new(FileSecretStore::new(config.store_dir.clone()));
        Self::builder().config(config).secret_store(secrets).build()
    }

    pub fn app_scheme(&self) -> &str {
        &self.app_scheme
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.entries.values().map(|e| &e.config)
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.entries.get(provider_id).map(|e| &e.config)
    }

    /// Return a session covering `scopes`, signing in when `mode` allows it.
    ///
    /// After a failed interactive sign-in the user is offered a retry, except
    /// when the sign-in was superseded or cancelled.
    pub async fn get_session(
        &self,
        provider_id: &str,
        scopes: &Scopes,
        mode: SessionMode,
    ) -> Result<Option<Session>, AuthError> {
        let entry = self.entry(provider_id)?;
        let existing = entry
            .sessions
            .list(Some(scopes))
            .into_iter()
            .max_by_key(|s| s.updated_at);
        if existing.is_some() || mode == SessionMode::Silent {
            return Ok(existing);
        }
        let mut attempt = 1u32;
        loop {
            tracing::debug!(provider = provider_id, attempt, "starting sign-in");
            match entry.coordinator.start_flow(scopes).await {
                Ok(credential) => {
                    let session = entry.sessions.upsert(Session::from_credential(credential))?;
                    tracing::info!(
                        provider = provider_id,
                        session_id = %session.id,
                        "signed in"
                    );
                    return Ok(Some(session));
                }
                Err(err @ (AuthError::Superseded | AuthError::Cancelled)) => return Err(err),
                Err(err) => {
                    tracing::warn!(provider = provider_id, attempt, error = %err, "sign-in failed");
                    let retry = self
                        .prompter
                        .confirm(&err.user_message(), "Try again")
                        .await;
                    if !retry || self.shutdown.is_cancelled() {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Subscribe to session changes of one provider.
    pub fn on_sessions_changed(
        &self,
        provider_id: &str,
    ) -> Result<broadcast::Receiver<SessionChange>, AuthError> {
        Ok(self.entry(provider_id)?.sessions.subscribe())
    }

    /// Remove one session; an unknown session id is a no-op.
    pub fn sign_out(&self, provider_id: &str, session_id: &str) -> Result<(), AuthError> {
        let entry = self.entry(provider_id)?;
        if let Some(session) = entry.sessions.remove(session_id)? {
            tracing::info!(
                provider = provider_id,
                session_id = %session.id,
                "signed out"
            );
        }
        Ok(())
    }

    /// Remove every session of every provider; returns how many were removed.
    pub fn sign_out_all(&self) -> Result<usize, AuthError> {
        let mut removed = 0;
        for (provider_id, entry) in &self.entries {
            let sessions = entry.sessions.remove_all()?;
            if !sessions.is_empty() {
                tracing::info!(provider = %provider_id, count = sessions.len(), "signed out");
            }
            removed += sessions.len();
        }
        Ok(removed)
    }

    /// Sign in with a user-supplied long-lived token.
    pub async fn sign_in_with_token(
        &self,
        provider_id: &str,
        token: &str,
    ) -> Result<Session, AuthError> {
        let entry = self.entry(provider_id)?;
        let credential = entry.exchange.exchange_long_lived_token(token).await?;
        let session = entry.sessions.upsert(Session::from_credential(credential))?;
        tracing::info!(
            provider = provider_id,
            session_id = %session.id,
            "signed in with personal token"
        );
        Ok(session)
    }

    /// Sessions of one provider, or of all providers when `provider_id` is `None`.
    pub fn list_sessions(
        &self,
        provider_id: Option<&str>,
        scope_filter: Option<&Scopes>,
    ) -> Result<Vec<Session>, AuthError> {
        match provider_id {
            Some(id) => Ok(self.entry(id)?.sessions.list(scope_filter)),
            None => Ok(self
                .entries
                .values()
                .flat_map(|e| e.sessions.list(scope_filter))
                .collect()),
        }
    }

    /// Deliver a redirect URI received by the host application.
    pub async fn handle_callback_uri(&self, uri: &str) -> CallbackOutcome {
        let Some(routed) = self.router.route(uri) else {
            return CallbackOutcome::Ignored;
        };
        match self.entries.get(&routed.provider_id) {
            Some(entry) => entry.coordinator.handle_callback(routed.params).await,
            None => CallbackOutcome::Ignored,
        }
    }

    /// Dismiss a pending sign-in; returns whether one was pending.
    pub fn cancel_sign_in(&self, provider_id: &str) -> Result<bool, AuthError> {
        Ok(self.entry(provider_id)?.coordinator.cancel())
    }

    /// Run a provider call with the current bearer token, refreshing on 401.
    pub async fn wrap<T, E, F, Fut>(&self, provider_id: &str, call: F) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure + From<AuthError>,
    {
        let entry = self.entry(provider_id)?;
        entry.gate.wrap(call).await
    }

    /// Like [`wrap`](Self::wrap), pinned to one session.
    pub async fn wrap_session<T, E, F, Fut>(
        &self,
        provider_id: &str,
        session_id: &str,
        call: F,
    ) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure + From<AuthError>,
    {
        let entry = self.entry(provider_id)?;
        entry.gate.wrap_session(session_id, call).await
    }

    /// Cancel pending sign-ins and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.entries.values() {
            entry.coordinator.shutdown();
        }
        tracing::debug!("provider registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn entry(&self, provider_id: &str) -> Result<&ProviderEntry, AuthError> {
        self.entries
            .get(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))
    }
}

/// Assembles a [`ProviderRegistry`] from config and host collaborators.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    config: AuthConfig,
    exchanges: BTreeMap<String, Arc<dyn CredentialExchange>>,
    secrets: Option<Arc<dyn SecretStore>>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    prompter: Option<Arc<dyn Prompter>>,
}

impl ProviderRegistryBuilder {
    /// Replace the whole config, including its providers.
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.providers.push(provider);
        self
    }

    /// Register a provider whose exchange is supplied by the caller.
    pub fn provider_with_exchange(
        mut self,
        provider: ProviderConfig,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Self {
        self.exchanges.insert(provider.id.clone(), exchange);
        self.config.providers.push(provider);
        self
    }

    pub fn secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn build(mut self) -> Result<ProviderRegistry, AuthError> {
        let config = self.config;
        config.validate()?;
        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(FileSecretStore::new(config.store_dir.clone())));
        let browser = self.browser.unwrap_or_else(|| Arc::new(SystemBrowser));
        let prompter = self.prompter.unwrap_or_else(|| Arc::new(HeadlessPrompter));
        let shutdown = CancellationToken::new();
        let mut router = CallbackRouter::new(config.app_scheme.clone());
        let mut entries = BTreeMap::new();

        for provider in config.providers {
            let exchange: Arc<dyn CredentialExchange> = match self.exchanges.remove(&provider.id) {
                Some(exchange) => exchange,
                None => Arc::new(
                    ExchangeClient::new(provider.clone(), prompter.clone())
                        .with_request_timeout(config.request_timeout),
                ),
            };
            let sessions = Arc::new(SessionStore::load(&provider.id, secrets.clone())?);
            let coordinator = FlowCoordinator::new(
                provider.clone(),
                &config.app_scheme,
                exchange.clone(),
                browser.clone(),
            )
            .with_flow_timeout(config.flow_timeout)
            .with_cancellation(shutdown.child_token());
            let gate = TokenRefreshGate::new(
                &provider,
                exchange.clone(),
                sessions.clone(),
                prompter.clone(),
            )
            .with_policy(config.refresh.clone());
            router.register(&provider.connector_id, &provider.callback_path, &provider.id)?;
            tracing::debug!(provider = %provider.id, "registered provider");
            entries.insert(
                provider.id.clone(),
                ProviderEntry {
                    config: provider,
                    exchange,
                    coordinator: Arc::new(coordinator),
                    gate: Arc::new(gate),
                    sessions,
                },
            );
        }

        Ok(ProviderRegistry {
            app_scheme: config.app_scheme,
            entries,
            router,
            prompter,
            shutdown,
        })
    }
}
