#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use connector_auth::auth::{Credential, CredentialExchange, CredentialKind, Subject};
use connector_auth::config::{ProviderConfig, TokenDialect};
use connector_auth::error::AuthError;
use connector_auth::host::{BrowserLauncher, Prompter};

pub fn subject() -> Subject {
    Subject {
        id: "user-1".to_string(),
        label: "Ada".to_string(),
    }
}

/// Standard-dialect provider pointing at `base_url`.
pub fn demo_provider(base_url: &str) -> ProviderConfig {
    ProviderConfig::builder()
        .id("demo")
        .display_name("Demo")
        .dialect(TokenDialect::Standard)
        .authorize_url(format!("{base_url}/authorize"))
        .token_url(format!("{base_url}/token"))
        .identity_url(format!("{base_url}/userinfo"))
        .callback_path("/demo/callback")
        .client_id("demo-client")
        .client_secret("demo-secret".to_string())
        .build()
}

/// Standard-dialect provider with its own id and callback route.
pub fn named_provider(id: &str, display_name: &str, base_url: &str) -> ProviderConfig {
    let mut provider = demo_provider(base_url);
    provider.id = id.to_string();
    provider.display_name = display_name.to_string();
    provider.callback_path = format!("/{id}/callback");
    provider.client_id = format!("{id}-client");
    provider
}

/// Exchange fake that counts calls and hands out numbered tokens.
///
/// Authorization codes map to `T1`, refreshes produce `T2`, `T3`, ...
pub struct CountingExchange {
    provider_id: String,
    pub code_exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    refresh_delay: Duration,
    code_delay: Duration,
    refresh_error: Mutex<Option<AuthError>>,
    expires_in: Option<chrono::Duration>,
}

impl CountingExchange {
    pub fn new() -> Self {
        Self {
            provider_id: "demo".to_string(),
            code_exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            refresh_delay: Duration::from_millis(20),
            code_delay: Duration::ZERO,
            refresh_error: Mutex::new(None),
            expires_in: None,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Issue credentials for `provider_id` instead of `demo`.
    pub fn for_provider(mut self, provider_id: &str) -> Self {
        self.provider_id = provider_id.to_string();
        self
    }

    pub fn with_code_delay(mut self, delay: Duration) -> Self {
        self.code_delay = delay;
        self
    }

    pub fn with_expires_in(mut self, expires_in: chrono::Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn fail_refresh_with(&self, error: AuthError) {
        *self.refresh_error.lock().expect("exchange lock poisoned") = Some(error);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn code_exchange_count(&self) -> usize {
        self.code_exchanges.load(Ordering::SeqCst)
    }

    fn credential(&self, provider: &str, token: String) -> Credential {
        let mut credential =
            Credential::new(provider, token, subject()).with_refresh_token("R1");
        if let Some(expires_in) = self.expires_in {
            credential = credential.with_expires_at(Utc::now() + expires_in);
        }
        credential
    }
}

#[async_trait]
impl CredentialExchange for CountingExchange {
    async fn exchange_authorization_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        _pkce_verifier: Option<&str>,
    ) -> Result<Credential, AuthError> {
        self.code_exchanges.fetch_add(1, Ordering::SeqCst);
        if !self.code_delay.is_zero() {
            tokio::time::sleep(self.code_delay).await;
        }
        if code == "bad" {
            return Err(AuthError::ExchangeFailed("invalid_grant".to_string()));
        }
        Ok(self.credential(&self.provider_id, "T1".to_string()))
    }

    async fn exchange_long_lived_token(&self, token: &str) -> Result<Credential, AuthError> {
        if token.starts_with("pat_") {
            Ok(Credential::new(&self.provider_id, token, subject())
                .with_kind(CredentialKind::PersonalToken))
        } else {
            Err(AuthError::InvalidCredential("rejected".to_string()))
        }
    }

    async fn refresh(&self, previous: &Credential) -> Result<Credential, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        if let Some(err) = self.refresh_error.lock().expect("exchange lock poisoned").clone() {
            return Err(err);
        }
        let mut credential = self.credential(&previous.provider_id, format!("T{}", n + 2));
        credential.subject = previous.subject.clone();
        Ok(credential)
    }
}

/// Prompter that records messages and answers from a script.
#[derive(Default)]
pub struct ScriptedPrompter {
    pub informed: Mutex<Vec<String>>,
    pub confirmations: Mutex<Vec<String>>,
    confirm_answers: Mutex<VecDeque<bool>>,
    choice: Mutex<Option<usize>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_confirm(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirm_answers
            .lock()
            .expect("prompter lock poisoned")
            .extend(answers);
        self
    }

    pub fn choose(self, index: usize) -> Self {
        *self.choice.lock().expect("prompter lock poisoned") = Some(index);
        self
    }

    pub fn informed(&self) -> Vec<String> {
        self.informed.lock().expect("prompter lock poisoned").clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().expect("prompter lock poisoned").clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn inform(&self, message: &str) {
        self.informed
            .lock()
            .expect("prompter lock poisoned")
            .push(message.to_string());
    }

    async fn confirm(&self, message: &str, _action: &str) -> bool {
        self.confirmations
            .lock()
            .expect("prompter lock poisoned")
            .push(message.to_string());
        self.confirm_answers
            .lock()
            .expect("prompter lock poisoned")
            .pop_front()
            .unwrap_or(false)
    }

    async fn choose_one(&self, _title: &str, _options: &[String]) -> Option<usize> {
        *self.choice.lock().expect("prompter lock poisoned")
    }
}

/// Browser fake that records every URL it is asked to open.
#[derive(Default)]
pub struct RecordingBrowser {
    urls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            urls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> usize {
        self.urls.lock().expect("browser lock poisoned").len()
    }

    pub fn last_url(&self) -> Option<url::Url> {
        let urls = self.urls.lock().expect("browser lock poisoned");
        urls.last().and_then(|u| url::Url::parse(u).ok())
    }

    /// `state` of the most recently opened authorize URL.
    pub fn last_state(&self) -> Option<String> {
        self.last_url()?
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
    }

    /// Wait until `count` URLs have been opened.
    pub async fn wait_for(&self, count: usize) {
        while self.opened() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        if self.fail {
            return Err(AuthError::Browser("no display".to_string()));
        }
        self.urls
            .lock()
            .expect("browser lock poisoned")
            .push(url.to_string());
        Ok(())
    }
}
