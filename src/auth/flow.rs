//! Browser authorization-code flow for one provider.
//!
//! At most one request is pending per coordinator. A new flow supersedes the
//! previous one, and a request is settled exactly once: its completion handle
//! is a `oneshot::Sender` that is consumed on settlement.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::callback::CallbackParams;
use super::credential::{Credential, Scopes};
use super::exchange::CredentialExchange;
use super::nonce::{Nonce, Pkce};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::host::BrowserLauncher;

const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

type Settlement = Result<Credential, AuthError>;

/// A sign-in awaiting its callback.
pub struct PendingAuthRequest {
    pub provider_id: String,
    pub nonce: Nonce,
    pub created_at: DateTime<Utc>,
    pub requested_scopes: Scopes,
    redirect_uri: String,
    pkce_verifier: Option<String>,
    settle: oneshot::Sender<Settlement>,
}

impl PendingAuthRequest {
    fn settle(self, outcome: Settlement) {
        // The flow may have given up already; nobody is left to tell.
        let _ = self.settle.send(outcome);
    }
}

/// What [`FlowCoordinator::handle_callback`] did with a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Nothing was pending.
    Ignored,
    /// The callback belongs to a request that was already settled.
    Late,
    /// The pending request was resolved with a credential.
    Completed,
    /// The pending request was rejected with this error.
    Rejected(AuthError),
}

struct FlowState {
    pending: Option<PendingAuthRequest>,
    /// Nonces of settled requests, oldest first, kept for `retention`.
    settled: VecDeque<(Nonce, Instant)>,
    retention: Duration,
}

impl FlowState {
    fn new(retention: Duration) -> Self {
        Self {
            pending: None,
            settled: VecDeque::new(),
            retention,
        }
    }

    fn take_pending(&mut self) -> Option<PendingAuthRequest> {
        let request = self.pending.take()?;
        self.remember(request.nonce.clone());
        Some(request)
    }

    fn take_if(&mut self, nonce: &Nonce) -> Option<PendingAuthRequest> {
        if self.pending.as_ref().is_some_and(|p| &p.nonce == nonce) {
            self.take_pending()
        } else {
            None
        }
    }

    fn remember(&mut self, nonce: Nonce) {
        self.forget_expired();
        self.settled.push_back((nonce, Instant::now()));
    }

    fn was_settled(&mut self, state: &str) -> bool {
        self.forget_expired();
        self.settled.iter().any(|(nonce, _)| nonce.matches(state))
    }

    fn forget_expired(&mut self) {
        let now = Instant::now();
        while self
            .settled
            .front()
            .is_some_and(|(_, at)| now.duration_since(*at) > self.retention)
        {
            self.settled.pop_front();
        }
    }
}

/// Clears this flow's slot if its future is dropped or gives up.
struct PendingGuard<'a> {
    state: &'a Mutex<FlowState>,
    nonce: Nonce,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(request) = state.take_if(&self.nonce) {
            drop(state);
            tracing::debug!(provider = %request.provider_id, "abandoned sign-in deregistered");
            request.settle(Err(AuthError::Cancelled));
        }
    }
}

/// Drives sign-in for one provider: authorize URL, browser, callback, exchange.
pub struct FlowCoordinator {
    provider: ProviderConfig,
    redirect_uri: String,
    exchange: Arc<dyn CredentialExchange>,
    browser: Arc<dyn BrowserLauncher>,
    flow_timeout: Duration,
    state: Mutex<FlowState>,
    shutdown: CancellationToken,
}

impl FlowCoordinator {
    pub fn new(
        provider: ProviderConfig,
        app_scheme: &str,
        exchange: Arc<dyn CredentialExchange>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            redirect_uri: provider.redirect_uri(app_scheme),
            provider,
            exchange,
            browser,
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            state: Mutex::new(FlowState::new(DEFAULT_FLOW_TIMEOUT)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Settled nonces are remembered for the same span, so late callbacks
    /// are recognised for as long as a flow could have been open.
    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .retention = timeout;
        self
    }

    /// Tie this coordinator's lifetime to an outer token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Run a browser sign-in and wait for its callback.
    ///
    /// Empty `scopes` request the provider defaults.
    pub async fn start_flow(&self, scopes: &Scopes) -> Result<Credential, AuthError> {
        if self.shutdown.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        let provider = self.provider.id.as_str();
        let scopes = self.provider.effective_scopes(scopes);
        let nonce = Nonce::generate();
        let pkce = self.provider.use_pkce.then(Pkce::generate);
        let url = self.provider.authorize_url_for(
            &self.redirect_uri,
            &scopes,
            nonce.as_str(),
            pkce.as_ref().map(|p| p.challenge.as_str()),
        )?;

        let (tx, mut rx) = oneshot::channel();
        let request = PendingAuthRequest {
            provider_id: provider.to_string(),
            nonce: nonce.clone(),
            created_at: Utc::now(),
            requested_scopes: scopes.clone(),
            redirect_uri: self.redirect_uri.clone(),
            pkce_verifier: pkce.map(|p| p.verifier),
            settle: tx,
        };
        let superseded = {
            let mut state = self.lock();
            let previous = state.take_pending();
            state.pending = Some(request);
            previous
        };
        if let Some(previous) = superseded {
            tracing::debug!(provider, "superseding pending sign-in");
            previous.settle(Err(AuthError::Superseded));
        }
        let guard = PendingGuard {
            state: &self.state,
            nonce,
        };

        tracing::debug!(provider, scopes = ?scopes, "opening browser for sign-in");
        self.browser.open(url.as_str())?;

        let outcome = tokio::select! {
            settled = &mut rx => settled.unwrap_or(Err(AuthError::Cancelled)),
            _ = tokio::time::sleep(self.flow_timeout) => {
                if self.lock().take_if(&guard.nonce).is_some() {
                    tracing::warn!(provider, timeout_secs = self.flow_timeout.as_secs(), "sign-in timed out");
                    Err(AuthError::AuthTimeout)
                } else {
                    // A callback claimed the request; its exchange is bounded by the request timeout.
                    tracing::debug!(provider, "sign-in deadline passed during code exchange");
                    tokio::select! {
                        settled = &mut rx => settled.unwrap_or(Err(AuthError::Cancelled)),
                        _ = self.shutdown.cancelled() => Err(AuthError::Cancelled),
                    }
                }
            }
            _ = self.shutdown.cancelled() => Err(AuthError::Cancelled),
        };
        drop(guard);

        outcome.map(|mut credential| {
            if credential.scopes.is_empty() {
                credential.scopes = scopes;
            }
            credential
        })
    }

    /// Validate a redirect against the pending request and settle it.
    pub async fn handle_callback(&self, params: CallbackParams) -> CallbackOutcome {
        let provider = self.provider.id.as_str();
        let state_param = params.state.as_deref();
        let request = {
            let mut state = self.lock();
            if state_param.is_some_and(|s| state.was_settled(s)) {
                tracing::debug!(provider, "late callback for a settled sign-in");
                return CallbackOutcome::Late;
            }
            let Some(pending) = state.pending.as_ref() else {
                if state_param.is_some() {
                    tracing::warn!(provider, "callback with state but no pending sign-in");
                } else {
                    tracing::debug!(provider, "callback with no pending sign-in");
                }
                return CallbackOutcome::Ignored;
            };
            let nonce_ok = state_param.is_some_and(|s| pending.nonce.matches(s));
            // Providers echo `state` on error redirects too; a bare error is still a denial.
            let bare_error = params.error.is_some() && state_param.is_none();
            if !nonce_ok && !bare_error {
                tracing::warn!(provider, "callback state mismatch; rejecting pending sign-in");
                if let Some(request) = state.take_pending() {
                    drop(state);
                    request.settle(Err(AuthError::InvalidState));
                }
                return CallbackOutcome::Rejected(AuthError::InvalidState);
            }
            match state.take_pending() {
                Some(request) => request,
                None => return CallbackOutcome::Ignored,
            }
        };

        if let Some(error) = params.error {
            let reason = params.error_description.unwrap_or(error);
            tracing::warn!(provider, reason = %reason, "provider denied sign-in");
            let err = AuthError::denied(reason);
            request.settle(Err(err.clone()));
            return CallbackOutcome::Rejected(err);
        }
        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            let err = AuthError::ExchangeFailed("callback carried no authorization code".into());
            request.settle(Err(err.clone()));
            return CallbackOutcome::Rejected(err);
        };

        let result = self
            .exchange
            .exchange_authorization_code(
                &code,
                &request.redirect_uri,
                request.pkce_verifier.as_deref(),
            )
            .await;
        let outcome = match &result {
            Ok(credential) => {
                tracing::info!(provider, subject = %credential.subject.id, "sign-in completed");
                CallbackOutcome::Completed
            }
            Err(err) => CallbackOutcome::Rejected(err.clone()),
        };
        request.settle(result);
        outcome
    }

    /// Reject the pending request as dismissed by the user.
    pub fn cancel(&self) -> bool {
        let request = self.lock().take_pending();
        match request {
            Some(request) => {
                tracing::debug!(provider = %self.provider.id, "sign-in cancelled");
                request.settle(Err(AuthError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Cancel any pending request and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cancel();
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
