//! Single-flight token refresh for one provider.
//!
//! At most one network refresh runs per provider. Callers that hit an expired
//! token while a refresh is in flight queue behind it. Callers for the same
//! account receive the same outcome, in arrival order; callers for another
//! account wait for the flight to land and then refresh their own token.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::credential::{redact, Credential};
use super::exchange::CredentialExchange;
use super::session::Session;
use super::sessions::SessionStore;
use crate::config::{ProviderConfig, RefreshPolicy};
use crate::error::{AuthError, AuthFailure};
use crate::host::Prompter;

type Outcome = Result<Credential, AuthError>;

/// A caller queued behind the in-flight refresh.
///
/// `None` on the reply channel means the flight belonged to another account.
#[derive(Debug)]
pub struct RefreshWaiter {
    subject_id: String,
    reply: oneshot::Sender<Option<Outcome>>,
}

impl RefreshWaiter {
    fn release(self, leader: &str, outcome: &Outcome) {
        let reply = (self.subject_id == leader).then(|| outcome.clone());
        let _ = self.reply.send(reply);
    }
}

/// Refresh marker for one provider.
#[derive(Debug, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        /// Account whose token is being refreshed.
        subject_id: String,
        waiters: VecDeque<RefreshWaiter>,
    },
}

#[derive(Debug, Default)]
struct GateState {
    refresh: RefreshState,
    failures: u32,
    retry_after: Option<Instant>,
}

enum Role {
    /// The store already holds a newer token for this account.
    Settled(Credential),
    Leader,
    Waiter(oneshot::Receiver<Option<Outcome>>),
}

/// Returns the gate to `Idle` if the leading refresh is dropped mid-flight.
struct LeaderGuard<'a> {
    gate: &'a TokenRefreshGate,
    subject_id: &'a str,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = self.gate.finish(false);
        tracing::debug!(
            provider = %self.gate.provider_id,
            waiters = waiters.len(),
            "refresh interrupted"
        );
        let err = Err(AuthError::RefreshFailed("refresh was interrupted".to_string()));
        for waiter in waiters {
            waiter.release(self.subject_id, &err);
        }
    }
}

/// Runs provider calls with the current bearer token, refreshing it once on
/// an authorization failure.
pub struct TokenRefreshGate {
    provider_id: String,
    display_name: String,
    exchange: Arc<dyn CredentialExchange>,
    sessions: Arc<SessionStore>,
    prompter: Arc<dyn Prompter>,
    policy: RefreshPolicy,
    state: Mutex<GateState>,
}

impl TokenRefreshGate {
    pub fn new(
        provider: &ProviderConfig,
        exchange: Arc<dyn CredentialExchange>,
        sessions: Arc<SessionStore>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            provider_id: provider.id.clone(),
            display_name: provider.display_name.clone(),
            exchange,
            sessions,
            prompter,
            policy: RefreshPolicy::default(),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock().refresh, RefreshState::Refreshing { .. })
    }

    /// Callers currently queued behind the in-flight refresh.
    pub fn waiters(&self) -> usize {
        match &self.lock().refresh {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Run `call` with the bearer token of the most recently updated session.
    ///
    /// # Example
    /// ```no_run
    /// # use connector_auth::auth::TokenRefreshGate;
    /// # use connector_auth::error::AuthError;
    /// # async fn example(gate: &TokenRefreshGate, http: reqwest::Client) -> Result<(), AuthError> {
    /// let repos = gate
    ///     .wrap(|token| {
    ///         let http = http.clone();
    ///         async move {
    ///             let resp = http
    ///                 .get("https://api.github.com/user/repos")
    ///                 .bearer_auth(token)
    ///                 .send()
    ///                 .await
    ///                 .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;
    ///             if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
    ///                 return Err(AuthError::Unauthorized { status: 401 });
    ///             }
    ///             resp.text().await.map_err(|e| AuthError::ExchangeFailed(e.to_string()))
    ///         }
    ///     })
    ///     .await?;
    /// # let _ = repos;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn wrap<T, E, F, Fut>(&self, call: F) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure + From<AuthError>,
    {
        let session = self
            .primary_session()
            .ok_or_else(|| AuthError::NotSignedIn(self.display_name.clone()))?;
        self.run(session, call).await
    }

    /// Like [`wrap`](Self::wrap), for a specific session.
    pub async fn wrap_session<T, E, F, Fut>(&self, session_id: &str, call: F) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure + From<AuthError>,
    {
        let session = self
            .sessions
            .find(session_id)
            .ok_or_else(|| AuthError::NotSignedIn(self.display_name.clone()))?;
        self.run(session, call).await
    }

    async fn run<T, E, F, Fut>(&self, session: Session, call: F) -> Result<T, E>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthFailure + From<AuthError>,
    {
        let provider = self.provider_id.as_str();
        let mut credential = session.credential;
        if credential.refresh_token.is_some()
            && credential.expires_within(self.expiry_skew(), Utc::now())
        {
            tracing::debug!(provider, "token near expiry; refreshing before call");
            credential = self.refreshed(&credential).await?;
        }

        match call(credential.access_token.clone()).await {
            Err(err) if err.is_auth_failure() => {}
            other => return other,
        }
        tracing::debug!(
            provider,
            token = %redact(&credential.access_token),
            "provider rejected token; refreshing"
        );
        let fresh = self.refreshed(&credential).await?;

        match call(fresh.access_token.clone()).await {
            Err(err) if err.is_auth_failure() => {
                tracing::warn!(provider, "refreshed token rejected; ending session");
                self.end_session(&fresh).await;
                Err(E::from(AuthError::AuthExpired))
            }
            other => other,
        }
    }

    /// Obtain a credential newer than `stale` for the same account, refreshing
    /// at most once per provider at a time.
    pub async fn refreshed(&self, stale: &Credential) -> Result<Credential, AuthError> {
        loop {
            match self.join_or_lead(stale)? {
                Role::Settled(credential) => return Ok(credential),
                Role::Waiter(rx) => match rx.await {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {
                        tracing::debug!(
                            provider = %self.provider_id,
                            "refresh for another account landed; retrying"
                        );
                    }
                    Err(_) => {
                        return Err(AuthError::RefreshFailed("refresh was abandoned".to_string()))
                    }
                },
                Role::Leader => return self.lead_refresh(stale).await,
            }
        }
    }

    /// Join the in-flight refresh, start one, or answer from the store.
    fn join_or_lead(&self, stale: &Credential) -> Result<Role, AuthError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let current = self
            .sessions
            .find_by_subject(&stale.subject.id)
            .ok_or_else(|| AuthError::NotSignedIn(self.display_name.clone()))?;
        if current.credential.access_token != stale.access_token
            && !current
                .credential
                .expires_within(self.expiry_skew(), Utc::now())
        {
            tracing::debug!(provider = %self.provider_id, "token already refreshed");
            return Ok(Role::Settled(current.credential));
        }
        match &mut state.refresh {
            RefreshState::Refreshing { waiters, .. } => {
                if waiters.len() >= self.policy.max_waiters {
                    return Err(AuthError::RefreshQueueFull(self.display_name.clone()));
                }
                let (tx, rx) = oneshot::channel();
                waiters.push_back(RefreshWaiter {
                    subject_id: stale.subject.id.clone(),
                    reply: tx,
                });
                tracing::debug!(
                    provider = %self.provider_id,
                    waiters = waiters.len(),
                    "waiting for in-flight refresh"
                );
                Ok(Role::Waiter(rx))
            }
            RefreshState::Idle => {
                if let Some(until) = state.retry_after {
                    let now = Instant::now();
                    if now < until {
                        return Err(AuthError::RefreshFailed(format!(
                            "refresh is backing off for {}ms after {} failures",
                            (until - now).as_millis(),
                            state.failures
                        )));
                    }
                }
                state.refresh = RefreshState::Refreshing {
                    subject_id: stale.subject.id.clone(),
                    waiters: VecDeque::new(),
                };
                Ok(Role::Leader)
            }
        }
    }

    async fn lead_refresh(&self, stale: &Credential) -> Outcome {
        let provider = self.provider_id.as_str();
        let subject_id = stale.subject.id.as_str();
        let mut guard = LeaderGuard {
            gate: self,
            subject_id,
            armed: true,
        };
        tracing::debug!(provider, subject = %subject_id, "refreshing token");
        let result = match self.exchange.refresh(stale).await {
            Ok(credential) if credential.subject.id != subject_id => Err(AuthError::RefreshFailed(
                "refresh returned a token for another account".to_string(),
            )),
            Ok(credential) => self.store_refreshed(credential),
            Err(err) => Err(err),
        };
        guard.armed = false;

        if let Err(err) = &result {
            tracing::warn!(provider, error = %err, "token refresh failed");
            if err.is_session_terminating() {
                self.remove_subject(subject_id);
            }
        }
        let waiters = self.finish(result.is_ok());
        tracing::debug!(provider, waiters = waiters.len(), ok = result.is_ok(), "refresh settled");
        for waiter in waiters {
            waiter.release(subject_id, &result);
        }
        if matches!(&result, Err(err) if err.is_session_terminating()) {
            self.prompt_sign_in().await;
        }
        result
    }

    fn store_refreshed(&self, credential: Credential) -> Outcome {
        let mut session = self
            .sessions
            .find_by_subject(&credential.subject.id)
            .ok_or_else(|| AuthError::NotSignedIn(self.display_name.clone()))?;
        session.credential = credential;
        session.updated_at = Utc::now();
        let stored = self.sessions.upsert(session)?;
        Ok(stored.credential)
    }

    /// Leave `Refreshing`, record the outcome for backoff and hand back the
    /// queued waiters.
    fn finish(&self, ok: bool) -> VecDeque<RefreshWaiter> {
        let mut state = self.lock();
        if ok {
            state.failures = 0;
            state.retry_after = None;
        } else {
            state.failures = state.failures.saturating_add(1);
            let delay = self.policy.backoff.delay_for(state.failures);
            state.retry_after = Some(Instant::now() + delay);
        }
        match std::mem::take(&mut state.refresh) {
            RefreshState::Refreshing { waiters, .. } => waiters,
            RefreshState::Idle => VecDeque::new(),
        }
    }

    async fn end_session(&self, credential: &Credential) {
        if self.remove_subject(&credential.subject.id) {
            self.prompt_sign_in().await;
        }
    }

    fn remove_subject(&self, subject_id: &str) -> bool {
        let Some(session) = self.sessions.find_by_subject(subject_id) else {
            return false;
        };
        match self.sessions.remove(&session.id) {
            Ok(removed) => removed.is_some(),
            Err(err) => {
                tracing::warn!(provider = %self.provider_id, error = %err, "could not remove session");
                false
            }
        }
    }

    async fn prompt_sign_in(&self) {
        self.prompter
            .inform(&format!(
                "Your {} session expired. Please sign in again.",
                self.display_name
            ))
            .await;
    }

    fn primary_session(&self) -> Option<Session> {
        self.sessions
            .list(None)
            .into_iter()
            .max_by_key(|s| s.updated_at)
    }

    fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.policy.expiry_skew_secs)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
