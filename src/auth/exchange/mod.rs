//! Token endpoint and identity calls for one provider.

pub mod dialect;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;

use crate::auth::credential::{redact, Credential, CredentialKind, Resource, Subject};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::host::Prompter;
use crate::util::scrub::scrub_secrets;
use crate::util::timeout::with_timeout;

use dialect::{parse_resources, IdentityResponse, TokenGrant, TokenResponse};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("connector-auth/", env!("CARGO_PKG_VERSION"));

/// Turns authorization material into [`Credential`]s.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Redeem an authorization code delivered to `redirect_uri`.
    async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<Credential, AuthError>;

    /// Validate a user-supplied token against the identity endpoint.
    async fn exchange_long_lived_token(&self, token: &str) -> Result<Credential, AuthError>;

    /// Obtain a fresh access token; subject and resource are carried forward.
    async fn refresh(&self, previous: &Credential) -> Result<Credential, AuthError>;
}

/// Failure of an authenticated GET.
enum LookupError {
    /// The provider refused the bearer token.
    Rejected(StatusCode),
    Failed(String),
}

impl LookupError {
    fn into_detail(self) -> String {
        match self {
            Self::Rejected(status) => format!("token rejected with status {status}"),
            Self::Failed(detail) => detail,
        }
    }
}

/// HTTP implementation of [`CredentialExchange`] driven by a [`ProviderConfig`].
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use connector_auth::auth::{CredentialExchange, ExchangeClient};
/// use connector_auth::config::ProviderConfig;
/// use connector_auth::host::HeadlessPrompter;
///
/// # async fn example() -> Result<(), connector_auth::error::AuthError> {
/// let mut github = ProviderConfig::github();
/// github.client_id = "Iv1.example".into();
/// let client = ExchangeClient::new(github, Arc::new(HeadlessPrompter));
/// let credential = client.exchange_long_lived_token("ghp_example").await?;
/// println!("signed in as {}", credential.subject.label);
/// # Ok(())
/// # }
/// ```
pub struct ExchangeClient {
    client: reqwest::Client,
    provider: ProviderConfig,
    prompter: Arc<dyn Prompter>,
    request_timeout: Duration,
}

impl ExchangeClient {
    pub fn new(provider: ProviderConfig, prompter: Arc<dyn Prompter>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            provider,
            prompter,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    async fn post_token(&self, url: &str, form: &[(&str, &str)]) -> Result<TokenGrant, String> {
        let mut form = form.to_vec();
        form.push(("client_id", self.provider.client_id.as_str()));
        if let Some(secret) = self.provider.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let resp = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("token response unreadable: {e}"))?;
        if !status.is_success() {
            return Err(format!(
                "token endpoint returned {status}: {}",
                scrub_secrets(&body)
            ));
        }
        TokenResponse::parse(self.provider.dialect, &body)
            .and_then(TokenResponse::into_grant)
            .map_err(|reason| scrub_secrets(&reason))
    }

    async fn get_authorized(&self, url: &str, token: &str) -> Result<String, LookupError> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| LookupError::Failed(format!("request to {url} failed: {e}")))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LookupError::Rejected(status));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| LookupError::Failed(format!("response from {url} unreadable: {e}")))?;
        if !status.is_success() {
            return Err(LookupError::Failed(format!(
                "{url} returned {status}: {}",
                scrub_secrets(&body)
            )));
        }
        Ok(body)
    }

    async fn fetch_subject(&self, token: &str) -> Result<Subject, LookupError> {
        let body = self.get_authorized(&self.provider.identity_url, token).await?;
        IdentityResponse::parse(self.provider.dialect, &body)
            .map(IdentityResponse::into_subject)
            .map_err(LookupError::Failed)
    }

    /// Bind to one accessible resource, asking the user when there are several.
    async fn choose_resource(&self, token: &str) -> Result<Option<Resource>, AuthError> {
        let Some(url) = self.provider.resources_url.as_deref() else {
            return Ok(None);
        };
        let body = self
            .get_authorized(url, token)
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.into_detail()))?;
        let mut resources = parse_resources(&body).map_err(AuthError::ExchangeFailed)?;
        match resources.len() {
            0 => Err(AuthError::ExchangeFailed(format!(
                "no {} resources were authorized",
                self.provider.display_name
            ))),
            1 => Ok(resources.pop()),
            _ => {
                let names: Vec<String> = resources.iter().map(|r| r.name.clone()).collect();
                let title = format!("Choose a {} site", self.provider.display_name);
                match self.prompter.choose_one(&title, &names).await {
                    Some(index) if index < resources.len() => Ok(Some(resources.swap_remove(index))),
                    _ => Err(AuthError::Cancelled),
                }
            }
        }
    }

    fn credential_from_grant(
        &self,
        grant: TokenGrant,
        subject: Subject,
    ) -> Result<Credential, AuthError> {
        let expires_at = grant.expires_in.map(expiry_from_now).transpose()?;
        let mut credential = Credential::new(&self.provider.id, grant.access_token, subject);
        credential.refresh_token = grant.refresh_token;
        credential.expires_at = expires_at;
        if let Some(scopes) = grant.scopes {
            credential.scopes = scopes;
        }
        Ok(credential)
    }
}

/// Absolute expiry for a provider-reported lifetime in seconds.
fn expiry_from_now(secs: i64) -> Result<DateTime<Utc>, AuthError> {
    chrono::Duration::try_seconds(secs)
        .filter(|_| secs >= 0)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::ExchangeFailed(format!("token lifetime out of range: {secs}s")))
}

#[async_trait]
impl CredentialExchange for ExchangeClient {
    async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let provider = self.provider.id.as_str();
        tracing::debug!(provider, "exchanging authorization code");
        let work = async {
            let mut form = vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ];
            if let Some(verifier) = pkce_verifier {
                form.push(("code_verifier", verifier));
            }
            let grant = self
                .post_token(&self.provider.token_url, &form)
                .await
                .map_err(AuthError::ExchangeFailed)?;
            let subject = self
                .fetch_subject(&grant.access_token)
                .await
                .map_err(|e| AuthError::ExchangeFailed(e.into_detail()))?;
            let resource = self.choose_resource(&grant.access_token).await?;
            let mut credential = self.credential_from_grant(grant, subject)?;
            credential.resource = resource;
            Ok(credential)
        };
        let credential = with_timeout(self.request_timeout, work, |d| {
            AuthError::ExchangeFailed(format!("timed out after {}s", d.as_secs()))
        })
        .await
        .map_err(|err| {
            tracing::warn!(provider, error = %err, "code exchange failed");
            err
        })?;
        tracing::debug!(
            provider,
            subject = %credential.subject.id,
            token = %redact(&credential.access_token),
            "authorization code exchanged"
        );
        Ok(credential)
    }

    async fn exchange_long_lived_token(&self, token: &str) -> Result<Credential, AuthError> {
        let provider = self.provider.id.as_str();
        if !self.provider.personal_tokens {
            return Err(AuthError::Configuration(format!(
                "{} does not accept personal tokens",
                self.provider.display_name
            )));
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidCredential("token is empty".to_string()));
        }
        tracing::debug!(provider, token = %redact(token), "validating personal token");
        let subject = with_timeout(
            self.request_timeout,
            async {
                self.fetch_subject(token).await.map_err(|e| match e {
                    LookupError::Rejected(status) => AuthError::InvalidCredential(format!(
                        "{} rejected the token (status {})",
                        self.provider.display_name,
                        status.as_u16()
                    )),
                    LookupError::Failed(detail) => AuthError::ExchangeFailed(detail),
                })
            },
            |d| AuthError::ExchangeFailed(format!("timed out after {}s", d.as_secs())),
        )
        .await?;
        Ok(Credential::new(provider, token, subject).with_kind(CredentialKind::PersonalToken))
    }

    async fn refresh(&self, previous: &Credential) -> Result<Credential, AuthError> {
        let provider = self.provider.id.as_str();
        let Some(refresh_token) = previous.refresh_token.as_deref() else {
            return Err(AuthError::RefreshFailed(
                "credential has no refresh token".to_string(),
            ));
        };
        tracing::debug!(provider, token = %redact(refresh_token), "refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let grant = with_timeout(
            self.request_timeout,
            async {
                self.post_token(self.provider.refresh_endpoint(), &form)
                    .await
                    .map_err(AuthError::RefreshFailed)
            },
            |d| AuthError::RefreshFailed(format!("timed out after {}s", d.as_secs())),
        )
        .await?;
        let mut credential = self.credential_from_grant(grant, previous.subject.clone())?;
        if credential.refresh_token.is_none() {
            credential.refresh_token = previous.refresh_token.clone();
        }
        if credential.scopes.is_empty() {
            credential.scopes = previous.scopes.clone();
        }
        credential.resource = previous.resource.clone();
        Ok(credential)
    }
}
