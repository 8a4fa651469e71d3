//! Provider descriptors and the built-in connector presets.

use std::collections::BTreeMap;
use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::auth::credential::Scopes;
use crate::error::AuthError;

/// Shape of a provider's token and identity responses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenDialect {
    /// RFC 6749 token response, OIDC-style `userinfo` identity.
    #[default]
    Standard,
    /// Errors reported in a 200 body; identity from `/user`.
    #[strum(serialize = "github")]
    #[serde(rename = "github")]
    GitHub,
    /// Token response carries `user_id`; identity from `/v1/me`.
    Figma,
    /// Multiple cloud sites may be authorized; identity from `/me`.
    Atlassian,
}

/// Everything needed to run sign-in and refresh for one provider.
///
/// # Example
/// ```
/// use connector_auth::config::{ProviderConfig, TokenDialect};
///
/// let provider = ProviderConfig::builder()
///     .id("acme")
///     .display_name("Acme")
///     .dialect(TokenDialect::Standard)
///     .authorize_url("https://acme.example/oauth/authorize")
///     .token_url("https://acme.example/oauth/token")
///     .identity_url("https://acme.example/userinfo")
///     .callback_path("/acme/callback")
///     .client_id("client-123")
///     .build();
/// assert!(provider.validate().is_ok());
/// ```
#[derive(Clone, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    #[builder(default)]
    pub dialect: TokenDialect,
    pub authorize_url: String,
    pub token_url: String,
    /// Separate refresh endpoint, when the provider does not refresh at `token_url`.
    #[serde(default)]
    pub refresh_url: Option<String>,
    /// "Who am I" endpoint used to bind a subject and to validate personal tokens.
    pub identity_url: String,
    /// Lists the resources a token may be bound to.
    #[serde(default)]
    pub resources_url: Option<String>,
    /// Callback URI authority (`<scheme>://<connector_id>/...`).
    #[serde(default = "default_connector_id")]
    #[builder(default = default_connector_id())]
    pub connector_id: String,
    /// Callback URI path, exact-matched by the router.
    pub callback_path: String,
    #[serde(default)]
    #[builder(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub default_scopes: Vec<String>,
    #[serde(default = "default_scope_separator")]
    #[builder(default = default_scope_separator())]
    pub scope_separator: String,
    /// Extra query parameters for the authorize URL.
    #[serde(default)]
    #[builder(default)]
    pub authorize_params: BTreeMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub use_pkce: bool,
    /// Whether personal tokens are accepted for this provider.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub personal_tokens: bool,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("dialect", &self.dialect)
            .field("token_url", &self.token_url)
            .field("connector_id", &self.connector_id)
            .field("callback_path", &self.callback_path)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| ".."))
            .finish_non_exhaustive()
    }
}

fn default_connector_id() -> String {
    "connectors".to_string()
}

fn default_scope_separator() -> String {
    " ".to_string()
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// GitHub identity connector.
    pub fn github() -> Self {
        Self::builder()
            .id("github")
            .display_name("GitHub")
            .dialect(TokenDialect::GitHub)
            .authorize_url("https://github.com/login/oauth/authorize")
            .token_url("https://github.com/login/oauth/access_token")
            .identity_url("https://api.github.com/user")
            .callback_path("/github/callback")
            .default_scopes(vec!["read:user".to_string(), "repo".to_string()])
            .build()
    }

    /// Figma design-tool connector.
    pub fn figma() -> Self {
        Self::builder()
            .id("figma")
            .display_name("Figma")
            .dialect(TokenDialect::Figma)
            .authorize_url("https://www.figma.com/oauth")
            .token_url("https://api.figma.com/v1/oauth/token")
            .refresh_url("https://api.figma.com/v1/oauth/refresh".to_string())
            .identity_url("https://api.figma.com/v1/me")
            .callback_path("/figma/callback")
            .default_scopes(vec![
                "current_user:read".to_string(),
                "file_content:read".to_string(),
            ])
            .scope_separator(",")
            .build()
    }

    /// Jira issue-tracker connector (Atlassian cloud).
    pub fn jira() -> Self {
        Self::builder()
            .id("jira")
            .display_name("Jira")
            .dialect(TokenDialect::Atlassian)
            .authorize_url("https://auth.atlassian.com/authorize")
            .token_url("https://auth.atlassian.com/oauth/token")
            .identity_url("https://api.atlassian.com/me")
            .resources_url("https://api.atlassian.com/oauth/token/accessible-resources".to_string())
            .callback_path("/jira/callback")
            .default_scopes(vec![
                "read:jira-work".to_string(),
                "read:jira-user".to_string(),
                "read:me".to_string(),
                "offline_access".to_string(),
            ])
            .authorize_params(BTreeMap::from([
                ("audience".to_string(), "api.atlassian.com".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ]))
            .build()
    }

    /// Built-in preset by provider id.
    pub fn preset(id: &str) -> Option<Self> {
        match id {
            "github" => Some(Self::github()),
            "figma" => Some(Self::figma()),
            "jira" => Some(Self::jira()),
            _ => None,
        }
    }

    /// `<scheme>://<connector_id><callback_path>`.
    pub fn redirect_uri(&self, app_scheme: &str) -> String {
        format!("{app_scheme}://{}{}", self.connector_id, self.callback_path)
    }

    /// Endpoint used for `grant_type=refresh_token`.
    pub fn refresh_endpoint(&self) -> &str {
        self.refresh_url.as_deref().unwrap_or(&self.token_url)
    }

    /// Requested scopes, falling back to the provider defaults when empty.
    pub fn effective_scopes(&self, requested: &Scopes) -> Scopes {
        if requested.is_empty() {
            self.default_scopes.iter().cloned().collect()
        } else {
            requested.clone()
        }
    }

    /// Build the browser authorize URL for one flow.
    pub fn authorize_url_for(
        &self,
        redirect_uri: &str,
        scopes: &Scopes,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.authorize_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", redirect_uri);
            if !scopes.is_empty() {
                let joined = scopes
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(&self.scope_separator);
                query.append_pair("scope", &joined);
            }
            query.append_pair("state", state);
            for (key, value) in &self.authorize_params {
                query.append_pair(key, value);
            }
            if let Some(challenge) = code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    /// Reject descriptors that cannot possibly work.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.id.trim().is_empty() {
            return Err(AuthError::Configuration("provider id is empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(format!(
                "provider {} has no client id",
                self.id
            )));
        }
        if !self.callback_path.starts_with('/') {
            return Err(AuthError::Configuration(format!(
                "provider {} callback path must start with '/'",
                self.id
            )));
        }
        let mut urls = vec![&self.authorize_url, &self.token_url, &self.identity_url];
        urls.extend(self.refresh_url.as_ref());
        urls.extend(self.resources_url.as_ref());
        for raw in urls {
            Url::parse(raw).map_err(|e| {
                AuthError::Configuration(format!("provider {}: invalid url {raw}: {e}", self.id))
            })?;
        }
        Ok(())
    }
}
