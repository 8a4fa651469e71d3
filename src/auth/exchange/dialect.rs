//! Provider response shapes, normalized at the boundary.

use std::fmt;

use serde::Deserialize;

use crate::auth::credential::{redact, Resource, Scopes, Subject};
use crate::config::TokenDialect;

/// Provider-neutral result of a token endpoint call.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when the provider reports one.
    pub expires_in: Option<i64>,
    /// Granted scopes, when the provider echoes them.
    pub scopes: Option<Scopes>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// RFC 6749 §5.1 response; also the Atlassian shape.
#[derive(Deserialize)]
pub struct StandardToken {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GitHub answers with HTTP 200 even for errors; scopes are comma separated.
#[derive(Deserialize)]
pub struct GitHubToken {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Figma token and refresh responses; refresh omits `refresh_token`.
#[derive(Deserialize)]
pub struct FigmaToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl fmt::Debug for StandardToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardToken")
            .field("access_token", &self.access_token.as_deref().map(redact))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for GitHubToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubToken")
            .field("access_token", &self.access_token.as_deref().map(redact))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for FigmaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FigmaToken")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| ".."))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Token endpoint response, one variant per [`TokenDialect`].
#[derive(Debug)]
pub enum TokenResponse {
    Standard(StandardToken),
    GitHub(GitHubToken),
    Figma(FigmaToken),
    Atlassian(StandardToken),
}

impl TokenResponse {
    pub fn parse(dialect: TokenDialect, body: &str) -> Result<Self, String> {
        let parsed = match dialect {
            TokenDialect::Standard => serde_json::from_str(body).map(Self::Standard),
            TokenDialect::GitHub => serde_json::from_str(body).map(Self::GitHub),
            TokenDialect::Figma => serde_json::from_str(body).map(Self::Figma),
            TokenDialect::Atlassian => serde_json::from_str(body).map(Self::Atlassian),
        };
        parsed.map_err(|e| format!("malformed token response: {e}"))
    }

    /// Normalize into a [`TokenGrant`]; `Err` carries the provider's reason.
    pub fn into_grant(self) -> Result<TokenGrant, String> {
        match self {
            Self::Standard(token) | Self::Atlassian(token) => {
                if let Some(error) = token.error {
                    return Err(describe(&error, token.error_description.as_deref()));
                }
                let access_token = non_empty(token.access_token)?;
                Ok(TokenGrant {
                    access_token,
                    refresh_token: token.refresh_token,
                    expires_in: token.expires_in,
                    scopes: token.scope.map(|s| split_scopes(&s, ' ')),
                })
            }
            Self::GitHub(token) => {
                if let Some(error) = token.error {
                    return Err(describe(&error, token.error_description.as_deref()));
                }
                let access_token = non_empty(token.access_token)?;
                Ok(TokenGrant {
                    access_token,
                    refresh_token: token.refresh_token,
                    expires_in: token.expires_in,
                    scopes: token.scope.map(|s| split_scopes(&s, ',')),
                })
            }
            Self::Figma(token) => Ok(TokenGrant {
                access_token: non_empty(Some(token.access_token))?,
                refresh_token: token.refresh_token,
                expires_in: token.expires_in,
                scopes: None,
            }),
        }
    }
}

fn non_empty(token: Option<String>) -> Result<String, String> {
    match token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err("token response did not contain an access token".to_string()),
    }
}

fn describe(error: &str, description: Option<&str>) -> String {
    match description {
        Some(description) => format!("{error}: {description}"),
        None => error.to_string(),
    }
}

/// Split a provider scope string; empty segments are dropped.
pub fn split_scopes(raw: &str, separator: char) -> Scopes {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// OpenID Connect `userinfo`.
#[derive(Debug, Deserialize)]
pub struct StandardIdentity {
    pub sub: String,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// GitHub `/user`.
#[derive(Debug, Deserialize)]
pub struct GitHubIdentity {
    pub id: u64,
    pub login: String,
}

/// Figma `/v1/me`.
#[derive(Debug, Deserialize)]
pub struct FigmaIdentity {
    pub id: String,
    pub handle: Option<String>,
    pub email: Option<String>,
}

/// Atlassian `/me`.
#[derive(Debug, Deserialize)]
pub struct AtlassianIdentity {
    pub account_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// "Who am I" response, one variant per [`TokenDialect`].
#[derive(Debug)]
pub enum IdentityResponse {
    Standard(StandardIdentity),
    GitHub(GitHubIdentity),
    Figma(FigmaIdentity),
    Atlassian(AtlassianIdentity),
}

impl IdentityResponse {
    pub fn parse(dialect: TokenDialect, body: &str) -> Result<Self, String> {
        let parsed = match dialect {
            TokenDialect::Standard => serde_json::from_str(body).map(Self::Standard),
            TokenDialect::GitHub => serde_json::from_str(body).map(Self::GitHub),
            TokenDialect::Figma => serde_json::from_str(body).map(Self::Figma),
            TokenDialect::Atlassian => serde_json::from_str(body).map(Self::Atlassian),
        };
        parsed.map_err(|e| format!("malformed identity response: {e}"))
    }

    pub fn into_subject(self) -> Subject {
        match self {
            Self::Standard(me) => {
                let label = me
                    .preferred_username
                    .or(me.name)
                    .or(me.email)
                    .unwrap_or_else(|| me.sub.clone());
                Subject { id: me.sub, label }
            }
            Self::GitHub(me) => Subject {
                id: me.id.to_string(),
                label: me.login,
            },
            Self::Figma(me) => {
                let label = me.handle.or(me.email).unwrap_or_else(|| me.id.clone());
                Subject { id: me.id, label }
            }
            Self::Atlassian(me) => {
                let label = me.name.or(me.email).unwrap_or_else(|| me.account_id.clone());
                Subject {
                    id: me.account_id,
                    label,
                }
            }
        }
    }
}

/// One entry of an accessible-resources listing.
#[derive(Debug, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<ResourceEntry> for Resource {
    fn from(entry: ResourceEntry) -> Self {
        Resource {
            id: entry.id,
            name: entry.name,
            url: entry.url,
        }
    }
}

pub fn parse_resources(body: &str) -> Result<Vec<Resource>, String> {
    let entries: Vec<ResourceEntry> =
        serde_json::from_str(body).map_err(|e| format!("malformed resource listing: {e}"))?;
    Ok(entries.into_iter().map(Resource::from).collect())
}
