use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Set of OAuth scopes, kept sorted so persisted sessions are stable.
pub type Scopes = BTreeSet<String>;

/// Build a [`Scopes`] set from anything string-like.
pub fn scopes<I, S>(items: I) -> Scopes
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// The account a credential was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub label: String,
}

/// An authorizable resource (e.g. a cloud site) a credential is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// How a credential was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Authorization-code flow; may carry a refresh token.
    #[default]
    OAuth,
    /// User-supplied long-lived token, validated against the identity endpoint.
    PersonalToken,
}

/// Canonical credential record every provider response is normalized into.
///
/// `Debug` never prints token values.
///
/// # Example
/// ```
/// use connector_auth::auth::{scopes, Credential, Subject};
///
/// let credential = Credential::new(
///     "github",
///     "gho_secret",
///     Subject { id: "42".into(), label: "octocat".into() },
/// )
/// .with_scopes(scopes(["repo", "read:user"]));
/// assert!(!format!("{credential:?}").contains("gho_secret"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub provider_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Scopes,
    pub subject: Subject,
    #[serde(default)]
    pub kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
}

impl Credential {
    pub fn new(
        provider_id: impl Into<String>,
        access_token: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Scopes::new(),
            subject,
            kind: CredentialKind::OAuth,
            resource: None,
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scopes(mut self, scopes: Scopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_kind(mut self, kind: CredentialKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// True if the token expires within `skew` of `now`.
    pub fn expires_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp - skew <= now).unwrap_or(false)
    }

    /// Whether this credential grants every scope in `required`.
    ///
    /// Personal tokens carry whatever the user granted when minting them, so
    /// they are treated as satisfying any filter.
    pub fn satisfies(&self, required: &Scopes) -> bool {
        self.kind == CredentialKind::PersonalToken || required.is_subset(&self.scopes)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider_id", &self.provider_id)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("subject", &self.subject)
            .field("kind", &self.kind)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Shorten a secret for logs: the first four characters followed by `…`.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "…".to_string()
    } else {
        format!("{prefix}…")
    }
}
