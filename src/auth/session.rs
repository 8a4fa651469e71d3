use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::credential::{Credential, Subject};

/// A persisted credential bound to one account of one provider.
///
/// Identified by `(provider_id, account.id)`; `id` stays stable when the
/// credential is refreshed in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider_id: String,
    pub account: Subject,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for a freshly exchanged credential.
    pub fn from_credential(credential: Credential) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: credential.provider_id.clone(),
            account: credential.subject.clone(),
            credential,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.account.id
    }

    /// Bearer value for outgoing calls.
    pub fn access_token(&self) -> &str {
        &self.credential.access_token
    }
}

/// Notification emitted by a [`SessionStore`](super::SessionStore) mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Added(Session),
    Changed(Session),
    Removed(Session),
}

impl SessionChange {
    pub fn session(&self) -> &Session {
        match self {
            Self::Added(s) | Self::Changed(s) | Self::Removed(s) => s,
        }
    }
}

/// Behavior of [`ProviderRegistry::get_session`](super::ProviderRegistry::get_session)
/// when no matching session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SessionMode {
    /// Start an interactive sign-in.
    CreateIfNone,
    /// Return `None` without user interaction.
    Silent,
}
