//! Canonical per-provider session list with write-through persistence.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::credential::Scopes;
use super::session::{Session, SessionChange};
use super::store::SecretStore;
use crate::error::AuthError;

const SESSIONS_VERSION: u32 = 1;
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct SessionsDocument {
    version: u32,
    sessions: Vec<Session>,
}

/// Sessions of one provider.
///
/// Loaded once from the [`SecretStore`] under `"<provider_id>.sessions"` and
/// written through on every mutation. A failed write leaves the in-memory list
/// untouched.
pub struct SessionStore {
    provider_id: String,
    secrets: Arc<dyn SecretStore>,
    sessions: Mutex<Vec<Session>>,
    events: broadcast::Sender<SessionChange>,
}

impl SessionStore {
    pub fn load(
        provider_id: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, AuthError> {
        let provider_id = provider_id.into();
        let sessions = match secrets.get(&storage_key(&provider_id))? {
            Some(raw) => {
                let doc: SessionsDocument = serde_json::from_str(&raw)?;
                if doc.version != SESSIONS_VERSION {
                    return Err(AuthError::Storage(format!(
                        "unsupported sessions version {} for {provider_id}",
                        doc.version
                    )));
                }
                doc.sessions
            }
            None => Vec::new(),
        };
        tracing::debug!(provider = %provider_id, count = sessions.len(), "loaded sessions");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            provider_id,
            secrets,
            sessions: Mutex::new(sessions),
            events,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Sessions whose scopes cover `scope_filter`.
    pub fn list(&self, scope_filter: Option<&Scopes>) -> Vec<Session> {
        self.lock()
            .iter()
            .filter(|s| scope_filter.map_or(true, |f| s.credential.satisfies(f)))
            .cloned()
            .collect()
    }

    pub fn find(&self, session_id: &str) -> Option<Session> {
        self.lock().iter().find(|s| s.id == session_id).cloned()
    }

    pub fn find_by_subject(&self, subject_id: &str) -> Option<Session> {
        self.lock()
            .iter()
            .find(|s| s.subject_id() == subject_id)
            .cloned()
    }

    /// Insert, or replace the session for the same subject in place.
    ///
    /// A replaced session keeps its `id` and `created_at`. Returns the stored
    /// session.
    pub fn upsert(&self, mut session: Session) -> Result<Session, AuthError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let change = match next
            .iter_mut()
            .find(|s| s.subject_id() == session.subject_id())
        {
            Some(existing) => {
                session.id = existing.id.clone();
                session.created_at = existing.created_at;
                session.updated_at = Utc::now();
                *existing = session.clone();
                SessionChange::Changed(session.clone())
            }
            None => {
                next.push(session.clone());
                SessionChange::Added(session.clone())
            }
        };
        self.persist(&next)?;
        *guard = next;
        tracing::debug!(
            provider = %self.provider_id,
            session_id = %session.id,
            added = matches!(change, SessionChange::Added(_)),
            "session stored"
        );
        let _ = self.events.send(change);
        Ok(session)
    }

    /// Remove one session; an unknown id is a silent no-op.
    pub fn remove(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let mut guard = self.lock();
        let Some(index) = guard.iter().position(|s| s.id == session_id) else {
            return Ok(None);
        };
        let mut next = guard.clone();
        let removed = next.remove(index);
        self.persist(&next)?;
        *guard = next;
        tracing::debug!(provider = %self.provider_id, session_id, "session removed");
        let _ = self.events.send(SessionChange::Removed(removed.clone()));
        Ok(Some(removed))
    }

    pub fn remove_all(&self) -> Result<Vec<Session>, AuthError> {
        let mut guard = self.lock();
        if guard.is_empty() {
            return Ok(Vec::new());
        }
        self.persist(&[])?;
        let removed = std::mem::take(&mut *guard);
        for session in &removed {
            let _ = self.events.send(SessionChange::Removed(session.clone()));
        }
        Ok(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    fn persist(&self, sessions: &[Session]) -> Result<(), AuthError> {
        let key = storage_key(&self.provider_id);
        if sessions.is_empty() {
            return self.secrets.delete(&key);
        }
        let doc = SessionsDocument {
            version: SESSIONS_VERSION,
            sessions: sessions.to_vec(),
        };
        self.secrets.set(&key, &serde_json::to_string(&doc)?)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn storage_key(provider_id: &str) -> String {
    format!("{provider_id}.sessions")
}
