//! Error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error kind for routing recovery logic and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Denied,
    InvalidState,
    InvalidCredential,
    Exchange,
    Refresh,
    Superseded,
    Expired,
    Cancelled,
    NotSignedIn,
    Busy,
    Host,
    Configuration,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Start a new sign-in.
    SignInAgain,
    /// Retry the same operation.
    Retry,
    /// Re-enter or regenerate a personal token.
    CheckCredential,
    CheckConfiguration,
    None,
}
