//! Error types for connector authentication.

pub mod unified;

pub use unified::{ErrorKind, RecoverySuggestion};

use thiserror::Error;

/// Authentication and token-lifecycle errors.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// queued behind it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Sign-in timed out")]
    AuthTimeout,

    #[error("Sign-in was denied: {reason}")]
    Denied { reason: String },

    #[error("Callback state did not match the pending sign-in request")]
    InvalidState,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Sign-in superseded by a newer request")]
    Superseded,

    #[error("Session expired")]
    AuthExpired,

    #[error("Sign-in cancelled")]
    Cancelled,

    #[error("Not signed in to {0}")]
    NotSignedIn(String),

    #[error("Provider rejected the access token (status {status})")]
    Unauthorized { status: u16 },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Too many callers waiting for token refresh on {0}")]
    RefreshQueueFull(String),

    #[error("Could not open browser: {0}")]
    Browser(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthTimeout => ErrorKind::Timeout,
            Self::Denied { .. } => ErrorKind::Denied,
            Self::InvalidState => ErrorKind::InvalidState,
            Self::InvalidCredential(_) => ErrorKind::InvalidCredential,
            Self::ExchangeFailed(_) => ErrorKind::Exchange,
            Self::RefreshFailed(_) => ErrorKind::Refresh,
            Self::Superseded => ErrorKind::Superseded,
            Self::AuthExpired | Self::Unauthorized { .. } => ErrorKind::Expired,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotSignedIn(_) => ErrorKind::NotSignedIn,
            Self::RefreshQueueFull(_) => ErrorKind::Busy,
            Self::Browser(_) | Self::Storage(_) | Self::Serialization(_) => ErrorKind::Host,
            Self::UnknownProvider(_) | Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the session this error was raised for can no longer be used.
    pub fn is_session_terminating(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::AuthExpired)
    }

    /// Whether retrying the same operation may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Exchange | ErrorKind::Busy
        )
    }

    /// Suggest what the user should do next.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.kind() {
            ErrorKind::Expired | ErrorKind::Refresh | ErrorKind::NotSignedIn => {
                RecoverySuggestion::SignInAgain
            }
            ErrorKind::InvalidCredential => RecoverySuggestion::CheckCredential,
            ErrorKind::Timeout
            | ErrorKind::Denied
            | ErrorKind::InvalidState
            | ErrorKind::Exchange
            | ErrorKind::Busy
            | ErrorKind::Host => RecoverySuggestion::Retry,
            ErrorKind::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorKind::Superseded | ErrorKind::Cancelled => RecoverySuggestion::None,
        }
    }

    /// Actionable, token-free text for the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthTimeout => "Sign-in timed out. Please try again.".to_string(),
            Self::Denied { .. } => "Sign-in was denied by the provider.".to_string(),
            Self::InvalidState => {
                "Sign-in could not be verified (the callback did not match). Please try again."
                    .to_string()
            }
            Self::InvalidCredential(_) => {
                "The token was rejected. Check that it is valid and has the required scopes."
                    .to_string()
            }
            Self::ExchangeFailed(_) => {
                "Could not complete sign-in with the provider. Please try again.".to_string()
            }
            Self::RefreshFailed(_) | Self::AuthExpired | Self::Unauthorized { .. } => {
                "Your session expired. Please sign in again.".to_string()
            }
            Self::Superseded => "A newer sign-in replaced this one.".to_string(),
            Self::Cancelled => "Sign-in was cancelled.".to_string(),
            Self::NotSignedIn(provider) => format!("You are not signed in to {provider}."),
            Self::UnknownProvider(provider) => format!("{provider} is not a configured connector."),
            Self::RefreshQueueFull(_) => "Too many requests are waiting. Please try again.".to_string(),
            Self::Browser(_) => "Could not open the browser to sign in.".to_string(),
            Self::Storage(_) | Self::Serialization(_) => {
                "Could not read or save your session.".to_string()
            }
            Self::Configuration(_) => "The connector is not configured correctly.".to_string(),
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Transport failures of a wrapped provider call; a 401 keeps its status so the
/// refresh gate can react to it.
impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => Self::Unauthorized {
                status: status.as_u16(),
            },
            _ => Self::ExchangeFailed(error.without_url().to_string()),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(error: url::ParseError) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Errors a wrapped call can report, classified for the refresh gate.
///
/// Implemented by the error type of any call passed to
/// [`TokenRefreshGate::wrap`](crate::auth::TokenRefreshGate::wrap).
pub trait AuthFailure {
    /// True when the provider rejected the bearer token.
    fn is_auth_failure(&self) -> bool;
}

impl AuthFailure for AuthError {
    fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

impl AuthFailure for reqwest::Error {
    fn is_auth_failure(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;
