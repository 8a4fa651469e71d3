//! Convenience re-exports for common use.

pub use crate::auth::{
    scopes, CallbackOutcome, Credential, ProviderRegistry, Scopes, Session, SessionChange,
    SessionMode, Subject,
};
pub use crate::config::{AuthConfig, ProviderConfig, TokenDialect};
pub use crate::error::{AuthError, AuthFailure, Result};
pub use crate::host::{BrowserLauncher, Prompter};
