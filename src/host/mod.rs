//! Collaborators supplied by the host application: browser and user prompts.
//!
//! Secret persistence lives in [`crate::auth::store`].

use async_trait::async_trait;

use crate::error::AuthError;

/// Opens a URL in the user's browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), AuthError>;
}

/// Launches the system default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        opener::open(url).map_err(|e| AuthError::Browser(e.to_string()))
    }
}

/// User-facing prompt surface.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Show a message.
    async fn inform(&self, message: &str);

    /// Ask a yes/no question with an affirmative action label.
    async fn confirm(&self, message: &str, action: &str) -> bool;

    /// Pick one of `options`; `None` when dismissed.
    async fn choose_one(&self, title: &str, options: &[String]) -> Option<usize>;
}

/// Prompter for headless hosts: informs via `tracing`, declines every question,
/// and picks the first option when a choice is unavoidable.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPrompter;

#[async_trait]
impl Prompter for HeadlessPrompter {
    async fn inform(&self, message: &str) {
        tracing::info!(message, "auth notice");
    }

    async fn confirm(&self, _message: &str, _action: &str) -> bool {
        false
    }

    async fn choose_one(&self, _title: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
