//! Routing of redirect URIs delivered by the host application.

use std::fmt;

use url::Url;

use crate::auth::credential::redact;
use crate::error::AuthError;

/// Query parameters of an authorization redirect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Extract the parameters from a parsed redirect URI.
    ///
    /// When a parameter is repeated, the first occurrence wins.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("code", &self.code.as_deref().map(redact))
            .field("state", &self.state.as_deref().map(redact))
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

/// A redirect matched to the provider that owns its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedCallback {
    pub provider_id: String,
    pub params: CallbackParams,
}

#[derive(Debug, Clone)]
struct Route {
    connector_id: String,
    path: String,
    provider_id: String,
}

/// Maps `<scheme>://<connector_id><path>` to a provider id.
#[derive(Debug, Clone)]
pub struct CallbackRouter {
    app_scheme: String,
    routes: Vec<Route>,
}

impl CallbackRouter {
    pub fn new(app_scheme: impl Into<String>) -> Self {
        Self {
            app_scheme: app_scheme.into(),
            routes: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        connector_id: impl Into<String>,
        path: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Result<(), AuthError> {
        let route = Route {
            connector_id: connector_id.into(),
            path: path.into(),
            provider_id: provider_id.into(),
        };
        if self
            .routes
            .iter()
            .any(|r| r.connector_id.eq_ignore_ascii_case(&route.connector_id) && r.path == route.path)
        {
            return Err(AuthError::Configuration(format!(
                "callback route {}{} is already registered",
                route.connector_id, route.path
            )));
        }
        self.routes.push(route);
        Ok(())
    }

    /// Match a redirect URI; `None` when it is malformed or belongs to nobody.
    pub fn route(&self, uri: &str) -> Option<RoutedCallback> {
        let url = match Url::parse(uri) {
            Ok(url) => url,
            Err(err) => {
                tracing::debug!(error = %err, "ignoring unparsable callback uri");
                return None;
            }
        };
        if !url.scheme().eq_ignore_ascii_case(&self.app_scheme) {
            tracing::debug!(scheme = url.scheme(), "ignoring callback for another scheme");
            return None;
        }
        let host = url.host_str().unwrap_or_default();
        let route = self
            .routes
            .iter()
            .find(|r| r.connector_id.eq_ignore_ascii_case(host) && r.path == url.path());
        match route {
            Some(route) => Some(RoutedCallback {
                provider_id: route.provider_id.clone(),
                params: CallbackParams::from_url(&url),
            }),
            None => {
                tracing::debug!(host, path = url.path(), "no connector handles callback");
                None
            }
        }
    }
}
