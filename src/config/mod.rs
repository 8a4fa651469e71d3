//! Configuration system (layered: code > env > config file).

pub mod provider;

pub use provider::{ProviderConfig, TokenDialect};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::store::{default_store_dir, normalize_key};
use crate::error::AuthError;
use crate::util::backoff::Backoff;

const DEFAULT_APP_SCHEME: &str = "connector-auth";
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits applied by the token refresh gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Callers that may queue behind one in-flight refresh.
    pub max_waiters: usize,
    /// Refresh proactively when the token expires within this many seconds.
    pub expiry_skew_secs: i64,
    /// Fail-fast window after consecutive refresh failures.
    pub backoff: Backoff,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_waiters: 64,
            expiry_skew_secs: 60,
            backoff: Backoff::default(),
        }
    }
}

/// Top-level configuration for the provider registry.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// URI scheme the host application is registered for.
    pub app_scheme: String,
    /// Deadline for a browser sign-in to call back.
    pub flow_timeout: Duration,
    /// Deadline for one exchange or refresh, including follow-up lookups.
    pub request_timeout: Duration,
    pub refresh: RefreshPolicy,
    pub providers: Vec<ProviderConfig>,
    /// Directory used by the file-backed secret store.
    pub store_dir: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_scheme: DEFAULT_APP_SCHEME.to_string(),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh: RefreshPolicy::default(),
            providers: Vec::new(),
            store_dir: default_store_dir(),
        }
    }
}

/// Client credentials for one provider, as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ClientCredentials {
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    app_scheme: Option<String>,
    flow_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    store_dir: Option<PathBuf>,
    refresh: Option<RefreshPolicy>,
    /// Built-in providers to enable by id (`github`, `figma`, `jira`).
    presets: Vec<String>,
    /// Fully described custom providers.
    providers: Vec<ProviderConfig>,
    /// Client id/secret keyed by provider id.
    clients: BTreeMap<String, ClientCredentials>,
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_app_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.app_scheme = scheme.into();
        self
    }

    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = policy;
        self
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Parse a TOML config document.
    ///
    /// ```
    /// use connector_auth::config::AuthConfig;
    ///
    /// let config = AuthConfig::from_toml_str(r#"
    ///     app_scheme = "myapp"
    ///     presets = ["github"]
    ///
    ///     [clients.github]
    ///     client_id = "Iv1.abc"
    /// "#)?;
    /// assert_eq!(config.provider("github").unwrap().client_id, "Iv1.abc");
    /// # Ok::<(), connector_auth::error::AuthError>(())
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, AuthError> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut config = Self::default();
        if let Some(scheme) = file.app_scheme {
            config.app_scheme = scheme;
        }
        if let Some(secs) = file.flow_timeout_secs {
            config.flow_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = file.store_dir {
            config.store_dir = dir;
        }
        if let Some(refresh) = file.refresh {
            config.refresh = refresh;
        }
        for name in &file.presets {
            let preset = ProviderConfig::preset(name)
                .ok_or_else(|| AuthError::Configuration(format!("unknown preset: {name}")))?;
            config.providers.push(preset);
        }
        config.providers.extend(file.providers);
        for (id, creds) in file.clients {
            let provider = config
                .providers
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| {
                    AuthError::Configuration(format!("client credentials for unknown provider {id}"))
                })?;
            if let Some(client_id) = creds.client_id {
                provider.client_id = client_id;
            }
            if creds.client_secret.is_some() {
                provider.client_secret = creds.client_secret;
            }
        }
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AuthError::Configuration(format!(
                "cannot read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Defaults overlaid with the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an environment lookup.
    ///
    /// Recognized: `CONNECTOR_AUTH_SCHEME`, `CONNECTOR_AUTH_FLOW_TIMEOUT_SECS`,
    /// `CONNECTOR_AUTH_REQUEST_TIMEOUT_SECS`, `CONNECTOR_AUTH_STORE_DIR`,
    /// `CONNECTOR_AUTH_PRESETS` (comma separated) and, per provider,
    /// `<ID>_CLIENT_ID` / `<ID>_CLIENT_SECRET`.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(scheme) = lookup("CONNECTOR_AUTH_SCHEME") {
            self.app_scheme = scheme;
        }
        if let Some(secs) = lookup("CONNECTOR_AUTH_FLOW_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.flow_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) =
            lookup("CONNECTOR_AUTH_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("CONNECTOR_AUTH_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(presets) = lookup("CONNECTOR_AUTH_PRESETS") {
            for name in presets.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if self.provider(name).is_some() {
                    continue;
                }
                match ProviderConfig::preset(name) {
                    Some(preset) => self.providers.push(preset),
                    None => tracing::warn!(preset = name, "ignoring unknown provider preset"),
                }
            }
        }
        for provider in &mut self.providers {
            let prefix = env_prefix(&provider.id);
            if let Some(client_id) = lookup(&format!("{prefix}_CLIENT_ID")) {
                provider.client_id = client_id;
            }
            if let Some(secret) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
                provider.client_secret = Some(secret);
            }
        }
        self
    }

    /// Reject configurations the registry cannot run.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.app_scheme.is_empty()
            || !self
                .app_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(AuthError::Configuration(format!(
                "invalid app scheme: {:?}",
                self.app_scheme
            )));
        }
        if self.flow_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(AuthError::Configuration("timeouts must be non-zero".to_string()));
        }
        let mut ids = HashSet::new();
        let mut storage_keys = HashMap::new();
        let mut routes = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !ids.insert(provider.id.as_str()) {
                return Err(AuthError::Configuration(format!(
                    "duplicate provider id: {}",
                    provider.id
                )));
            }
            if let Some(other) =
                storage_keys.insert(normalize_key(&provider.id), provider.id.as_str())
            {
                return Err(AuthError::Configuration(format!(
                    "provider ids {other} and {} would share session storage",
                    provider.id
                )));
            }
            if !routes.insert((provider.connector_id.as_str(), provider.callback_path.as_str())) {
                return Err(AuthError::Configuration(format!(
                    "duplicate callback route for provider {}",
                    provider.id
                )));
            }
        }
        Ok(())
    }
}

fn env_prefix(provider_id: &str) -> String {
    provider_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
