//! Connector sign-in, sessions and single-flight token refresh.

pub mod callback;
pub mod credential;
pub mod exchange;
pub mod flow;
pub mod nonce;
pub mod refresh;
pub mod registry;
pub mod session;
pub mod sessions;
pub mod store;

pub use callback::{CallbackParams, CallbackRouter, RoutedCallback};
pub use credential::{redact, scopes, Credential, CredentialKind, Resource, Scopes, Subject};
pub use exchange::{CredentialExchange, ExchangeClient};
pub use flow::{CallbackOutcome, FlowCoordinator, PendingAuthRequest};
pub use nonce::{Nonce, Pkce};
pub use refresh::{RefreshState, TokenRefreshGate};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
pub use session::{Session, SessionChange, SessionMode};
pub use sessions::SessionStore;
#[cfg(feature = "keyring")]
pub use store::KeyringSecretStore;
pub use store::{FileSecretStore, MemorySecretStore, SecretStore};
