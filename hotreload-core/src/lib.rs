//! File observation, reload coordination, dynamic credential storage, and a
//! resettable TLS context for hot-reloaded keystores and trust stores.

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod key_selector;
pub mod observer;
pub mod registration;
pub mod store;
pub mod tls_context;
pub mod trust_validator;

pub use config::{ChainPosition, HotReloadConfig};
pub use coordinator::{ReloadCoordinator, ReloadListener};
pub use debounce::{DebouncedConsumer, EventDebouncer};
pub use key_selector::ReloadableKeySelector;
pub use observer::{FileObserver, ObserverConfig};
pub use registration::{AlgorithmEntry, AlgorithmKind, ProviderRegistration, ALGORITHMS};
pub use store::{
    CertificateEntry, CredentialParser, DynamicCredentialStore, KeyEntry, ParsedCredentials,
    PemCredentialParser,
};
pub use tls_context::{ResettableTlsContext, RustlsClientEngine, RustlsServerEngine, TlsEngine};
pub use trust_validator::ReloadableTrustValidator;
