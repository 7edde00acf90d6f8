//! Exposes the core's components under stable algorithm names so the host TLS stack's
//! service-lookup resolves them, the way `rustls::crypto::CryptoProvider` is installed
//! via `install_default()`/`install_into()` (spec.md §4.7).
//!
//! The actual registration into a cryptographic-provider registry is an external
//! collaborator per spec.md §1 — this type only records *what* would be registered
//! and *where* in the provider chain, for the host application to act on.

use crate::config::ChainPosition;

/// One entry in the registration surface: an algorithm name paired with a short
/// human-readable description of what it resolves to.
#[derive(Debug, Clone)]
pub struct AlgorithmEntry {
    pub name: &'static str,
    pub kind: AlgorithmKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Keystore,
    KeySelector,
    TrustValidator,
    Context,
}

/// Algorithm names the core registers, per spec.md §4.7.
pub const ALGORITHMS: &[AlgorithmEntry] = &[
    AlgorithmEntry { name: "DynamicKeystore", kind: AlgorithmKind::Keystore },
    AlgorithmEntry { name: "ReloadableX509", kind: AlgorithmKind::KeySelector },
    AlgorithmEntry { name: "ReloadablePKIX", kind: AlgorithmKind::KeySelector },
    AlgorithmEntry { name: "ReloadableSimple", kind: AlgorithmKind::TrustValidator },
    AlgorithmEntry { name: "ReloadablePKIX", kind: AlgorithmKind::TrustValidator },
    AlgorithmEntry { name: "TLSv1", kind: AlgorithmKind::Context },
    AlgorithmEntry { name: "TLSv1.1", kind: AlgorithmKind::Context },
    AlgorithmEntry { name: "TLSv1.2", kind: AlgorithmKind::Context },
    AlgorithmEntry { name: "TLSv1.3", kind: AlgorithmKind::Context },
    AlgorithmEntry { name: "TLS", kind: AlgorithmKind::Context },
    AlgorithmEntry { name: "Default", kind: AlgorithmKind::Context },
];

/// Records where in the host's provider-lookup chain the registration surface was
/// installed. `install_head` intercepts default algorithm names; `install_tail` is
/// only reached when a caller explicitly requests one of [`ALGORITHMS`] by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderRegistration {
    position: ChainPosition,
}

impl ProviderRegistration {
    pub fn install_head() -> Self {
        Self { position: ChainPosition::Head }
    }

    pub fn install_tail() -> Self {
        Self { position: ChainPosition::Tail }
    }

    pub fn install(position: ChainPosition) -> Self {
        Self { position }
    }

    pub fn position(&self) -> ChainPosition {
        self.position
    }

    pub fn algorithms(&self) -> &'static [AlgorithmEntry] {
        ALGORITHMS
    }
}
