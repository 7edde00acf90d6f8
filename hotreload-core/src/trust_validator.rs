//! Delegating wrapper around a peer-certificate validator; on reload, rebuilds the
//! underlying delegate from the same [`DynamicCredentialStore`] (spec.md §4.5).
//!
//! The source ecosystem exposes one trust-manager interface usable on either side of
//! a connection (client validating a server's chain, or server validating a client's
//! chain in mTLS); `rustls` splits this into two distinct traits
//! ([`ServerCertVerifier`](rustls::client::danger::ServerCertVerifier) and
//! [`ClientCertVerifier`](rustls::server::danger::ClientCertVerifier)). This type
//! implements both against the same reloadable trust-anchor set, so a single
//! `ReloadableTrustValidator` can back `ResettableTlsContext` in either role — see
//! SPEC_FULL.md §4 / DESIGN.md for the rationale.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hotreload_types::{HotReloadError, Result};
use rustls::client::danger::{HandshakeSignatureValid as ClientHsv, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::warn;

use crate::coordinator::{ReloadCoordinator, ReloadListener};
use crate::store::DynamicCredentialStore;

struct Delegates {
    as_client_role: Arc<dyn ServerCertVerifier>,
    as_server_role: Arc<dyn ClientCertVerifier>,
}

/// Validates peer certificate chains against a reloadable set of trust anchors drawn
/// from a [`DynamicCredentialStore`]'s certificate entries.
pub struct ReloadableTrustValidator {
    store: Arc<DynamicCredentialStore>,
    current: ArcSwap<Delegates>,
}

impl fmt::Debug for ReloadableTrustValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadableTrustValidator").finish()
    }
}

impl ReloadableTrustValidator {
    pub fn new(store: Arc<DynamicCredentialStore>, coordinator: &ReloadCoordinator) -> Result<Arc<Self>> {
        let delegates = Self::build_delegates(&store)?;
        let this = Arc::new(Self {
            store,
            current: ArcSwap::from_pointee(delegates),
        });
        let listener: Arc<dyn ReloadListener> = Arc::clone(&this) as Arc<dyn ReloadListener>;
        coordinator.listen(&this.store, Arc::downgrade(&listener));
        Ok(this)
    }

    fn build_delegates(store: &DynamicCredentialStore) -> Result<Delegates> {
        let mut roots = RootCertStore::empty();
        for alias in store.aliases() {
            if !store.is_certificate_entry(&alias) {
                continue;
            }
            let Some(cert) = store.get_certificate(&alias) else {
                continue;
            };
            if let Err(e) = roots.add(cert) {
                warn!(alias = %alias, error = %e, "skipping unparsable trust anchor");
            }
        }
        if roots.is_empty() {
            return Err(HotReloadError::Configuration(
                "no trust anchors found in credential store".into(),
            ));
        }
        let roots = Arc::new(roots);

        let as_client_role = WebPkiServerVerifier::builder(Arc::clone(&roots))
            .build()
            .map_err(|e| HotReloadError::Parse {
                format_tag: "trust-anchors".into(),
                reason: e.to_string(),
            })?;
        let as_server_role = WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| HotReloadError::Parse {
                format_tag: "trust-anchors".into(),
                reason: e.to_string(),
            })?;

        Ok(Delegates {
            as_client_role,
            as_server_role,
        })
    }

    /// The [`DynamicCredentialStore`]s this validator depends on (spec.md §4.6, §9).
    pub fn underlying_stores(&self) -> Vec<Arc<DynamicCredentialStore>> {
        vec![Arc::clone(&self.store)]
    }
}

impl ReloadListener for ReloadableTrustValidator {
    fn on_reloaded(&self) {
        match Self::build_delegates(&self.store) {
            Ok(fresh) => self.current.store(Arc::new(fresh)),
            Err(e) => warn!(error = %e, "trust validator reload failed; keeping previous delegate"),
        }
    }
}

impl ServerCertVerifier for ReloadableTrustValidator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.current
            .load()
            .as_client_role
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<ClientHsv, rustls::Error> {
        self.current.load().as_client_role.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<ClientHsv, rustls::Error> {
        self.current.load().as_client_role.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.current.load().as_client_role.supported_verify_schemes()
    }
}

impl ClientCertVerifier for ReloadableTrustValidator {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        // Root hints are CA Distinguished Names sent in CertificateRequest so the peer
        // can pick a matching certificate. They can't safely be returned as a
        // `'static` slice across a hot reload, so we return none — TLS-spec
        // compliant, and the peer will still present whatever it has.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        self.current.load().as_server_role.verify_client_cert(end_entity, intermediates, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.current.load().as_server_role.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.current.load().as_server_role.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.current.load().as_server_role.supported_verify_schemes()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.current.load().as_server_role.client_auth_mandatory()
    }
}
