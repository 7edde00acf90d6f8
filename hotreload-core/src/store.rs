//! Read-only credential container whose `load` step consumes a descriptor of where to
//! find the real credentials, not the bytes themselves (spec.md §4.4).

use std::collections::HashMap;
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;
use std::time::SystemTime;

use hotreload_types::{CredentialFileSpec, HotReloadError, Password, PasswordFileReader, Result};
use parking_lot::RwLock;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{info, warn};

/// One key entry: a private key plus its certificate chain.
#[derive(Clone)]
pub struct KeyEntry {
    pub key: Arc<PrivateKeyDer<'static>>,
    pub chain: Vec<CertificateDer<'static>>,
    pub created_at: SystemTime,
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("chain_len", &self.chain.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// One trust-anchor entry: a single certificate with no associated key.
#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub certificate: CertificateDer<'static>,
    pub created_at: SystemTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryKind {
    Key,
    Certificate,
}

/// The parsed view of one credential file: key entries and certificate entries, by alias.
#[derive(Default)]
pub struct ParsedCredentials {
    keys: HashMap<String, KeyEntry>,
    certs: HashMap<String, CertificateEntry>,
}

impl ParsedCredentials {
    fn kind_of(&self, alias: &str) -> Option<EntryKind> {
        if self.keys.contains_key(alias) {
            Some(EntryKind::Key)
        } else if self.certs.contains_key(alias) {
            Some(EntryKind::Certificate)
        } else {
            None
        }
    }

    fn size(&self) -> usize {
        self.keys.len() + self.certs.len()
    }

    fn aliases(&self) -> Vec<String> {
        self.keys.keys().chain(self.certs.keys()).cloned().collect()
    }
}

/// Parses raw credential bytes (plus an optional password) into a [`ParsedCredentials`].
///
/// The real binary keystore formats (PKCS#12, JKS) are external collaborators per
/// spec.md §1 and are not implemented here; callers inject a parser for those formats.
/// A PEM parser — the format `rustls` itself consumes — ships as the default.
pub trait CredentialParser: Send + Sync {
    fn parse(
        &self,
        format_tag: &str,
        bytes: &[u8],
        password: Option<&Password>,
        keypass: Option<&Password>,
    ) -> Result<ParsedCredentials>;
}

/// Parses concatenated PEM certificates/keys. A single alias, `"default"`, is used for
/// whatever key entry and certificate entries are present, mirroring how a single PEM
/// bundle maps onto one TLS identity.
pub struct PemCredentialParser;

impl CredentialParser for PemCredentialParser {
    fn parse(
        &self,
        format_tag: &str,
        bytes: &[u8],
        _password: Option<&Password>,
        _keypass: Option<&Password>,
    ) -> Result<ParsedCredentials> {
        if !format_tag.eq_ignore_ascii_case("PEM") {
            return Err(HotReloadError::HostStack(format!(
                "no credential parser registered for format {format_tag:?}; inject one via \
                 DynamicCredentialStore::load_with_parser"
            )));
        }

        let mut cert_reader = BufReader::new(bytes);
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| HotReloadError::Parse {
                format_tag: format_tag.to_string(),
                reason: format!("certificate parse failed: {e}"),
            })?;

        let mut key_reader = BufReader::new(bytes);
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| HotReloadError::Parse {
                format_tag: format_tag.to_string(),
                reason: format!("private key parse failed: {e}"),
            })?;

        let now = SystemTime::now();
        let mut parsed = ParsedCredentials::default();

        if let Some(key) = key {
            if certs.is_empty() {
                return Err(HotReloadError::Parse {
                    format_tag: format_tag.to_string(),
                    reason: "private key present with no certificate chain".into(),
                });
            }
            parsed.keys.insert(
                "default".to_string(),
                KeyEntry {
                    key: Arc::new(key),
                    chain: certs,
                    created_at: now,
                },
            );
        } else if certs.is_empty() {
            // No PEM blocks recognized at all. An empty data file legitimately has
            // nothing to parse; a non-empty one that yields nothing is truncated or
            // not PEM, and must fail rather than silently reload to an empty store
            // (spec.md §4.3/§7: previous successful credentials are preserved only if
            // *this* parse attempt fails, not if it quietly succeeds with zero entries).
            if !bytes.is_empty() {
                return Err(HotReloadError::Parse {
                    format_tag: format_tag.to_string(),
                    reason: "no certificate or private key entries found in credential data".into(),
                });
            }
        } else {
            for (idx, cert) in certs.into_iter().enumerate() {
                parsed.certs.insert(
                    format!("ca-{idx}"),
                    CertificateEntry {
                        certificate: cert,
                        created_at: now,
                    },
                );
            }
        }

        Ok(parsed)
    }
}

/// A read-only credential container. `load` consumes a [`CredentialFileSpec`], not raw
/// bytes; `reload_from_disk` re-parses the file using the current (possibly rotated)
/// passwords.
pub struct DynamicCredentialStore {
    spec: CredentialFileSpec,
    parser: Arc<dyn CredentialParser>,
    current: RwLock<Arc<ParsedCredentials>>,
}

impl fmt::Debug for DynamicCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCredentialStore")
            .field("data_path", &self.spec.data_path())
            .field("size", &self.current.read().size())
            .finish()
    }
}

impl DynamicCredentialStore {
    /// Parses `text` into a [`CredentialFileSpec`] and performs the first load. Errors
    /// from parsing or the first load propagate unchanged — the store is not created
    /// (spec.md §4.4).
    pub fn load(text: &str, parser: Arc<dyn CredentialParser>) -> Result<Self> {
        let spec = CredentialFileSpec::parse(text)?;
        spec.validate()?;
        let store = Self {
            spec,
            parser,
            current: RwLock::new(Arc::new(ParsedCredentials::default())),
        };
        store.reload_from_disk()?;
        Ok(store)
    }

    pub fn spec(&self) -> &CredentialFileSpec {
        &self.spec
    }

    /// Re-reads the password (if configured) and the data file, and atomically swaps
    /// in a fresh parsed store. On failure, logs and preserves the previous credentials.
    pub fn reload_from_disk(&self) -> Result<()> {
        match self.do_reload() {
            Ok(parsed) => {
                *self.current.write() = Arc::new(parsed);
                info!(path = %self.spec.data_path().display(), "credential store reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(
                    path = %self.spec.data_path().display(),
                    error = %e,
                    "credential reload failed; keeping previous credentials"
                );
                Err(e)
            }
        }
    }

    fn do_reload(&self) -> Result<ParsedCredentials> {
        let password = match self.spec.password_path() {
            Some(p) => Some(PasswordFileReader::read(p)?),
            None => None,
        };
        let keypass = match self.spec.keypass_path() {
            Some(p) => Some(PasswordFileReader::read(p)?),
            None => None,
        };

        let bytes = std::fs::read(self.spec.data_path()).map_err(|e| HotReloadError::Reload {
            path: self.spec.data_path().to_path_buf(),
            reason: e.to_string(),
        })?;

        self.parser
            .parse(self.spec.format_tag(), &bytes, password.as_ref(), keypass.as_ref())
            .map_err(|e| HotReloadError::Reload {
                path: self.spec.data_path().to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Serializes this store's descriptor (not the parsed credentials) back to text,
    /// including the spec's unique per-instance marker (spec.md §4.4, §6).
    pub fn store(&self) -> String {
        self.spec.to_text()
    }

    pub fn get_key(&self, alias: &str) -> Option<KeyEntry> {
        self.current.read().keys.get(alias).cloned()
    }

    pub fn get_certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.current.read().keys.get(alias).map(|e| e.chain.clone())
    }

    pub fn get_certificate(&self, alias: &str) -> Option<CertificateDer<'static>> {
        let current = self.current.read();
        if let Some(key) = current.keys.get(alias) {
            return key.chain.first().cloned();
        }
        current.certs.get(alias).map(|e| e.certificate.clone())
    }

    pub fn get_creation_date(&self, alias: &str) -> Option<SystemTime> {
        let current = self.current.read();
        current
            .keys
            .get(alias)
            .map(|e| e.created_at)
            .or_else(|| current.certs.get(alias).map(|e| e.created_at))
    }

    pub fn aliases(&self) -> Vec<String> {
        self.current.read().aliases()
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.current.read().kind_of(alias).is_some()
    }

    pub fn size(&self) -> usize {
        self.current.read().size()
    }

    pub fn is_key_entry(&self, alias: &str) -> bool {
        matches!(self.current.read().kind_of(alias), Some(EntryKind::Key))
    }

    pub fn is_certificate_entry(&self, alias: &str) -> bool {
        matches!(self.current.read().kind_of(alias), Some(EntryKind::Certificate))
    }

    pub fn get_certificate_alias(&self, certificate: &CertificateDer<'static>) -> Option<String> {
        let current = self.current.read();
        current
            .certs
            .iter()
            .find(|(_, e)| &e.certificate == certificate)
            .map(|(alias, _)| alias.clone())
            .or_else(|| {
                current
                    .keys
                    .iter()
                    .find(|(_, e)| e.chain.first() == Some(certificate))
                    .map(|(alias, _)| alias.clone())
            })
    }

    pub fn set_key_entry(&self, _alias: &str, _key: KeyEntry) -> Result<()> {
        Err(HotReloadError::ReadOnly)
    }

    pub fn set_certificate_entry(&self, _alias: &str, _cert: CertificateEntry) -> Result<()> {
        Err(HotReloadError::ReadOnly)
    }

    pub fn delete_entry(&self, _alias: &str) -> Result<()> {
        Err(HotReloadError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // rustls_pemfile only base64-decodes the body into an opaque `CertificateDer` — it
    // does not validate ASN.1 structure — so any validly base64-encoded payload works
    // as fixture data for these unit tests.
    const TEST_CERT: &str = "-----BEGIN CERTIFICATE-----\n\
RkFLRS1ERVItQ0VSVElGSUNBVEUtQllURVMtRk9SLVVOSVQtVEVTVFMtAAECAwQF\n\
BgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8gISIjJCUmJygpKissLS4vMDEyMzQ1\n\
Njc4OTo7PD0+Pw==\n\
-----END CERTIFICATE-----\n";

    fn write_spec(dir: &TempDir, data_file: &str, password_file: Option<&str>) -> String {
        let data_path = dir.path().join(data_file);
        std::fs::write(&data_path, TEST_CERT).unwrap();

        let mut text = format!(
            "location={}\nkeystore.algorithm=PEM\n",
            data_path.display()
        );
        if let Some(pw_file) = password_file {
            let pw_path = dir.path().join(pw_file);
            std::fs::write(&pw_path, "secret1\n").unwrap();
            text.push_str(&format!("password.location={}\n", pw_path.display()));
        }
        text
    }

    #[test]
    fn load_parses_certificate_only_bundle() {
        let dir = TempDir::new().unwrap();
        let text = write_spec(&dir, "ca.pem", None);

        let store = DynamicCredentialStore::load(&text, Arc::new(PemCredentialParser)).unwrap();
        assert_eq!(store.size(), 1);
        assert!(store.is_certificate_entry("ca-0"));
        assert!(!store.is_key_entry("ca-0"));
    }

    #[test]
    fn mutations_are_rejected() {
        let dir = TempDir::new().unwrap();
        let text = write_spec(&dir, "ca.pem", None);
        let store = DynamicCredentialStore::load(&text, Arc::new(PemCredentialParser)).unwrap();

        assert!(matches!(store.delete_entry("ca-0"), Err(HotReloadError::ReadOnly)));
        assert!(matches!(
            store.set_certificate_entry(
                "x",
                CertificateEntry {
                    certificate: CertificateDer::from(vec![]),
                    created_at: SystemTime::now(),
                }
            ),
            Err(HotReloadError::ReadOnly)
        ));
    }

    #[test]
    fn reload_preserves_previous_on_failure() {
        let dir = TempDir::new().unwrap();
        let text = write_spec(&dir, "ca.pem", None);
        let store = DynamicCredentialStore::load(&text, Arc::new(PemCredentialParser)).unwrap();
        assert_eq!(store.size(), 1);

        // Truncate the backing file so a reload fails.
        std::fs::write(store.spec().data_path(), b"not pem data").unwrap();
        assert!(store.reload_from_disk().is_err());

        // Previous generation is still readable.
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn store_serializes_spec_with_marker() {
        let dir = TempDir::new().unwrap();
        let text = write_spec(&dir, "ca.pem", None);
        let store = DynamicCredentialStore::load(&text, Arc::new(PemCredentialParser)).unwrap();
        let serialized = store.store();
        assert!(serialized.contains("marker="));
        assert!(serialized.contains("location="));
    }

    #[test]
    fn missing_data_file_fails_first_load() {
        let text = "location=/nonexistent/ca.pem\nkeystore.algorithm=PEM\n";
        let err = DynamicCredentialStore::load(text, Arc::new(PemCredentialParser)).unwrap_err();
        assert!(matches!(err, HotReloadError::Configuration(_)));
    }

    #[test]
    fn truncated_nonempty_data_is_a_parse_error() {
        let err = PemCredentialParser
            .parse("PEM", b"not pem data", None, None)
            .unwrap_err();
        assert!(matches!(err, HotReloadError::Parse { .. }));
    }

    #[test]
    fn empty_data_parses_to_zero_entries() {
        let parsed = PemCredentialParser.parse("PEM", b"", None, None).unwrap();
        assert_eq!(parsed.size(), 0);
    }
}
