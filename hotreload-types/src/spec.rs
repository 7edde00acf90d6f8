use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{HotReloadError, Result};

const DEFAULT_FORMAT_TAG: &str = "PKCS12";

/// Descriptor of one watched credential set (spec.md §3 `CredentialFileSpec`).
///
/// Parsed from a `key=value` text form and serializable back to the same form. Every
/// instance carries a unique `marker`, generated at construction time, so that two specs
/// with otherwise-identical fields still serialize to distinguishable text (spec.md §6/§9
/// and the invariant in §8: `serialize(a) != serialize(b)` for `a != b`).
#[derive(Debug, Clone)]
pub struct CredentialFileSpec {
    format_tag: String,
    data_path: PathBuf,
    password_path: Option<PathBuf>,
    keypass_path: Option<PathBuf>,
    marker: Uuid,
}

impl CredentialFileSpec {
    pub fn new(
        data_path: PathBuf,
        format_tag: Option<String>,
        password_path: Option<PathBuf>,
        keypass_path: Option<PathBuf>,
    ) -> Self {
        Self {
            format_tag: format_tag.unwrap_or_else(|| DEFAULT_FORMAT_TAG.to_string()),
            data_path,
            password_path,
            keypass_path,
            marker: Uuid::new_v4(),
        }
    }

    pub fn format_tag(&self) -> &str {
        &self.format_tag
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn password_path(&self) -> Option<&Path> {
        self.password_path.as_deref()
    }

    pub fn keypass_path(&self) -> Option<&Path> {
        self.keypass_path.as_deref()
    }

    /// Per-instance identity marker embedded in the serialized form as a comment.
    pub fn marker(&self) -> Uuid {
        self.marker
    }

    /// Checks the invariants in spec.md §3: `data_path` readable and regular; if
    /// `password_path`/`keypass_path` are set they must also be readable and regular.
    pub fn validate(&self) -> Result<()> {
        Self::check_readable_regular(&self.data_path)?;
        if let Some(p) = &self.password_path {
            Self::check_readable_regular(p)?;
        }
        if let Some(p) = &self.keypass_path {
            Self::check_readable_regular(p)?;
        }
        Ok(())
    }

    fn check_readable_regular(path: &Path) -> Result<()> {
        let meta = std::fs::metadata(path).map_err(|e| {
            HotReloadError::Configuration(format!("cannot stat {}: {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(HotReloadError::Configuration(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(())
    }

    /// Parses the `key=value` text form described in spec.md §6.
    pub fn parse(text: &str) -> Result<Self> {
        let mut location: Option<PathBuf> = None;
        let mut format_tag: Option<String> = None;
        let mut password_path: Option<PathBuf> = None;
        let mut keypass_path: Option<PathBuf> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(HotReloadError::Configuration(format!(
                    "malformed spec line: {raw_line:?}"
                )));
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "location" => location = Some(PathBuf::from(value)),
                "keystore.algorithm" => format_tag = Some(value.to_string()),
                "password.location" => password_path = Some(PathBuf::from(value)),
                "keypass.location" => keypass_path = Some(PathBuf::from(value)),
                other => {
                    return Err(HotReloadError::Configuration(format!(
                        "unknown spec key: {other:?}"
                    )));
                }
            }
        }

        let data_path = location
            .ok_or_else(|| HotReloadError::Configuration("missing required key: location".into()))?;

        Ok(Self::new(data_path, format_tag, password_path, keypass_path))
    }

    /// Parses a Latin-1 (ISO-8859-1) encoded spec file, per spec.md §3's encoding note.
    pub fn parse_latin1_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(&decode_latin1(bytes))
    }

    /// Serializes back to the `key=value` text form, including a comment line with the
    /// unique per-instance marker.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# marker={}\n", self.marker));
        out.push_str(&format!("location={}\n", self.data_path.display()));
        out.push_str(&format!("keystore.algorithm={}\n", self.format_tag));
        if let Some(p) = &self.password_path {
            out.push_str(&format!("password.location={}\n", p.display()));
        }
        if let Some(p) = &self.keypass_path {
            out.push_str(&format!("keypass.location={}\n", p.display()));
        }
        out
    }

    /// Serializes to Latin-1 bytes, for writing back to a spec file on disk.
    pub fn to_latin1_bytes(&self) -> Result<Vec<u8>> {
        encode_latin1(&self.to_text())
    }

    /// Equality over the spec fields only (ignores the per-instance marker). Two specs
    /// with identical fields are "the same descriptor" even though their serialized forms
    /// differ.
    pub fn fields_eq(&self, other: &Self) -> bool {
        self.format_tag == other.format_tag
            && self.data_path == other.data_path
            && self.password_path == other.password_path
            && self.keypass_path == other.keypass_path
    }
}

/// ISO-8859-1 is a 1:1 mapping of bytes 0x00-0xFF onto the first 256 Unicode code points,
/// so no external crate is needed for this narrow encode/decode (spec.md §3, §6).
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub fn encode_latin1(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let code_point = u32::from(c);
        if code_point > 0xFF {
            return Err(HotReloadError::Configuration(format!(
                "character {c:?} is not representable in ISO-8859-1"
            )));
        }
        out.push(code_point as u8);
    }
    Ok(out)
}
