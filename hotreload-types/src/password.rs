use std::fmt;
use std::path::Path;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{HotReloadError, Result};

/// A password read from disk. Zeroized on drop; `Debug` never prints the contents.
///
/// spec.md §6's filesystem contract is irrevocable: the file is read as UTF-8 and the
/// returned value is trimmed of surrounding whitespace. A password that is only
/// whitespace (e.g. a lone trailing newline) cannot be represented by this type.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Reads a password file: UTF-8, trimmed of surrounding whitespace.
pub struct PasswordFileReader;

impl PasswordFileReader {
    pub fn read(path: &Path) -> Result<Password> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HotReloadError::Configuration(format!(
                "cannot read password file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Password::new(raw.trim().to_string()))
    }

    pub async fn read_async(path: &Path) -> Result<Password> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            HotReloadError::Configuration(format!(
                "cannot read password file {}: {e}",
                path.display()
            ))
        })?;
        Ok(Password::new(raw.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn trims_surrounding_whitespace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "  secret1\n\n").unwrap();

        let pw = PasswordFileReader::read(&path).unwrap();
        assert_eq!(pw.as_str(), "secret1");
    }

    #[test]
    fn whitespace_only_password_becomes_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "\n").unwrap();

        let pw = PasswordFileReader::read(&path).unwrap();
        assert_eq!(pw.as_str(), "");
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = PasswordFileReader::read(Path::new("/nonexistent/pw")).unwrap_err();
        assert!(matches!(err, HotReloadError::Configuration(_)));
    }
}
