//! Data model and error types shared by the keystore hot reload core.

pub mod error;
pub mod events;
pub mod password;
pub mod spec;

pub use error::{HotReloadError, Result};
pub use events::{ChangeKind, FileChangeEvent};
pub use password::{Password, PasswordFileReader};
pub use spec::CredentialFileSpec;
