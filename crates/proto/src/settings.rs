//! Per-session option keys read and written through the memory store.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Option key selecting where website screenshots are kept.
pub const SCREENSHOT_STORAGE: &str = "screenshot_storage";

/// Where produced artifacts are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoragePolicy {
    /// Kept only for the duration of the reply.
    #[default]
    None,
    /// Written under the configured output directory.
    LocalFile,
    /// Written to disk and recorded in the artifact archive.
    PersistedRecord,
}

impl StoragePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            StoragePolicy::None => "none",
            StoragePolicy::LocalFile => "local-file",
            StoragePolicy::PersistedRecord => "persisted-record",
        }
    }
}

impl std::fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoragePolicy {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(StoragePolicy::None),
            "local-file" | "local" => Ok(StoragePolicy::LocalFile),
            "persisted-record" | "database" => Ok(StoragePolicy::PersistedRecord),
            other => Err(ProtoError::InvalidStoragePolicy(other.to_string())),
        }
    }
}

/// Documented default for a session option, `None` when the option has none.
pub fn default_option_value(option: &str) -> Option<&'static str> {
    match option {
        SCREENSHOT_STORAGE => Some(StoragePolicy::default().as_str()),
        _ => None,
    }
}
