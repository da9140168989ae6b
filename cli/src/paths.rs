//! Default storage locations.

use std::path::PathBuf;

/// Resolved identity and trust file locations.
pub struct StoragePaths {
    pub identity: PathBuf,
    pub trust: PathBuf,
}

impl StoragePaths {
    pub fn resolve(identity: Option<PathBuf>, trust: Option<PathBuf>) -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".openclipboard");
        Self {
            identity: identity.unwrap_or_else(|| base.join("identity.json")),
            trust: trust.unwrap_or_else(|| base.join("trust.json")),
        }
    }
}
