//! Credential staging that writes fixed files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use slotshift_core::{CredentialStager, ProviderError, ProviderResult};

/// Writes a fixed set of `(file name, contents)` pairs into the staging dir.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub files: Vec<(String, String)>,
}

impl StaticCredentials {
    pub fn new(files: Vec<(String, String)>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl CredentialStager for StaticCredentials {
    async fn stage(&self, dir: &Path) -> ProviderResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for (name, contents) in &self.files {
            let path = dir.join(name);
            std::fs::write(&path, contents).map_err(|e| {
                ProviderError::Rejected(format!("staging {}: {e}", path.display()))
            })?;
            written.push(path);
        }
        Ok(written)
    }
}
