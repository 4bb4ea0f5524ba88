//! Per-merchant credential vault.
//!
//! One directory per merchant under the configured root, holding the opaque
//! credential bytes the transport adapter hands back. The presence of a
//! directory is what startup recovery treats as "previously connected".
//! Filesystem work runs on the blocking pool to keep it off the reactor.

use crate::error::{BridgeError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

const CRED_FILE: &str = "creds.bin";

#[derive(Debug, Clone)]
pub struct CredentialVault {
    root: PathBuf,
}

impl CredentialVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Load the persisted credential bytes for a merchant, if any.
    pub async fn load(&self, merchant_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.merchant_dir(merchant_id)?.join(CRED_FILE);
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Credential(e.to_string())),
        })
        .await
        .map_err(|e| BridgeError::Credential(e.to_string()))?
    }

    /// Persist credential bytes durably: written and synced before this
    /// returns, so a crash after the call cannot lose the update.
    pub async fn save(&self, merchant_id: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.merchant_dir(merchant_id)?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut file = std::fs::File::create(dir.join(CRED_FILE))?;
            file.write_all(&bytes)?;
            file.sync_all()
        })
        .await
        .map_err(|e| BridgeError::Credential(e.to_string()))?
        .map_err(|e| BridgeError::Credential(e.to_string()))
    }

    /// Delete a merchant's credential directory. Missing is not an error.
    pub async fn remove(&self, merchant_id: &str) -> Result<()> {
        let dir = self.merchant_dir(merchant_id)?;
        tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Credential(e.to_string())),
        })
        .await
        .map_err(|e| BridgeError::Credential(e.to_string()))?
    }

    /// Merchant ids with persisted credentials: the immediate subdirectories
    /// of the vault root. Listing order is insignificant.
    pub async fn list_merchants(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut merchants = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        merchants.push(name.to_string());
                    }
                }
            }
            Ok(merchants)
        })
        .await
        .map_err(|e| BridgeError::Credential(e.to_string()))?
        .map_err(|e| BridgeError::Credential(e.to_string()))
    }

    /// Resolve a merchant's directory, rejecting ids that would escape the
    /// vault root.
    fn merchant_dir(&self, merchant_id: &str) -> Result<PathBuf> {
        if merchant_id.is_empty()
            || merchant_id == "."
            || merchant_id == ".."
            || merchant_id.contains('/')
            || merchant_id.contains('\\')
        {
            return Err(BridgeError::Credential(format!(
                "invalid merchant id: {merchant_id:?}"
            )));
        }
        Ok(self.root.join(merchant_id))
    }
}
