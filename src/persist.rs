//! Durable grant store backed by a JSON file
//!
//! Page-level grants must survive a restart so a returning client recognises
//! a page it already paid for without contacting the server. Every mutation
//! rewrites the file through a temporary sibling and an atomic rename.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::store::GrantStore;
use crate::types::{PaymentGrant, ResourceKey};
use crate::{PaygError, Result};

/// File-backed grant store
#[derive(Debug)]
pub struct FileGrantStore {
    path: PathBuf,
    grants: RwLock<BTreeMap<ResourceKey, PaymentGrant>>,
}

impl FileGrantStore {
    /// Open the store at `path`, loading any grants already persisted there
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let grants: BTreeMap<ResourceKey, PaymentGrant> = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PaygError::Storage(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Corrupt grant file {}: {}", path.display(), e),
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), grants = grants.len(), "opened grant file");
        Ok(Self {
            path,
            grants: RwLock::new(grants),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, grants: &BTreeMap<ResourceKey, PaymentGrant>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(grants)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "failed to replace grant file");
            PaygError::from(e)
        })
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<ResourceKey, PaymentGrant>),
    {
        let mut grants = self.grants.write();
        let mut next = grants.clone();
        f(&mut next);
        self.persist(&next)?;
        *grants = next;
        Ok(())
    }
}

impl GrantStore for FileGrantStore {
    fn get(&self, key: &ResourceKey) -> Result<Option<PaymentGrant>> {
        Ok(self.grants.read().get(key).cloned())
    }

    fn put(&self, key: &ResourceKey, grant: PaymentGrant) -> Result<()> {
        self.mutate(|grants| {
            grants.insert(key.clone(), grant);
        })
    }

    fn delete(&self, key: &ResourceKey) -> Result<()> {
        if !self.grants.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|grants| {
            grants.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.mutate(|grants| grants.clear())
    }
}
