use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::Embedding;

/// Enrolled identities: name -> embeddings in enrollment order.
///
/// Names iterate lexicographically, which fixes the scan order for matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gallery {
    identities: BTreeMap<String, Vec<Embedding>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no identity is enrolled at all.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// True when at least one identity holds a sample to match against.
    pub fn has_samples(&self) -> bool {
        self.identities.values().any(|samples| !samples.is_empty())
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    pub fn samples(&self, name: &str) -> &[Embedding] {
        self.identities.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sample_count(&self, name: &str) -> usize {
        self.samples(name).len()
    }

    /// Make sure `name` has an entry, even with no samples yet.
    pub fn ensure(&mut self, name: &str) {
        self.identities.entry(name.to_string()).or_default();
    }

    pub fn push(&mut self, name: &str, embedding: Embedding) {
        self.identities
            .entry(name.to_string())
            .or_default()
            .push(embedding);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.identities.remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Embedding])> {
        self.identities
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }
}

/// Persistent name -> embeddings mapping.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Gallery>;
    fn save(&self, gallery: &Gallery) -> Result<()>;
}

/// Pretty-printed JSON document, rewritten in full on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for JsonFileStore {
    fn load(&self) -> Result<Gallery> {
        if !self.path.exists() {
            return Ok(Gallery::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }

    fn save(&self, gallery: &Gallery) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(gallery)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        log::debug!("saved {} identities to {}", gallery.len(), self.path.display());
        Ok(())
    }
}

/// Process-local store, for tests and embedding the service without a disk.
#[derive(Default)]
pub struct MemoryStore {
    gallery: Mutex<Gallery>,
}

impl MemoryStore {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            gallery: Mutex::new(gallery),
        }
    }

    pub fn snapshot(&self) -> Gallery {
        self.gallery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IdentityStore for MemoryStore {
    fn load(&self) -> Result<Gallery> {
        Ok(self.snapshot())
    }

    fn save(&self, gallery: &Gallery) -> Result<()> {
        *self.gallery.lock().unwrap_or_else(PoisonError::into_inner) = gallery.clone();
        Ok(())
    }
}
