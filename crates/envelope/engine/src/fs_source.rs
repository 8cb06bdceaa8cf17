//! Filesystem driver source
//!
//! Layout: `<root>/<id>/v<version>.yaml`, one file per version. A flat
//! `<root>/<id>.yaml` is accepted as an unversioned fallback for small
//! deployments. Documents are decoded with serde_yaml; a malformed
//! document is a parse error naming the offending file.

use std::fs;
use std::path::{Path, PathBuf};

use envelope_types::{DriverParseError, DriverSpec, EnvelopeError, EnvelopeResult};
use tracing::debug;

use crate::driver_registry::{normalize_version, DriverSource};

pub struct FsDriverSource {
    root: PathBuf,
}

impl FsDriverSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versioned_path(&self, id: &str, version: &str) -> PathBuf {
        self.root.join(id).join(format!("v{}.yaml", version))
    }

    fn flat_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.yaml", id))
    }

    fn latest_on_disk(&self, id: &str) -> EnvelopeResult<Option<String>> {
        let versions = self.versions(id)?;
        Ok(versions.into_iter().max_by_key(|v| normalize_version(v)))
    }

    fn decode(&self, path: &Path) -> EnvelopeResult<DriverSpec> {
        let text = fs::read_to_string(path)
            .map_err(|e| EnvelopeError::Store(format!("Read {}: {}", path.display(), e)))?;
        let spec = serde_yaml::from_str(&text)
            .map_err(|e| DriverParseError::Document(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Decoded driver definition");
        Ok(spec)
    }
}

impl DriverSource for FsDriverSource {
    fn load(&self, id: &str, version: Option<&str>) -> EnvelopeResult<DriverSpec> {
        match version {
            Some(version) => {
                let path = self.versioned_path(id, version);
                if path.is_file() {
                    return self.decode(&path);
                }
                // A flat file satisfies an exact version only when it
                // declares that version itself
                let flat = self.flat_path(id);
                if flat.is_file() {
                    let spec = self.decode(&flat)?;
                    if spec.version == version {
                        return Ok(spec);
                    }
                }
                Err(EnvelopeError::DriverNotFound(format!("{}@{}", id, version)))
            }
            None => {
                if let Some(version) = self.latest_on_disk(id)? {
                    return self.decode(&self.versioned_path(id, &version));
                }
                let flat = self.flat_path(id);
                if flat.is_file() {
                    return self.decode(&flat);
                }
                Err(EnvelopeError::DriverNotFound(id.to_string()))
            }
        }
    }

    fn versions(&self, id: &str) -> EnvelopeResult<Vec<String>> {
        let dir = self.root.join(id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EnvelopeError::Store(format!(
                    "Read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| EnvelopeError::Store(format!("Read {}: {}", dir.display(), e)))?;
            if let Some(version) = version_from_filename(&entry.file_name()) {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn list(&self) -> EnvelopeResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EnvelopeError::Store(format!(
                    "Read {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                EnvelopeError::Store(format!("Read {}: {}", self.root.display(), e))
            })?;
            let path = entry.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.push(name.to_string());
                }
            } else if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// `v1.2.0.yaml` → `1.2.0`
fn version_from_filename(name: &std::ffi::OsStr) -> Option<String> {
    let version = name.to_str()?.strip_suffix(".yaml")?.strip_prefix('v')?;
    if version.is_empty() {
        return None;
    }
    Some(version.to_string())
}
