//! Driver registry
//!
//! Read-through cache over a pluggable definition source. Compiled
//! drivers are immutable and memoized for the process lifetime; the
//! cache is dropped only by an explicit reload. Drivers are deployment
//! artifacts, so there is no background polling and no silent fallback
//! to a stale version when a definition fails to parse.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use envelope_types::{
    parse_extends, Driver, DriverParseError, DriverSpec, EnvelopeError, EnvelopeResult,
};
use semver::Version;
use tracing::{debug, info};

use crate::store::poisoned;

/// Where raw driver definitions come from.
///
/// Hosts plug in their own backing store (database rows, config
/// service) by implementing this; the registry stays oblivious to the
/// storage format.
pub trait DriverSource: Send + Sync {
    /// Decode one definition. `None` selects the source's latest version.
    fn load(&self, id: &str, version: Option<&str>) -> EnvelopeResult<DriverSpec>;

    /// Enumerable versions for a driver id. May be empty for layouts
    /// that cannot enumerate (unversioned flat files).
    fn versions(&self, id: &str) -> EnvelopeResult<Vec<String>>;

    /// All known driver ids
    fn list(&self) -> EnvelopeResult<Vec<String>>;
}

/// In-memory source for tests and embedded hosts
#[derive(Default)]
pub struct MemoryDriverSource {
    specs: RwLock<HashMap<String, Vec<DriverSpec>>>,
}

impl MemoryDriverSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any existing one with the same
    /// id and version
    pub fn insert(&self, spec: DriverSpec) -> EnvelopeResult<()> {
        let mut specs = self.specs.write().map_err(|_| poisoned("Driver source"))?;
        let entry = specs.entry(spec.id.clone()).or_default();
        match entry.iter().position(|s| s.version == spec.version) {
            Some(pos) => entry[pos] = spec,
            None => entry.push(spec),
        }
        Ok(())
    }
}

impl DriverSource for MemoryDriverSource {
    fn load(&self, id: &str, version: Option<&str>) -> EnvelopeResult<DriverSpec> {
        let specs = self.specs.read().map_err(|_| poisoned("Driver source"))?;
        let entry = specs
            .get(id)
            .ok_or_else(|| EnvelopeError::DriverNotFound(id.to_string()))?;
        let found = match version {
            Some(version) => entry.iter().find(|s| s.version == version),
            // Raw version breaks ties so unparseable versions fall back
            // to lexicographic order, same as the filesystem source
            None => entry
                .iter()
                .max_by_key(|s| (normalize_version(&s.version), s.version.clone())),
        };
        found.cloned().ok_or_else(|| {
            EnvelopeError::DriverNotFound(match version {
                Some(version) => format!("{}@{}", id, version),
                None => id.to_string(),
            })
        })
    }

    fn versions(&self, id: &str) -> EnvelopeResult<Vec<String>> {
        let specs = self.specs.read().map_err(|_| poisoned("Driver source"))?;
        Ok(specs
            .get(id)
            .map(|entry| entry.iter().map(|s| s.version.clone()).collect())
            .unwrap_or_default())
    }

    fn list(&self) -> EnvelopeResult<Vec<String>> {
        let specs = self.specs.read().map_err(|_| poisoned("Driver source"))?;
        let mut ids: Vec<String> = specs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Compiled-driver cache over a [`DriverSource`]
pub struct DriverRegistry {
    source: Arc<dyn DriverSource>,
    cache: RwLock<HashMap<(String, String), Arc<Driver>>>,
}

impl DriverRegistry {
    pub fn new(source: Arc<dyn DriverSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve, compile, and memoize a driver.
    ///
    /// `None` selects the latest version in normalized semver order.
    pub fn get(&self, id: &str, version: Option<&str>) -> EnvelopeResult<Arc<Driver>> {
        let resolved = match version {
            Some(version) => Some(version.to_string()),
            None => self.latest_version(id)?,
        };

        if let Some(version) = &resolved {
            if let Some(driver) = self.cached(id, version)? {
                debug!(driver = %id, version = %version, "Driver cache hit");
                return Ok(driver);
            }
            let spec = self.resolve_spec(id, Some(version), &mut Vec::new())?;
            return self.compile_and_cache(id, version, spec);
        }

        // No enumerable versions, so this is an unversioned flat
        // definition. The document names its own version; the cache
        // check has to happen after the load.
        let spec = self.resolve_spec(id, None, &mut Vec::new())?;
        if let Some(driver) = self.cached(id, &spec.version)? {
            debug!(driver = %id, version = %spec.version, "Driver cache hit");
            return Ok(driver);
        }
        let version = spec.version.clone();
        self.compile_and_cache(id, &version, spec)
    }

    /// Ids known to the source
    pub fn list(&self) -> EnvelopeResult<Vec<String>> {
        self.source.list()
    }

    /// Versions known to the source for one id
    pub fn versions(&self, id: &str) -> EnvelopeResult<Vec<String>> {
        self.source.versions(id)
    }

    /// Drop every cached driver; definitions reload lazily on next use
    pub fn reload(&self) -> EnvelopeResult<()> {
        let mut cache = self.cache.write().map_err(|_| poisoned("Driver cache"))?;
        let dropped = cache.len();
        cache.clear();
        info!(dropped = dropped, "Driver cache cleared");
        Ok(())
    }

    /// Drop the cached versions of one driver id.
    ///
    /// Drivers extending this id keep their already-merged compiled
    /// form until they are reloaded themselves.
    pub fn reload_driver(&self, id: &str) -> EnvelopeResult<()> {
        let mut cache = self.cache.write().map_err(|_| poisoned("Driver cache"))?;
        cache.retain(|(cached_id, _), _| cached_id != id);
        info!(driver = %id, "Driver cache entries dropped");
        Ok(())
    }

    fn cached(&self, id: &str, version: &str) -> EnvelopeResult<Option<Arc<Driver>>> {
        let cache = self.cache.read().map_err(|_| poisoned("Driver cache"))?;
        Ok(cache.get(&(id.to_string(), version.to_string())).cloned())
    }

    fn compile_and_cache(
        &self,
        id: &str,
        version: &str,
        spec: DriverSpec,
    ) -> EnvelopeResult<Arc<Driver>> {
        let driver = Arc::new(Driver::compile(spec)?);
        let mut cache = self.cache.write().map_err(|_| poisoned("Driver cache"))?;
        cache.insert((id.to_string(), version.to_string()), driver.clone());
        info!(driver = %id, version = %version, "Compiled driver");
        Ok(driver)
    }

    /// Latest enumerable version, `None` when the source lists none.
    /// Unparseable versions rank below parseable ones and order
    /// lexicographically among themselves, whatever order the source
    /// lists them in.
    fn latest_version(&self, id: &str) -> EnvelopeResult<Option<String>> {
        let versions = self.source.versions(id)?;
        Ok(versions
            .into_iter()
            .max_by_key(|v| (normalize_version(v), v.clone())))
    }

    /// Load a definition and fold its `extends` chain, parents first.
    ///
    /// Every layer must be well-formed on its own; duplicate keys inside
    /// one layer are rejected before the merge can legitimize them.
    fn resolve_spec(
        &self,
        id: &str,
        version: Option<&str>,
        chain: &mut Vec<String>,
    ) -> EnvelopeResult<DriverSpec> {
        if chain.iter().any(|seen| seen == id) {
            chain.push(id.to_string());
            return Err(DriverParseError::CyclicExtends(chain.join(" -> ")).into());
        }
        chain.push(id.to_string());

        let spec = self.load_spec(id, version)?;
        spec.ensure_unique_keys()?;

        match spec.extends.clone() {
            Some(reference) => {
                let (parent_id, parent_version) = parse_extends(&reference);
                let parent = self.resolve_spec(parent_id, parent_version, chain)?;
                Ok(spec.merge_parent(parent))
            }
            None => Ok(spec),
        }
    }

    fn load_spec(&self, id: &str, version: Option<&str>) -> EnvelopeResult<DriverSpec> {
        match version {
            Some(version) => self.source.load(id, Some(version)),
            None => match self.latest_version(id)? {
                Some(version) => self.source.load(id, Some(&version)),
                None => self.source.load(id, None),
            },
        }
    }
}

/// Lenient semver ordering key: strips a leading `v` and pads missing
/// components, so `1.2` orders as `1.2.0`. Unparseable versions rank
/// lowest.
pub fn normalize_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }
    let mut parts = [0u64; 3];
    for (index, piece) in raw.split('.').enumerate() {
        if index >= 3 || piece.is_empty() {
            return None;
        }
        parts[index] = piece.parse().ok()?;
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}
