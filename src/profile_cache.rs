use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use log::{info, warn};
use crate::profile::Profile;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to serialize profile cache: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write profile cache {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Debounce for cache writes: a flush is due when nothing was flushed yet or
/// at least `interval` has passed since the last successful one.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    interval: Duration,
    last_flush: Option<Instant>,
}

impl FlushPolicy {
    pub fn new(interval: Duration) -> Self {
        FlushPolicy { interval, last_flush: None }
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        match self.last_flush {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_flush = Some(now);
    }

    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }
}

/// Resolved profiles keyed by `Query::cache_key`, persisted as one JSON object.
pub struct ProfileCache {
    path: PathBuf,
    entries: BTreeMap<String, Profile>,
    policy: FlushPolicy,
    dirty: bool,
}

impl ProfileCache {
    /// Hydrates from `path`. A missing or unreadable file yields an empty cache.
    pub fn load<P: AsRef<Path>>(path: P, flush_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = Self::read_entries(&path);
        ProfileCache {
            path,
            entries,
            policy: FlushPolicy::new(flush_interval),
            dirty: false,
        }
    }

    fn read_entries(path: &Path) -> BTreeMap<String, Profile> {
        if !path.exists() {
            info!("No profile cache at {:?}. Starting empty.", path);
            return BTreeMap::new();
        }
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read profile cache {:?}: {}. Starting empty.", path, e);
                return BTreeMap::new();
            }
        };
        match serde_json::from_str::<BTreeMap<String, Profile>>(&content) {
            Ok(entries) => {
                info!("Loaded {} cached profiles from {:?}", entries.len(), path);
                entries
            }
            Err(e) => {
                warn!("Profile cache {:?} is corrupt: {}. Starting empty.", path, e);
                BTreeMap::new()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Profile> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while some `put` has not reached disk yet.
    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    /// In-memory write; reaches disk on the next flush that is due.
    pub fn put(&mut self, key: String, profile: Profile) {
        self.entries.insert(key, profile);
        self.dirty = true;
    }

    /// Debounced flush. Returns whether the file was written.
    pub fn flush(&mut self) -> Result<bool, CacheError> {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&mut self, now: Instant) -> Result<bool, CacheError> {
        if !self.dirty || !self.policy.should_flush(now) {
            return Ok(false);
        }
        self.write(now)?;
        Ok(true)
    }

    /// Writes even inside the debounce window.
    pub fn force_flush(&mut self) -> Result<(), CacheError> {
        self.write(Instant::now())
    }

    fn write(&mut self, now: Instant) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        let write_err = |source| CacheError::Write { path: self.path.clone(), source };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json).map_err(write_err)?;
        fs::rename(&temp, &self.path).map_err(write_err)?;

        self.policy.record(now);
        self.dirty = false;
        info!("Saved {} profiles to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Address;

    fn profile(url: &str) -> Profile {
        Profile {
            address: Some(Address {
                country: "SE".into(),
                locality: "Umeå".into(),
                zip: "903 25".into(),
                street: "Rådhusesplanaden 5".into(),
            }),
            phone: Some("090-16 10 00".into()),
            companies: ["Umeå Energi AB".to_string(), "Acme AB".to_string()].into_iter().collect(),
            businesses: vec!["Rådhus Café".into()],
            living_with: vec!["Karin Lind".into(), "Olle Lind".into()],
            source_url: url.into(),
        }
    }

    #[test]
    fn test_should_flush_is_a_pure_predicate() {
        let t0 = Instant::now();
        let mut policy = FlushPolicy::new(Duration::from_secs(60));
        assert!(policy.should_flush(t0));

        policy.record(t0);
        assert!(!policy.should_flush(t0 + Duration::from_secs(1)));
        assert!(!policy.should_flush(t0 + Duration::from_secs(59)));
        assert!(policy.should_flush(t0 + Duration::from_secs(60)));
        assert_eq!(policy.last_flush(), Some(t0));
    }

    #[test]
    fn test_round_trip_through_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = ProfileCache::load(&path, Duration::from_secs(60));
        assert!(cache.is_empty());
        cache.put("Karin-Lind-19650304".into(), profile("https://www.ratsit.se/a"));
        cache.force_flush().unwrap();

        let reloaded = ProfileCache::load(&path, Duration::from_secs(60));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("Karin-Lind-19650304"), Some(&profile("https://www.ratsit.se/a")));
    }

    #[test]
    fn test_debounce_collapses_close_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = ProfileCache::load(&path, Duration::from_secs(60));
        let t0 = Instant::now();

        cache.put("a".into(), profile("https://www.ratsit.se/a"));
        assert!(cache.flush_at(t0).unwrap());
        cache.put("b".into(), profile("https://www.ratsit.se/b"));
        assert!(!cache.flush_at(t0 + Duration::from_secs(1)).unwrap());

        let on_disk = ProfileCache::load(&path, Duration::from_secs(60));
        assert!(on_disk.contains("a"));
        assert!(!on_disk.contains("b"));

        cache.force_flush().unwrap();
        let on_disk = ProfileCache::load(&path, Duration::from_secs(60));
        assert!(on_disk.contains("a"));
        assert!(on_disk.contains("b"));
    }

    #[test]
    fn test_clean_cache_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = ProfileCache::load(&path, Duration::ZERO);

        assert!(!cache.flush().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ProfileCache::load(dir.path().join("nope.json"), Duration::from_secs(60));
        assert!(missing.is_empty());

        let corrupt_path = dir.path().join("corrupt.json");
        fs::write(&corrupt_path, "{\"half\": ").unwrap();
        let corrupt = ProfileCache::load(&corrupt_path, Duration::from_secs(60));
        assert!(corrupt.is_empty());
    }

    #[test]
    fn test_reads_older_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let legacy = r#"{"Anna-Berg-19800101": {
            "address": null, "phone": null, "company": "Old AB",
            "living_with": ["Nils Berg"], "url": "https://www.ratsit.se/x"}}"#;
        fs::write(&path, legacy).unwrap();

        let cache = ProfileCache::load(&path, Duration::from_secs(60));
        let profile = cache.get("Anna-Berg-19800101").unwrap();
        assert_eq!(profile.living_with, vec!["Nils Berg".to_string()]);
        assert!(profile.companies.is_empty());
        assert!(profile.businesses.is_empty());
    }

    #[test]
    fn test_write_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();

        let mut cache = ProfileCache::load(blocker.join("cache.json"), Duration::from_secs(60));
        cache.put("a".into(), profile("u"));
        assert!(matches!(cache.force_flush(), Err(CacheError::Write { .. })));
    }
}
