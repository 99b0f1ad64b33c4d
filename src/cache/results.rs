//! In-process memo of assembled maps, keyed by request fingerprint.
//!
//! Lives for the process; entries go away only on [`ResultCache::invalidate`].
//! Whether a stored map may be served is decided by the [`RefreshPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::{RefreshPolicy, ResultCacheConfig};
use crate::types::{AssembledMap, MapRequest};

/// Hex SHA-256 digest summarizing a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
struct CachedMap {
    map: Arc<AssembledMap>,
    /// How long the computation that produced `map` took
    elapsed: Duration,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Fingerprint, CachedMap>,
    /// Most recent computation, whatever its fingerprint
    last: Option<Arc<AssembledMap>>,
}

pub struct ResultCache {
    policy: RefreshPolicy,
    config: ResultCacheConfig,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(policy: RefreshPolicy, config: ResultCacheConfig) -> Self {
        Self { policy, config, inner: Mutex::new(Inner::default()) }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fingerprint a request at a given effective budget.
    ///
    /// File lists longer than the configured threshold contribute only their
    /// length. Mentioned files and identifiers are folded in only under the
    /// eager policies (`auto`, `always`).
    pub fn fingerprint(&self, request: &MapRequest, budget: usize) -> Fingerprint {
        let mut hasher = Sha256::new();

        self.hash_files(&mut hasher, "focus", &request.focus_files);
        self.hash_files(&mut hasher, "other", &request.other_files);
        hasher.update(format!("budget={}\n", budget).as_bytes());

        if matches!(self.policy, RefreshPolicy::Auto | RefreshPolicy::Always) {
            hasher.update(b"mentioned-files\n");
            for name in &request.mentioned_files {
                hasher.update(name.as_bytes());
                hasher.update(b"\0");
            }
            hasher.update(b"mentioned-idents\n");
            for ident in &request.mentioned_idents {
                hasher.update(ident.as_bytes());
                hasher.update(b"\0");
            }
        }

        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    fn hash_files(&self, hasher: &mut Sha256, label: &str, files: &[std::path::PathBuf]) {
        if files.len() > self.config.fingerprint_count_threshold {
            hasher.update(format!("{}-count={}\n", label, files.len()).as_bytes());
            return;
        }

        let mut names: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        names.sort();
        hasher.update(format!("{}\n", label).as_bytes());
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
        }
    }

    /// Return a stored map if the policy allows serving it.
    ///
    /// `files_changed` is consulted only under the `files` policy, after a
    /// matching entry was found.
    pub fn lookup(
        &self,
        fingerprint: &Fingerprint,
        force_refresh: bool,
        files_changed: impl FnOnce() -> bool,
    ) -> Option<Arc<AssembledMap>> {
        if force_refresh {
            return None;
        }

        match self.policy {
            RefreshPolicy::Always => None,
            RefreshPolicy::Manual => self.lock().last.clone(),
            RefreshPolicy::Files => {
                let cached = self.lock().entries.get(fingerprint).cloned()?;
                if files_changed() {
                    tracing::debug!("result cache: sampled files changed, recomputing");
                    None
                } else {
                    Some(cached.map)
                }
            }
            RefreshPolicy::Auto => {
                let cached = self.lock().entries.get(fingerprint).cloned()?;
                let threshold = Duration::from_millis(self.config.auto_threshold_ms);
                if cached.elapsed > threshold {
                    Some(cached.map)
                } else {
                    tracing::debug!(
                        "result cache: last computation took {:?}, recomputing",
                        cached.elapsed
                    );
                    None
                }
            }
        }
    }

    /// Record a fresh computation under its fingerprint and as the last map.
    pub fn store(&self, fingerprint: Fingerprint, map: AssembledMap, elapsed: Duration) -> Arc<AssembledMap> {
        let map = Arc::new(map);
        let mut inner = self.lock();
        inner.entries.insert(fingerprint, CachedMap { map: map.clone(), elapsed });
        inner.last = Some(map.clone());
        map
    }

    /// Drop every stored map, including the last-map slot.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.last = None;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evenly strided subset of `items`, at most `files_sample_size` long.
    pub fn sample<'a, T>(&self, items: &'a [T]) -> Vec<&'a T> {
        let limit = self.config.files_sample_size.max(1);
        if items.len() <= limit {
            return items.iter().collect();
        }
        let stride = items.len() / limit;
        items.iter().step_by(stride).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MapPart;
    use std::cell::Cell;
    use std::path::PathBuf;

    fn map_with(text: &str) -> AssembledMap {
        AssembledMap {
            parts: vec![MapPart { index: 1, text: text.into(), token_count: 1, oversized: false }],
            budget: 4096,
            unranked: false,
        }
    }

    fn request(other: &[&str]) -> MapRequest {
        MapRequest::new(vec![], other.iter().map(PathBuf::from).collect())
    }

    fn cache(policy: RefreshPolicy) -> ResultCache {
        ResultCache::new(policy, ResultCacheConfig::default())
    }

    #[test]
    fn test_fingerprint_ignores_file_order() {
        let cache = cache(RefreshPolicy::Auto);
        let a = cache.fingerprint(&request(&["a.py", "b.py"]), 4096);
        let b = cache.fingerprint(&request(&["b.py", "a.py"]), 4096);
        assert_eq!(a, b);
        assert_ne!(a, cache.fingerprint(&request(&["a.py", "b.py"]), 8192));
    }

    #[test]
    fn test_mentions_fold_in_only_under_eager_policies() {
        let plain = request(&["a.py"]);
        let mentioned = request(&["a.py"]).with_mentioned_idents(["foo"]);

        let auto = cache(RefreshPolicy::Auto);
        assert_ne!(auto.fingerprint(&plain, 4096), auto.fingerprint(&mentioned, 4096));

        let files = cache(RefreshPolicy::Files);
        assert_eq!(files.fingerprint(&plain, 4096), files.fingerprint(&mentioned, 4096));
    }

    #[test]
    fn test_large_file_lists_hash_by_count() {
        let config = ResultCacheConfig { fingerprint_count_threshold: 2, ..Default::default() };
        let cache = ResultCache::new(RefreshPolicy::Auto, config);
        let a = cache.fingerprint(&request(&["a", "b", "c"]), 4096);
        let b = cache.fingerprint(&request(&["x", "y", "z"]), 4096);
        assert_eq!(a, b);
    }

    #[test]
    fn test_always_never_reads() {
        let cache = cache(RefreshPolicy::Always);
        let fp = cache.fingerprint(&request(&["a.py"]), 4096);
        cache.store(fp.clone(), map_with("x"), Duration::from_secs(10));
        assert!(cache.lookup(&fp, false, || false).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_manual_returns_last_map_for_any_fingerprint() {
        let cache = cache(RefreshPolicy::Manual);
        let first = cache.fingerprint(&request(&["a.py"]), 4096);
        let other = cache.fingerprint(&request(&["b.py"]), 4096);
        assert!(cache.lookup(&first, false, || false).is_none());

        cache.store(first.clone(), map_with("first"), Duration::ZERO);
        let a = cache.lookup(&first, false, || false).unwrap();
        let b = cache.lookup(&other, false, || false).unwrap();
        assert_eq!(a.parts[0].text, "first");
        assert_eq!(a, b);

        assert!(cache.lookup(&other, true, || false).is_none());
    }

    #[test]
    fn test_auto_caches_only_slow_computations() {
        let cache = cache(RefreshPolicy::Auto);
        let fast = cache.fingerprint(&request(&["fast.py"]), 4096);
        let slow = cache.fingerprint(&request(&["slow.py"]), 4096);

        cache.store(fast.clone(), map_with("fast"), Duration::from_millis(5));
        cache.store(slow.clone(), map_with("slow"), Duration::from_millis(5000));

        assert!(cache.lookup(&fast, false, || false).is_none());
        assert_eq!(cache.lookup(&slow, false, || false).unwrap().parts[0].text, "slow");
    }

    #[test]
    fn test_files_policy_checks_for_changes() {
        let cache = cache(RefreshPolicy::Files);
        let fp = cache.fingerprint(&request(&["a.py"]), 4096);

        let probed = Cell::new(false);
        assert!(cache.lookup(&fp, false, || { probed.set(true); false }).is_none());
        assert!(!probed.get(), "no entry, nothing to probe");

        cache.store(fp.clone(), map_with("x"), Duration::ZERO);
        assert!(cache.lookup(&fp, false, || false).is_some());
        assert!(cache.lookup(&fp, false, || true).is_none());
    }

    #[test]
    fn test_invalidate_clears_last_map() {
        let cache = cache(RefreshPolicy::Manual);
        let fp = cache.fingerprint(&request(&["a.py"]), 4096);
        cache.store(fp.clone(), map_with("x"), Duration::ZERO);
        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.lookup(&fp, false, || false).is_none());
    }

    #[test]
    fn test_sample_is_bounded_and_strided() {
        let config = ResultCacheConfig { files_sample_size: 10, ..Default::default() };
        let cache = ResultCache::new(RefreshPolicy::Files, config);

        let small: Vec<u32> = (0..5).collect();
        assert_eq!(cache.sample(&small).len(), 5);

        let large: Vec<u32> = (0..1000).collect();
        let sampled = cache.sample(&large);
        assert_eq!(sampled.len(), 10);
        assert_eq!(*sampled[0], 0);
        assert_eq!(*sampled[1], 100);
    }
}
