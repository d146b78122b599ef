use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::errors::AppResult;
use crate::geocode::{GeocodeHit, GeocodeProvider};
use crate::model::Coordinates;

type PendingResolution = Shared<BoxFuture<'static, Option<Coordinates>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn from_hit(hit: GeocodeHit) -> Self {
        Self {
            lat: hit.coordinates.lat,
            lon: hit.coordinates.lon,
            formatted_address: hit.formatted_address,
            resolved_at: Some(Utc::now()),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmSummary {
    pub queued: usize,
    pub already_cached: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
}

/// Persistent memo of address → coordinates in front of a geocoding
/// provider.
///
/// Successful lookups are kept forever and written back to disk; misses and
/// provider failures are never stored, so the next request retries them.
/// Concurrent lookups of the same uncached key share a single provider call.
#[derive(Clone)]
pub struct GeocodeCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    path: PathBuf,
    provider: Arc<dyn GeocodeProvider>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, PendingResolution>>,
    write_guard: Mutex<()>,
    counters: CacheCounters,
}

impl GeocodeCache {
    /// Loads the cache file at `path`. A missing or unreadable file yields an
    /// empty cache; this never fails.
    pub fn open(path: impl Into<PathBuf>, provider: Arc<dyn GeocodeProvider>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        debug!(path = %path.display(), entries = entries.len(), "geocode cache loaded");
        Self {
            inner: Arc::new(CacheInner {
                path,
                provider,
                entries: Mutex::new(entries),
                in_flight: Mutex::new(HashMap::new()),
                write_guard: Mutex::new(()),
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the coordinates for `key`, consulting the provider at most once
    /// per key no matter how many callers ask concurrently. `None` means
    /// "unavailable right now", not a permanent answer.
    pub async fn resolve(&self, key: &str) -> Option<Coordinates> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        if let Some(coordinates) = self.inner.cached(key) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(coordinates);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(pending) = in_flight.get(key) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(key, "joining in-flight geocode");
                pending.clone()
            } else {
                // a call for this key may have landed between the first check and the lock
                if let Some(coordinates) = self.inner.cached(key) {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(coordinates);
                }
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "geocode cache miss");
                let pending = self.spawn_resolution(key.to_string());
                in_flight.insert(key.to_string(), pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Drops every stored entry and deletes the cache file. Lookups already in
    /// flight still complete and store their result.
    pub fn clear(&self) -> AppResult<()> {
        let _write = self.inner.write_guard.lock();
        let removed = {
            let mut entries = self.inner.entries.lock();
            let removed = entries.len();
            entries.clear();
            removed
        };
        match fs::remove_file(&self.inner.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(removed, path = %self.inner.path.display(), "geocode cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            entries: self.len(),
            in_flight: self.inner.in_flight.lock().len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            provider_calls: counters.provider_calls.load(Ordering::Relaxed),
            provider_failures: counters.provider_failures.load(Ordering::Relaxed),
        }
    }

    /// Resolves a batch of keys ahead of time with a fixed pool of `workers`
    /// draining a shared queue. Duplicate and already cached keys are skipped.
    pub async fn warm<I>(&self, keys: I, workers: usize) -> WarmSummary
    where
        I: IntoIterator<Item = String>,
    {
        let mut summary = WarmSummary::default();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for key in keys {
            let key = key.trim().to_string();
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            if self.contains(&key) {
                summary.already_cached += 1;
                continue;
            }
            queue.push_back(key);
        }

        summary.queued = queue.len();
        if queue.is_empty() {
            return summary;
        }

        let fan_out = workers.clamp(1, summary.queued);
        let queue = Arc::new(Mutex::new(queue));
        let resolved = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(fan_out);
        for worker in 0..fan_out {
            let cache = self.clone();
            let queue = Arc::clone(&queue);
            let resolved = Arc::clone(&resolved);
            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some(key) = next else {
                        break;
                    };
                    if cache.resolve(&key).await.is_some() {
                        resolved.fetch_add(1, Ordering::Relaxed);
                    }
                }
                trace!(worker, "cache warm worker drained queue");
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(?err, "cache warm worker aborted");
            }
        }

        summary.resolved = resolved.load(Ordering::Relaxed);
        summary.unresolved = summary.queued - summary.resolved;
        info!(
            queued = summary.queued,
            already_cached = summary.already_cached,
            resolved = summary.resolved,
            unresolved = summary.unresolved,
            "geocode cache warm pass finished"
        );
        summary
    }

    /// The provider call runs on its own task so it finishes, and fills the
    /// cache, even when every waiting caller has gone away.
    fn spawn_resolution(&self, key: String) -> PendingResolution {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _slot = InFlightSlot {
                inner: Arc::clone(&inner),
                key: key.clone(),
            };
            let resolved = inner.fetch_and_store(&key).await;
            resolved
        });
        handle
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    warn!(?err, "geocode task did not complete");
                    None
                })
            })
            .boxed()
            .shared()
    }
}

impl CacheInner {
    fn cached(&self, key: &str) -> Option<Coordinates> {
        self.entries.lock().get(key).map(CacheEntry::coordinates)
    }

    async fn fetch_and_store(&self, key: &str) -> Option<Coordinates> {
        self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
        match self.provider.geocode(key).await {
            Ok(Some(hit)) => {
                let coordinates = hit.coordinates;
                self.entries
                    .lock()
                    .insert(key.to_string(), CacheEntry::from_hit(hit));
                if let Err(err) = self.flush() {
                    warn!(?err, path = %self.path.display(), "failed to persist geocode cache");
                }
                Some(coordinates)
            }
            Ok(None) => {
                debug!(key, "geocoder found no match");
                None
            }
            Err(err) => {
                self.counters
                    .provider_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(?err, key, "geocode lookup failed");
                None
            }
        }
    }

    fn flush(&self) -> AppResult<()> {
        let _write = self.write_guard.lock();
        let snapshot: BTreeMap<String, CacheEntry> = self
            .entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        write_replacing(&self.path, &serialized)?;
        trace!(entries = snapshot.len(), "geocode cache flushed");
        Ok(())
    }
}

/// Removes the in-flight marker for a key when the resolving task ends,
/// whether it returned or panicked.
struct InFlightSlot {
    inner: Arc<CacheInner>,
    key: String,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

fn load_entries(path: &Path) -> HashMap<String, CacheEntry> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&contents) {
            Ok(entries) => entries
                .into_iter()
                .filter(|(key, entry)| {
                    let valid = Coordinates::checked(entry.lat, entry.lon).is_some();
                    if !valid {
                        warn!(key, "dropping cache entry with invalid coordinates");
                    }
                    valid
                })
                .collect(),
            Err(err) => {
                warn!(
                    error = ?err,
                    path = %path.display(),
                    "failed to parse geocode cache; starting empty"
                );
                HashMap::new()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
        Err(err) => {
            warn!(
                error = ?err,
                path = %path.display(),
                "failed to read geocode cache; starting empty"
            );
            HashMap::new()
        }
    }
}

fn write_replacing(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "geocode-cache.json".into());
    let staging = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&staging, contents)?;
    fs::rename(&staging, path)
}
