//! Process-local, byte-weighted VFS cache (§4.2). One `lru::LruCache`
//! guarded by one `parking_lot::Mutex`, same pairing the teacher uses in
//! `core/rate_limit/limiter.rs`. The `lru` crate bounds by entry count, not
//! bytes, so capacity is tracked by hand: the cache is constructed
//! `unbounded()` and a running byte total drives eviction instead of the
//! crate's own cap.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fazt_types::prelude::*;
use fazt_types::substrate::{Substrate, VfsRow};

/// Default cache budget. The spec calls for "25% of detected RAM, with
/// floor/ceiling"; no crate in the retrieval pack does portable memory
/// detection, so this ships as a fixed default within the documented
/// floor/ceiling band instead of adding a dependency for one guess at boot.
pub const DEFAULT_BUDGET_BYTES: usize = 256 * 1024 * 1024;
/// Entries larger than budget/4 are refused outright (§4.2: "oversized
/// entries... refused entry outright to prevent single-entry dominance").
const OVERSIZE_DIVISOR: usize = 4;

type CacheKey = (AppId, Box<str>);

pub struct VfsCache {
	entries: Mutex<LruCache<CacheKey, Arc<VfsRow>>>,
	weight: Mutex<usize>,
	budget: usize,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl std::fmt::Debug for VfsCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VfsCache").field("weight", &*self.weight.lock()).field("budget", &self.budget).finish()
	}
}

impl VfsCache {
	pub fn new(budget_bytes: usize) -> Self {
		Self {
			entries: Mutex::new(LruCache::unbounded()),
			weight: Mutex::new(0),
			budget: budget_bytes,
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	fn key(app_id: &AppId, path: &str) -> CacheKey {
		(app_id.clone(), Box::from(path))
	}

	/// Promotes the entry to most-recently-used on hit.
	pub fn get(&self, app_id: &AppId, path: &str) -> Option<Arc<VfsRow>> {
		let hit = self.entries.lock().get(&Self::key(app_id, path)).cloned();
		if hit.is_some() {
			self.hits.fetch_add(1, Ordering::Relaxed);
		} else {
			self.misses.fetch_add(1, Ordering::Relaxed);
		}
		hit
	}

	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	/// Hit ratio in `[0, 1]`; `0.0` before the cache has served any lookups.
	pub fn hit_ratio(&self) -> f64 {
		let (hits, misses) = (self.hits() as f64, self.misses() as f64);
		if hits + misses == 0.0 {
			0.0
		} else {
			hits / (hits + misses)
		}
	}

	pub fn put(&self, row: Arc<VfsRow>) {
		let size = row.bytes.len();
		if size > self.budget / OVERSIZE_DIVISOR {
			return;
		}
		let key = Self::key(&row.app_id, &row.path);
		let mut entries = self.entries.lock();
		let mut weight = self.weight.lock();
		if let Some(evicted) = entries.put(key, row) {
			*weight -= evicted.bytes.len();
		}
		*weight += size;
		while *weight > self.budget {
			let Some((_, evicted)) = entries.pop_lru() else { break };
			*weight -= evicted.bytes.len();
		}
	}

	pub fn invalidate(&self, app_id: &AppId, path: &str) {
		let mut entries = self.entries.lock();
		if let Some(row) = entries.pop(&Self::key(app_id, path)) {
			*self.weight.lock() -= row.bytes.len();
		}
	}

	/// Drops every cached entry for `app_id` whose path starts with `prefix`.
	/// Used to drop all media derivatives of a source on overwrite.
	pub fn invalidate_prefix(&self, app_id: &AppId, prefix: &str) {
		let mut entries = self.entries.lock();
		let victims: Vec<CacheKey> = entries
			.iter()
			.filter(|((a, p), _)| a == app_id && p.starts_with(prefix))
			.map(|(k, _)| k.clone())
			.collect();
		let mut weight = self.weight.lock();
		for key in victims {
			if let Some(row) = entries.pop(&key) {
				*weight -= row.bytes.len();
			}
		}
	}

	pub fn current_weight(&self) -> usize {
		*self.weight.lock()
	}

	pub fn budget(&self) -> usize {
		self.budget
	}
}

/// Reads through the cache: a hit returns cached bytes, a miss fetches from
/// the substrate and populates the cache. A substrate error propagates as an
/// error, never as a cache miss, so callers can't mistake "storage is down"
/// for "the file doesn't exist" (§4.2 failure semantics).
pub async fn cached_vfs_get(
	cache: &VfsCache,
	substrate: &dyn Substrate,
	app_id: &AppId,
	path: &str,
) -> ClResult<Option<Arc<VfsRow>>> {
	if let Some(row) = cache.get(app_id, path) {
		return Ok(Some(row));
	}
	match substrate.vfs_get(app_id, path).await? {
		Some(row) => {
			let row = Arc::new(row);
			cache.put(row.clone());
			Ok(Some(row))
		}
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn row(app: &str, path: &str, bytes: Vec<u8>) -> Arc<VfsRow> {
		Arc::new(VfsRow {
			app_id: AppId::new(app),
			path: path.to_string(),
			size: bytes.len() as u64,
			content_hash: fazt_types::utils::sha256_hex(&bytes),
			bytes,
			mime: "text/plain".into(),
			updated_at: Timestamp::now(),
		})
	}

	#[test]
	fn promotes_on_hit_and_evicts_lru_under_budget() {
		let cache = VfsCache::new(30);
		cache.put(row("a", "1", vec![0; 10]));
		cache.put(row("a", "2", vec![0; 10]));
		// Touch "1" so it's no longer the least-recently-used.
		assert!(cache.get(&AppId::new("a"), "1").is_some());
		cache.put(row("a", "3", vec![0; 15]));
		assert!(cache.get(&AppId::new("a"), "2").is_none());
		assert!(cache.get(&AppId::new("a"), "1").is_some());
		assert!(cache.current_weight() <= 30);
	}

	#[test]
	fn refuses_oversized_entry() {
		let cache = VfsCache::new(40);
		cache.put(row("a", "big", vec![0; 11]));
		assert!(cache.get(&AppId::new("a"), "big").is_none());
	}

	#[test]
	fn prefix_invalidation_drops_only_matching_paths() {
		let cache = VfsCache::new(1000);
		cache.put(row("a", "_media/h/100x0", vec![1]));
		cache.put(row("a", "_media/h/200x0", vec![2]));
		cache.put(row("a", "index.html", vec![3]));
		cache.invalidate_prefix(&AppId::new("a"), "_media/h/");
		assert!(cache.get(&AppId::new("a"), "_media/h/100x0").is_none());
		assert!(cache.get(&AppId::new("a"), "index.html").is_some());
	}
}

// vim: ts=4
