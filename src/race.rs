//! The race engine: per-release, per-user upload byte aggregation with a
//! bounded most-recently-touched list.
//!
//! One mutex guards both the race map and the recent list because the
//! invariants span them: every key on the recent list exists in the map and
//! the list never exceeds its cap. All values returned to callers are deep
//! copies taken under the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Default bound of the recent list.
pub const DEFAULT_MAX_RECENT: usize = 100;

/// Owned snapshot of one race's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceSnapshot {
    /// Normalized release path.
    pub release: String,
    /// Section name the release was uploaded into.
    pub section: String,
    /// When the first upload arrived.
    pub started_at: SystemTime,
    /// When the last upload arrived.
    pub updated_at: SystemTime,
    /// Bytes uploaded per user; keys are lower-cased names.
    pub user_bytes: HashMap<String, u64>,
    /// Total bytes across all users.
    pub total_bytes: u64,
    /// Number of completed file uploads.
    pub file_count: u64,
}

impl RaceSnapshot {
    /// Per-user byte pairs sorted by contribution, largest first.
    pub fn standings(&self) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self.user_bytes.iter().map(|(k, v)| (k.clone(), *v)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs
    }
}

struct RaceInner {
    races: HashMap<String, RaceSnapshot>,
    // Most recently touched first.
    recent: VecDeque<String>,
}

/// The engine. Cheap to share behind an `Arc`.
pub struct RaceEngine {
    inner: Mutex<RaceInner>,
    max_recent: usize,
}

impl std::fmt::Debug for RaceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceEngine").field("max_recent", &self.max_recent).finish()
    }
}

/// Normalize a release key: forward slashes, leading `/`, no trailing
/// slash except for the root.
pub fn normalize_release(release: &str) -> String {
    let mut key = release.replace('\\', "/");
    if !key.starts_with('/') {
        key.insert(0, '/');
    }
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}

impl RaceEngine {
    /// A new engine whose recent list holds at most `max_recent` releases.
    pub fn new(max_recent: usize) -> RaceEngine {
        RaceEngine {
            inner: Mutex::new(RaceInner { races: HashMap::new(), recent: VecDeque::new() }),
            max_recent: max_recent.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RaceInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a completed file upload and return the updated snapshot.
    pub fn register_upload(&self, user: &str, release: &str, section: &str, bytes: u64) -> RaceSnapshot {
        let key = normalize_release(release);
        let user = user.to_lowercase();
        let now = SystemTime::now();

        let mut inner = self.lock();
        let race = inner.races.entry(key.clone()).or_insert_with(|| RaceSnapshot {
            release: key.clone(),
            section: section.to_string(),
            started_at: now,
            updated_at: now,
            user_bytes: HashMap::new(),
            total_bytes: 0,
            file_count: 0,
        });
        race.updated_at = now;
        *race.user_bytes.entry(user).or_insert(0) += bytes;
        race.total_bytes += bytes;
        race.file_count += 1;
        let snapshot = race.clone();

        // Touch: move (or insert) the key at the head, evict past the cap.
        if let Some(pos) = inner.recent.iter().position(|k| k == &key) {
            inner.recent.remove(pos);
        }
        inner.recent.push_front(key);
        while inner.recent.len() > self.max_recent {
            inner.recent.pop_back();
        }

        snapshot
    }

    /// Snapshot of one race, by release path.
    pub fn get(&self, release: &str) -> Option<RaceSnapshot> {
        let key = normalize_release(release);
        self.lock().races.get(&key).cloned()
    }

    /// Snapshots of at most `max` most recently touched races, newest
    /// first.
    pub fn recent(&self, max: usize) -> Vec<RaceSnapshot> {
        let inner = self.lock();
        inner
            .recent
            .iter()
            .take(max)
            .filter_map(|key| inner.races.get(key).cloned())
            .collect()
    }

    /// Remove a race (nuke/wipe). Returns its final snapshot.
    pub fn remove(&self, release: &str) -> Option<RaceSnapshot> {
        let key = normalize_release(release);
        let mut inner = self.lock();
        let removed = inner.races.remove(&key);
        if removed.is_some() {
            if let Some(pos) = inner.recent.iter().position(|k| k == &key) {
                inner.recent.remove(pos);
            }
        }
        removed
    }

    /// Drop races not touched for `age`; used by the scheduler. Returns
    /// how many were evicted.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let cutoff = SystemTime::now().checked_sub(age);
        let Some(cutoff) = cutoff else { return 0 };
        let mut inner = self.lock();
        let stale: Vec<String> = inner
            .races
            .iter()
            .filter(|(_, race)| race.updated_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            inner.races.remove(key);
            if let Some(pos) = inner.recent.iter().position(|k| k == key) {
                inner.recent.remove(pos);
            }
        }
        stale.len()
    }

    /// Number of tracked races.
    pub fn len(&self) -> usize {
        self.lock().races.len()
    }

    /// Whether no races are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn release_keys_normalize() {
        assert_eq!(normalize_release("rel\\sub"), "/rel/sub");
        assert_eq!(normalize_release("/rel/"), "/rel");
        assert_eq!(normalize_release("/"), "/");
    }

    #[test]
    fn bytes_accumulate_per_user() {
        let engine = RaceEngine::new(DEFAULT_MAX_RECENT);
        engine.register_upload("Alice", "/rel", "ARCHIVE", 1000);
        let snap = engine.register_upload("alice", "/rel", "ARCHIVE", 500);
        assert_eq!(snap.user_bytes.get("alice"), Some(&1500));
        assert_eq!(snap.total_bytes, 1500);
        assert_eq!(snap.file_count, 2);
    }

    #[test]
    fn totals_match_user_sum() {
        let engine = RaceEngine::new(DEFAULT_MAX_RECENT);
        engine.register_upload("a", "/rel", "S", 10);
        engine.register_upload("b", "/rel", "S", 20);
        let snap = engine.register_upload("c", "/rel", "S", 30);
        assert_eq!(snap.total_bytes, snap.user_bytes.values().sum::<u64>());
    }

    #[test]
    fn recent_list_is_bounded_and_touch_ordered() {
        let engine = RaceEngine::new(3);
        for i in 0..5 {
            engine.register_upload("u", &format!("/rel{}", i), "S", 1);
        }
        let recent = engine.recent(10);
        let names: Vec<&str> = recent.iter().map(|r| r.release.as_str()).collect();
        assert_eq!(names, vec!["/rel4", "/rel3", "/rel2"]);

        // Touching an existing entry moves it to the head without growth.
        engine.register_upload("u", "/rel3", "S", 1);
        let names: Vec<String> = engine.recent(10).into_iter().map(|r| r.release).collect();
        assert_eq!(names, vec!["/rel3", "/rel4", "/rel2"]);
    }

    #[test]
    fn every_recent_key_is_in_the_map() {
        let engine = RaceEngine::new(2);
        for i in 0..4 {
            engine.register_upload("u", &format!("/r{}", i), "S", 1);
        }
        for snap in engine.recent(10) {
            assert!(engine.get(&snap.release).is_some());
        }
    }

    #[test]
    fn remove_forgets_race_and_recent_entry() {
        let engine = RaceEngine::new(10);
        engine.register_upload("u", "/rel", "S", 1);
        let removed = engine.remove("rel").unwrap();
        assert_eq!(removed.total_bytes, 1);
        assert!(engine.get("/rel").is_none());
        assert!(engine.recent(10).is_empty());
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let engine = RaceEngine::new(10);
        let snap = engine.register_upload("u", "/rel", "S", 1);
        engine.register_upload("u", "/rel", "S", 1);
        assert_eq!(snap.total_bytes, 1);
        assert_eq!(engine.get("/rel").unwrap().total_bytes, 2);
    }

    #[test]
    fn standings_sort_by_bytes() {
        let engine = RaceEngine::new(10);
        engine.register_upload("small", "/rel", "S", 10);
        engine.register_upload("big", "/rel", "S", 100);
        let snap = engine.get("/rel").unwrap();
        let standings = snap.standings();
        assert_eq!(standings[0].0, "big");
        assert_eq!(standings[1].0, "small");
    }
}
