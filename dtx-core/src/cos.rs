use std::collections::{HashMap, VecDeque};

use dtx_types::{DkeyHash, Hlc, Oid, Xid};
use parking_lot::Mutex;

use crate::handles::ContainerHandle;
use crate::network::RankId;
use crate::vos::now_secs;

/// Key a CoS entry is indexed by: the dkey it covers within an object (spec
/// §4.2, "keyed by (oid, dkey hash)").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CosKey {
    pub oid: Oid,
    pub dkey_hash: DkeyHash,
}

/// Rank-range and tree-broadcast inputs a collective DTX's CoS entry carries
/// forward to its eventual drain, so `batched_commit` can reissue the same
/// `COMMIT` the leader would have sent directly (spec §4.4, "Collective
/// path"), rather than folding it into the regular per-VOS commit batch.
#[derive(Clone, Debug, Default)]
pub struct CollRouting {
    pub epoch: Hlc,
    pub min_rank: RankId,
    pub max_rank: RankId,
    pub bitmap: Vec<u8>,
    pub hints: Vec<u8>,
}

/// A single Commit-on-Share cache entry.
#[derive(Clone, Debug)]
pub struct CosEntry {
    pub xid: Xid,
    pub version: u32,
    /// Wall-clock seconds the entry was inserted, used to decide when it
    /// ages out of the "preferentially batched" window (spec §4.2).
    pub inserted_at: u64,
    /// `Some` for entries that came in as a collective DTX's piggyback, so
    /// the draining side knows to route its eventual `COMMIT` through
    /// `coll_broadcast` one entry at a time instead of folding it into the
    /// regular batched `vos.commit` (spec §4.4, invariant 8).
    pub coll: Option<CollRouting>,
}

impl CosEntry {
    pub fn is_collective(&self) -> bool {
        self.coll.is_some()
    }
}

#[derive(Default)]
struct ContainerCos {
    by_key: HashMap<CosKey, CosEntry>,
    /// Insertion-ordered so `cos_oldest`/draining favors the longest-waiting
    /// entries first, mirroring the C engine's `dce_list` (spec §4.2).
    order: VecDeque<CosKey>,
    /// Reverse lookup so `put_piggyback` can promote an entry by xid alone,
    /// the way `dtx_cos` callers only ever carry the xid forward.
    xid_index: HashMap<Xid, CosKey>,
    committable_count: u64,
    committable_coll_count: u64,
}

impl ContainerCos {
    fn insert(&mut self, key: CosKey, entry: CosEntry) {
        let xid = entry.xid;
        let collective = entry.is_collective();
        if self.by_key.insert(key, entry).is_none() {
            self.order.push_back(key);
            self.xid_index.insert(xid, key);
            if collective {
                self.committable_coll_count += 1;
            } else {
                self.committable_count += 1;
            }
        }
    }

    fn remove(&mut self, key: &CosKey) -> Option<CosEntry> {
        let entry = self.by_key.remove(key)?;
        self.order.retain(|k| k != key);
        self.xid_index.remove(&entry.xid);
        if entry.is_collective() {
            self.committable_coll_count -= 1;
        } else {
            self.committable_count -= 1;
        }
        Some(entry)
    }

    /// Moves `key` to the front of `order` so it drains first on the next
    /// `batched_del` (spec §4.2, `put_piggyback`'s "promote" behaviour).
    fn promote(&mut self, key: &CosKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if pos != 0 {
                self.order.remove(pos);
                self.order.push_front(*key);
            }
        }
    }
}

/// Per-engine Commit-on-Share cache (spec §4.2, component C2). One
/// `ContainerCos` bucket per open container; a `parking_lot::Mutex` guards
/// each bucket rather than the whole map, so lookups for distinct
/// containers never contend (teacher: `CommitVoteMonitor` uses the same
/// per-key-lock-free-outer-map shape in `commit_vote_monitor.rs`).
#[derive(Default)]
pub struct CosCache {
    containers: Mutex<HashMap<ContainerHandle, ContainerCos>>,
}

impl CosCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a committable DTX to the cache, deduplicating on `(oid, dkey)`:
    /// a later entry for the same key replaces the earlier one (spec §4.2,
    /// "Idempotence / piggyback").
    pub fn cos_add(&self, coh: ContainerHandle, key: CosKey, xid: Xid, version: u32, collective: bool) {
        self.insert_entry(
            coh,
            key,
            CosEntry {
                xid,
                version,
                inserted_at: now_secs(),
                coll: collective.then(CollRouting::default),
            },
        );
    }

    /// Piggyback variant for a collective DTX: same insertion as `cos_add`,
    /// but carrying the rank-range/bitmap/hints a later `batched_commit`
    /// drain needs to reissue the collective `COMMIT` itself (spec §4.4).
    pub fn cos_add_collective(&self, coh: ContainerHandle, key: CosKey, xid: Xid, version: u32, routing: CollRouting) {
        self.insert_entry(
            coh,
            key,
            CosEntry {
                xid,
                version,
                inserted_at: now_secs(),
                coll: Some(routing),
            },
        );
    }

    /// Piggyback variant: same insertion, but called out separately so
    /// callers (refresh/collective paths) can be read without conflating it
    /// with a leader's own direct `cos_add`.
    pub fn cos_add_piggyback(&self, coh: ContainerHandle, key: CosKey, xid: Xid, version: u32) {
        self.cos_add_collective(coh, key, xid, version, CollRouting::default());
    }

    fn insert_entry(&self, coh: ContainerHandle, key: CosKey, entry: CosEntry) {
        let mut containers = self.containers.lock();
        let bucket = containers.entry(coh).or_default();
        bucket.insert(key, entry);
    }

    /// Releases the refs an earlier `list_cos` snapshot took on `xids`; if
    /// `done` is false, promotes each still-cached entry so the next
    /// dispatch retries it first (spec §4.2 `put_piggyback`, §4.3 `end`
    /// step 7). Unknown xids (already committed/removed) are silently
    /// ignored, matching the idempotence of `cos_del`.
    pub fn put_piggyback(&self, coh: ContainerHandle, xids: &[Xid], done: bool) {
        if xids.is_empty() {
            return;
        }
        let mut containers = self.containers.lock();
        let Some(bucket) = containers.get_mut(&coh) else {
            return;
        };
        if done {
            return;
        }
        for xid in xids {
            if let Some(&key) = bucket.xid_index.get(xid) {
                bucket.promote(&key);
            }
        }
    }

    pub fn cos_del(&self, coh: ContainerHandle, key: &CosKey) -> Option<CosEntry> {
        let mut containers = self.containers.lock();
        containers.get_mut(&coh).and_then(|b| b.remove(key))
    }

    /// Drains up to `max` of the oldest entries for batched commit, removing
    /// them from the cache immediately; callers that fail to actually commit
    /// a drained entry are expected to re-`cos_add` it (spec §4.5.1, "Batched
    /// commit" step 3).
    pub fn batched_del(&self, coh: ContainerHandle, max: usize) -> Vec<(CosKey, CosEntry)> {
        let mut containers = self.containers.lock();
        let Some(bucket) = containers.get_mut(&coh) else {
            return Vec::new();
        };
        let mut drained = Vec::with_capacity(max.min(bucket.order.len()));
        while drained.len() < max {
            let Some(key) = bucket.order.pop_front() else {
                break;
            };
            if let Some(entry) = bucket.by_key.remove(&key) {
                if entry.is_collective() {
                    bucket.committable_coll_count -= 1;
                } else {
                    bucket.committable_count -= 1;
                }
                drained.push((key, entry));
            }
        }
        drained
    }

    /// All currently cached entries for a container, oldest first; used by
    /// `dtx_list_cos` style inspection and by the sync-commit fallback (spec
    /// §4.3, `end`).
    pub fn list_cos(&self, coh: ContainerHandle) -> Vec<(CosKey, CosEntry)> {
        let containers = self.containers.lock();
        let Some(bucket) = containers.get(&coh) else {
            return Vec::new();
        };
        bucket
            .order
            .iter()
            .filter_map(|k| bucket.by_key.get(k).map(|e| (*k, e.clone())))
            .collect()
    }

    /// The single oldest entry, if any (spec §4.2, `dtx_cos_oldest`): used by
    /// the batched-commit service to decide whether the age threshold has
    /// been crossed even when the count threshold has not.
    pub fn cos_oldest(&self, coh: ContainerHandle) -> Option<(CosKey, CosEntry)> {
        let containers = self.containers.lock();
        let bucket = containers.get(&coh)?;
        let key = *bucket.order.front()?;
        bucket.by_key.get(&key).map(|e| (key, e.clone()))
    }

    /// Number of regular (non-collective) committable entries, used to
    /// compare against `DTX_THRESHOLD_COUNT`.
    pub fn committable_count(&self, coh: ContainerHandle) -> u64 {
        self.containers
            .lock()
            .get(&coh)
            .map(|b| b.committable_count)
            .unwrap_or(0)
    }

    pub fn committable_coll_count(&self, coh: ContainerHandle) -> u64 {
        self.containers
            .lock()
            .get(&coh)
            .map(|b| b.committable_coll_count)
            .unwrap_or(0)
    }

    /// Priority entries: those whose `inserted_at` has aged past
    /// `DTX_COMMIT_THRESHOLD_AGE`, returned oldest-first (spec §4.2,
    /// "age-based priority"). Does not remove them.
    pub fn cos_prio(&self, coh: ContainerHandle, max_age: std::time::Duration) -> Vec<(CosKey, CosEntry)> {
        let now = now_secs();
        let cutoff = max_age.as_secs();
        self.list_cos(coh)
            .into_iter()
            .take_while(|(_, e)| now.saturating_sub(e.inserted_at) >= cutoff)
            .collect()
    }

    pub fn cache_reset(&self, coh: ContainerHandle) {
        self.containers.lock().remove(&coh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> CosKey {
        CosKey {
            oid: Oid::new(n, 0),
            dkey_hash: n,
        }
    }

    #[test]
    fn add_and_del_roundtrip() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        let k = key(1);
        cache.cos_add(coh, k, Xid::generate(1), 1, false);
        assert_eq!(cache.committable_count(coh), 1);
        let removed = cache.cos_del(coh, &k);
        assert!(removed.is_some());
        assert_eq!(cache.committable_count(coh), 0);
    }

    #[test]
    fn duplicate_key_replaces_not_duplicates() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        let k = key(2);
        cache.cos_add(coh, k, Xid::generate(1), 1, false);
        cache.cos_add(coh, k, Xid::generate(2), 2, false);
        assert_eq!(cache.committable_count(coh), 1);
        assert_eq!(cache.list_cos(coh).len(), 1);
    }

    #[test]
    fn batched_del_drains_oldest_first_up_to_max() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        for i in 0..5u64 {
            cache.cos_add(coh, key(i), Xid::generate(i), 1, false);
        }
        let drained = cache.batched_del(coh, 3);
        assert_eq!(drained.len(), 3);
        assert_eq!(cache.committable_count(coh), 2);
    }

    #[test]
    fn collective_entries_tracked_separately() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        cache.cos_add_piggyback(coh, key(1), Xid::generate(1), 1);
        assert_eq!(cache.committable_coll_count(coh), 1);
        assert_eq!(cache.committable_count(coh), 0);
    }

    #[test]
    fn put_piggyback_promotes_unfinished_entries_to_front() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        let xid0 = Xid::generate(1);
        let xid1 = Xid::generate(2);
        cache.cos_add(coh, key(0), xid0, 1, false);
        cache.cos_add(coh, key(1), xid1, 1, false);
        cache.put_piggyback(coh, &[xid1], false);
        let ordered = cache.list_cos(coh);
        assert_eq!(ordered[0].1.xid, xid1);
    }

    #[test]
    fn put_piggyback_is_noop_when_done() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        let xid0 = Xid::generate(1);
        let xid1 = Xid::generate(2);
        cache.cos_add(coh, key(0), xid0, 1, false);
        cache.cos_add(coh, key(1), xid1, 1, false);
        cache.put_piggyback(coh, &[xid1], true);
        let ordered = cache.list_cos(coh);
        assert_eq!(ordered[0].1.xid, xid0);
    }

    #[test]
    fn cache_reset_drops_whole_container_bucket() {
        let cache = CosCache::new();
        let coh = ContainerHandle(1);
        cache.cos_add(coh, key(1), Xid::generate(1), 1, false);
        cache.cache_reset(coh);
        assert_eq!(cache.committable_count(coh), 0);
        assert!(cache.list_cos(coh).is_empty());
    }
}
