//! Embedded ordered key-value engine.
//!
//! The storage contract the core needs from its backing store: score-ordered
//! sets, hash maps, counters, capped sets with atomic check-and-add, per-key
//! TTL with refresh, pipelined batches, random key sampling and prefix scans.
//! Expiry is the engine's job: entries are invisible once their deadline
//! passes and a periodic sweep reclaims them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{CoreError, CoreResult};

/// One write in a pipelined batch. Every write carries a TTL in seconds;
/// a zero TTL is a programmer error and panics before anything is applied.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutBytes { key: String, bytes: Vec<u8>, ttl_s: u64 },
    ZAdd { key: String, score: i64, member: Vec<u8>, ttl_s: u64 },
    /// Insert only when the member is absent; the key TTL refreshes either way.
    ZAddNx { key: String, score: i64, member: Vec<u8>, ttl_s: u64 },
    HSet { key: String, field: String, value: Vec<u8>, ttl_s: u64 },
    /// Atomic check-and-add against a capped set.
    SAddCapped { key: String, member: String, cap: usize, ttl_s: u64 },
    Incr { key: String, delta: i64, ttl_s: u64 },
}

impl WriteOp {
    fn ttl_s(&self) -> u64 {
        match self {
            WriteOp::PutBytes { ttl_s, .. }
            | WriteOp::ZAdd { ttl_s, .. }
            | WriteOp::ZAddNx { ttl_s, .. }
            | WriteOp::HSet { ttl_s, .. }
            | WriteOp::SAddCapped { ttl_s, .. }
            | WriteOp::Incr { ttl_s, .. } => *ttl_s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Done,
    SetAdded,
    SetPresent,
    SetRejected,
}

#[derive(Debug, Default)]
struct Zset {
    scores: HashMap<Vec<u8>, i64>,
    ordered: BTreeSet<(i64, Vec<u8>)>,
}

impl Zset {
    fn insert(&mut self, score: i64, member: Vec<u8>) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(old, member.clone()));
        }
        self.ordered.insert((score, member));
    }
}

#[derive(Debug)]
enum KvValue {
    Bytes(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
    Zset(Zset),
    Set(HashSet<String>),
    Counter(i64),
}

#[derive(Debug)]
struct Entry {
    value: KvValue,
    /// Always `Some` in practice; writes without a TTL are rejected. The
    /// option exists so the TTL supervisor has something real to verify.
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(t) => t > now,
            None => true,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

/// The engine handle. Cheap to clone via `Arc`.
pub struct Kv {
    inner: RwLock<Inner>,
}

impl Default for Kv {
    fn default() -> Self {
        Self::new()
    }
}

impl Kv {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    /// Apply a batch of writes atomically. The TTL invariant is checked for
    /// every op before the first mutation; a write without a TTL is a
    /// programmer error, not a recoverable condition, and panics here rather
    /// than surfacing to any caller.
    pub fn apply(&self, ops: Vec<WriteOp>) -> CoreResult<Vec<WriteOutcome>> {
        if let Some(bad) = ops.iter().find(|op| op.ttl_s() == 0) {
            tracing::error!(?bad, "write op without ttl");
            panic!("ttl invariant violated: write op carries no ttl");
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let now = Instant::now();

        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            outcomes.push(apply_one(&mut inner, op, now));
        }
        Ok(outcomes)
    }

    /// Single-op convenience for the atomic check-and-add.
    pub fn sadd_capped(
        &self,
        key: &str,
        member: &str,
        cap: usize,
        ttl_s: u64,
    ) -> CoreResult<WriteOutcome> {
        let outcomes = self.apply(vec![WriteOp::SAddCapped {
            key: key.to_string(),
            member: member.to_string(),
            cap,
            ttl_s,
        }])?;
        Ok(outcomes[0])
    }

    pub fn incr(&self, key: &str, delta: i64, ttl_s: u64) -> CoreResult<()> {
        self.apply(vec![WriteOp::Incr { key: key.to_string(), delta, ttl_s }])?;
        Ok(())
    }

    // ── Reads ──

    pub fn get_bytes(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        self.read(key, |value| match value {
            KvValue::Bytes(b) => Some(b.clone()),
            _ => None,
        })
    }

    pub fn counter(&self, key: &str) -> CoreResult<i64> {
        Ok(self
            .read(key, |value| match value {
                KvValue::Counter(c) => Some(*c),
                _ => None,
            })?
            .unwrap_or(0))
    }

    pub fn hget(&self, key: &str, field: &str) -> CoreResult<Option<Vec<u8>>> {
        self.read(key, |value| match value {
            KvValue::Hash(h) => h.get(field).cloned(),
            _ => None,
        })
    }

    pub fn hgetall(&self, key: &str) -> CoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .read(key, |value| match value {
                KvValue::Hash(h) => {
                    Some(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>())
                }
                _ => None,
            })?
            .unwrap_or_default())
    }

    pub fn smembers(&self, key: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .read(key, |value| match value {
                KvValue::Set(s) => Some(s.iter().cloned().collect::<Vec<_>>()),
                _ => None,
            })?
            .unwrap_or_default())
    }

    pub fn scard(&self, key: &str) -> CoreResult<usize> {
        Ok(self
            .read(key, |value| match value {
                KvValue::Set(s) => Some(s.len()),
                _ => None,
            })?
            .unwrap_or(0))
    }

    pub fn zcard(&self, key: &str) -> CoreResult<usize> {
        Ok(self
            .read(key, |value| match value {
                KvValue::Zset(z) => Some(z.ordered.len()),
                _ => None,
            })?
            .unwrap_or(0))
    }

    /// Range a sorted set by score. `after` is the exclusive continuation
    /// point in iteration direction (the pagination cursor); `reverse` walks
    /// newest-first. Entries at equal score order by member bytes.
    pub fn zrange(
        &self,
        key: &str,
        min: i64,
        max: i64,
        after: Option<&(i64, Vec<u8>)>,
        limit: usize,
        reverse: bool,
    ) -> CoreResult<Vec<(i64, Vec<u8>)>> {
        self.read(key, |value| {
            let KvValue::Zset(z) = value else { return None };
            let mut out = Vec::new();
            if reverse {
                let upper: Bound<(i64, Vec<u8>)> = match after {
                    Some(a) => Bound::Excluded(a.clone()),
                    None if max == i64::MAX => Bound::Unbounded,
                    None => Bound::Excluded((max.saturating_add(1), Vec::new())),
                };
                for (score, member) in z.ordered.range((Bound::Unbounded, upper)).rev() {
                    if *score > max {
                        continue;
                    }
                    if *score < min || out.len() >= limit {
                        break;
                    }
                    out.push((*score, member.clone()));
                }
            } else {
                let lower: Bound<(i64, Vec<u8>)> = match after {
                    Some(a) => Bound::Excluded(a.clone()),
                    None => Bound::Included((min, Vec::new())),
                };
                for (score, member) in z.ordered.range((lower, Bound::Unbounded)) {
                    if *score < min {
                        continue;
                    }
                    if *score > max || out.len() >= limit {
                        break;
                    }
                    out.push((*score, member.clone()));
                }
            }
            Some(out)
        })
        .map(Option::unwrap_or_default)
    }

    // ── Introspection ──

    pub fn key_count(&self) -> CoreResult<usize> {
        let inner = self.lock_read()?;
        let now = Instant::now();
        Ok(inner.entries.values().filter(|e| e.live(now)).count())
    }

    pub fn count_prefix(&self, prefix: &str) -> CoreResult<usize> {
        let inner = self.lock_read()?;
        let now = Instant::now();
        Ok(inner
            .entries
            .iter()
            .filter(|(k, e)| e.live(now) && k.starts_with(prefix))
            .count())
    }

    /// Rough live-data footprint in bytes. Good enough for the stats surface.
    pub fn approx_memory_bytes(&self) -> CoreResult<u64> {
        let inner = self.lock_read()?;
        let now = Instant::now();
        let mut total = 0u64;
        for (key, entry) in &inner.entries {
            if !entry.live(now) {
                continue;
            }
            let value_size = match &entry.value {
                KvValue::Bytes(b) => b.len(),
                KvValue::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
                KvValue::Zset(z) => z.scores.keys().map(|m| m.len() * 2 + 24).sum(),
                KvValue::Set(s) => s.iter().map(|m| m.len() + 8).sum(),
                KvValue::Counter(_) => 8,
            };
            total += (key.len() + value_size + 48) as u64;
        }
        Ok(total)
    }

    /// Uniform random sample of live keys with their remaining TTL, for the
    /// retention supervisor. `None` TTL means the invariant is violated.
    pub fn sample_keys(&self, n: usize) -> CoreResult<Vec<(String, Option<Duration>)>> {
        let inner = self.lock_read()?;
        let now = Instant::now();
        let mut rng = rand::rng();
        let mut sample: Vec<(String, Option<Duration>)> = Vec::with_capacity(n);
        let mut seen = 0usize;
        for (key, entry) in inner.entries.iter().filter(|(_, e)| e.live(now)) {
            let item = (
                key.clone(),
                entry.expires_at.map(|t| t.saturating_duration_since(now)),
            );
            if sample.len() < n {
                sample.push(item);
            } else {
                let j = rng.random_range(0..=seen);
                if j < n {
                    sample[j] = item;
                }
            }
            seen += 1;
        }
        Ok(sample)
    }

    /// Remove expired entries; returns how many were reclaimed.
    pub fn sweep_expired(&self) -> CoreResult<usize> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.live(now));
        Ok(before - inner.entries.len())
    }

    /// Background sweep loop; expiry stays invisible to readers either way,
    /// this just returns the memory.
    pub fn spawn_sweeper(kv: Arc<Kv>, every: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match kv.sweep_expired() {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(reclaimed = n, "swept expired keys"),
                    Err(e) => tracing::error!("sweep failed: {e}"),
                }
            }
        });
    }

    fn lock_read(&self) -> CoreResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&KvValue) -> Option<T>) -> CoreResult<Option<T>> {
        let inner = self.lock_read()?;
        let now = Instant::now();
        Ok(inner
            .entries
            .get(key)
            .filter(|e| e.live(now))
            .and_then(|e| f(&e.value)))
    }
}

fn apply_one(inner: &mut Inner, op: WriteOp, now: Instant) -> WriteOutcome {
    let ttl = Duration::from_secs(op.ttl_s());
    let expires_at = Some(now + ttl);

    match op {
        WriteOp::PutBytes { key, bytes, .. } => {
            inner.entries.insert(key, Entry { value: KvValue::Bytes(bytes), expires_at });
            WriteOutcome::Done
        }
        WriteOp::ZAdd { key, score, member, .. } => {
            let entry = fresh_or(inner, key, now, || KvValue::Zset(Zset::default()));
            entry.expires_at = expires_at;
            if let KvValue::Zset(z) = &mut entry.value {
                z.insert(score, member);
            }
            WriteOutcome::Done
        }
        WriteOp::ZAddNx { key, score, member, .. } => {
            let entry = fresh_or(inner, key, now, || KvValue::Zset(Zset::default()));
            entry.expires_at = expires_at;
            if let KvValue::Zset(z) = &mut entry.value {
                if !z.scores.contains_key(&member) {
                    z.insert(score, member);
                }
            }
            WriteOutcome::Done
        }
        WriteOp::HSet { key, field, value, .. } => {
            let entry = fresh_or(inner, key, now, || KvValue::Hash(HashMap::new()));
            entry.expires_at = expires_at;
            if let KvValue::Hash(h) = &mut entry.value {
                h.insert(field, value);
            }
            WriteOutcome::Done
        }
        WriteOp::SAddCapped { key, member, cap, .. } => {
            let entry = fresh_or(inner, key, now, || KvValue::Set(HashSet::new()));
            entry.expires_at = expires_at;
            if let KvValue::Set(s) = &mut entry.value {
                if s.contains(&member) {
                    WriteOutcome::SetPresent
                } else if s.len() < cap {
                    s.insert(member);
                    WriteOutcome::SetAdded
                } else {
                    WriteOutcome::SetRejected
                }
            } else {
                WriteOutcome::Done
            }
        }
        WriteOp::Incr { key, delta, .. } => {
            let entry = fresh_or(inner, key, now, || KvValue::Counter(0));
            entry.expires_at = expires_at;
            if let KvValue::Counter(c) = &mut entry.value {
                *c += delta;
            }
            WriteOutcome::Done
        }
    }
}

/// Fetch the entry for a write, resetting it when it expired or holds a
/// different value type (the core owns the keyspace, so a type clash only
/// happens after an expiry race).
fn fresh_or<'a>(
    inner: &'a mut Inner,
    key: String,
    now: Instant,
    make: impl Fn() -> KvValue,
) -> &'a mut Entry {
    let entry = inner
        .entries
        .entry(key)
        .or_insert_with(|| Entry { value: make(), expires_at: None });
    if !entry.live(now) || std::mem::discriminant(&entry.value) != std::mem::discriminant(&make()) {
        entry.value = make();
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_put(key: &str, bytes: &[u8], ttl_s: u64) -> WriteOp {
        WriteOp::PutBytes { key: key.into(), bytes: bytes.to_vec(), ttl_s }
    }

    #[test]
    #[should_panic(expected = "ttl invariant violated")]
    fn zero_ttl_is_fatal() {
        let kv = Kv::new();
        let _ = kv.apply(vec![op_put("a", b"1", 60), op_put("b", b"2", 0)]);
    }

    #[test]
    fn zero_ttl_batch_mutates_nothing() {
        // the invariant check runs before the first mutation
        let kv = Arc::new(Kv::new());
        let kv2 = kv.clone();
        let _ = std::thread::spawn(move || {
            kv2.apply(vec![op_put("a", b"1", 60), op_put("b", b"2", 0)])
        })
        .join();
        assert_eq!(kv.get_bytes("a").unwrap(), None);
        assert_eq!(kv.get_bytes("b").unwrap(), None);
    }

    #[test]
    fn batch_is_atomic_and_readable() {
        let kv = Kv::new();
        kv.apply(vec![
            op_put("span:1", b"payload", 60),
            WriteOp::ZAdd { key: "idx".into(), score: 5, member: b"1".to_vec(), ttl_s: 60 },
            WriteOp::Incr { key: "ctr:x".into(), delta: 3, ttl_s: 60 },
        ])
        .unwrap();
        assert_eq!(kv.get_bytes("span:1").unwrap().unwrap(), b"payload");
        assert_eq!(kv.counter("ctr:x").unwrap(), 3);
        assert_eq!(kv.zcard("idx").unwrap(), 1);
    }

    #[test]
    fn zadd_updates_score_without_duplicating() {
        let kv = Kv::new();
        for score in [10, 20] {
            kv.apply(vec![WriteOp::ZAdd {
                key: "z".into(),
                score,
                member: b"m".to_vec(),
                ttl_s: 60,
            }])
            .unwrap();
        }
        assert_eq!(kv.zcard("z").unwrap(), 1);
        let got = kv.zrange("z", i64::MIN, i64::MAX, None, 10, false).unwrap();
        assert_eq!(got, vec![(20, b"m".to_vec())]);
    }

    #[test]
    fn zaddnx_keeps_first_score() {
        let kv = Kv::new();
        for score in [10, 20] {
            kv.apply(vec![WriteOp::ZAddNx {
                key: "z".into(),
                score,
                member: b"m".to_vec(),
                ttl_s: 60,
            }])
            .unwrap();
        }
        let got = kv.zrange("z", i64::MIN, i64::MAX, None, 10, false).unwrap();
        assert_eq!(got, vec![(10, b"m".to_vec())]);
    }

    #[test]
    fn zrange_window_limit_and_cursor() {
        let kv = Kv::new();
        let ops: Vec<WriteOp> = (0..10)
            .map(|i| WriteOp::ZAdd {
                key: "z".into(),
                score: i,
                member: format!("m{i}").into_bytes(),
                ttl_s: 60,
            })
            .collect();
        kv.apply(ops).unwrap();

        // newest-first page of 3 within [2, 8]
        let page1 = kv.zrange("z", 2, 8, None, 3, true).unwrap();
        let scores: Vec<i64> = page1.iter().map(|(s, _)| *s).collect();
        assert_eq!(scores, vec![8, 7, 6]);

        // continue after the last pair
        let page2 = kv.zrange("z", 2, 8, page1.last(), 3, true).unwrap();
        let scores: Vec<i64> = page2.iter().map(|(s, _)| *s).collect();
        assert_eq!(scores, vec![5, 4, 3]);

        let page3 = kv.zrange("z", 2, 8, page2.last(), 3, true).unwrap();
        let scores: Vec<i64> = page3.iter().map(|(s, _)| *s).collect();
        assert_eq!(scores, vec![2]);
    }

    #[test]
    fn capped_set_check_and_add() {
        let kv = Kv::new();
        assert_eq!(kv.sadd_capped("s", "a", 2, 60).unwrap(), WriteOutcome::SetAdded);
        assert_eq!(kv.sadd_capped("s", "b", 2, 60).unwrap(), WriteOutcome::SetAdded);
        assert_eq!(kv.sadd_capped("s", "c", 2, 60).unwrap(), WriteOutcome::SetRejected);
        assert_eq!(kv.sadd_capped("s", "a", 2, 60).unwrap(), WriteOutcome::SetPresent);
        assert_eq!(kv.scard("s").unwrap(), 2);
    }

    #[test]
    fn expired_keys_are_invisible_then_swept() {
        let kv = Kv::new();
        kv.apply(vec![op_put("gone", b"x", 1), op_put("kept", b"y", 60)]).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(kv.get_bytes("gone").unwrap(), None);
        assert_eq!(kv.get_bytes("kept").unwrap().unwrap(), b"y");
        assert_eq!(kv.key_count().unwrap(), 1);
        assert_eq!(kv.sweep_expired().unwrap(), 1);
    }

    #[test]
    fn ttl_refresh_on_rewrite() {
        let kv = Kv::new();
        kv.apply(vec![op_put("k", b"1", 1)]).unwrap();
        std::thread::sleep(Duration::from_millis(600));
        kv.apply(vec![op_put("k", b"2", 1)]).unwrap();
        std::thread::sleep(Duration::from_millis(600));
        // the rewrite pushed the deadline out
        assert_eq!(kv.get_bytes("k").unwrap().unwrap(), b"2");
    }

    #[test]
    fn sampled_keys_always_carry_ttl() {
        let kv = Kv::new();
        for i in 0..50 {
            kv.apply(vec![op_put(&format!("k{i}"), b"v", 60)]).unwrap();
        }
        let sample = kv.sample_keys(10).unwrap();
        assert_eq!(sample.len(), 10);
        assert!(sample.iter().all(|(_, ttl)| ttl.is_some()));
    }

    #[test]
    fn prefix_counts_and_memory() {
        let kv = Kv::new();
        kv.apply(vec![op_put("span:1", b"a", 60), op_put("span:2", b"b", 60), op_put("log:1", b"c", 60)])
            .unwrap();
        assert_eq!(kv.count_prefix("span:").unwrap(), 2);
        assert_eq!(kv.count_prefix("log:").unwrap(), 1);
        assert!(kv.approx_memory_bytes().unwrap() > 0);
    }
}
