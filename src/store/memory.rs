//! Embedded In-Memory Store
//!
//! A [`Store`] that keeps lists and sorted sets in process memory with the
//! same observable semantics the queues rely on from a Redis server:
//!
//! - empty lists and sorted sets disappear, so the next push re-creates the key
//! - a key holds exactly one structure; using it as the other is `WRONGTYPE`
//! - expired keys are invisible immediately (lazy) and reclaimed later by the
//!   [`ExpirySweeper`](crate::store::ExpirySweeper) (active)
//! - engines older than 5.0.0 reject `ZPOPMIN`
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  └────┬────┘ └────┬────┘ └────┬────┘ └────┬────┘            │
//! │       └── node (shard % nodes) owns the shard's keys ──┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Splitting shards across simulated nodes lets key enumeration behave like
//! a partitioned deployment, where each node only reports its own keys.

use super::{EngineVersion, NodeInfo, Store, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of shards. Each shard has its own lock.
const NUM_SHARDS: usize = 64;

/// Version reported when none is configured.
pub const DEFAULT_VERSION: EngineVersion = EngineVersion::new(7, 2, 0);

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Sorted-set score with a total order.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

/// Members indexed both by name and by (score, member) rank.
#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ranked: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn len(&self) -> usize {
        self.scores.len()
    }

    fn insert_new(&mut self, member: &str, score: f64) -> bool {
        if self.scores.contains_key(member) {
            return false;
        }
        self.scores.insert(member.to_string(), score);
        self.ranked.insert((Score(score), member.to_string()));
        true
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ranked.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, start: i64, stop: i64) -> Vec<String> {
        match normalize_range(self.len(), start, stop) {
            Some((skip, take)) => self
                .ranked
                .iter()
                .skip(skip)
                .take(take)
                .map(|(_, member)| member.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn pop_min(&mut self, count: usize) -> Vec<(String, f64)> {
        let mut popped = Vec::with_capacity(count.min(self.len()));
        while popped.len() < count {
            let Some((Score(score), member)) = self.ranked.pop_first() else {
                break;
            };
            self.scores.remove(&member);
            popped.push((member, score));
        }
        popped
    }
}

/// Converts an inclusive, possibly negative rank range into `(skip, take)`.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, (stop - start + 1) as usize))
}

#[derive(Debug, Clone)]
enum Value {
    List(VecDeque<String>),
    SortedSet(SortedSet),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::List(list) => list.is_empty(),
            Value::SortedSet(set) => set.len() == 0,
        }
    }
}

/// A stored structure with optional expiry time.
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Shard {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live keys (approximate)
    pub keys: u64,
    /// Keys reclaimed after their TTL elapsed
    pub expired: u64,
    /// TTLs applied with EXPIRE
    pub expires_set: u64,
}

/// Sharded, in-process implementation of [`Store`].
///
/// # Example
///
/// ```
/// use bucketq::store::{EngineVersion, MemoryStore};
///
/// // Two simulated nodes running an engine without ZPOPMIN
/// let store = MemoryStore::new()
///     .with_nodes(2)
///     .with_version(EngineVersion::new(4, 0, 14));
/// assert_eq!(store.lpush_sync("q", "a").unwrap(), 1);
/// ```
pub struct MemoryStore {
    shards: Vec<Shard>,
    nodes: Vec<NodeInfo>,
    database: i64,
    key_count: AtomicU64,
    expired_count: AtomicU64,
    expire_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("nodes", &self.nodes.len())
            .field("database", &self.database)
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A single-node store on database 0 reporting [`DEFAULT_VERSION`].
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            nodes: node_list(1, DEFAULT_VERSION),
            database: 0,
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            expire_count: AtomicU64::new(0),
        }
    }

    /// Reports `version` from every node.
    pub fn with_version(mut self, version: EngineVersion) -> Self {
        let count = self.nodes.len();
        self.nodes = node_list(count, version);
        self
    }

    /// Spreads the shards over `count` simulated nodes (at least one).
    pub fn with_nodes(mut self, count: usize) -> Self {
        let version = self.version();
        self.nodes = node_list(count.max(1), version);
        self
    }

    /// Database index the keys live in; enumeration of any other is empty.
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn version(&self) -> EngineVersion {
        self.nodes
            .first()
            .map(|n| n.version)
            .unwrap_or(DEFAULT_VERSION)
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Drops `key` from `entries` if it has expired. Returns true if dropped.
    fn evict_if_expired(&self, entries: &mut HashMap<String, Entry>, key: &str) -> bool {
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Runs `f` on the live entry for `key`, removing the key if `f` leaves
    /// its structure empty.
    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Entry) -> StoreResult<T>,
        missing: T,
    ) -> StoreResult<T> {
        let mut entries = self.shard(key).entries.write();
        self.evict_if_expired(&mut entries, key);

        let Some(entry) = entries.get_mut(key) else {
            return Ok(missing);
        };
        let result = f(entry)?;
        if entry.value.is_empty() {
            entries.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    /// Read-only access to the live entry for `key`.
    fn read_live<T>(&self, key: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let entries = self.shard(key).entries.read();
        entries.get(key).filter(|e| !e.is_expired()).map(f)
    }

    pub fn exists_sync(&self, key: &str) -> bool {
        self.read_live(key, |_| ()).is_some()
    }

    pub fn expire_sync(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.shard(key).entries.write();
        self.evict_if_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                self.expire_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn ttl_sync(&self, key: &str) -> Option<Duration> {
        self.read_live(key, |entry| {
            entry
                .expires_at
                .map(|exp| exp.saturating_duration_since(Instant::now()))
        })
        .flatten()
    }

    pub fn lpush_sync(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut entries = self.shard(key).entries.write();
        self.evict_if_expired(&mut entries, key);

        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            self.key_count.fetch_add(1, Ordering::Relaxed);
            Entry::new(Value::List(VecDeque::new()))
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len())
            }
            Value::SortedSet(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
        }
    }

    pub fn rpop_sync(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_live_entry(
            key,
            |entry| match &mut entry.value {
                Value::List(list) => Ok(list.pop_back()),
                Value::SortedSet(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
            },
            None,
        )
    }

    pub fn llen_sync(&self, key: &str) -> StoreResult<usize> {
        match self.read_live(key, |entry| match &entry.value {
            Value::List(list) => Ok(list.len()),
            Value::SortedSet(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
        }) {
            Some(result) => result,
            None => Ok(0),
        }
    }

    pub fn zadd_nx_sync(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut entries = self.shard(key).entries.write();
        self.evict_if_expired(&mut entries, key);

        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            self.key_count.fetch_add(1, Ordering::Relaxed);
            Entry::new(Value::SortedSet(SortedSet::default()))
        });
        match &mut entry.value {
            Value::SortedSet(set) => Ok(set.insert_new(member, score)),
            Value::List(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
        }
    }

    pub fn zcard_sync(&self, key: &str) -> StoreResult<usize> {
        match self.read_live(key, |entry| match &entry.value {
            Value::SortedSet(set) => Ok(set.len()),
            Value::List(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
        }) {
            Some(result) => result,
            None => Ok(0),
        }
    }

    pub fn zrange_sync(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        match self.read_live(key, |entry| match &entry.value {
            Value::SortedSet(set) => Ok(set.range(start, stop)),
            Value::List(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
        }) {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    pub fn zrem_sync(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        self.with_live_entry(
            key,
            |entry| match &mut entry.value {
                Value::SortedSet(set) => Ok(members.iter().filter(|m| set.remove(m)).count()),
                Value::List(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
            },
            0,
        )
    }

    pub fn zpopmin_sync(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        if !self.version().supports_atomic_pop() {
            return Err(StoreError::Server(
                "ERR unknown command 'ZPOPMIN'".to_string(),
            ));
        }
        self.with_live_entry(
            key,
            |entry| match &mut entry.value {
                Value::SortedSet(set) => Ok(set.pop_min(count)),
                Value::List(_) => Err(StoreError::Server(WRONGTYPE.to_string())),
            },
            Vec::new(),
        )
    }

    /// Live keys owned by node `node_index` that match `pattern`.
    ///
    /// **Warning**: scans every key of the node.
    pub fn keys_on(&self, node_index: usize, pattern: &str) -> Vec<String> {
        let node_count = self.nodes.len();
        let mut result = Vec::new();

        for (index, shard) in self.shards.iter().enumerate() {
            if index % node_count != node_index {
                continue;
            }
            let entries = shard.entries.read();
            result.extend(
                entries
                    .iter()
                    .filter(|(key, entry)| !entry.is_expired() && glob_match(pattern, key))
                    .map(|(key, _)| key.clone()),
            );
        }
        result
    }

    /// Approximate number of live keys.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            keys: self.key_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            expires_set: self.expire_count.load(Ordering::Relaxed),
        }
    }

    /// Removes every key.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.entries.write().clear();
        }
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Removes expired keys from all shards, returning how many went.
    ///
    /// Called by the background expiry sweeper.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut entries = shard.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired());
            cleaned += (before - entries.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }
        cleaned
    }
}

fn node_list(count: usize, version: EngineVersion) -> Vec<NodeInfo> {
    (0..count)
        .map(|i| NodeInfo {
            address: format!("memory-{}", i),
            version,
        })
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn nodes(&self) -> StoreResult<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }

    async fn keys(&self, node: &NodeInfo, database: i64, pattern: &str) -> StoreResult<Vec<String>> {
        if database != self.database {
            return Ok(Vec::new());
        }
        match self.nodes.iter().position(|n| n.address == node.address) {
            Some(index) => Ok(self.keys_on(index, pattern)),
            None => Err(StoreError::Server(format!("ERR unknown node {}", node.address))),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.exists_sync(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(self.expire_sync(key, ttl))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        Ok(self.ttl_sync(key))
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.lpush_sync(key, value)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.rpop_sync(key)
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        self.llen_sync(key)
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.zadd_nx_sync(key, member, score)
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        self.zcard_sync(key)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.zrange_sync(key, start, stop)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        self.zrem_sync(key, members)
    }

    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.zpopmin_sync(key, count)
    }
}

/// Glob matching with the same syntax as the store's `KEYS` command.
///
/// - `*` matches any run of characters, `?` exactly one
/// - `[abc]`, `[a-z]` and `[^a]` match character classes
/// - `\x` matches `x` literally
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    let Some((&head, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match head {
        '*' => (0..=text.len()).any(|skip| match_from(rest, &text[skip..])),
        '?' => !text.is_empty() && match_from(rest, &text[1..]),
        '[' => match (text.first(), class_match(rest)) {
            (Some(&c), Some((matches, after))) => matches(c) && match_from(after, &text[1..]),
            _ => false,
        },
        '\\' => match (rest.split_first(), text.first()) {
            (Some((&escaped, after)), Some(&c)) => escaped == c && match_from(after, &text[1..]),
            _ => false,
        },
        literal => text.first() == Some(&literal) && match_from(rest, &text[1..]),
    }
}

/// Parses a character class body (after `[`).
///
/// Returns a predicate for the class and the pattern remaining after `]`,
/// or `None` if the class is unterminated.
fn class_match(body: &[char]) -> Option<(impl Fn(char) -> bool + '_, &[char])> {
    let (negate, body) = match body.first() {
        Some('^') => (true, &body[1..]),
        _ => (false, body),
    };
    let close = body.iter().position(|&c| c == ']')?;
    let class = &body[..close];

    let predicate = move |c: char| {
        let mut i = 0;
        let mut hit = false;
        while i < class.len() {
            if i + 2 < class.len() && class[i + 1] == '-' {
                hit |= class[i] <= c && c <= class[i + 2];
                i += 3;
            } else {
                hit |= class[i] == c;
                i += 1;
            }
        }
        hit != negate
    };
    Some((predicate, &body[close + 1..]))
}
