//! In-process backend with Redis semantics.
//!
//! A [`MemoryStore`] holds any number of logical databases, each an independent
//! keyspace, so the registry and handle cache can be exercised without a server.
//! Type errors and integer parsing follow Redis (`WRONGTYPE`, "not an integer").

use crate::error::{KvError, KvResult};
use crate::models::DbIndex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    String(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Slot>;

/// Shared in-process store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    databases: Arc<Mutex<HashMap<DbIndex, Keyspace>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a view of one logical database.
    pub fn database(&self, index: DbIndex) -> MemoryDb {
        MemoryDb {
            store: self.clone(),
            index,
        }
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, HashMap<DbIndex, Keyspace>>> {
        self.databases
            .lock()
            .map_err(|_| KvError::internal("memory store lock poisoned"))
    }
}

/// One logical database of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryDb {
    store: MemoryStore,
    index: DbIndex,
}

impl MemoryDb {
    pub fn index(&self) -> DbIndex {
        self.index
    }

    /// Run `f` against this database's keyspace with expired keys purged.
    fn with_keyspace<T>(&self, f: impl FnOnce(&mut Keyspace) -> KvResult<T>) -> KvResult<T> {
        let mut databases = self.store.lock()?;
        let keyspace = databases.entry(self.index).or_default();
        let now = Instant::now();
        keyspace.retain(|_, slot| !slot.is_expired(now));
        f(keyspace)
    }

    pub fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.with_keyspace(|ks| match ks.get(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::String(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::command(WRONGTYPE)),
        })
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.with_keyspace(|ks| {
            ks.insert(
                key.to_string(),
                Slot {
                    value: Value::String(value.to_string()),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    pub fn del(&self, key: &str) -> KvResult<usize> {
        self.with_keyspace(|ks| Ok(usize::from(ks.remove(key).is_some())))
    }

    pub fn exists(&self, key: &str) -> KvResult<bool> {
        self.with_keyspace(|ks| Ok(ks.contains_key(key)))
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        self.with_keyspace(|ks| match ks.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    pub fn incr(&self, key: &str, delta: i64) -> KvResult<i64> {
        self.with_keyspace(|ks| {
            let slot = ks.entry(key.to_string()).or_insert_with(|| Slot {
                value: Value::String("0".to_string()),
                expires_at: None,
            });
            let Value::String(current) = &mut slot.value else {
                return Err(KvError::command(WRONGTYPE));
            };
            let next = current
                .parse::<i64>()
                .ok()
                .and_then(|n| n.checked_add(delta))
                .ok_or_else(|| {
                    KvError::command("ERR value is not an integer or out of range")
                })?;
            *current = next.to_string();
            Ok(next)
        })
    }

    fn with_list<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut VecDeque<String>) -> T,
    ) -> KvResult<Option<T>> {
        self.with_keyspace(|ks| {
            if create && !ks.contains_key(key) {
                ks.insert(
                    key.to_string(),
                    Slot {
                        value: Value::List(VecDeque::new()),
                        expires_at: None,
                    },
                );
            }
            let (result, empty) = match ks.get_mut(key) {
                None => return Ok(None),
                Some(Slot {
                    value: Value::List(list),
                    ..
                }) => {
                    let result = f(list);
                    (result, list.is_empty())
                }
                Some(_) => return Err(KvError::command(WRONGTYPE)),
            };
            // Redis drops empty lists
            if empty {
                ks.remove(key);
            }
            Ok(Some(result))
        })
    }

    pub fn lpush(&self, key: &str, value: &str) -> KvResult<usize> {
        self.with_list(key, true, |list| {
            list.push_front(value.to_string());
            list.len()
        })
        .map(|len| len.unwrap_or(0))
    }

    pub fn rpush(&self, key: &str, value: &str) -> KvResult<usize> {
        self.with_list(key, true, |list| {
            list.push_back(value.to_string());
            list.len()
        })
        .map(|len| len.unwrap_or(0))
    }

    pub fn lpop(&self, key: &str) -> KvResult<Option<String>> {
        self.with_list(key, false, |list| list.pop_front())
            .map(Option::flatten)
    }

    pub fn rpop(&self, key: &str) -> KvResult<Option<String>> {
        self.with_list(key, false, |list| list.pop_back())
            .map(Option::flatten)
    }

    pub fn llen(&self, key: &str) -> KvResult<usize> {
        self.with_list(key, false, |list| list.len())
            .map(|len| len.unwrap_or(0))
    }

    /// Inclusive range with Redis negative-index semantics.
    pub fn lrange(&self, key: &str, start: isize, stop: isize) -> KvResult<Vec<String>> {
        self.with_list(key, false, |list| {
            let len = list.len() as isize;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Vec::new();
            }
            list.iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .cloned()
                .collect()
        })
        .map(Option::unwrap_or_default)
    }

    fn with_hash<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> KvResult<Option<T>> {
        self.with_keyspace(|ks| {
            if create && !ks.contains_key(key) {
                ks.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Hash(HashMap::new()),
                        expires_at: None,
                    },
                );
            }
            let (result, empty) = match ks.get_mut(key) {
                None => return Ok(None),
                Some(Slot {
                    value: Value::Hash(hash),
                    ..
                }) => {
                    let result = f(hash);
                    (result, hash.is_empty())
                }
                Some(_) => return Err(KvError::command(WRONGTYPE)),
            };
            if empty {
                ks.remove(key);
            }
            Ok(Some(result))
        })
    }

    /// Returns true when the field is new.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        self.with_hash(key, true, |hash| {
            hash.insert(field.to_string(), value.to_string()).is_none()
        })
        .map(|created| created.unwrap_or(false))
    }

    pub fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.with_hash(key, false, |hash| hash.get(field).cloned())
            .map(Option::flatten)
    }

    pub fn hdel(&self, key: &str, field: &str) -> KvResult<usize> {
        self.with_hash(key, false, |hash| usize::from(hash.remove(field).is_some()))
            .map(|n| n.unwrap_or(0))
    }

    pub fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.with_hash(key, false, |hash| hash.clone())
            .map(Option::unwrap_or_default)
    }

    pub fn dbsize(&self) -> KvResult<u64> {
        self.with_keyspace(|ks| Ok(ks.len() as u64))
    }

    pub fn flushdb(&self) -> KvResult<()> {
        self.with_keyspace(|ks| {
            ks.clear();
            Ok(())
        })
    }
}
