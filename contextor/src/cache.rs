//! In-memory response cache with TTL, LRU capacity and single-flight.
//!
//! Per-key state is one of:
//! - absent (`Empty`)
//! - `Pending`: a computation is running; callers join it through a weak
//!   handle to a [`Shared`] future
//! - `Ready`: a stored value, served until `expires_at`
//! - expired: a `Ready` slot past its deadline, treated as absent on read
//!   and purged by [`ResponseCache::sweep`]
//!
//! The map holds only a [`WeakShared`] for running computations, so when
//! every waiter goes away the computation is dropped (cancelling whatever
//! it was awaiting) and the slot becomes stale. Failures are never stored.
//!
//! The lock is a plain `std::sync::Mutex` and is never held across `.await`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ai_llm_service::GenerationParams;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use rag_store::{FilterValue, MetadataFilters};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::api_types::RetrievalOverrides;
use crate::cfg::MAX_CACHE_TTL;
use crate::clock::Clock;

/// How a response was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from a stored entry.
    Hit,
    /// This caller started the computation.
    Miss,
    /// This caller waited on a computation started by another.
    Joined,
}

/// A stored value. Read-only once inserted.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    tick: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
}

type Computation<V, E> = BoxFuture<'static, Result<V, E>>;

enum Slot<V, E, P> {
    Pending {
        id: u64,
        fut: WeakShared<Computation<V, E>>,
        progress: P,
    },
    Ready(CacheEntry<V>),
}

struct Inner<V, E, P> {
    slots: HashMap<String, Slot<V, E, P>>,
    /// Recency order of `Ready` slots: oldest tick first.
    lru: BTreeMap<u64, String>,
    next_tick: u64,
    next_id: u64,
}

impl<V, E, P> Inner<V, E, P> {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) {
        if let Some(Slot::Ready(e)) = self.slots.remove(key) {
            self.lru.remove(&e.tick);
        }
    }

    fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(Slot::Ready(e)) = self.slots.get_mut(key) {
            self.lru.remove(&e.tick);
            e.tick = tick;
            self.lru.insert(tick, key.to_string());
        }
    }
}

/// Outcome of [`ResponseCache::begin`]: a stored value, or a computation to
/// await through [`ResponseCache::finish`].
pub enum Flight<V, E, P> {
    Hit(V),
    Wait {
        fut: Shared<Computation<V, E>>,
        id: u64,
        status: CacheStatus,
        /// Progress handle of the caller that started the computation.
        progress: P,
    },
}

impl<V, E, P> Flight<V, E, P> {
    pub fn progress(&self) -> Option<&P> {
        match self {
            Flight::Hit(_) => None,
            Flight::Wait { progress, .. } => Some(progress),
        }
    }
}

/// `P` is an opaque progress handle stored with a running computation and
/// handed to every caller that joins it.
pub struct ResponseCache<V, E, P = ()> {
    inner: Mutex<Inner<V, E, P>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<V, E, P> ResponseCache<V, E, P>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// `ttl` is capped at [`MAX_CACHE_TTL`].
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let ttl = ttl.min(MAX_CACHE_TTL);
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                lru: BTreeMap::new(),
                next_tick: 0,
                next_id: 0,
            }),
            ttl,
            capacity,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V, E, P>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns the stored value for `key`, joins a running computation for
    /// it, or starts `compute`.
    ///
    /// `compute` is called under the cache lock and must only build the
    /// future; the work happens when it is awaited.
    ///
    /// # Errors
    /// The computation's error, shared by every caller that joined it.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<(V, CacheStatus), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        P: Default,
    {
        let flight = self.begin(key, P::default(), compute);
        self.finish(key, flight).await
    }

    /// Awaits a [`Flight`] from [`begin`](Self::begin) and settles the slot.
    ///
    /// # Errors
    /// The computation's error, shared by every caller that joined it.
    pub async fn finish(&self, key: &str, flight: Flight<V, E, P>) -> Result<(V, CacheStatus), E> {
        let (fut, id, status) = match flight {
            Flight::Hit(v) => return Ok((v, CacheStatus::Hit)),
            Flight::Wait { fut, id, status, .. } => (fut, id, status),
        };

        trace!(key, ?status, "awaiting computation");
        let out = fut.await;
        self.settle(key, id, &out);
        out.map(|v| (v, status))
    }

    /// Synchronous half of [`get_or_compute`](Self::get_or_compute).
    /// `progress` is stored only when this call starts the computation.
    pub fn begin<F, Fut>(&self, key: &str, progress: P, compute: F) -> Flight<V, E, P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut inner = self.lock();
        let now = self.clock.now();

        let found = match inner.slots.get(key) {
            Some(Slot::Ready(e)) if now < e.expires_at => Some(Flight::Hit(e.value.clone())),
            Some(Slot::Pending { id, fut, progress }) => fut.upgrade().map(|fut| Flight::Wait {
                fut,
                id: *id,
                status: CacheStatus::Joined,
                progress: progress.clone(),
            }),
            _ => None,
        };

        match found {
            Some(hit @ Flight::Hit(_)) => {
                inner.touch(key);
                return hit;
            }
            Some(wait) => return wait,
            // Empty, expired or abandoned.
            None => inner.remove(key),
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let fut = compute().boxed().shared();
        if let Some(weak) = fut.downgrade() {
            inner.slots.insert(
                key.to_string(),
                Slot::Pending {
                    id,
                    fut: weak,
                    progress: progress.clone(),
                },
            );
        }
        Flight::Wait {
            fut,
            id,
            status: CacheStatus::Miss,
            progress,
        }
    }

    /// First finisher stores a success or clears the marker on failure.
    fn settle(&self, key: &str, id: u64, out: &Result<V, E>) {
        let mut inner = self.lock();
        let ours = matches!(inner.slots.get(key), Some(Slot::Pending { id: p, .. }) if *p == id);
        if !ours {
            return;
        }

        match out {
            Ok(v) => {
                let now = self.clock.now();
                let expires_at = now
                    .checked_add(self.ttl)
                    .unwrap_or_else(|| now + MAX_CACHE_TTL);
                let tick = inner.bump();
                inner.lru.insert(tick, key.to_string());
                inner.slots.insert(
                    key.to_string(),
                    Slot::Ready(CacheEntry {
                        key: key.to_string(),
                        value: v.clone(),
                        created_at: now,
                        expires_at,
                        tick,
                    }),
                );
                while inner.lru.len() > self.capacity {
                    let Some((_, oldest)) = inner.lru.pop_first() else {
                        break;
                    };
                    inner.slots.remove(&oldest);
                    debug!(key = %oldest, "cache entry evicted");
                }
            }
            Err(_) => {
                inner.slots.remove(key);
                debug!(key, "computation failed; not cached");
            }
        }
    }

    /// Drops expired entries and abandoned computations. Returns how many.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let now = self.clock.now();
        let dead: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| match slot {
                Slot::Ready(e) => e.expires_at <= now,
                Slot::Pending { fut, .. } => fut.upgrade().is_none(),
            })
            .map(|(k, _)| k.clone())
            .collect();
        for k in &dead {
            inner.remove(k);
        }
        dead.len()
    }

    /// Removes every stored value. Running computations are left alone.
    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        inner.slots.retain(|_, slot| matches!(slot, Slot::Pending { .. }));
        inner.lru.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let in_flight = inner
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Pending { fut, .. } if fut.upgrade().is_some()))
            .count();
        CacheStats {
            entries: inner.lru.len(),
            in_flight,
        }
    }

    /// Periodic [`sweep`](Self::sweep) until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = cache.sweep();
                        if purged > 0 {
                            debug!(purged, "cache sweep");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("cache sweeper stopped");
        })
    }
}

/// Stable key over everything that changes the answer.
///
/// Text is trimmed, whitespace-collapsed and lowercased; filters are hashed
/// in key order.
pub fn query_key(
    text: &str,
    top_k: usize,
    filters: &MetadataFilters,
    model: &str,
    params: &GenerationParams,
    retrieval: &RetrievalOverrides,
) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut h = blake3::Hasher::new();
    let mut part = |s: &str| {
        h.update(s.as_bytes());
        h.update(&[0x1f]);
    };

    part(&normalized);
    part(&top_k.to_string());
    for (k, v) in filters.iter() {
        part(k);
        match v {
            FilterValue::One(s) => part(s),
            FilterValue::Many(list) => {
                let mut sorted: Vec<&String> = list.iter().collect();
                sorted.sort();
                for s in sorted {
                    part(s);
                }
            }
        }
    }
    part("#");
    part(model);
    part(&format!("{params:?}"));
    part(&format!("{retrieval:?}"));

    h.finalize().to_hex().to_string()
}
