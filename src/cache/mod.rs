//! Bounded, deduplicating cache for async producers
//!
//! `AsyncCache` memoizes the result of an expensive async operation keyed by
//! an arbitrary hashable key. Two concurrent requests for the same key share
//! a single producer invocation rather than running it twice, and a
//! producer's own cancellation token is wired up in a parent/child tree: if
//! every waiter for a given key withdraws (cancels) before the producer
//! finishes, the producer is told to stop cooperatively.

use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

/// One entry of the cache: either a settled value, or a producer that is
/// still running and the bookkeeping needed to cancel it cooperatively.
enum Slot<V> {
    Ready(V),
    Pending {
        future: SharedResult<V>,
        cancellation: CancellationToken,
        waiters: Arc<AtomicUsize>,
    },
}

impl<V: Clone> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Ready(v) => Slot::Ready(v.clone()),
            Slot::Pending {
                future,
                cancellation,
                waiters,
            } => Slot::Pending {
                future: future.clone(),
                cancellation: cancellation.clone(),
                waiters: waiters.clone(),
            },
        }
    }
}

/// A bounded, insertion-ordered async cache with in-flight request
/// deduplication.
pub struct AsyncCache<K, V> {
    entries: Mutex<LruCache<K, Slot<V>>>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries, evicting least
    /// recently used entries once full.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries currently cached, including in-flight producers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry. In-flight producers are left to run to
    /// completion; they simply will not be memoized once done.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Fetch a value for `key`, running `produce` if it isn't already cached
    /// or in flight. `produce` receives a `CancellationToken` that is a
    /// child of `cancellation`, and that is also cancelled if this is the
    /// last waiter and it withdraws.
    ///
    /// If `cancellation` fires before the result is available, this
    /// returns `Err(Error::Cancelled)` without affecting other waiters —
    /// unless it was the only waiter, in which case the producer itself is
    /// cancelled too.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: K,
        cancellation: CancellationToken,
        produce: F,
    ) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        // The check (is there already a Ready or Pending entry?) and the
        // insert (if not, register this producer) must happen under the
        // same lock acquisition. Releasing the lock between them would let
        // two threads both observe a miss and both start a producer, which
        // defeats the single-producer-per-key guarantee this cache exists
        // to provide.
        let (future, producer_cancellation, waiters) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(Slot::Ready(v)) => {
                    trace!("cache hit");
                    return Ok(v.clone());
                }
                Some(Slot::Pending {
                    future,
                    cancellation,
                    waiters,
                }) => {
                    trace!("cache join: joining in-flight producer");
                    waiters.fetch_add(1, Ordering::SeqCst);
                    (future.clone(), cancellation.clone(), waiters.clone())
                }
                None => {
                    let producer_cancellation = cancellation.child_token();
                    let waiters = Arc::new(AtomicUsize::new(1));
                    let fut: BoxFuture<'static, Result<V>> =
                        produce(producer_cancellation.clone()).boxed();
                    let shared = fut.shared();

                    entries.put(
                        key.clone(),
                        Slot::Pending {
                            future: shared.clone(),
                            cancellation: producer_cancellation.clone(),
                            waiters: waiters.clone(),
                        },
                    );
                    trace!("cache miss: producer started");
                    (shared, producer_cancellation, waiters)
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                let remaining = waiters.fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining == 0 {
                    debug!("last waiter withdrew, cancelling producer");
                    producer_cancellation.cancel();
                    self.entries.lock().pop(&key);
                }
                return Err(Error::Cancelled);
            }
            result = future => result,
        };
        waiters.fetch_sub(1, Ordering::SeqCst);

        let mut entries = self.entries.lock();
        match &outcome {
            Ok(v) => {
                entries.put(key, Slot::Ready(v.clone()));
            }
            Err(e) if e.is_cancelled() => {
                entries.pop(&key);
            }
            Err(_) => {
                // Don't memoize real failures; the next caller gets a fresh attempt.
                entries.pop(&key);
            }
        }
        outcome
    }
}
