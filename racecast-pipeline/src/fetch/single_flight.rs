//! Deduplication of concurrent identical requests
//!
//! The first caller for a key becomes the leader and installs a shared future;
//! callers arriving while it is pending await the same future. Each flight owns
//! its cancellation token, so no single caller's token decides the outcome for
//! the others. A waiter that is dropped before the value arrives leaves the
//! flight; when the last waiter leaves, the flight is cancelled and its entry
//! removed. The map lock is a plain mutex held only to look up, install or
//! remove entries, never across an await.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

type Pending<V> = Shared<BoxFuture<'static, V>>;

struct Flight<V>
where
    V: Clone,
{
    id: u64,
    pending: Pending<V>,
    cancel: CancellationToken,
    waiters: usize,
}

struct Flights<K, V>
where
    V: Clone,
{
    next_id: u64,
    entries: HashMap<K, Flight<V>>,
}

/// Map from key to the in-flight shared computation
pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Mutex<Flights<K, V>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(Flights {
                next_id: 0,
                entries: HashMap::new(),
            }),
        }
    }

    fn map(&self) -> MutexGuard<'_, Flights<K, V>> {
        // Entries are only inserted/removed whole, so a poisoned map is still consistent
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join the pending computation for `key`, or start one with `start`
    ///
    /// `start` receives the flight's token, which fires only once every waiter
    /// has gone. Returns the value and whether this caller led the computation.
    pub async fn run<F>(&self, key: K, start: F) -> (V, bool)
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, V>,
    {
        let (pending, id, leader) = {
            let mut map = self.map();
            match map.entries.get_mut(&key) {
                Some(flight) => {
                    flight.waiters += 1;
                    (flight.pending.clone(), flight.id, false)
                }
                None => {
                    let cancel = CancellationToken::new();
                    let pending = start(cancel.clone()).shared();
                    let id = map.next_id;
                    map.next_id += 1;
                    map.entries.insert(
                        key.clone(),
                        Flight {
                            id,
                            pending: pending.clone(),
                            cancel,
                            waiters: 1,
                        },
                    );
                    (pending, id, true)
                }
            }
        };

        let waiter = Waiter {
            flights: self,
            key: Some(key),
            id,
        };
        let value = pending.await;
        waiter.finish();

        (value, leader)
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.map().entries.len()
    }
}

/// Membership of one caller in a flight
struct Waiter<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    flights: &'a SingleFlight<K, V>,
    /// None once the value has been received
    key: Option<K>,
    id: u64,
}

impl<K, V> Waiter<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// The flight completed: clear its entry unless a newer flight replaced it
    fn finish(mut self) {
        if let Some(key) = self.key.take() {
            let mut map = self.flights.map();
            if map.entries.get(&key).is_some_and(|f| f.id == self.id) {
                map.entries.remove(&key);
            }
        }
    }
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut map = self.flights.map();
        let abandoned = match map.entries.get_mut(&key) {
            Some(flight) if flight.id == self.id => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            if let Some(flight) = map.entries.remove(&key) {
                flight.cancel.cancel();
            }
        }
    }
}
