//! Per-key single-flight.
//!
//! Concurrent callers asking for the same key share one execution of the
//! work. The first caller leads and publishes its result on a watch channel;
//! everyone else subscribes and waits. If a leader is dropped before it
//! publishes, its followers start over and one of them leads.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

struct Flight<T> {
    tx: watch::Sender<Option<T>>,
    followers: AtomicUsize,
}

enum Role<T> {
    Leader(Arc<Flight<T>>),
    Follower(watch::Receiver<Option<T>>),
}

/// Removes the flight from the map when the leader finishes or is dropped.
struct FlightGuard<'a, T> {
    flights: &'a Mutex<HashMap<String, Arc<Flight<T>>>>,
    key: &'a str,
    flight: &'a Arc<Flight<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if flights.get(self.key).is_some_and(|f| Arc::ptr_eq(f, self.flight)) {
            flights.remove(self.key);
        }
    }
}

/// De-duplicates concurrent work per key.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()) }
    }

    /// Run `work` for `key`, or wait for the execution already in flight.
    ///
    /// Every caller that joins an execution receives a clone of its result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            match self.join(key) {
                Role::Leader(flight) => return self.lead(key, &flight, work).await,
                Role::Follower(mut rx) => {
                    let outcome = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
                    if let Ok(Some(value)) = outcome {
                        return value;
                    }
                    tracing::debug!(key, "single-flight leader dropped without a result; retrying");
                }
            }
        }
    }

    /// Number of keys with an execution in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    fn join(&self, key: &str) -> Role<T> {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            flight.followers.fetch_add(1, Ordering::Relaxed);
            return Role::Follower(flight.tx.subscribe());
        }

        let (tx, _rx) = watch::channel(None);
        let flight = Arc::new(Flight { tx, followers: AtomicUsize::new(0) });
        flights.insert(key.to_string(), Arc::clone(&flight));
        Role::Leader(flight)
    }

    async fn lead<F, Fut>(&self, key: &str, flight: &Arc<Flight<T>>, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = FlightGuard { flights: &self.flights, key, flight };
        let value = work().await;
        flight.tx.send_replace(Some(value.clone()));
        drop(guard);

        let followers = flight.followers.load(Ordering::Relaxed);
        if followers > 0 {
            tracing::debug!(key, followers, "single-flight result shared");
        }
        value
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let group: SingleFlight<u32> = SingleFlight::new();
        let runs = AtomicU32::new(0);

        let calls = (0..10).map(|_| {
            group.run("B01", || async {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                42
            })
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| *v == 42));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let group: SingleFlight<&'static str> = SingleFlight::new();
        let runs = AtomicU32::new(0);

        let (a, b) = tokio::join!(
            group.run("a", || async {
                runs.fetch_add(1, Ordering::SeqCst);
                "a"
            }),
            group.run("b", || async {
                runs.fetch_add(1, Ordering::SeqCst);
                "b"
            }),
        );

        assert_eq!((a, b), ("a", "b"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let group: SingleFlight<u32> = SingleFlight::new();
        let runs = AtomicU32::new(0);

        for _ in 0..3 {
            group.run("k", || async { runs.fetch_add(1, Ordering::SeqCst) }).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_follower_takes_over_from_cancelled_leader() {
        let group: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());

        let leader = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                group
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };
        while group.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let group = Arc::clone(&group);
            tokio::spawn(async move { group.run("k", || async { 2 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        assert_eq!(follower.await.unwrap(), 2);
        assert_eq!(group.in_flight(), 0);
    }
}
