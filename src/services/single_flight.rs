use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

type Flights<T> = Mutex<HashMap<String, Arc<OnceCell<T>>>>;

/// Collapses concurrent calls for the same key into one execution.
///
/// The first caller for a key runs the work; everyone arriving while it is in
/// flight awaits the same cell and receives a clone of its output. Once the
/// cell holds a value the key is released, so later calls run fresh work.
pub struct SingleFlight<T> {
    inflight: Flights<T>,
}

/// Releases a finished flight when its caller returns or is dropped mid-await.
///
/// An unfinished cell stays registered: a waiter that is still polling it
/// takes over the work.
struct FlightRelease<'a, T> {
    inflight: &'a Flights<T>,
    key: &'a str,
    cell: Arc<OnceCell<T>>,
}

impl<T> Drop for FlightRelease<'_, T> {
    fn drop(&mut self) {
        if !self.cell.initialized() {
            return;
        }
        let mut inflight = lock(self.inflight);
        if inflight
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.cell))
        {
            inflight.remove(self.key);
        }
    }
}

/// Held only for map edits, never across an await; poisoning is recovered
fn lock<T>(inflight: &Flights<T>) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<T>>>> {
    inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `work` unless an identical call is in flight, in which case its result is shared
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = lock(&self.inflight)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let release = FlightRelease {
            inflight: &self.inflight,
            key,
            cell,
        };

        let mut leader = false;
        let value = release
            .cell
            .get_or_init(|| {
                leader = true;
                work()
            })
            .await
            .clone();

        if !leader {
            tracing::debug!(key = %key, "Joined in-flight request");
        }

        value
    }

    /// Number of keys currently being worked on
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}
