//! Single-flight execution.
//!
//! [`SingleFlight`] guarantees that at most one instance of an operation is
//! in progress at a time. Callers arriving while an instance is running do
//! not start their own; they await the running one and observe the same
//! outcome, success or failure.
//!
//! ```rust
//! use core_async::SingleFlight;
//!
//! async fn example(flight: &SingleFlight<String, String>) {
//!     // Both calls share one execution of the closure's future.
//!     let (a, b) = futures::join!(
//!         flight.run(|| async { Ok::<_, String>("token".to_string()) }),
//!         flight.run(|| async { Ok::<_, String>("never built".to_string()) }),
//!     );
//!     assert_eq!(a, b);
//! }
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Slot<T, E> {
    generation: u64,
    flight: Option<(u64, Flight<T, E>)>,
}

/// Collapses concurrent invocations of an async operation into one.
///
/// The slot is cleared as soon as a waiter observes completion, so the next
/// call after an outcome (success or failure) starts a fresh attempt.
pub struct SingleFlight<T, E> {
    slot: Mutex<Slot<T, E>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                flight: None,
            }),
        }
    }

    /// Whether an operation is currently in flight.
    pub fn is_pending(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&slot.flight, Some((_, flight)) if flight.peek().is_none())
    }

    /// The in-flight operation, if any, for callers that only want to join.
    pub fn pending(&self) -> Option<impl Future<Output = Result<T, E>> + Send + 'static> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &slot.flight {
            Some((_, flight)) if flight.peek().is_none() => Some(flight.clone()),
            _ => None,
        }
    }

    /// Join the in-flight operation, or start one built by `make`.
    ///
    /// `make` is only invoked when nothing is in flight.
    pub async fn run<F, Fut>(&self, make: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (generation, flight) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match &slot.flight {
                Some((generation, flight)) if flight.peek().is_none() => {
                    (*generation, flight.clone())
                }
                _ => {
                    slot.generation = slot.generation.wrapping_add(1);
                    let generation = slot.generation;
                    let flight = make().boxed().shared();
                    slot.flight = Some((generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let outcome = flight.await;
        self.finish(generation);
        outcome
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&slot.flight, Some((current, _)) if *current == generation) {
            slot.flight = None;
        }
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SingleFlight")
            .field("generation", &slot.generation)
            .field("occupied", &slot.flight.is_some())
            .finish()
    }
}
