//! Single-flight coordination of regenerations.
//!
//! At most one regeneration runs per key. Later callers attach to the running
//! one and receive the same result. The work runs on its own task, so a caller
//! that stops waiting does not cancel it for everyone else.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tracing::debug;
use uuid::Uuid;

use super::entry::{CacheEntry, Generation};
use super::error::LookupError;
use super::keys::CacheKey;
use super::metrics::METRIC_FLIGHT_JOINED_TOTAL;
use crate::render::RenderError;

pub type FlightResult = Result<CacheEntry, LookupError>;

type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

struct InFlight {
    id: Uuid,
    future: SharedFlight,
}

/// Handle to a running regeneration. Dropping it abandons only this wait.
#[must_use = "a flight runs regardless; call `wait` to receive its result"]
pub struct Flight {
    id: Uuid,
    leader: bool,
    future: SharedFlight,
}

impl Flight {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this call started the regeneration rather than joining one.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub async fn wait(self) -> FlightResult {
        self.future.await
    }
}

/// Clears the in-flight record when the regeneration task finishes or panics.
struct FlightGuard {
    key: CacheKey,
    id: Uuid,
    flights: Arc<DashMap<CacheKey, InFlight>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

/// Tracks regenerations currently running, one per key.
#[derive(Default, Clone)]
pub struct SingleFlight {
    flights: Arc<DashMap<CacheKey, InFlight>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Start `regenerate` for `key`, or attach to the regeneration already running.
    ///
    /// `regenerate` is only invoked when this call becomes the leader. Must be
    /// called from within a Tokio runtime.
    pub fn run<F, Fut>(&self, key: &CacheKey, observed: Option<Generation>, regenerate: F) -> Flight
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult> + Send + 'static,
    {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(running) => {
                let flight = running.get();
                debug!(%key, flight_id = %flight.id, "joined in-flight regeneration");
                counter!(METRIC_FLIGHT_JOINED_TOTAL).increment(1);
                Flight {
                    id: flight.id,
                    leader: false,
                    future: flight.future.clone(),
                }
            }
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                let guard = FlightGuard {
                    key: key.clone(),
                    id,
                    flights: Arc::clone(&self.flights),
                };
                let work = regenerate();
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });
                let future = async move {
                    handle.await.unwrap_or_else(|err| {
                        Err(LookupError::RenderFailed(RenderError::Aborted {
                            message: err.to_string(),
                        }))
                    })
                }
                .boxed()
                .shared();

                debug!(%key, flight_id = %id, observed_generation = ?observed, "started regeneration");
                slot.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                Flight {
                    id,
                    leader: true,
                    future,
                }
            }
        }
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.flights.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}
