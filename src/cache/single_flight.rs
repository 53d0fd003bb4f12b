//! In-process single-flight for cache misses.
//!
//! Concurrent callers asking for the same key share one in-flight future. The
//! flight is keyed by cache key and type-erased so one table serves every
//! payload type.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::controller::ReadError;
use crate::source::SourceError;

type Erased = Arc<dyn Any + Send + Sync>;
type Flight = Shared<BoxFuture<'static, Result<Erased, ReadError>>>;

#[derive(Default)]
pub struct SingleFlight {
    flights: DashMap<String, Flight>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a flight for `key` is already running, in
    /// which case wait for and share its result.
    pub async fn run<T, F>(&self, key: &str, work: F) -> Result<T, ReadError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<T, ReadError>>,
    {
        let flight = match self.flights.entry(key.to_string()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let work = work();
                let erased = async move { work.await.map(|value| Arc::new(value) as Erased) }
                    .boxed()
                    .shared();
                vacant.insert(erased.clone());
                erased
            }
        };

        let result = flight.clone().await;
        self.flights
            .remove_if(key, |_, running| running.ptr_eq(&flight));

        let erased = result?;
        erased
            .downcast::<T>()
            .map(|value| (*value).clone())
            .map_err(|_| {
                ReadError::Source(SourceError::invalid(format!(
                    "single-flight payload type mismatch for `{key}`"
                )))
            })
    }

    /// Flights currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}
