//! Collapsing of identical concurrent requests.
//!
//! # Overview
//!
//! [`DedupStage`] keys every body-less request on method, URL and headers. The
//! first caller for a key becomes the leader and performs the request; callers
//! that arrive while the entry is fresh subscribe to a `watch` channel and
//! receive a clone of the leader's outcome, error included. A resolved entry
//! stays in the table for a short cleanup delay so trailing duplicates still
//! coalesce, then it is evicted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use super::constants::{DEFAULT_DEDUP_CLEANUP, DEFAULT_DEDUP_TTL};
use super::{FetchError, FetchRequest, FetchResponse, Transport};

type Outcome = Result<FetchResponse, FetchError>;

/// One shared request.
#[derive(Debug)]
struct InFlight {
    created_at: Instant,
    result: watch::Sender<Option<Outcome>>,
}

impl InFlight {
    fn new() -> Self {
        let (result, _) = watch::channel(None);
        Self {
            created_at: Instant::now(),
            result,
        }
    }
}

type InFlightTable = Arc<DashMap<String, Arc<InFlight>>>;

/// Chain stage that shares one downstream call between identical callers.
#[derive(Debug)]
pub struct DedupStage {
    inner: Arc<dyn Transport>,
    in_flight: InFlightTable,
    ttl: Duration,
    cleanup_delay: Duration,
}

enum Role {
    Leader(Arc<InFlight>),
    Waiter(Arc<InFlight>),
}

impl DedupStage {
    /// Creates the stage with the default TTL (5s) and cleanup delay (1s).
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self::with_timing(inner, DEFAULT_DEDUP_TTL, DEFAULT_DEDUP_CLEANUP)
    }

    #[must_use]
    pub fn with_timing(inner: Arc<dyn Transport>, ttl: Duration, cleanup_delay: Duration) -> Self {
        Self {
            inner,
            in_flight: Arc::new(DashMap::new()),
            ttl,
            cleanup_delay,
        }
    }

    /// Number of entries currently in the table, pending or awaiting eviction.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn join_or_lead(&self, key: &str) -> Role {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().created_at.elapsed() < self.ttl {
                    Role::Waiter(Arc::clone(occupied.get()))
                } else {
                    trace!(key, "in-flight entry expired, replacing");
                    let fresh = Arc::new(InFlight::new());
                    occupied.insert(Arc::clone(&fresh));
                    Role::Leader(fresh)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(InFlight::new());
                vacant.insert(Arc::clone(&fresh));
                Role::Leader(fresh)
            }
        }
    }

    async fn lead(&self, key: String, entry: Arc<InFlight>, request: FetchRequest) -> Outcome {
        let guard = LeaderGuard {
            table: Arc::clone(&self.in_flight),
            key,
            entry: Arc::clone(&entry),
            url: request.url().to_string(),
            armed: true,
        };
        let outcome = self.inner.execute(request).await;
        entry.result.send_replace(Some(outcome.clone()));
        guard.disarm_and_schedule_eviction(self.cleanup_delay);
        outcome
    }

    async fn wait(entry: Arc<InFlight>, request: &FetchRequest) -> Outcome {
        let mut receiver = entry.result.subscribe();
        let waited = match request.cancellation() {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => {
                        return Err(FetchError::cancelled(request.url().as_str()));
                    }
                    result = receiver.wait_for(Option::is_some) => result.map(|r| (*r).clone()),
                }
            }
            None => receiver.wait_for(Option::is_some).await.map(|r| (*r).clone()),
        };
        match waited {
            Ok(Some(outcome)) => outcome,
            _ => Err(FetchError::transport_message(
                request.url().as_str(),
                "shared request was abandoned",
            )),
        }
    }
}

#[async_trait]
impl Transport for DedupStage {
    #[instrument(skip(self, request), fields(url = %request.url()))]
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        if request.body().is_some() {
            return self.inner.execute(request).await;
        }

        let key = dedup_key(&request);
        match self.join_or_lead(&key) {
            Role::Leader(entry) => self.lead(key, entry, request).await,
            Role::Waiter(entry) => {
                debug!("joining identical in-flight request");
                Self::wait(entry, &request).await
            }
        }
    }
}

/// Resolves waiters and clears the entry if the leader's future is dropped early.
struct LeaderGuard {
    table: InFlightTable,
    key: String,
    entry: Arc<InFlight>,
    url: String,
    armed: bool,
}

impl LeaderGuard {
    fn disarm_and_schedule_eviction(mut self, delay: Duration) {
        self.armed = false;
        let table = Arc::clone(&self.table);
        let key = std::mem::take(&mut self.key);
        let entry = Arc::clone(&self.entry);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            table.remove_if(&key, |_, current| Arc::ptr_eq(current, &entry));
        });
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.entry.result.send_replace(Some(Err(FetchError::transport_message(
            &self.url,
            "shared request was abandoned",
        ))));
        let entry = &self.entry;
        self.table
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, entry));
    }
}

/// Key over method, URL and headers sorted by name.
fn dedup_key(request: &FetchRequest) -> String {
    let mut headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    headers.sort();
    let signature: Vec<String> = headers
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!(
        "{}:{}:{}",
        request.method(),
        request.url(),
        signature.join("&")
    )
}
