// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cached, retrying, coalescing access to a weather provider.
//!
//! The store keeps one [`CacheEntry`] for the region being viewed:
//!
//! - fresh entries are served without touching the network
//! - stale entries are served immediately while a background refresh runs
//! - failed refreshes keep the last good entry and schedule a retry after a
//!   cooldown
//! - concurrent requests for the same region share one in-flight fetch
//!
//! Only a cold start with no entry at all surfaces an error to the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::WeatherError;
use crate::geo::BoundingBox;
use crate::provider::WeatherProvider;
use crate::sample::{PrecipitationSample, SampleSet, WindSample};

/// Caching and retry policy.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long an entry counts as fresh.
    pub ttl: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_factor: u32,
    pub backoff_cap: Duration,
    /// Wait after exhausting retries before trying again.
    pub failure_cooldown: Duration,
    /// Edge drift (fraction of the cached span) beyond which the cached
    /// entry no longer describes the requested region.
    pub drift_threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2,
            backoff_cap: Duration::from_secs(16),
            failure_cooldown: Duration::from_secs(60),
            drift_threshold: 0.5,
        }
    }
}

impl StoreConfig {
    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(retry);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

/// Samples fetched for one region.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub wind: Vec<WindSample>,
    pub precipitation: Vec<PrecipitationSample>,
    pub bounding_box: BoundingBox,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the TTL.
    Fresh,
    /// Older than the TTL, or the latest refresh failed.
    Stale,
}

/// Result handed to callers of [`WeatherSampleStore::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub entry: Arc<CacheEntry>,
    pub freshness: Freshness,
}

type SharedResult = Result<FetchOutcome, WeatherError>;

struct InFlight {
    id: u64,
    bbox: BoundingBox,
    rx: watch::Receiver<Option<SharedResult>>,
}

#[derive(Default)]
struct StoreState {
    entry: Option<Arc<CacheEntry>>,
    in_flight: Vec<InFlight>,
    next_request_id: u64,
    /// Bumped whenever the entry is invalidated so late results are dropped.
    epoch: u64,
    retry_after: Option<Instant>,
    last_success: Option<Instant>,
    last_error: Option<WeatherError>,
}

struct Inner<P> {
    provider: P,
    config: StoreConfig,
    state: Mutex<StoreState>,
    cancel_token: CancellationToken,
}

/// Handle to a shared weather cache. Cloning is cheap and clones share state.
pub struct WeatherSampleStore<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for WeatherSampleStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> std::fmt::Debug for WeatherSampleStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherSampleStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum Plan {
    Ready(FetchOutcome),
    Wait(watch::Receiver<Option<SharedResult>>),
    Fail(WeatherError),
}

impl<P: WeatherProvider> WeatherSampleStore<P> {
    #[must_use]
    pub fn new(provider: P, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                config,
                state: Mutex::new(StoreState::default()),
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Fetch samples for a region, honoring cache, retry and coalescing
    /// policy. Must be called from within a tokio runtime.
    pub async fn fetch(&self, bbox: BoundingBox) -> Result<FetchOutcome, WeatherError> {
        bbox.validate()?;

        let plan = {
            let mut state = self.inner.lock_state();
            self.inner.plan(&mut state, bbox)
        };

        match plan {
            Plan::Ready(outcome) => Ok(outcome),
            Plan::Fail(e) => Err(e),
            Plan::Wait(rx) => wait_for_result(rx).await,
        }
    }

    /// The cached entry if it is fresh and still describes `bbox`.
    #[must_use]
    pub fn cached(&self, bbox: &BoundingBox) -> Option<Arc<CacheEntry>> {
        let state = self.inner.lock_state();
        state
            .entry
            .as_ref()
            .filter(|entry| {
                entry.bounding_box.drift_from(bbox) <= self.inner.config.drift_threshold
                    && entry.is_fresh(self.inner.config.ttl)
            })
            .cloned()
    }

    /// The current entry regardless of age or region.
    #[must_use]
    pub fn current_entry(&self) -> Option<Arc<CacheEntry>> {
        self.inner.lock_state().entry.clone()
    }

    #[must_use]
    pub fn last_successful_fetch(&self) -> Option<Instant> {
        self.inner.lock_state().last_success
    }

    /// Most recent exhausted-retries failure, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<WeatherError> {
        self.inner.lock_state().last_error.clone()
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        !self.inner.lock_state().in_flight.is_empty()
    }

    /// Drop the cached entry. In-flight results that land afterwards are
    /// returned to their waiters but not cached.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        info!("Resetting weather cache");
        state.entry = None;
        state.epoch += 1;
        state.retry_after = None;
        state.last_error = None;
    }

    /// Cancel all background fetches and scheduled retries.
    pub fn shutdown(&self) {
        self.inner.cancel_token.cancel();
    }
}

impl<P: WeatherProvider> Inner<P> {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(self: &Arc<Self>, state: &mut StoreState, bbox: BoundingBox) -> Plan {
        let now = Instant::now();
        let cooling_down = state.retry_after.is_some_and(|t| now < t);

        if let Some(entry) = state.entry.clone() {
            let drift = entry.bounding_box.drift_from(&bbox);
            if drift > self.config.drift_threshold {
                info!(
                    "Viewport drifted {:.0}% from cached region, discarding weather cache",
                    drift * 100.0
                );
                state.entry = None;
                state.epoch += 1;
                state.retry_after = None;
            } else if entry.is_fresh(self.config.ttl) {
                return Plan::Ready(FetchOutcome {
                    entry,
                    freshness: Freshness::Fresh,
                });
            } else {
                if state.in_flight.is_empty() && !cooling_down {
                    debug!("Weather cache stale, refreshing in background");
                    self.start_fetch(state, bbox);
                }
                return Plan::Ready(FetchOutcome {
                    entry,
                    freshness: Freshness::Stale,
                });
            }
        }

        if let Some(existing) = state
            .in_flight
            .iter()
            .find(|f| f.bbox.drift_from(&bbox) <= self.config.drift_threshold)
        {
            debug!("Joining in-flight weather fetch #{}", existing.id);
            return Plan::Wait(existing.rx.clone());
        }

        if state.retry_after.is_some_and(|t| now < t) {
            if let Some(e) = state.last_error.clone() {
                return Plan::Fail(e);
            }
        }

        Plan::Wait(self.start_fetch(state, bbox))
    }

    fn start_fetch(
        self: &Arc<Self>,
        state: &mut StoreState,
        bbox: BoundingBox,
    ) -> watch::Receiver<Option<SharedResult>> {
        let (tx, rx) = watch::channel(None);
        let id = state.next_request_id;
        state.next_request_id += 1;
        state.in_flight.push(InFlight {
            id,
            bbox,
            rx: rx.clone(),
        });

        let epoch = state.epoch;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = tokio::select! {
                result = inner.fetch_with_retry(&bbox) => result,
                () = inner.cancel_token.cancelled() => {
                    debug!("Weather fetch #{} cancelled", id);
                    return;
                }
            };
            let shared = inner.complete(id, epoch, bbox, result);
            let _ = tx.send(Some(shared));
        });

        rx
    }

    async fn fetch_with_retry(&self, bbox: &BoundingBox) -> Result<SampleSet, WeatherError> {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.provider.fetch_samples(bbox).await {
                Ok(samples) => return Ok(samples),
                Err(e) if attempt >= attempts => {
                    error!("Weather fetch failed after {} attempts: {}", attempt, e);
                    return Err(WeatherError::Fetch {
                        attempts: attempt,
                        source: Arc::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.config.backoff_delay(attempt - 1);
                    warn!(
                        "Weather fetch attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn complete(
        self: &Arc<Self>,
        id: u64,
        epoch: u64,
        bbox: BoundingBox,
        result: Result<SampleSet, WeatherError>,
    ) -> SharedResult {
        let mut state = self.lock_state();
        state.in_flight.retain(|f| f.id != id);
        let current_epoch = state.epoch == epoch;

        match result {
            Ok(samples) => {
                if let Err(e) = samples.ensure_non_empty() {
                    warn!("{} for {:?}, overlay will show no weather", e, bbox);
                }
                let now = Instant::now();
                let entry = Arc::new(CacheEntry {
                    wind: samples.wind,
                    precipitation: samples.precipitation,
                    bounding_box: bbox,
                    fetched_at: now,
                    fetched_at_utc: Utc::now(),
                });

                if current_epoch {
                    info!(
                        "Cached {} wind and {} precipitation samples",
                        entry.wind.len(),
                        entry.precipitation.len()
                    );
                    state.entry = Some(Arc::clone(&entry));
                    state.last_success = Some(now);
                    state.retry_after = None;
                    state.last_error = None;
                } else {
                    debug!("Discarding weather result #{} for invalidated cache", id);
                }

                Ok(FetchOutcome {
                    entry,
                    freshness: Freshness::Fresh,
                })
            }
            Err(e) => {
                if current_epoch {
                    state.last_error = Some(e.clone());
                    state.retry_after = Some(Instant::now() + self.config.failure_cooldown);
                    self.schedule_retry(bbox, epoch);
                }

                match &state.entry {
                    Some(entry) => {
                        warn!("Serving stale weather data after failed refresh");
                        Ok(FetchOutcome {
                            entry: Arc::clone(entry),
                            freshness: Freshness::Stale,
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, bbox: BoundingBox, epoch: u64) {
        let inner = Arc::clone(self);
        let cooldown = self.config.failure_cooldown;
        info!("Retrying weather fetch in {:?}", cooldown);

        tokio::spawn(async move {
            tokio::select! {
                () = sleep(cooldown) => {}
                () = inner.cancel_token.cancelled() => return,
            }

            let mut state = inner.lock_state();
            if state.epoch != epoch || !state.in_flight.is_empty() {
                return;
            }
            state.retry_after = None;
            let _ = inner.start_fetch(&mut state, bbox);
        });
    }
}

async fn wait_for_result(mut rx: watch::Receiver<Option<SharedResult>>) -> SharedResult {
    let result = match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    result.unwrap_or(Err(WeatherError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Semaphore;

    use crate::error::ProviderError;
    use crate::geo::GeoPoint;

    fn region() -> BoundingBox {
        BoundingBox::new(33.0, 35.0, 70.5, 72.5).unwrap()
    }

    fn samples() -> SampleSet {
        SampleSet {
            wind: vec![WindSample::new(GeoPoint::new(34.0, 71.5), 10.0, 90.0, Utc::now())],
            precipitation: vec![PrecipitationSample::new(GeoPoint::new(34.0, 71.5), 2.5, Utc::now())],
        }
    }

    /// Replays a fixed script of responses, then fails forever.
    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<SampleSet, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<SampleSet, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl WeatherProvider for Arc<ScriptedProvider> {
        async fn fetch_samples(&self, _bbox: &BoundingBox) -> Result<SampleSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Status(503)))
        }
    }

    /// Blocks every request until the test adds a permit.
    struct GatedProvider {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    impl WeatherProvider for Arc<GatedProvider> {
        async fn fetch_samples(&self, _bbox: &BoundingBox) -> Result<SampleSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.unwrap();
            Ok(samples())
        }
    }

    fn failures(n: usize) -> Vec<Result<SampleSet, ProviderError>> {
        (0..n).map(|_| Err(ProviderError::Status(500))).collect()
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_backoff_schedule() {
        let config = StoreConfig::default();
        let delays: Vec<u64> = (0..6).map(|r| config.backoff_delay(r).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_from_cache() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(samples())]));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let first = store.fetch(region()).await.unwrap();
        assert_eq!(first.freshness, Freshness::Fresh);

        let second = store.fetch(region()).await.unwrap();
        assert_eq!(second.freshness, Freshness::Fresh);
        assert!(Arc::ptr_eq(&first.entry, &second.entry));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(store.cached(&region()).is_some());
        assert!(store.last_successful_fetch().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_while_refreshing() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(samples()), Ok(samples())]));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let first = store.fetch(region()).await.unwrap();
        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        assert!(store.cached(&region()).is_none());

        let stale = store.fetch(region()).await.unwrap();
        assert_eq!(stale.freshness, Freshness::Stale);
        assert!(Arc::ptr_eq(&first.entry, &stale.entry));

        settle().await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let refreshed = store.fetch(region()).await.unwrap();
        assert_eq!(refreshed.freshness, Freshness::Fresh);
        assert!(!Arc::ptr_eq(&first.entry, &refreshed.entry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_succeeds() {
        let mut script = failures(2);
        script.push(Ok(samples()));
        let provider = Arc::new(ScriptedProvider::new(script));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let started = Instant::now();
        let outcome = store.fetch(region()).await.unwrap();

        assert_eq!(outcome.freshness, Freshness::Fresh);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_failure_surfaces_error() {
        let provider = Arc::new(ScriptedProvider::new(failures(4)));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let result = store.fetch(region()).await;
        assert!(matches!(result, Err(WeatherError::Fetch { attempts: 4, .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert!(store.current_entry().is_none());

        // Within the cooldown the stored error is returned without new requests
        let again = store.fetch(region()).await;
        assert!(matches!(again, Err(WeatherError::Fetch { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_serving_prior_entry() {
        let mut script = vec![Ok(samples())];
        script.extend(failures(4));
        script.push(Ok(samples()));
        let provider = Arc::new(ScriptedProvider::new(script));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let first = store.fetch(region()).await.unwrap();
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        let stale = store.fetch(region()).await.unwrap();
        assert!(Arc::ptr_eq(&first.entry, &stale.entry));

        // Let the background refresh exhaust its retries (1 + 2 + 4 seconds)
        sleep(Duration::from_secs(8)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
        assert!(matches!(store.last_error(), Some(WeatherError::Fetch { attempts: 4, .. })));

        // Cooldown active: still the old entry, no new request
        let during_cooldown = store.fetch(region()).await.unwrap();
        assert_eq!(during_cooldown.freshness, Freshness::Stale);
        assert!(Arc::ptr_eq(&first.entry, &during_cooldown.entry));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);

        // The scheduled retry fires after the cooldown and succeeds
        sleep(Duration::from_secs(61)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
        assert!(store.last_error().is_none());
        let recovered = store.fetch(region()).await.unwrap();
        assert_eq!(recovered.freshness, Freshness::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_coalesced() {
        let provider = Arc::new(GatedProvider {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(region()).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(region()).await }
        });

        settle().await;
        assert!(store.in_flight());
        provider.gate.add_permits(1);

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a.entry, &b.entry));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(!store.in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_invalidates_cache() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(samples()), Ok(samples())]));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        store.fetch(region()).await.unwrap();
        let far = BoundingBox::new(40.0, 42.0, 60.0, 62.0).unwrap();
        let moved = store.fetch(far).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(moved.entry.bounding_box, far);
        assert!(store.cached(&region()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_bbox_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(samples())]));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let bad = BoundingBox {
            min_lat: 35.0,
            max_lat: 33.0,
            min_lon: 70.0,
            max_lon: 72.0,
        };
        assert!(matches!(
            store.fetch(bad).await,
            Err(WeatherError::InvalidBoundingBox(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sample_set_is_cached() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(SampleSet::default())]));
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let outcome = store.fetch(region()).await.unwrap();
        assert!(outcome.entry.wind.is_empty());
        assert!(store.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_waiters() {
        let provider = Arc::new(GatedProvider {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let store = WeatherSampleStore::new(Arc::clone(&provider), StoreConfig::default());

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(region()).await }
        });
        settle().await;
        store.shutdown();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(WeatherError::Cancelled)));
    }
}
