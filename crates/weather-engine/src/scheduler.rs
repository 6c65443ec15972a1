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

//! Animation-frame loop for the weather overlay.
//!
//! The scheduler is driven by the host: the host calls [`OverlayScheduler::on_frame`]
//! once per rendered frame and forwards visibility changes through
//! [`OverlayScheduler::handle_signal`]. Fetches run as tokio tasks on the
//! supplied runtime handle; fetched entries come back over a channel and are
//! turned into a grid at the start of a frame, after the generation check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WeatherError;
use crate::field::{GridConfig, VectorFieldGrid};
use crate::geo::{BoundingBox, ViewportProvider};
use crate::particles::{ParticleSystem, RenderableParticle};
use crate::provider::WeatherProvider;
use crate::rain::{PrecipitationRenderer, RainProfile};
use crate::store::{CacheEntry, FetchOutcome, Freshness, WeatherSampleStore};
use crate::OverlayConfig;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Background refresh period while active.
    pub refresh_interval: Duration,
    /// Upper bound on the simulated time between two frames.
    pub max_delta: Duration,
    /// Delta used for the first frame after start or resume.
    pub nominal_frame: Duration,
    pub show_wind: bool,
    pub show_rain: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            max_delta: Duration::from_millis(100),
            nominal_frame: Duration::from_secs_f64(1.0 / 60.0),
            show_wind: true,
            show_rain: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Idle,
    Active,
    Paused,
    /// Terminal.
    Disposed,
}

/// Visibility and lifetime notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    PageHidden,
    PageVisible,
    Unmounted,
}

/// Frame callback registration on the host side.
pub trait AnimationHost {
    fn request_frame(&mut self);
    fn cancel_frame(&mut self);
}

/// Turns fetched samples into a grid. Called on the frame thread.
pub trait FieldBuilder: Send + Sync {
    fn build(&self, entry: &CacheEntry) -> VectorFieldGrid;
}

/// Default builder: inverse-distance lattice over the fetched region.
#[derive(Debug, Clone, Default)]
pub struct LatticeBuilder {
    config: GridConfig,
}

impl LatticeBuilder {
    #[must_use]
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }
}

impl FieldBuilder for LatticeBuilder {
    fn build(&self, entry: &CacheEntry) -> VectorFieldGrid {
        VectorFieldGrid::build(
            &entry.wind,
            &entry.precipitation,
            entry.bounding_box,
            &self.config,
        )
    }
}

struct RefreshResult {
    generation: u64,
    seq: u64,
    outcome: Result<FetchOutcome, WeatherError>,
}

/// Explicitly owned, disposable overlay instance.
pub struct OverlayScheduler<P: WeatherProvider> {
    config: SchedulerConfig,
    state: OverlayState,
    store: WeatherSampleStore<P>,
    builder: Arc<dyn FieldBuilder>,
    runtime: Handle,
    host: Box<dyn AnimationHost>,
    viewport_provider: Option<Box<dyn ViewportProvider>>,

    particles: ParticleSystem,
    rain: PrecipitationRenderer,
    grid: Option<Arc<VectorFieldGrid>>,
    /// Store entry the current grid was built from.
    applied_entry: Option<Arc<CacheEntry>>,
    rain_inputs: Option<(Arc<VectorFieldGrid>, BoundingBox, f64)>,

    last_frame: Option<Instant>,
    resume_pending: bool,
    last_delta: f64,

    last_refresh: Option<Instant>,
    last_requested_bounds: Option<BoundingBox>,
    refresh_seq: u64,
    applied_seq: u64,
    pending_refreshes: usize,
    generation: u64,
    cancel_token: CancellationToken,
    refresh_tx: mpsc::UnboundedSender<RefreshResult>,
    refresh_rx: mpsc::UnboundedReceiver<RefreshResult>,

    freshness: Option<Freshness>,
    data_fetched_at: Option<DateTime<Utc>>,
    last_error: Option<WeatherError>,
}

impl<P: WeatherProvider> std::fmt::Debug for OverlayScheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayScheduler")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<P: WeatherProvider> OverlayScheduler<P> {
    #[must_use]
    pub fn new(
        store: WeatherSampleStore<P>,
        config: OverlayConfig,
        host: Box<dyn AnimationHost>,
        runtime: Handle,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            state: OverlayState::Idle,
            store,
            builder: Arc::new(LatticeBuilder::new(config.grid)),
            runtime,
            host,
            viewport_provider: None,
            particles: ParticleSystem::seeded(config.particles, config.seed),
            rain: PrecipitationRenderer::new(config.rain),
            config: config.scheduler,
            grid: None,
            applied_entry: None,
            rain_inputs: None,
            last_frame: None,
            resume_pending: false,
            last_delta: 0.0,
            last_refresh: None,
            last_requested_bounds: None,
            refresh_seq: 0,
            applied_seq: 0,
            pending_refreshes: 0,
            generation: 0,
            cancel_token: CancellationToken::new(),
            refresh_tx,
            refresh_rx,
            freshness: None,
            data_fetched_at: None,
            last_error: None,
        }
    }

    /// Replace the grid builder.
    #[must_use]
    pub fn with_builder(mut self, builder: Arc<dyn FieldBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// `Idle -> Active`. Kicks off the first refresh and requests a frame.
    pub fn start(&mut self, viewport_provider: Box<dyn ViewportProvider>) {
        if self.state != OverlayState::Idle {
            debug!("Ignoring start in state {:?}", self.state);
            return;
        }

        let bounds = viewport_provider.current_viewport().bounds();
        self.viewport_provider = Some(viewport_provider);
        self.state = OverlayState::Active;
        self.last_frame = None;
        info!("Weather overlay started");

        self.request_refresh(bounds, Instant::now());
        self.host.request_frame();
    }

    /// Advance one animation frame.
    pub fn on_frame(&mut self, now: Instant) {
        if self.state != OverlayState::Active {
            return;
        }
        let Some(provider) = &self.viewport_provider else {
            return;
        };
        let viewport = provider.current_viewport();
        let bounds = viewport.bounds();
        let zoom = viewport.zoom_level();

        let delta = match self.last_frame {
            Some(last) if !self.resume_pending => {
                now.saturating_duration_since(last).min(self.config.max_delta)
            }
            _ => self.config.nominal_frame.min(self.config.max_delta),
        };
        self.last_frame = Some(now);
        self.resume_pending = false;
        self.last_delta = delta.as_secs_f64();

        self.apply_refresh_results();

        if self.refresh_due(now) || self.viewport_drifted(&bounds) || self.store_has_newer_entry() {
            self.request_refresh(bounds, now);
        }

        self.particles.set_zoom(zoom);

        if let Some(grid) = self.grid.clone().filter(|g| !g.is_empty()) {
            if self.config.show_wind {
                self.particles.step(self.last_delta, &grid, bounds);
                self.particles.project(viewport.as_ref());
            }

            if self.config.show_rain {
                let changed = match &self.rain_inputs {
                    Some((last_grid, last_bounds, last_zoom)) => {
                        !Arc::ptr_eq(last_grid, &grid)
                            || *last_bounds != bounds
                            || (*last_zoom - zoom).abs() > f64::EPSILON
                    }
                    None => true,
                };
                if changed {
                    self.rain.update(&grid, &bounds, zoom);
                    self.rain_inputs = Some((grid, bounds, zoom));
                }
            }
        }

        self.host.request_frame();
    }

    pub fn handle_signal(&mut self, signal: LifecycleSignal) {
        match (self.state, signal) {
            (OverlayState::Active, LifecycleSignal::PageHidden | LifecycleSignal::Unmounted) => {
                debug!("Pausing weather overlay on {:?}", signal);
                self.state = OverlayState::Paused;
                self.host.cancel_frame();
            }
            (OverlayState::Paused, LifecycleSignal::PageVisible) => {
                debug!("Resuming weather overlay");
                self.state = OverlayState::Active;
                self.resume_pending = true;
                self.host.request_frame();
            }
            _ => {}
        }
    }

    /// Tear down from any state. Idempotent; every later call is a no-op.
    pub fn dispose(&mut self) {
        if self.state == OverlayState::Disposed {
            return;
        }
        info!("Disposing weather overlay");

        self.state = OverlayState::Disposed;
        self.cancel_token.cancel();
        self.store.shutdown();
        self.generation += 1;
        self.host.cancel_frame();
        self.refresh_rx.close();

        self.particles.release();
        self.rain.clear();
        self.grid = None;
        self.applied_entry = None;
        self.rain_inputs = None;
        self.viewport_provider = None;
        self.pending_refreshes = 0;
    }

    #[must_use]
    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Simulated seconds used by the last frame.
    #[must_use]
    pub fn last_delta_seconds(&self) -> f64 {
        self.last_delta
    }

    /// Particles to draw this frame. Empty until a non-empty grid arrives.
    #[must_use]
    pub fn renderable_positions(&self) -> &[RenderableParticle] {
        if self.config.show_wind && self.has_field() {
            self.particles.renderable_positions()
        } else {
            &[]
        }
    }

    #[must_use]
    pub fn rain_profile(&self) -> RainProfile {
        if self.config.show_rain && self.has_field() {
            self.rain.profile()
        } else {
            RainProfile::NONE
        }
    }

    #[must_use]
    pub fn grid(&self) -> Option<&Arc<VectorFieldGrid>> {
        self.grid.as_ref()
    }

    /// Freshness of the data behind the current grid.
    #[must_use]
    pub fn freshness(&self) -> Option<Freshness> {
        self.freshness
    }

    /// When the data behind the current grid was fetched.
    #[must_use]
    pub fn data_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.data_fetched_at
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&WeatherError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn refresh_in_flight(&self) -> bool {
        self.pending_refreshes > 0
    }

    #[must_use]
    pub fn store(&self) -> &WeatherSampleStore<P> {
        &self.store
    }

    fn has_field(&self) -> bool {
        self.grid.as_ref().is_some_and(|g| !g.is_empty())
    }

    fn refresh_due(&self, now: Instant) -> bool {
        self.last_refresh
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.refresh_interval)
    }

    fn viewport_drifted(&self, bounds: &BoundingBox) -> bool {
        self.last_requested_bounds
            .is_some_and(|last| last.drift_from(bounds) > self.store.config().drift_threshold)
    }

    /// The store landed data on its own (scheduled retry or background
    /// revalidation) that the current grid does not reflect yet.
    fn store_has_newer_entry(&self) -> bool {
        if self.pending_refreshes > 0 {
            return false;
        }
        let applied = self.applied_entry.as_ref().map(|entry| entry.fetched_at);
        self.store.last_successful_fetch() > applied
    }

    fn request_refresh(&mut self, bounds: BoundingBox, now: Instant) {
        self.last_refresh = Some(now);
        self.last_requested_bounds = Some(bounds);
        self.refresh_seq += 1;
        self.pending_refreshes += 1;

        let seq = self.refresh_seq;
        let generation = self.generation;
        let store = self.store.clone();
        let tx = self.refresh_tx.clone();
        let cancel_token = self.cancel_token.clone();

        debug!("Requesting weather refresh #{} for {:?}", seq, bounds);

        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                outcome = store.fetch(bounds) => outcome,
                () = cancel_token.cancelled() => return,
            };
            let _ = tx.send(RefreshResult {
                generation,
                seq,
                outcome,
            });
        });
    }

    fn apply_refresh_results(&mut self) {
        while let Ok(result) = self.refresh_rx.try_recv() {
            self.pending_refreshes = self.pending_refreshes.saturating_sub(1);

            if result.generation != self.generation || result.seq < self.applied_seq {
                debug!("Dropping superseded weather refresh #{}", result.seq);
                continue;
            }
            self.applied_seq = result.seq;

            match result.outcome {
                Ok(fetched) => {
                    let unchanged = self
                        .applied_entry
                        .as_ref()
                        .is_some_and(|applied| Arc::ptr_eq(applied, &fetched.entry));
                    if unchanged {
                        debug!("Weather entry unchanged ({:?}), keeping grid", fetched.freshness);
                    } else {
                        let grid = self.builder.build(&fetched.entry);
                        debug!(
                            "Applying {}x{} weather field ({:?})",
                            grid.rows(),
                            grid.cols(),
                            fetched.freshness
                        );
                        self.grid = Some(Arc::new(grid));
                        self.applied_entry = Some(Arc::clone(&fetched.entry));
                    }
                    self.freshness = Some(fetched.freshness);
                    self.data_fetched_at = Some(fetched.entry.fetched_at_utc);
                    self.last_error = None;
                }
                Err(e) => {
                    warn!("Weather refresh failed: {}", e);
                    self.last_error = Some(e);
                }
            }
        }
    }
}

impl<P: WeatherProvider> Drop for OverlayScheduler<P> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.store.shutdown();
    }
}
