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

//! Weather vector visualization engine for slippy maps.
//!
//! Turns sparse wind and precipitation observations into an animated
//! overlay synchronized with a map viewport. The library is split into
//! layers that can be used on their own or wired together by the
//! [`OverlayScheduler`]:
//!
//! - **Provider layer**: one request per call against a weather API
//!   ([`OpenMeteoProvider`], or any [`WeatherProvider`])
//! - **Store layer**: TTL cache with stale-while-revalidate, retry with
//!   backoff and request coalescing ([`WeatherSampleStore`])
//! - **Field layer**: inverse-distance lattice with bilinear sampling
//!   ([`VectorFieldGrid`])
//! - **Render layer**: wind particles ([`ParticleSystem`]) and rain profile
//!   ([`PrecipitationRenderer`]) consumed by the host's drawing surface
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Instant;
//! use weather_engine::{
//!     AnimationHost, GeoPoint, OpenMeteoConfig, OpenMeteoProvider, OverlayConfig,
//!     OverlayScheduler, ScreenPoint, ViewportProvider, ViewportTransform,
//!     WeatherSampleStore, WebMercatorViewport,
//! };
//!
//! struct Host;
//! impl AnimationHost for Host {
//!     fn request_frame(&mut self) {}
//!     fn cancel_frame(&mut self) {}
//! }
//!
//! struct FixedView(WebMercatorViewport);
//! impl ViewportProvider for FixedView {
//!     fn current_viewport(&self) -> Box<dyn ViewportTransform> {
//!         Box::new(self.0)
//!     }
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let provider = OpenMeteoProvider::new(OpenMeteoConfig::default()).unwrap();
//! let config = OverlayConfig::default();
//! let store = WeatherSampleStore::new(provider, config.store.clone());
//!
//! let mut overlay = OverlayScheduler::new(store, config, Box::new(Host), runtime.handle().clone());
//! overlay.start(Box::new(FixedView(WebMercatorViewport::new(
//!     GeoPoint::new(34.0, 71.5),
//!     8.0,
//!     ScreenPoint::new(0.0, 0.0),
//!     ScreenPoint::new(1280.0, 800.0),
//! ))));
//!
//! // Once per rendered frame
//! overlay.on_frame(Instant::now());
//! for particle in overlay.renderable_positions() {
//!     println!("{:.0},{:.0} alpha {:.2}", particle.x, particle.y, particle.opacity);
//! }
//!
//! overlay.dispose();
//! ```

pub mod error;
pub mod field;
pub mod geo;
pub mod particles;
pub mod provider;
pub mod rain;
pub mod sample;
pub mod scheduler;
pub mod store;

pub use error::{ProviderError, WeatherError};
pub use field::{GridConfig, VectorFieldGrid};
pub use geo::{
    BoundingBox, GeoPoint, ScreenPoint, ViewportProvider, ViewportTransform, WebMercator,
    WebMercatorViewport,
};
pub use particles::{Particle, ParticleConfig, ParticleSystem, RenderableParticle};
pub use provider::{OpenMeteoConfig, OpenMeteoProvider, WeatherProvider};
pub use rain::{compute_rain_profile, PrecipitationRenderer, RainConfig, RainProfile};
pub use sample::{PrecipitationSample, SampleSet, WindSample, WindVector};
pub use scheduler::{
    AnimationHost, FieldBuilder, LatticeBuilder, LifecycleSignal, OverlayScheduler,
    OverlayState, SchedulerConfig,
};
pub use store::{CacheEntry, FetchOutcome, Freshness, StoreConfig, WeatherSampleStore};

/// Configuration for a full overlay instance.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Cache and retry policy for the sample store.
    pub store: StoreConfig,
    /// Field lattice resolution and interpolation radius.
    pub grid: GridConfig,
    pub particles: ParticleConfig,
    pub rain: RainConfig,
    pub scheduler: SchedulerConfig,
    /// Seed for particle spawn positions and lifetimes.
    pub seed: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            grid: GridConfig::default(),
            particles: ParticleConfig::default(),
            rain: RainConfig::default(),
            scheduler: SchedulerConfig::default(),
            seed: 42,
        }
    }
}
