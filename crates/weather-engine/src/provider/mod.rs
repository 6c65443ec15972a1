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

//! Weather provider layer.
//!
//! A provider turns a bounding box into strict [`SampleSet`] values. The
//! trait is the only seam between the engine and any particular weather
//! API; adding a new API means adding a new implementation here.

mod open_meteo;

pub use open_meteo::{parse_open_meteo, OpenMeteoConfig, OpenMeteoProvider};

use std::future::Future;

use crate::error::ProviderError;
use crate::geo::BoundingBox;
use crate::sample::SampleSet;

/// Source of point observations for a region.
///
/// Implementations perform exactly one request per call; retries, caching
/// and coalescing are handled by [`WeatherSampleStore`](crate::WeatherSampleStore).
pub trait WeatherProvider: Send + Sync + 'static {
    fn fetch_samples(
        &self,
        bbox: &BoundingBox,
    ) -> impl Future<Output = Result<SampleSet, ProviderError>> + Send;
}
