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

//! Strict weather observation types.
//!
//! Provider adapters convert whatever their API returns into these types;
//! nothing downstream ever sees a provider-specific payload.

use chrono::{DateTime, Utc};

use crate::error::WeatherError;
use crate::geo::GeoPoint;

/// A single wind observation.
#[derive(Debug, Clone, PartialEq)]
pub struct WindSample {
    pub position: GeoPoint,
    /// Wind speed in m/s, never negative.
    pub speed_mps: f64,
    /// Direction the wind blows FROM, degrees clockwise from true north, in [0, 360).
    pub direction_deg: f64,
    pub observed_at: DateTime<Utc>,
}

impl WindSample {
    #[must_use]
    pub fn new(position: GeoPoint, speed_mps: f64, direction_deg: f64, observed_at: DateTime<Utc>) -> Self {
        let speed_mps = if speed_mps.is_finite() { speed_mps.max(0.0) } else { 0.0 };
        let direction_deg = if direction_deg.is_finite() {
            direction_deg.rem_euclid(360.0)
        } else {
            0.0
        };
        Self {
            position,
            speed_mps,
            direction_deg,
            observed_at,
        }
    }

    /// Velocity vector the wind pushes things along.
    #[must_use]
    pub fn vector(&self) -> WindVector {
        WindVector::from_meteorological(self.speed_mps, self.direction_deg)
    }
}

/// A single precipitation observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipitationSample {
    pub position: GeoPoint,
    /// Precipitation rate in mm/h, never negative.
    pub intensity_mm_per_hour: f64,
    pub observed_at: DateTime<Utc>,
}

impl PrecipitationSample {
    #[must_use]
    pub fn new(position: GeoPoint, intensity_mm_per_hour: f64, observed_at: DateTime<Utc>) -> Self {
        let intensity_mm_per_hour = if intensity_mm_per_hour.is_finite() {
            intensity_mm_per_hour.max(0.0)
        } else {
            0.0
        };
        Self {
            position,
            intensity_mm_per_hour,
            observed_at,
        }
    }
}

/// Cartesian wind velocity in m/s: `vx` east-positive, `vy` north-positive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindVector {
    pub vx: f64,
    pub vy: f64,
}

impl WindVector {
    pub const ZERO: Self = Self { vx: 0.0, vy: 0.0 };

    #[must_use]
    pub fn new(vx: f64, vy: f64) -> Self {
        Self { vx, vy }
    }

    /// Convert a meteorological (speed, blows-FROM direction) pair into the
    /// vector pointing where the air is going.
    #[must_use]
    pub fn from_meteorological(speed_mps: f64, from_deg: f64) -> Self {
        let toward = (from_deg + 180.0).rem_euclid(360.0).to_radians();
        Self {
            vx: speed_mps * toward.sin(),
            vy: speed_mps * toward.cos(),
        }
    }

    #[must_use]
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.vx.is_finite() && self.vy.is_finite()
    }

    /// Replace non-finite components with zero.
    #[must_use]
    pub fn sanitized(self) -> Self {
        if self.is_finite() {
            self
        } else {
            Self::ZERO
        }
    }
}

/// Everything a provider returned for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    pub wind: Vec<WindSample>,
    pub precipitation: Vec<PrecipitationSample>,
}

impl SampleSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wind.is_empty() && self.precipitation.is_empty()
    }

    /// Flag a successful but empty response.
    pub fn ensure_non_empty(&self) -> Result<(), WeatherError> {
        if self.is_empty() {
            Err(WeatherError::EmptySampleSet)
        } else {
            Ok(())
        }
    }
}
