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

//! Precipitation intensity to rain animation parameters.

use log::trace;

use crate::field::VectorFieldGrid;
use crate::geo::{BoundingBox, GeoPoint};

#[derive(Debug, Clone)]
pub struct RainConfig {
    /// Intensity (mm/h) at which density reaches `1 - 1/e`.
    pub saturation_mm_per_hour: f64,
    pub max_opacity: f64,
    /// Fall speed of the lightest rain at `reference_zoom`.
    pub base_fall_speed_px_per_sec: f64,
    /// Additional fall speed at full density.
    pub extra_fall_speed_px_per_sec: f64,
    pub reference_zoom: f64,
    /// Exponent applied per zoom level away from `reference_zoom`.
    pub zoom_gain: f64,
}

impl Default for RainConfig {
    fn default() -> Self {
        Self {
            saturation_mm_per_hour: 4.0,
            max_opacity: 0.8,
            base_fall_speed_px_per_sec: 300.0,
            extra_fall_speed_px_per_sec: 500.0,
            reference_zoom: 8.0,
            zoom_gain: 0.25,
        }
    }
}

/// Rendering parameters for the rain layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainProfile {
    /// Fraction of the maximum streak count to draw, in `[0, 1]`.
    pub density: f32,
    pub fall_speed_px_per_sec: f32,
    pub opacity: f32,
}

impl RainProfile {
    /// Nothing to draw.
    pub const NONE: Self = Self {
        density: 0.0,
        fall_speed_px_per_sec: 0.0,
        opacity: 0.0,
    };

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.density > 0.0 && self.opacity > 0.0
    }
}

impl RainConfig {
    /// Map an intensity in mm/h at a zoom level to a rain profile.
    ///
    /// Density and opacity follow `1 - exp(-i / k)` so they start at 0 and
    /// saturate below 1. Negative or NaN intensities count as 0.
    #[must_use]
    pub fn profile(&self, intensity_mm_per_hour: f64, zoom: f64) -> RainProfile {
        let intensity = if intensity_mm_per_hour.is_nan() {
            0.0
        } else {
            intensity_mm_per_hour.max(0.0)
        };
        let k = self.saturation_mm_per_hour.max(f64::MIN_POSITIVE);
        let density = (1.0 - (-intensity / k).exp()).clamp(0.0, 1.0);
        let opacity = (density * self.max_opacity.clamp(0.0, 1.0)).clamp(0.0, 1.0);

        let zoom = if zoom.is_finite() { zoom } else { self.reference_zoom };
        let zoom_factor = 2_f64.powf((zoom - self.reference_zoom) * self.zoom_gain);
        let fall_speed =
            (self.base_fall_speed_px_per_sec + self.extra_fall_speed_px_per_sec * density) * zoom_factor;

        RainProfile {
            density: density as f32,
            fall_speed_px_per_sec: fall_speed.max(0.0) as f32,
            opacity: opacity as f32,
        }
    }
}

/// [`RainConfig::profile`] with default tuning.
#[must_use]
pub fn compute_rain_profile(intensity_mm_per_hour: f64, zoom: f64) -> RainProfile {
    RainConfig::default().profile(intensity_mm_per_hour, zoom)
}

/// Tracks the rain profile for the visible region.
#[derive(Debug, Clone)]
pub struct PrecipitationRenderer {
    config: RainConfig,
    profile: RainProfile,
    mean_intensity: f64,
}

impl PrecipitationRenderer {
    #[must_use]
    pub fn new(config: RainConfig) -> Self {
        Self {
            config,
            profile: RainProfile::NONE,
            mean_intensity: 0.0,
        }
    }

    /// Recompute the profile from the mean intensity over a 3x3 sample of
    /// the viewport.
    pub fn update(&mut self, grid: &VectorFieldGrid, viewport_bounds: &BoundingBox, zoom: f64) -> RainProfile {
        const FRACTIONS: [f64; 3] = [1.0 / 6.0, 0.5, 5.0 / 6.0];

        let mut total = 0.0;
        for fy in FRACTIONS {
            for fx in FRACTIONS {
                let point = GeoPoint::new(
                    viewport_bounds.min_lat + viewport_bounds.lat_span() * fy,
                    viewport_bounds.min_lon + viewport_bounds.lon_span() * fx,
                );
                total += grid.sample_precip(&point);
            }
        }

        self.mean_intensity = total / 9.0;
        self.profile = self.config.profile(self.mean_intensity, zoom);
        trace!(
            "Rain profile for {:.2} mm/h: {:?}",
            self.mean_intensity,
            self.profile
        );
        self.profile
    }

    #[must_use]
    pub fn profile(&self) -> RainProfile {
        self.profile
    }

    #[must_use]
    pub fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    pub fn clear(&mut self) {
        self.profile = RainProfile::NONE;
        self.mean_intensity = 0.0;
    }
}

impl Default for PrecipitationRenderer {
    fn default() -> Self {
        Self::new(RainConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::GridConfig;
    use crate::sample::PrecipitationSample;
    use chrono::Utc;

    #[test]
    fn test_zero_intensity_is_invisible_with_baseline_speed() {
        let profile = compute_rain_profile(0.0, 8.0);
        assert_eq!(profile.density, 0.0);
        assert_eq!(profile.opacity, 0.0);
        assert!((profile.fall_speed_px_per_sec - 300.0).abs() < 1e-3);
        assert!(!profile.is_visible());
    }

    #[test]
    fn test_profile_is_monotonic_and_saturates() {
        let mut previous = compute_rain_profile(0.0, 8.0);
        for i in 1..200 {
            let profile = compute_rain_profile(f64::from(i) * 0.5, 8.0);
            assert!(profile.density >= previous.density);
            assert!(profile.opacity >= previous.opacity);
            assert!(profile.fall_speed_px_per_sec >= previous.fall_speed_px_per_sec);
            previous = profile;
        }

        let extreme = compute_rain_profile(1e12, 8.0);
        assert!(extreme.density <= 1.0);
        assert!(extreme.opacity <= 1.0);
        assert!(extreme.is_visible());
    }

    #[test]
    fn test_bad_input_clamps_to_zero() {
        let zero = compute_rain_profile(0.0, 8.0);
        assert_eq!(compute_rain_profile(f64::NAN, 8.0), zero);
        assert_eq!(compute_rain_profile(-5.0, 8.0), zero);
        assert_eq!(compute_rain_profile(f64::NEG_INFINITY, 8.0), zero);
    }

    #[test]
    fn test_rain_falls_faster_when_zoomed_in() {
        let near = compute_rain_profile(2.0, 12.0);
        let far = compute_rain_profile(2.0, 4.0);
        assert!(near.fall_speed_px_per_sec > far.fall_speed_px_per_sec);
        assert_eq!(near.density, far.density);
    }

    #[test]
    fn test_renderer_averages_viewport() {
        let bbox = BoundingBox::new(33.0, 35.0, 70.5, 72.5).unwrap();
        let precip = [PrecipitationSample::new(GeoPoint::new(34.0, 71.5), 6.0, Utc::now())];
        let grid = VectorFieldGrid::build(&[], &precip, bbox, &GridConfig::default());

        let mut renderer = PrecipitationRenderer::default();
        let profile = renderer.update(&grid, &bbox, 8.0);

        assert!((renderer.mean_intensity() - 6.0).abs() < 1e-6);
        let expected = compute_rain_profile(6.0, 8.0);
        assert!((profile.density - expected.density).abs() < 1e-5);
        assert!((profile.opacity - expected.opacity).abs() < 1e-5);
        assert_eq!(renderer.profile(), profile);

        renderer.clear();
        assert_eq!(renderer.profile(), RainProfile::NONE);
    }

    #[test]
    fn test_renderer_on_empty_field_shows_no_rain() {
        let bbox = BoundingBox::new(33.0, 35.0, 70.5, 72.5).unwrap();
        let grid = VectorFieldGrid::empty(bbox, &GridConfig::default());

        let mut renderer = PrecipitationRenderer::default();
        let profile = renderer.update(&grid, &bbox, 8.0);
        assert!(!profile.is_visible());
    }
}
