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

//! Regular wind/precipitation lattice built from sparse point samples.
//!
//! A grid is immutable once built. Fresh data produces a new grid which the
//! scheduler swaps in behind an `Arc`, so a frame never reads a
//! half-updated lattice.

use log::{debug, warn};

use crate::error::WeatherError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::sample::{PrecipitationSample, WindSample, WindVector};

/// Lattice resolution and interpolation tuning.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Number of cells along the latitude axis.
    pub rows: usize,
    /// Number of cells along the longitude axis.
    pub cols: usize,
    /// Samples farther than this from a cell center are ignored.
    pub search_radius_km: f64,
    /// Distance floor for inverse-distance weights.
    pub min_distance_km: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 32,
            search_radius_km: 150.0,
            min_distance_km: 1.0,
        }
    }
}

/// Observation reduced to a position and up to two scalar channels.
struct Observation {
    position: GeoPoint,
    value: [f64; 2],
}

/// Immutable wind vector and precipitation field over a bounding box.
///
/// Row 0 is the southernmost row, column 0 the westernmost column. Values
/// live at cell centers.
#[derive(Debug, Clone)]
pub struct VectorFieldGrid {
    bounds: BoundingBox,
    rows: usize,
    cols: usize,
    wind: Vec<WindVector>,
    precipitation: Vec<f64>,
    empty: bool,
}

impl VectorFieldGrid {
    /// Build a lattice from point samples using inverse-distance weighting.
    #[must_use]
    pub fn build(
        wind_samples: &[WindSample],
        precip_samples: &[PrecipitationSample],
        bounds: BoundingBox,
        config: &GridConfig,
    ) -> Self {
        let rows = config.rows.max(1);
        let cols = config.cols.max(1);

        let wind_obs: Vec<Observation> = wind_samples
            .iter()
            .filter_map(|s| {
                let v = s.vector();
                v.is_finite().then_some(Observation {
                    position: s.position,
                    value: [v.vx, v.vy],
                })
            })
            .collect();

        let precip_obs: Vec<Observation> = precip_samples
            .iter()
            .filter(|s| s.intensity_mm_per_hour.is_finite())
            .map(|s| Observation {
                position: s.position,
                value: [s.intensity_mm_per_hour.max(0.0), 0.0],
            })
            .collect();

        let empty = wind_obs.is_empty() && precip_obs.is_empty();
        if empty {
            warn!("{}; building zero field for {:?}", WeatherError::EmptySampleSet, bounds);
        }

        let mut grid = Self {
            bounds,
            rows,
            cols,
            wind: vec![WindVector::ZERO; rows * cols],
            precipitation: vec![0.0; rows * cols],
            empty,
        };

        for row in 0..rows {
            for col in 0..cols {
                let center = grid.cell_center(row, col);
                let idx = row * cols + col;

                if !wind_obs.is_empty() {
                    let [vx, vy] = inverse_distance(&center, &wind_obs, config);
                    grid.wind[idx] = WindVector::new(vx, vy).sanitized();
                }
                if !precip_obs.is_empty() {
                    let [intensity, _] = inverse_distance(&center, &precip_obs, config);
                    grid.precipitation[idx] = if intensity.is_finite() { intensity.max(0.0) } else { 0.0 };
                }
            }
        }

        debug!(
            "Built {}x{} vector field from {} wind and {} precipitation samples",
            rows,
            cols,
            wind_obs.len(),
            precip_obs.len()
        );

        grid
    }

    /// A field with zero wind and zero precipitation everywhere.
    #[must_use]
    pub fn empty(bounds: BoundingBox, config: &GridConfig) -> Self {
        Self::build(&[], &[], bounds, config)
    }

    #[must_use]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// True when the grid was built without any usable sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Geographic center of a lattice cell.
    #[must_use]
    pub fn cell_center(&self, row: usize, col: usize) -> GeoPoint {
        let dlat = self.bounds.lat_span() / self.rows as f64;
        let dlon = self.bounds.lon_span() / self.cols as f64;
        GeoPoint {
            latitude: self.bounds.min_lat + (row as f64 + 0.5) * dlat,
            longitude: self.bounds.min_lon + (col as f64 + 0.5) * dlon,
        }
    }

    #[must_use]
    pub fn cell_wind(&self, row: usize, col: usize) -> WindVector {
        self.wind[row.min(self.rows - 1) * self.cols + col.min(self.cols - 1)]
    }

    #[must_use]
    pub fn cell_precip(&self, row: usize, col: usize) -> f64 {
        self.precipitation[row.min(self.rows - 1) * self.cols + col.min(self.cols - 1)]
    }

    /// Strongest wind speed anywhere on the lattice.
    #[must_use]
    pub fn max_speed(&self) -> f64 {
        self.wind.iter().map(WindVector::speed).fold(0.0, f64::max)
    }

    /// Interpolated wind at an arbitrary point. Points outside the lattice
    /// clamp to the nearest edge cell.
    #[must_use]
    pub fn sample_wind(&self, point: &GeoPoint) -> WindVector {
        let (r0, r1, c0, c1, tr, tc) = self.lattice_coords(point);
        let vx = bilinear(
            self.cell_wind(r0, c0).vx,
            self.cell_wind(r0, c1).vx,
            self.cell_wind(r1, c0).vx,
            self.cell_wind(r1, c1).vx,
            tr,
            tc,
        );
        let vy = bilinear(
            self.cell_wind(r0, c0).vy,
            self.cell_wind(r0, c1).vy,
            self.cell_wind(r1, c0).vy,
            self.cell_wind(r1, c1).vy,
            tr,
            tc,
        );
        WindVector::new(vx, vy).sanitized()
    }

    /// Interpolated precipitation intensity (mm/h) at an arbitrary point.
    #[must_use]
    pub fn sample_precip(&self, point: &GeoPoint) -> f64 {
        let (r0, r1, c0, c1, tr, tc) = self.lattice_coords(point);
        let value = bilinear(
            self.cell_precip(r0, c0),
            self.cell_precip(r0, c1),
            self.cell_precip(r1, c0),
            self.cell_precip(r1, c1),
            tr,
            tc,
        );
        if value.is_finite() {
            value.max(0.0)
        } else {
            0.0
        }
    }

    /// Enclosing cell indices and fractional offsets in cell-center space.
    fn lattice_coords(&self, point: &GeoPoint) -> (usize, usize, usize, usize, f64, f64) {
        let dlat = self.bounds.lat_span() / self.rows as f64;
        let dlon = self.bounds.lon_span() / self.cols as f64;

        let fr = fractional_index(point.latitude, self.bounds.min_lat, dlat, self.rows);
        let fc = fractional_index(point.longitude, self.bounds.min_lon, dlon, self.cols);

        let r0 = (fr.floor() as usize).min(self.rows - 1);
        let c0 = (fc.floor() as usize).min(self.cols - 1);
        let r1 = (r0 + 1).min(self.rows - 1);
        let c1 = (c0 + 1).min(self.cols - 1);

        (r0, r1, c0, c1, fr - r0 as f64, fc - c0 as f64)
    }
}

fn fractional_index(value: f64, min: f64, step: f64, count: usize) -> f64 {
    let f = (value - min) / step - 0.5;
    if f.is_finite() {
        f.clamp(0.0, (count - 1) as f64)
    } else {
        0.0
    }
}

/// `v00` at (r0, c0), `v01` at (r0, c1), `v10` at (r1, c0), `v11` at (r1, c1).
fn bilinear(v00: f64, v01: f64, v10: f64, v11: f64, tr: f64, tc: f64) -> f64 {
    let south = v00 + (v01 - v00) * tc;
    let north = v10 + (v11 - v10) * tc;
    south + (north - south) * tr
}

fn inverse_distance(center: &GeoPoint, observations: &[Observation], config: &GridConfig) -> [f64; 2] {
    let mut sum = [0.0, 0.0];
    let mut total_weight = 0.0;
    let mut nearest: Option<(f64, &Observation)> = None;

    for obs in observations {
        let distance = center.distance_km(&obs.position);
        if nearest.map_or(true, |(best, _)| distance < best) {
            nearest = Some((distance, obs));
        }
        if distance <= config.search_radius_km {
            let weight = 1.0 / distance.max(config.min_distance_km).powi(2);
            sum[0] += weight * obs.value[0];
            sum[1] += weight * obs.value[1];
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        [sum[0] / total_weight, sum[1] / total_weight]
    } else {
        nearest.map_or([0.0, 0.0], |(_, obs)| obs.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn region() -> BoundingBox {
        BoundingBox::new(33.0, 35.0, 70.5, 72.5).unwrap()
    }

    fn wind(lat: f64, lon: f64, speed: f64, dir: f64) -> WindSample {
        WindSample::new(GeoPoint::new(lat, lon), speed, dir, Utc::now())
    }

    fn rain(lat: f64, lon: f64, mm: f64) -> PrecipitationSample {
        PrecipitationSample::new(GeoPoint::new(lat, lon), mm, Utc::now())
    }

    fn varied_grid() -> VectorFieldGrid {
        let winds = vec![
            wind(33.2, 70.7, 4.0, 45.0),
            wind(34.8, 70.6, 12.0, 180.0),
            wind(34.0, 71.5, 8.0, 270.0),
            wind(33.4, 72.3, 2.0, 10.0),
        ];
        let rains = vec![rain(33.1, 70.6, 0.0), rain(34.9, 72.4, 20.0), rain(34.0, 71.5, 5.0)];
        VectorFieldGrid::build(
            &winds,
            &rains,
            region(),
            &GridConfig {
                rows: 8,
                cols: 8,
                search_radius_km: 120.0,
                min_distance_km: 1.0,
            },
        )
    }

    #[test]
    fn test_easterly_wind_stored_as_westward_vector() {
        let grid = VectorFieldGrid::build(
            &[wind(34.0, 71.5, 10.0, 90.0)],
            &[],
            region(),
            &GridConfig::default(),
        );

        let v = grid.sample_wind(&GeoPoint::new(34.0, 71.5));
        assert!(v.vx < -9.9, "expected westward vector, got {:?}", v);
        assert!(v.vy.abs() < 1e-6);
    }

    #[test]
    fn test_interpolation_never_overshoots_corners() {
        let grid = varied_grid();

        for i in 1..40 {
            for j in 1..40 {
                let point = GeoPoint::new(33.0 + 2.0 * f64::from(i) / 40.0, 70.5 + 2.0 * f64::from(j) / 40.0);
                let (r0, r1, c0, c1, _, _) = grid.lattice_coords(&point);

                let corners = [(r0, c0), (r0, c1), (r1, c0), (r1, c1)];
                let vx: Vec<f64> = corners.iter().map(|&(r, c)| grid.cell_wind(r, c).vx).collect();
                let pr: Vec<f64> = corners.iter().map(|&(r, c)| grid.cell_precip(r, c)).collect();

                let v = grid.sample_wind(&point);
                let p = grid.sample_precip(&point);
                assert!(v.is_finite() && p.is_finite());

                let (lo, hi) = vx.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
                assert!(v.vx >= lo - 1e-9 && v.vx <= hi + 1e-9);

                let (lo, hi) = pr.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
                assert!(p >= lo - 1e-9 && p <= hi + 1e-9);
            }
        }
    }

    #[test]
    fn test_outside_points_clamp_to_edge() {
        let grid = varied_grid();

        let north_of_box = grid.sample_wind(&GeoPoint::new(40.0, 71.3));
        let on_top_edge = grid.sample_wind(&GeoPoint::new(35.0, 71.3));
        assert_eq!(north_of_box, on_top_edge);

        let far_corner = grid.sample_precip(&GeoPoint::new(-10.0, -100.0));
        assert_eq!(far_corner, grid.cell_precip(0, 0));
    }

    #[test]
    fn test_empty_samples_yield_zero_field() {
        let grid = VectorFieldGrid::build(&[], &[], region(), &GridConfig::default());
        assert!(grid.is_empty());
        assert_eq!(grid.sample_wind(&GeoPoint::new(34.0, 71.5)), WindVector::ZERO);
        assert_eq!(grid.sample_precip(&GeoPoint::new(34.0, 71.5)), 0.0);
        assert_eq!(grid.max_speed(), 0.0);
    }

    #[test]
    fn test_falls_back_to_nearest_sample_outside_radius() {
        let grid = VectorFieldGrid::build(
            &[wind(33.0, 70.5, 6.0, 0.0), wind(35.0, 72.5, 3.0, 180.0)],
            &[],
            region(),
            &GridConfig {
                rows: 4,
                cols: 4,
                search_radius_km: 0.001,
                min_distance_km: 1.0,
            },
        );

        // South-west cell only sees the south-west sample (blows toward south)
        assert!((grid.cell_wind(0, 0).vy - (-6.0)).abs() < 1e-9);
        // North-east cell only sees the north-east sample (blows toward north)
        assert!((grid.cell_wind(3, 3).vy - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_distance_blends_toward_closer_sample() {
        let grid = VectorFieldGrid::build(
            &[],
            &[rain(34.0, 70.6, 10.0), rain(34.0, 72.4, 0.0)],
            region(),
            &GridConfig {
                rows: 1,
                cols: 8,
                search_radius_km: 500.0,
                min_distance_km: 1.0,
            },
        );

        assert!(grid.cell_precip(0, 0) > grid.cell_precip(0, 7));
        assert!(grid.cell_precip(0, 0) > 5.0);
        assert!(grid.cell_precip(0, 7) < 5.0);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut bad = wind(34.0, 71.5, 10.0, 90.0);
        bad.speed_mps = f64::NAN;
        let grid = VectorFieldGrid::build(&[bad], &[], region(), &GridConfig::default());
        assert!(grid.is_empty());
        assert_eq!(grid.sample_wind(&GeoPoint::new(34.0, 71.5)), WindVector::ZERO);
    }
}
