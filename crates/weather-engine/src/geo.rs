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

//! Geographic primitives and the viewport transform contract.
//!
//! Everything the engine knows about the hosting map goes through
//! [`ViewportTransform`]. [`WebMercatorViewport`] is the slippy-map
//! implementation used by the desktop host.

use std::f64::consts::PI;

use crate::error::WeatherError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Pixel size of a Web Mercator tile.
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Smallest span a derived bounding box is allowed to collapse to.
const MIN_SPAN_DEGREES: f64 = 1e-6;

/// An immutable, normalized geographic position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point, clamping latitude to [-90, 90] and wrapping longitude
    /// into [-180, 180]. Non-finite components collapse to 0.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let latitude = if latitude.is_finite() {
            latitude.clamp(-90.0, 90.0)
        } else {
            0.0
        };
        let longitude = if longitude.is_finite() {
            wrap_longitude(longitude)
        } else {
            0.0
        };
        Self {
            latitude,
            longitude,
        }
    }

    /// Move the point by a local east/north offset in meters.
    ///
    /// Equirectangular approximation: fine at city and regional zoom
    /// levels, not a geodesic.
    #[must_use]
    pub fn displaced(self, east_m: f64, north_m: f64) -> Self {
        let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = self.latitude.to_radians().cos().max(0.01);
        let dlon = (east_m / (EARTH_RADIUS_M * cos_lat)).to_degrees();
        Self::new(self.latitude + dlat, self.longitude + dlon)
    }

    /// Great-circle distance to another point in kilometers.
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Calculate distance between two lat/lon points using the Haversine formula (in km).
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = EARTH_RADIUS_M / 1000.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    r * c
}

/// Axis-aligned geographic region. Never crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self, WeatherError> {
        let bbox = Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Build a box spanning two arbitrary corners, clamping to the valid
    /// range and padding degenerate spans. Never fails.
    #[must_use]
    pub fn spanning(a: GeoPoint, b: GeoPoint) -> Self {
        let clamp_lat = |v: f64| v.clamp(-90.0, 90.0);
        let clamp_lon = |v: f64| v.clamp(-180.0, 180.0);

        let mut min_lat = clamp_lat(a.latitude.min(b.latitude));
        let mut max_lat = clamp_lat(a.latitude.max(b.latitude));
        let mut min_lon = clamp_lon(a.longitude.min(b.longitude));
        let mut max_lon = clamp_lon(a.longitude.max(b.longitude));

        if max_lat - min_lat < MIN_SPAN_DEGREES {
            if max_lat + MIN_SPAN_DEGREES <= 90.0 {
                max_lat += MIN_SPAN_DEGREES;
            } else {
                min_lat -= MIN_SPAN_DEGREES;
            }
        }
        if max_lon - min_lon < MIN_SPAN_DEGREES {
            if max_lon + MIN_SPAN_DEGREES <= 180.0 {
                max_lon += MIN_SPAN_DEGREES;
            } else {
                min_lon -= MIN_SPAN_DEGREES;
            }
        }

        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Check that the box is finite, ordered, and inside the geographic range.
    pub fn validate(&self) -> Result<(), WeatherError> {
        let values = [self.min_lat, self.max_lat, self.min_lon, self.max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(WeatherError::InvalidBoundingBox(
                "coordinates must be finite".to_string(),
            ));
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return Err(WeatherError::InvalidBoundingBox(format!(
                "latitude range {}..{} outside [-90, 90]",
                self.min_lat, self.max_lat
            )));
        }
        if self.min_lon < -180.0 || self.max_lon > 180.0 {
            return Err(WeatherError::InvalidBoundingBox(format!(
                "longitude range {}..{} outside [-180, 180]",
                self.min_lon, self.max_lon
            )));
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(WeatherError::InvalidBoundingBox(format!(
                "empty region: lat {}..{}, lon {}..{}",
                self.min_lat, self.max_lat, self.min_lon, self.max_lon
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    #[must_use]
    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }

    /// Snap a point onto the nearest position inside the box.
    #[must_use]
    pub fn clamp(&self, point: &GeoPoint) -> GeoPoint {
        GeoPoint {
            latitude: point.latitude.clamp(self.min_lat, self.max_lat),
            longitude: point.longitude.clamp(self.min_lon, self.max_lon),
        }
    }

    /// Grow the box by a fraction of its span on every side.
    #[must_use]
    pub fn expanded(&self, fraction: f64) -> Self {
        let dlat = self.lat_span() * fraction;
        let dlon = self.lon_span() * fraction;
        Self {
            min_lat: (self.min_lat - dlat).max(-90.0),
            max_lat: (self.max_lat + dlat).min(90.0),
            min_lon: (self.min_lon - dlon).max(-180.0),
            max_lon: (self.max_lon + dlon).min(180.0),
        }
    }

    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
            && self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
    }

    /// Largest edge displacement between two boxes, as a fraction of this
    /// box's span. `0.0` means identical.
    #[must_use]
    pub fn drift_from(&self, other: &BoundingBox) -> f64 {
        let lat_span = self.lat_span().max(MIN_SPAN_DEGREES);
        let lon_span = self.lon_span().max(MIN_SPAN_DEGREES);

        let lat_drift = (self.min_lat - other.min_lat)
            .abs()
            .max((self.max_lat - other.max_lat).abs())
            / lat_span;
        let lon_drift = (self.min_lon - other.min_lon)
            .abs()
            .max((self.max_lon - other.max_lon).abs())
            / lon_span;

        lat_drift.max(lon_drift)
    }
}

/// A position on the rendering surface, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Mapping between geographic and screen space, supplied by the hosting map
/// once per frame. Read-only from the engine's point of view.
pub trait ViewportTransform {
    fn screen_from_geo(&self, point: &GeoPoint) -> ScreenPoint;

    fn geo_from_screen(&self, point: ScreenPoint) -> GeoPoint;

    fn zoom_level(&self) -> f64;

    /// Top-left corner and size of the drawable area in screen pixels.
    fn screen_rect(&self) -> (ScreenPoint, ScreenPoint);

    /// Geographic region currently visible.
    fn bounds(&self) -> BoundingBox {
        let (origin, size) = self.screen_rect();
        let top_left = self.geo_from_screen(origin);
        let bottom_right = self.geo_from_screen(ScreenPoint::new(origin.x + size.x, origin.y + size.y));
        BoundingBox::spanning(top_left, bottom_right)
    }
}

/// Supplies the current viewport to the overlay each frame.
pub trait ViewportProvider: Send {
    fn current_viewport(&self) -> Box<dyn ViewportTransform>;
}

/// Web Mercator projection utilities with fractional zoom.
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to a Web Mercator Y coordinate in tile units.
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: f64) -> f64 {
        let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
        let n = 2_f64.powf(zoom);
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
        y * n
    }

    /// Convert longitude to a Web Mercator X coordinate in tile units.
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: f64) -> f64 {
        let n = 2_f64.powf(zoom);
        ((lon + 180.0) / 360.0) * n
    }

    /// Convert a tile-unit Y coordinate back to latitude.
    #[must_use]
    pub fn y_to_lat(y: f64, zoom: f64) -> f64 {
        let n = 2_f64.powf(zoom);
        let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
        lat_rad.to_degrees()
    }

    /// Convert a tile-unit X coordinate back to longitude (unwrapped).
    #[must_use]
    pub fn x_to_lon(x: f64, zoom: f64) -> f64 {
        let n = 2_f64.powf(zoom);
        x / n * 360.0 - 180.0
    }
}

/// Slippy-map viewport centered on a geographic point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercatorViewport {
    pub center: GeoPoint,
    pub zoom: f64,
    /// Top-left corner of the map area on screen.
    pub origin: ScreenPoint,
    /// Width and height of the map area.
    pub size: ScreenPoint,
}

impl WebMercatorViewport {
    #[must_use]
    pub fn new(center: GeoPoint, zoom: f64, origin: ScreenPoint, size: ScreenPoint) -> Self {
        Self {
            center,
            zoom,
            origin,
            size,
        }
    }

    fn center_tile(&self) -> (f64, f64) {
        (
            WebMercator::lon_to_x(self.center.longitude, self.zoom),
            WebMercator::lat_to_y(self.center.latitude, self.zoom),
        )
    }

    fn screen_center(&self) -> (f64, f64) {
        (
            f64::from(self.origin.x) + f64::from(self.size.x) / 2.0,
            f64::from(self.origin.y) + f64::from(self.size.y) / 2.0,
        )
    }

    /// Unwrapped longitude and clamped latitude under a screen position.
    fn raw_geo(&self, point: ScreenPoint) -> (f64, f64) {
        let (cx, cy) = self.center_tile();
        let (sx, sy) = self.screen_center();
        let tile_x = cx + (f64::from(point.x) - sx) / TILE_SIZE;
        let tile_y = cy + (f64::from(point.y) - sy) / TILE_SIZE;
        (
            WebMercator::y_to_lat(tile_y, self.zoom),
            WebMercator::x_to_lon(tile_x, self.zoom),
        )
    }
}

impl ViewportTransform for WebMercatorViewport {
    fn screen_from_geo(&self, point: &GeoPoint) -> ScreenPoint {
        let (cx, cy) = self.center_tile();
        let (sx, sy) = self.screen_center();
        let tile_x = WebMercator::lon_to_x(point.longitude, self.zoom);
        let tile_y = WebMercator::lat_to_y(point.latitude, self.zoom);

        ScreenPoint::new(
            (sx + (tile_x - cx) * TILE_SIZE) as f32,
            (sy + (tile_y - cy) * TILE_SIZE) as f32,
        )
    }

    fn geo_from_screen(&self, point: ScreenPoint) -> GeoPoint {
        let (lat, lon) = self.raw_geo(point);
        GeoPoint::new(lat, lon)
    }

    fn zoom_level(&self) -> f64 {
        self.zoom
    }

    fn screen_rect(&self) -> (ScreenPoint, ScreenPoint) {
        (self.origin, self.size)
    }

    fn bounds(&self) -> BoundingBox {
        // Unwrapped corners so a view straddling the antimeridian clamps
        // to the world edge instead of flipping to a world-wide box.
        let (top, left) = self.raw_geo(self.origin);
        let (bottom, right) = self.raw_geo(ScreenPoint::new(
            self.origin.x + self.size.x,
            self.origin.y + self.size.y,
        ));
        BoundingBox::spanning(
            GeoPoint {
                latitude: top,
                longitude: left,
            },
            GeoPoint {
                latitude: bottom,
                longitude: right,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_normalizes() {
        let p = GeoPoint::new(95.0, 190.0);
        assert_eq!(p.latitude, 90.0);
        assert!((p.longitude - (-170.0)).abs() < 1e-9);

        let p = GeoPoint::new(f64::NAN, -540.0);
        assert_eq!(p.latitude, 0.0);
        assert!((p.longitude - (-180.0)).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_km() {
        // Peshawar to Islamabad is roughly 150 km
        let distance = haversine_km(34.0151, 71.5249, 33.6844, 73.0479);
        assert!((distance - 145.0).abs() < 10.0, "got {distance}");
    }

    #[test]
    fn test_displaced_moves_in_expected_direction() {
        let start = GeoPoint::new(34.0, 71.5);
        let moved = start.displaced(-1000.0, 0.0);
        assert!(moved.longitude < start.longitude);
        assert!((moved.latitude - start.latitude).abs() < 1e-9);

        let moved = start.displaced(0.0, 1000.0);
        assert!(moved.latitude > start.latitude);
        // One kilometer is roughly 0.009 degrees of latitude
        assert!((moved.latitude - start.latitude - 0.008_993).abs() < 1e-4);
    }

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::new(33.0, 35.0, 70.0, 73.0).is_ok());
        assert!(matches!(
            BoundingBox::new(35.0, 33.0, 70.0, 73.0),
            Err(WeatherError::InvalidBoundingBox(_))
        ));
        assert!(matches!(
            BoundingBox::new(33.0, 95.0, 70.0, 73.0),
            Err(WeatherError::InvalidBoundingBox(_))
        ));
        assert!(matches!(
            BoundingBox::new(33.0, f64::NAN, 70.0, 73.0),
            Err(WeatherError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn test_bounding_box_drift() {
        let a = BoundingBox::new(30.0, 40.0, 70.0, 80.0).unwrap();
        assert_eq!(a.drift_from(&a), 0.0);

        let shifted = BoundingBox::new(32.0, 42.0, 70.0, 80.0).unwrap();
        assert!((a.drift_from(&shifted) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_spanning_pads_degenerate_box() {
        let p = GeoPoint::new(10.0, 20.0);
        let bbox = BoundingBox::spanning(p, p);
        assert!(bbox.validate().is_ok());
        assert!(bbox.contains(&p));
    }

    #[test]
    fn test_web_mercator_roundtrip_center() {
        let viewport = WebMercatorViewport::new(
            GeoPoint::new(34.0, 71.5),
            8.0,
            ScreenPoint::new(0.0, 0.0),
            ScreenPoint::new(800.0, 600.0),
        );

        let center = viewport.screen_from_geo(&GeoPoint::new(34.0, 71.5));
        assert!((center.x - 400.0).abs() < 1e-3);
        assert!((center.y - 300.0).abs() < 1e-3);

        let geo = viewport.geo_from_screen(ScreenPoint::new(123.0, 456.0));
        let back = viewport.screen_from_geo(&geo);
        assert!((back.x - 123.0).abs() < 1e-2);
        assert!((back.y - 456.0).abs() < 1e-2);
    }

    #[test]
    fn test_web_mercator_bounds_contain_center() {
        let viewport = WebMercatorViewport::new(
            GeoPoint::new(34.0, 71.5),
            8.0,
            ScreenPoint::new(0.0, 0.0),
            ScreenPoint::new(800.0, 600.0),
        );
        let bounds = viewport.bounds();
        assert!(bounds.contains(&viewport.center));
        assert!(bounds.max_lat > bounds.min_lat);
        assert!(bounds.max_lon > bounds.min_lon);
    }
}
