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

//! Open-Meteo adapter.
//!
//! Queries current 10 m wind and precipitation for a lattice of points
//! inside the requested box in a single multi-location request.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use serde::Deserialize;

use super::WeatherProvider;
use crate::error::ProviderError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::sample::{PrecipitationSample, SampleSet, WindSample};

/// Public forecast endpoint, no API key required.
pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

const CURRENT_FIELDS: &str = "wind_speed_10m,wind_direction_10m,precipitation";

/// Open-Meteo reports precipitation as a sum over the current interval,
/// 15 minutes unless the payload says otherwise.
const DEFAULT_INTERVAL_SECS: f64 = 900.0;

#[derive(Debug, Clone)]
pub struct OpenMeteoConfig {
    pub base_url: String,
    /// Query lattice rows inside the box.
    pub query_rows: usize,
    /// Query lattice columns inside the box.
    pub query_cols: usize,
    pub timeout: Duration,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            query_rows: 5,
            query_cols: 6,
            timeout: Duration::from_secs(15),
        }
    }
}

/// HTTP client for the Open-Meteo forecast API.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    client: reqwest::Client,
    config: OpenMeteoConfig,
}

impl OpenMeteoProvider {
    pub fn new(config: OpenMeteoConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("weather-overlay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Points sampled for a box: cell centers of a `query_rows x query_cols` lattice.
    #[must_use]
    pub fn query_points(&self, bbox: &BoundingBox) -> Vec<GeoPoint> {
        let rows = self.config.query_rows.max(1);
        let cols = self.config.query_cols.max(1);
        let dlat = bbox.lat_span() / rows as f64;
        let dlon = bbox.lon_span() / cols as f64;

        (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| {
                    GeoPoint::new(
                        bbox.min_lat + (r as f64 + 0.5) * dlat,
                        bbox.min_lon + (c as f64 + 0.5) * dlon,
                    )
                })
            })
            .collect()
    }

    fn request_url(&self, points: &[GeoPoint]) -> String {
        let join = |f: fn(&GeoPoint) -> f64| {
            points
                .iter()
                .map(|p| format!("{:.4}", f(p)))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{}?latitude={}&longitude={}&current={}&wind_speed_unit=ms&timezone=GMT",
            self.config.base_url,
            join(|p| p.latitude),
            join(|p| p.longitude),
            CURRENT_FIELDS
        )
    }
}

impl WeatherProvider for OpenMeteoProvider {
    async fn fetch_samples(&self, bbox: &BoundingBox) -> Result<SampleSet, ProviderError> {
        let points = self.query_points(bbox);
        let url = self.request_url(&points);
        debug!("Requesting {} weather points from Open-Meteo", points.len());

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_open_meteo(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<Location>),
    One(Location),
}

#[derive(Debug, Deserialize)]
struct Location {
    latitude: f64,
    longitude: f64,
    current: Option<Current>,
}

#[derive(Debug, Deserialize)]
struct Current {
    time: Option<String>,
    interval: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    precipitation: Option<f64>,
}

/// Parse an Open-Meteo `current` payload (single location or array) into samples.
///
/// Locations with missing values contribute only the values they have.
pub fn parse_open_meteo(body: &str) -> Result<SampleSet, ProviderError> {
    let payload: Payload = serde_json::from_str(body)?;
    let locations = match payload {
        Payload::Many(locations) => locations,
        Payload::One(location) => vec![location],
    };

    let mut samples = SampleSet::default();
    for location in locations {
        let Some(current) = location.current else {
            continue;
        };
        if !location.latitude.is_finite() || !location.longitude.is_finite() {
            return Err(ProviderError::Malformed(format!(
                "non-finite coordinates {}, {}",
                location.latitude, location.longitude
            )));
        }

        let position = GeoPoint::new(location.latitude, location.longitude);
        let observed_at = current
            .time
            .as_deref()
            .and_then(parse_time)
            .unwrap_or_else(Utc::now);

        if let (Some(speed), Some(direction)) = (current.wind_speed_10m, current.wind_direction_10m) {
            samples
                .wind
                .push(WindSample::new(position, speed, direction, observed_at));
        }

        if let Some(amount_mm) = current.precipitation {
            let interval = current
                .interval
                .filter(|secs| *secs > 0.0)
                .unwrap_or(DEFAULT_INTERVAL_SECS);
            let per_hour = amount_mm * 3600.0 / interval;
            samples
                .precipitation
                .push(PrecipitationSample::new(position, per_hour, observed_at));
        }
    }

    Ok(samples)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| naive.and_utc())
}
