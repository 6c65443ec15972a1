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

//! Error types shared across the engine.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by a weather provider adapter for a single request.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider responded with HTTP {0}")]
    Status(u16),

    #[error("failed to parse provider payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

/// Errors surfaced by the weather engine.
///
/// Cloneable so a single coalesced fetch result can be handed to every
/// waiting caller.
#[derive(Debug, Clone, Error)]
pub enum WeatherError {
    /// Network or HTTP failure after all retries were exhausted.
    #[error("weather fetch failed after {attempts} attempts: {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: Arc<ProviderError>,
    },

    /// The requested region is malformed.
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// The provider answered successfully but returned no samples.
    #[error("weather provider returned no samples")]
    EmptySampleSet,

    /// The store shut down before the request completed.
    #[error("weather fetch cancelled")]
    Cancelled,
}
