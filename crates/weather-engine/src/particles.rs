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

//! Wind particle pool.
//!
//! Particles live in geographic space and are advected by the vector field
//! each step, then projected to screen space for drawing. Motion is a
//! visual approximation: displacement is multiplied by a zoom-dependent
//! time scale so a 10 m/s breeze is visible at any zoom.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::field::VectorFieldGrid;
use crate::geo::{BoundingBox, GeoPoint, ViewportTransform};

#[derive(Debug, Clone)]
pub struct ParticleConfig {
    /// Pool size at or below `low_zoom`.
    pub min_particles: usize,
    /// Pool size at or above `high_zoom`.
    pub max_particles: usize,
    pub low_zoom: f64,
    pub high_zoom: f64,
    pub min_lifetime_seconds: f64,
    pub max_lifetime_seconds: f64,
    /// Fraction of the lifetime spent fading in.
    pub fade_in_fraction: f64,
    /// Fraction of the lifetime spent fading out.
    pub fade_out_fraction: f64,
    /// How far outside the viewport (fraction of its span) a particle may
    /// drift before it is recycled.
    pub edge_margin: f64,
    /// Motion multiplier at `reference_zoom`; halves with every zoom level in.
    pub base_time_scale: f64,
    pub reference_zoom: f64,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            min_particles: 500,
            max_particles: 2000,
            low_zoom: 4.0,
            high_zoom: 12.0,
            min_lifetime_seconds: 2.0,
            max_lifetime_seconds: 6.0,
            fade_in_fraction: 0.10,
            fade_out_fraction: 0.15,
            edge_margin: 0.05,
            base_time_scale: 1000.0,
            reference_zoom: 8.0,
        }
    }
}

impl ParticleConfig {
    /// Pool size for a zoom level, linear between the low and high zoom.
    #[must_use]
    pub fn pool_size_for_zoom(&self, zoom: f64) -> usize {
        let span = self.high_zoom - self.low_zoom;
        if !zoom.is_finite() || span <= 0.0 {
            return self.min_particles;
        }
        let t = ((zoom - self.low_zoom) / span).clamp(0.0, 1.0);
        let min = self.min_particles as f64;
        let max = self.max_particles as f64;
        (min + (max - min) * t).round() as usize
    }

    #[must_use]
    pub fn time_scale_for_zoom(&self, zoom: f64) -> f64 {
        let zoom = if zoom.is_finite() { zoom } else { self.reference_zoom };
        self.base_time_scale * 2_f64.powf(self.reference_zoom - zoom)
    }

    /// Opacity in `[0, 1]` for a particle at a point in its life.
    #[must_use]
    pub fn opacity(&self, age_seconds: f64, max_lifetime_seconds: f64) -> f32 {
        if max_lifetime_seconds <= 0.0 {
            return 0.0;
        }
        let life = (age_seconds / max_lifetime_seconds).clamp(0.0, 1.0);

        let fade_in = if self.fade_in_fraction > 0.0 {
            life / self.fade_in_fraction
        } else {
            1.0
        };
        let fade_out = if self.fade_out_fraction > 0.0 {
            (1.0 - life) / self.fade_out_fraction
        } else {
            1.0
        };

        fade_in.min(fade_out).clamp(0.0, 1.0) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub id: u64,
    pub position: GeoPoint,
    pub age_seconds: f64,
    pub max_lifetime_seconds: f64,
}

/// Screen-space particle ready for drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderableParticle {
    pub x: f32,
    pub y: f32,
    pub opacity: f32,
}

/// Fixed-size pool of wind particles with an injectable RNG.
#[derive(Debug)]
pub struct ParticleSystem<R = ChaCha8Rng> {
    config: ParticleConfig,
    particles: Vec<Particle>,
    renderable: Vec<RenderableParticle>,
    rng: R,
    next_id: u64,
    target_len: usize,
    zoom: f64,
    time_scale: f64,
}

impl ParticleSystem<ChaCha8Rng> {
    /// Create a deterministic system seeded from `seed`.
    #[must_use]
    pub fn seeded(config: ParticleConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> ParticleSystem<R> {
    #[must_use]
    pub fn with_rng(config: ParticleConfig, rng: R) -> Self {
        let zoom = config.reference_zoom;
        Self {
            target_len: config.pool_size_for_zoom(zoom),
            time_scale: config.time_scale_for_zoom(zoom),
            config,
            particles: Vec::new(),
            renderable: Vec::new(),
            rng,
            next_id: 0,
            zoom,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Adopt a new zoom level: resize the pool and rescale motion.
    pub fn set_zoom(&mut self, zoom: f64) {
        if !zoom.is_finite() || (zoom - self.zoom).abs() < f64::EPSILON {
            return;
        }
        self.zoom = zoom;
        self.target_len = self.config.pool_size_for_zoom(zoom);
        self.time_scale = self.config.time_scale_for_zoom(zoom);
        self.particles.truncate(self.target_len);
    }

    #[must_use]
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    #[must_use]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Advance every particle by `delta_seconds` through `grid`.
    ///
    /// Particles that age out or leave `viewport_bounds` by more than the
    /// edge margin are respawned at a random point inside the bounds with
    /// age 0. A non-finite or negative delta is treated as zero.
    pub fn step(&mut self, delta_seconds: f64, grid: &VectorFieldGrid, viewport_bounds: BoundingBox) {
        let dt = if delta_seconds.is_finite() {
            delta_seconds.max(0.0)
        } else {
            0.0
        };

        while self.particles.len() < self.target_len {
            let particle = spawn(&mut self.rng, &self.config, &viewport_bounds, self.next_id);
            self.next_id += 1;
            self.particles.push(particle);
        }

        let keep_inside = viewport_bounds.expanded(self.config.edge_margin);
        let scale = dt * self.time_scale;

        for particle in &mut self.particles {
            let wind = grid.sample_wind(&particle.position).sanitized();
            particle.position = particle.position.displaced(wind.vx * scale, wind.vy * scale);
            particle.age_seconds += dt;

            if particle.age_seconds >= particle.max_lifetime_seconds
                || !keep_inside.contains(&particle.position)
            {
                *particle = spawn(&mut self.rng, &self.config, &viewport_bounds, self.next_id);
                self.next_id += 1;
            }
        }
    }

    /// Project particle positions into screen space.
    pub fn project(&mut self, viewport: &dyn ViewportTransform) {
        self.renderable.clear();
        self.renderable.extend(self.particles.iter().map(|p| {
            let screen = viewport.screen_from_geo(&p.position);
            RenderableParticle {
                x: screen.x,
                y: screen.y,
                opacity: self.config.opacity(p.age_seconds, p.max_lifetime_seconds),
            }
        }));
    }

    /// Positions from the last [`project`](Self::project) call.
    #[must_use]
    pub fn renderable_positions(&self) -> &[RenderableParticle] {
        &self.renderable
    }

    /// Drop every particle and release the pool's memory.
    pub fn release(&mut self) {
        self.particles = Vec::new();
        self.renderable = Vec::new();
        self.target_len = 0;
    }
}

fn spawn<R: Rng>(rng: &mut R, config: &ParticleConfig, bounds: &BoundingBox, id: u64) -> Particle {
    let latitude = sample_range(rng, bounds.min_lat, bounds.max_lat);
    let longitude = sample_range(rng, bounds.min_lon, bounds.max_lon);
    let lifetime = sample_range(rng, config.min_lifetime_seconds, config.max_lifetime_seconds).max(0.1);

    Particle {
        id,
        position: GeoPoint::new(latitude, longitude),
        age_seconds: 0.0,
        max_lifetime_seconds: lifetime,
    }
}

fn sample_range<R: Rng>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}
