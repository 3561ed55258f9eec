//! Terrain height models evaluated by the CPU builder.
//!
//! Heights are radial displacements in planet units, sampled at a unit
//! direction from the planet centre.

use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use glam::DVec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;

/// How a planet's surface is shaped.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TerrainModel {
    /// A perfect sphere.
    Flat,
    Procedural(ProceduralTerrainModel),
    HeightMap(HeightMapTerrainModel),
}

impl TerrainModel {
    pub fn flat() -> Self {
        TerrainModel::Flat
    }

    /// Height above the sphere at `unit`, a normalized direction.
    pub fn height(&self, unit: DVec3, sphere_radius: f64) -> f64 {
        match self {
            TerrainModel::Flat => 0.0,
            TerrainModel::Procedural(model) => model.height(unit, sphere_radius),
            TerrainModel::HeightMap(model) => model.height(unit),
        }
    }
}

// =============================================================================
// Procedural
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContinentalCrust {
    /// Height of land above the ocean floor.
    pub elevation: f64,
    /// Share of the surface covered by land, in `[0, 1]`.
    pub fraction: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mountain {
    pub elevation: f64,
    /// Step height of terraces. Zero disables terracing.
    pub terrace_elevation: f64,
    /// Flattening of ridges, in `[0, 1]`.
    pub erosion: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Craters {
    /// Number of crater size classes. Zero disables craters.
    pub octave_count: u32,
    /// Probability that a cell has no crater, in `[0, 1]`.
    pub sparsity: f64,
}

/// Seeded noise terrain: continents, ridged mountains and craters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProceduralTerrainModel {
    pub seed: u64,
    pub continental_crust: ContinentalCrust,
    pub mountain: Mountain,
    pub craters: Craters,
}

impl Default for ProceduralTerrainModel {
    fn default() -> Self {
        Self {
            seed: 0,
            continental_crust: ContinentalCrust {
                elevation: 5e3,
                fraction: 0.3,
            },
            mountain: Mountain {
                elevation: 10e3,
                terrace_elevation: 0.0,
                erosion: 0.5,
            },
            craters: Craters {
                octave_count: 0,
                sparsity: 0.5,
            },
        }
    }
}

impl ProceduralTerrainModel {
    const CONTINENT_FREQUENCY: f64 = 1.5;
    const MOUNTAIN_FREQUENCY: f64 = 6.0;
    const CRATER_FREQUENCY: f64 = 4.0;
    /// Crater depth relative to its radius.
    const CRATER_DEPTH_RATIO: f64 = 0.1;

    pub fn height(&self, unit: DVec3, sphere_radius: f64) -> f64 {
        let seed = self.seed;

        let continent = fbm(unit * Self::CONTINENT_FREQUENCY, seed, 5);
        let sea_level = 1.0 - self.continental_crust.fraction.clamp(0.0, 1.0);
        let land = smoothstep(sea_level - 0.05, sea_level + 0.05, continent);
        let mut height = land * self.continental_crust.elevation;

        let ridge = ridged_fbm(unit * Self::MOUNTAIN_FREQUENCY, seed.wrapping_add(1), 4);
        let ridge = ridge.powf(1.0 + 2.0 * self.mountain.erosion.clamp(0.0, 1.0));
        let mut mountains = land * ridge * self.mountain.elevation;
        let step = self.mountain.terrace_elevation;
        if step > 0.0 {
            let terrace = (mountains / step).floor() * step;
            mountains = terrace + smoothstep(0.8, 1.0, (mountains - terrace) / step) * step;
        }
        height += mountains;

        height + self.crater_height(unit, sphere_radius)
    }

    fn crater_height(&self, unit: DVec3, sphere_radius: f64) -> f64 {
        let mut height = 0.0;
        for octave in 0..self.craters.octave_count {
            let frequency = Self::CRATER_FREQUENCY * 2f64.powi(octave as i32);
            let p = unit * frequency;
            let cell = p.floor();
            let salt = self.seed.wrapping_add(0x9e37 + octave as u64);

            if hash3(cell, salt) < self.craters.sparsity {
                continue;
            }

            // Centre in the middle half of the cell so the bowl never crosses it.
            let centre = cell
                + DVec3::new(
                    0.25 + 0.5 * hash3(cell, salt.wrapping_add(1)),
                    0.25 + 0.5 * hash3(cell, salt.wrapping_add(2)),
                    0.25 + 0.5 * hash3(cell, salt.wrapping_add(3)),
                );
            let radius = 0.25;
            let d = p.distance(centre) / radius;
            if d < 1.0 {
                let world_radius = radius / frequency * sphere_radius;
                height -= world_radius * Self::CRATER_DEPTH_RATIO * (1.0 - d * d);
            }
        }
        height
    }
}

fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Uniform value in `[0, 1)` for an integer lattice point.
fn hash3(cell: DVec3, seed: u64) -> f64 {
    let mut h = seed ^ 0x51_7c_c1_b7_27_22_0a_95;
    for c in [cell.x, cell.y, cell.z] {
        h ^= (c as i64) as u64;
        h = h.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        h ^= h >> 29;
    }
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^= h >> 32;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Trilinear value noise in `[0, 1)`.
fn value_noise(p: DVec3, seed: u64) -> f64 {
    let cell = p.floor();
    let f = p - cell;
    let w = f * f * (DVec3::splat(3.0) - 2.0 * f);

    let corner = |dx: f64, dy: f64, dz: f64| hash3(cell + DVec3::new(dx, dy, dz), seed);
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

    let x00 = lerp(corner(0.0, 0.0, 0.0), corner(1.0, 0.0, 0.0), w.x);
    let x10 = lerp(corner(0.0, 1.0, 0.0), corner(1.0, 1.0, 0.0), w.x);
    let x01 = lerp(corner(0.0, 0.0, 1.0), corner(1.0, 0.0, 1.0), w.x);
    let x11 = lerp(corner(0.0, 1.0, 1.0), corner(1.0, 1.0, 1.0), w.x);
    lerp(lerp(x00, x10, w.y), lerp(x01, x11, w.y), w.z)
}

/// Fractal sum of `octaves` value-noise layers, normalized to `[0, 1)`.
fn fbm(p: DVec3, seed: u64, octaves: u32) -> f64 {
    let mut sum = 0.0;
    let mut amplitude = 0.5;
    let mut total = 0.0;
    let mut frequency = 1.0;
    for octave in 0..octaves {
        sum += amplitude * value_noise(p * frequency, seed.wrapping_add(octave as u64));
        total += amplitude;
        amplitude *= 0.5;
        frequency *= 2.0;
    }
    if total > 0.0 {
        sum / total
    } else {
        0.0
    }
}

/// Ridged variant of [`fbm`]: sharp crests where the noise crosses one half.
fn ridged_fbm(p: DVec3, seed: u64, octaves: u32) -> f64 {
    let n = fbm(p, seed, octaves);
    let ridge = 1.0 - (2.0 * n - 1.0).abs();
    ridge * ridge
}

// =============================================================================
// Height map
// =============================================================================

/// Equirectangular grid of samples in `[0, 1]`.
///
/// Row 0 is the north pole (`+Y`), column 0 is longitude `-π` around `+Y`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawHeightMap"))]
pub struct HeightMap {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

/// Unchecked wire form; deserialized maps go through [`HeightMap::new`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawHeightMap {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawHeightMap> for HeightMap {
    type Error = TerrainError;

    fn try_from(raw: RawHeightMap) -> Result<Self, TerrainError> {
        HeightMap::new(raw.width, raw.height, raw.samples)
    }
}

impl HeightMap {
    pub fn new(width: usize, height: usize, samples: Vec<f32>) -> Result<Self, TerrainError> {
        if width == 0 || height == 0 {
            return Err(TerrainError::EmptyHeightMap);
        }
        if samples.len() != width * height {
            return Err(TerrainError::HeightMapSize {
                width,
                height,
                len: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn texel(&self, x: usize, y: usize) -> f64 {
        self.samples[y * self.width + x] as f64
    }

    /// Bilinear sample at a unit direction. Longitude wraps, latitude clamps.
    pub fn sample(&self, unit: DVec3) -> f64 {
        let longitude = unit.z.atan2(unit.x);
        let latitude = unit.y.clamp(-1.0, 1.0).asin();

        let u = (longitude / TAU + 0.5) * self.width as f64 - 0.5;
        let v = (0.5 - latitude / PI) * self.height as f64 - 0.5;

        let u0 = u.floor();
        let v0 = v.floor().max(0.0);
        let tu = u - u0;
        let tv = (v - v0).clamp(0.0, 1.0);

        let x0 = (u0 as i64).rem_euclid(self.width as i64) as usize;
        let x1 = (x0 + 1) % self.width;
        let y0 = (v0 as usize).min(self.height - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let top = self.texel(x0, y0) * (1.0 - tu) + self.texel(x1, y0) * tu;
        let bottom = self.texel(x0, y1) * (1.0 - tu) + self.texel(x1, y1) * tu;
        top * (1.0 - tv) + bottom * tv
    }
}

/// Externally supplied height map remapped to `[min_height, max_height]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeightMapTerrainModel {
    pub map: Arc<HeightMap>,
    pub min_height: f64,
    pub max_height: f64,
}

impl HeightMapTerrainModel {
    pub fn height(&self, unit: DVec3) -> f64 {
        self.min_height + self.map.sample(unit) * (self.max_height - self.min_height)
    }
}
