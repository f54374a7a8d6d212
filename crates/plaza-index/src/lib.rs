//! Spatial indexing abstractions for agent neighborhood queries.
//!
//! The simulation rebuilds an index from agent ground positions at the start
//! of every tick and then issues point-centered radius queries from the
//! target selector, the steering planner, and the thrown-body collision
//! test. Elevation is ignored; every query is a "pole" test on the x/z
//! plane.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from agent ground positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit every indexed agent within `radius_sq` of an arbitrary point.
    ///
    /// The visitor receives the dense index the position was inserted at and
    /// the squared distance from `center`.
    fn for_each_within(
        &self,
        center: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

/// Uniform grid bucketing agents by cell coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing agents.
    pub cell_size: f32,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
    #[serde(skip)]
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            positions: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    /// Number of positions currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when no positions are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn cell_of(&self, x: f32, z: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (z / self.cell_size).floor() as i32,
        )
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if self.cell_size <= 0.0 || !self.cell_size.is_finite() {
            return Err(IndexError::InvalidConfig(
                "cell_size must be positive and finite",
            ));
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        for (idx, &(x, z)) in positions.iter().enumerate() {
            if !x.is_finite() || !z.is_finite() {
                continue;
            }
            let cell = self.cell_of(x, z);
            self.buckets.entry(cell).or_default().push(idx);
        }
        Ok(())
    }

    fn for_each_within(
        &self,
        center: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if radius_sq < 0.0 || !radius_sq.is_finite() {
            return;
        }
        let radius = radius_sq.sqrt();
        let (min_cx, min_cz) = self.cell_of(center.0 - radius, center.1 - radius);
        let (max_cx, max_cz) = self.cell_of(center.0 + radius, center.1 + radius);
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                let Some(bucket) = self.buckets.get(&(cx, cz)) else {
                    continue;
                };
                for &idx in bucket {
                    let (x, z) = self.positions[idx];
                    let dx = x - center.0;
                    let dz = z - center.1;
                    let dist_sq = dx * dx + dz * dz;
                    if dist_sq <= radius_sq {
                        visitor(idx, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}
