//! Core behavior simulation for the plaza crowd.
//!
//! Dozens of autonomous characters wander a circular play area: they pick
//! crowd-aware movement targets, steer around each other, wave, brawl, get
//! picked up and thrown, die and respawn, and can be choreographed into a
//! grid formation. Rendering, asset management, roster transport and input
//! capture all live outside this crate; the host feeds wall-clock time,
//! roster diffs and world-space pointer events in, and reads per-agent
//! snapshots back out each tick.

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod formation;
pub mod interact;
pub mod physics;
pub mod registry;
pub mod sim;
pub mod steering;
pub mod target;
pub mod view;

pub use agent::{
    Agent, AgentState, FormationRole, GentleDrop, KnockCause, Pose, PoseKind, StateKind,
};
pub use config::{ConfigError, PlazaConfig};
pub use formation::FormationChoreographer;
pub use interact::InteractionController;
pub use registry::{AgentKey, AgentRegistry, RosterEntry, SyncOutcome};
pub use sim::{AgentFault, AgentSnapshot, AgentUpdateError, Simulation, StateSummary, TickReport};
pub use view::NeighborView;

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// World-space position with a transient elevation component.
///
/// Ground movement is confined to the x/z plane; `y` is only non-zero while
/// an agent is dragged, thrown, or knocked into the air.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Ground-plane projection.
    #[must_use]
    pub const fn planar(self) -> PlanarVec {
        PlanarVec {
            x: self.x,
            z: self.z,
        }
    }
}

/// A point or direction on the ground plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanarVec {
    pub x: f32,
    pub z: f32,
}

impl PlanarVec {
    /// Construct a new planar vector.
    #[must_use]
    pub const fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance_to(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Unit vector pointing at `other`, or `None` when the points coincide
    /// within the guard distance (protects every downstream division).
    #[must_use]
    pub fn direction_to(self, other: Self) -> Option<Self> {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        let len = (dx * dx + dz * dz).sqrt();
        if len < 1e-4 {
            return None;
        }
        Some(Self::new(dx / len, dz / len))
    }

    /// Normalized copy, or `None` for a near-zero vector.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len < 1e-4 {
            return None;
        }
        Some(Self::new(self.x / len, self.z / len))
    }

    /// Scale by a scalar.
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.z * factor)
    }

    /// Component-wise sum.
    #[must_use]
    pub fn plus(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.z + other.z)
    }

    /// Yaw (radians) of this direction, measured on the ground plane.
    #[must_use]
    pub fn bearing(self) -> f32 {
        self.z.atan2(self.x)
    }

    /// Unit vector for a yaw angle.
    #[must_use]
    pub fn from_bearing(bearing: f32) -> Self {
        Self::new(bearing.cos(), bearing.sin())
    }

    /// Clamp the point to lie within `radius` of the origin.
    #[must_use]
    pub fn clamped_to_radius(self, radius: f32) -> Self {
        let len = self.length();
        if len <= radius || len < 1e-4 {
            return self;
        }
        self.scaled(radius / len)
    }
}

/// Normalize an angle to the (−π, π] interval.
#[must_use]
pub fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Smallest signed rotation taking `from` to `to`.
#[must_use]
pub fn angle_between(from: f32, to: f32) -> f32 {
    wrap_signed_angle(to - from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_signed_angle_stays_in_half_open_interval() {
        for raw in [-12.0_f32, -HALF_TURN, 0.0, HALF_TURN, 9.5, 100.0] {
            let wrapped = wrap_signed_angle(raw);
            assert!(wrapped > -HALF_TURN && wrapped <= HALF_TURN, "raw={raw}");
        }
        assert_eq!(wrap_signed_angle(f32::NAN), 0.0);
    }

    #[test]
    fn angle_between_picks_short_way_round() {
        let delta = angle_between(3.0, -3.0);
        assert!(delta.abs() < 1.0, "delta={delta}");
    }

    #[test]
    fn direction_to_guards_coincident_points() {
        let p = PlanarVec::new(4.0, -2.0);
        assert!(p.direction_to(p).is_none());
        let dir = p.direction_to(PlanarVec::new(4.0, 8.0)).expect("direction");
        assert!((dir.x).abs() < 1e-6 && (dir.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn clamped_to_radius_preserves_bearing() {
        let p = PlanarVec::new(300.0, 400.0).clamped_to_radius(100.0);
        assert!((p.length() - 100.0).abs() < 1e-3);
        assert!((p.x - 60.0).abs() < 1e-3 && (p.z - 80.0).abs() < 1e-3);
    }
}
