//! Static configuration for a plaza simulation.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PlanarVec;

/// Errors raised when a configuration cannot drive a simulation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Tunables for the crowd simulation.
///
/// Distances are world units, durations are seconds unless a field name says
/// otherwise. The defaults reproduce the tuned feel of the original crowd:
/// visually plausible, not physically accurate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlazaConfig {
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Fixed simulation cadence in steps per second.
    pub tick_rate_hz: f32,
    /// Cap on catch-up steps executed by a single `advance` call.
    pub max_steps_per_advance: u32,

    /// Radius of the play area; every locomotion target stays inside it.
    pub bounds_radius: f32,
    /// Distance from the origin past which an airborne agent dies.
    pub kill_radius: f32,
    /// Inner radius of the spawn/respawn annulus.
    pub spawn_radius_min: f32,
    /// Outer radius of the spawn/respawn annulus.
    pub spawn_radius_max: f32,

    /// Reference locomotion speed in units per second.
    pub base_speed: f32,
    /// Walking fraction of the base speed.
    pub walk_speed_factor: f32,
    /// Speed bonus applied while seeking a victim.
    pub seek_speed_factor: f32,
    /// Flee speed multiplier while running away.
    pub flee_speed_factor: f32,
    /// Speed multiplier for agents marching into formation.
    pub formation_speed_factor: f32,
    /// Speed multiplier for agents exiting during formation mode.
    pub exit_speed_factor: f32,
    /// Exponential turn-smoothing rate (per second).
    pub turn_rate: f32,

    /// Distance at which an agent counts as having arrived at its target.
    pub arrival_radius: f32,
    /// Candidate points rejected closer than this to the agent.
    pub min_target_distance: f32,
    /// Number of candidate points sampled per replan.
    pub target_candidates: usize,
    /// Radius of the crowding penalty around other agents' positions.
    pub density_radius: f32,
    /// Radius of the heavier penalty around other agents' chosen targets.
    pub target_avoid_radius: f32,
    /// Randomized replan cadence, seconds.
    pub replan_interval: (f32, f32),

    /// Radius of continuous repulsion from other agents.
    pub avoidance_radius: f32,
    /// Strength of the summed repulsion vector.
    pub avoidance_strength: f32,
    /// Hard minimum separation triggering an escape target.
    pub min_separation: f32,
    /// How far the escape target is placed from the offender.
    pub escape_distance: f32,
    /// Seconds of sub-threshold progress before an agent counts as stuck.
    pub stuck_threshold: f32,
    /// Minimum per-tick progress toward the target, world units.
    pub stuck_min_progress: f32,
    /// Cadence of the path-blocked sampling check.
    pub blocked_check_interval: f32,
    /// Number of sample points along the line to the target.
    pub blocked_samples: usize,
    /// Obstruction radius around each sample point.
    pub blocked_obstruction_radius: f32,
    /// Fraction of obstructed samples that marks the path blocked.
    pub blocked_fraction: f32,
    /// Distance the deflection candidates are projected from the agent.
    pub detour_step: f32,
    /// Detour scores above this abandon steering and force a full replan.
    pub detour_quality_threshold: f32,
    /// Waypoints are dropped once the agent is this close to them.
    pub waypoint_clear_radius: f32,

    /// Idle hold after arrival, seconds.
    pub idle_hold: (f32, f32),
    /// Post-hit idle hold, seconds.
    pub post_hit_idle_hold: (f32, f32),
    /// Wave duration on spawn or after a user hit, seconds.
    pub wave_hold: (f32, f32),
    /// Committed attack animation length, seconds.
    pub hit_duration: f32,
    /// Flee duration, seconds.
    pub flee_hold: (f32, f32),
    /// Fleeing stops early once the aggressor is this far away.
    pub flee_max_distance: f32,
    /// Cadence of the seek roll, seconds.
    pub seek_roll_interval: f32,
    /// Probability of entering Seeking per roll.
    pub seek_probability: f64,
    /// Pursuit is abandoned past this distance.
    pub seek_abandon_distance: f32,
    /// Range within which a hit lands.
    pub hit_range: f32,
    /// Half-angle of the facing cone required to land a hit, radians.
    pub hit_facing_cone: f32,

    /// Horizontal knockback launch speed range, units per second.
    pub knockback_speed: (f32, f32),
    /// Vertical knockback launch speed range, units per second.
    pub knockback_lift: (f32, f32),
    /// Gravity applied to knockback, units per second per tick.
    pub knockback_gravity_per_tick: f32,
    /// Minimum airborne time before a knockback can settle, seconds.
    pub knockback_min_duration: f32,

    /// Smoothing factor for the drag pointer velocity estimate.
    pub throw_smoothing_alpha: f32,
    /// Multiplier applied to the smoothed velocity on release.
    pub throw_release_scale: f32,
    /// Scaled release speeds below this become a gentle drop instead.
    pub throw_threshold: f32,
    /// Gravity while thrown, units per second squared.
    pub throw_gravity: f32,
    /// Horizontal air-drag coefficient; each tick multiplies by (1 − c·dt).
    pub throw_drag: f32,
    /// Elevation clamp while thrown.
    pub throw_max_height: f32,
    /// Horizontal speeds below this snap to zero.
    pub throw_min_horizontal_speed: f32,
    /// Mid-air "pole" collision radius, ignoring height.
    pub throw_collision_radius: f32,

    /// Float height while dragged.
    pub drag_height: f32,
    /// Pick radius for pointer-down agent selection.
    pub drag_pick_radius: f32,
    /// Pointer travel before a press becomes a drag rather than a click.
    pub drag_slop: f32,
    /// Initial descent speed of a gentle drop, units per second.
    pub gentle_drop_speed: f32,
    /// Constant deceleration of the gentle drop descent.
    pub gentle_drop_decel: f32,

    /// Length of the fade/fall death cycle, seconds.
    pub death_duration: f32,
    /// Fixed camera bearing agents face when waving or holding formation.
    pub camera_bearing: f32,
    /// Hover highlight pick radius.
    pub hover_radius: f32,

    /// Grid spacing between formation slots.
    pub formation_spacing: f32,
    /// Distance at which a marching agent snaps into its slot.
    pub formation_arrive_radius: f32,
    /// Bearing of the fixed lateral exit direction.
    pub exit_bearing: f32,
    /// How far past the bounds the exit targets are placed.
    pub exit_distance: f32,
    /// Depth jitter applied to exit targets to avoid stacking.
    pub exit_depth_jitter: f32,
    /// Fade-out (and fade-in) duration around parking, seconds.
    pub exit_fade: f32,
}

impl Default for PlazaConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            tick_rate_hz: 24.0,
            max_steps_per_advance: 5,
            bounds_radius: 400.0,
            kill_radius: 500.0,
            spawn_radius_min: 150.0,
            spawn_radius_max: 350.0,
            base_speed: 30.0,
            walk_speed_factor: 0.85,
            seek_speed_factor: 1.1,
            flee_speed_factor: 1.3,
            formation_speed_factor: 5.0,
            exit_speed_factor: 8.0,
            turn_rate: 8.0,
            arrival_radius: 10.0,
            min_target_distance: 40.0,
            target_candidates: 25,
            density_radius: 60.0,
            target_avoid_radius: 50.0,
            replan_interval: (4.0, 9.0),
            avoidance_radius: 27.5,
            avoidance_strength: 1.5,
            min_separation: 8.0,
            escape_distance: 50.0,
            stuck_threshold: 2.0,
            stuck_min_progress: 0.5,
            blocked_check_interval: 0.5,
            blocked_samples: 5,
            blocked_obstruction_radius: 40.0,
            blocked_fraction: 0.3,
            detour_step: 60.0,
            detour_quality_threshold: 30.0,
            waypoint_clear_radius: 20.0,
            idle_hold: (2.0, 5.0),
            post_hit_idle_hold: (2.0, 4.0),
            wave_hold: (4.0, 6.0),
            hit_duration: 0.5,
            flee_hold: (6.0, 10.0),
            flee_max_distance: 300.0,
            seek_roll_interval: 5.0,
            seek_probability: 0.008,
            seek_abandon_distance: 250.0,
            hit_range: 4.0,
            hit_facing_cone: std::f32::consts::FRAC_PI_6,
            knockback_speed: (15.0, 22.0),
            knockback_lift: (18.0, 22.0),
            knockback_gravity_per_tick: 0.5,
            knockback_min_duration: 0.8,
            throw_smoothing_alpha: 0.3,
            throw_release_scale: 1.5,
            throw_threshold: 2.0,
            throw_gravity: 9.8,
            throw_drag: 2.0,
            throw_max_height: 8.0,
            throw_min_horizontal_speed: 0.1,
            throw_collision_radius: 8.0,
            drag_height: 6.0,
            drag_pick_radius: 12.0,
            drag_slop: 1.5,
            gentle_drop_speed: 6.0,
            gentle_drop_decel: 4.0,
            death_duration: 1.2,
            camera_bearing: std::f32::consts::FRAC_PI_4,
            hover_radius: 10.0,
            formation_spacing: 40.0,
            formation_arrive_radius: 0.3,
            exit_bearing: 0.0,
            exit_distance: 900.0,
            exit_depth_jitter: 120.0,
            exit_fade: 0.5,
        }
    }
}

impl PlazaConfig {
    /// Validate invariants the simulation relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate_hz > 0.0) {
            return Err(ConfigError::Invalid("tick_rate_hz must be positive"));
        }
        if self.max_steps_per_advance == 0 {
            return Err(ConfigError::Invalid(
                "max_steps_per_advance must be non-zero",
            ));
        }
        if !(self.bounds_radius > 0.0) || !(self.kill_radius >= self.bounds_radius) {
            return Err(ConfigError::Invalid(
                "kill_radius must be at least bounds_radius, both positive",
            ));
        }
        if !(self.spawn_radius_min > 0.0) || self.spawn_radius_min >= self.spawn_radius_max {
            return Err(ConfigError::Invalid(
                "spawn annulus requires 0 < min < max",
            ));
        }
        if self.spawn_radius_max > self.bounds_radius {
            return Err(ConfigError::Invalid(
                "spawn annulus must fit inside bounds_radius",
            ));
        }
        if !(self.base_speed > 0.0) {
            return Err(ConfigError::Invalid("base_speed must be positive"));
        }
        if self.target_candidates == 0 || self.blocked_samples == 0 {
            return Err(ConfigError::Invalid(
                "sampling counts must be non-zero",
            ));
        }
        for (name, range) in [
            ("replan_interval", self.replan_interval),
            ("idle_hold", self.idle_hold),
            ("post_hit_idle_hold", self.post_hit_idle_hold),
            ("wave_hold", self.wave_hold),
            ("flee_hold", self.flee_hold),
            ("knockback_speed", self.knockback_speed),
            ("knockback_lift", self.knockback_lift),
        ] {
            if !(range.0 > 0.0) || range.0 > range.1 {
                let _ = name;
                return Err(ConfigError::Invalid(
                    "duration/speed ranges require 0 < low <= high",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.throw_smoothing_alpha) {
            return Err(ConfigError::Invalid(
                "throw_smoothing_alpha must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Seconds of simulated time per fixed step.
    #[must_use]
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate_hz
    }

    /// Horizontal unit vector pointing from the fixed camera into the scene.
    ///
    /// User-initiated hits push the victim along this vector.
    #[must_use]
    pub fn camera_forward(&self) -> PlanarVec {
        PlanarVec::from_bearing(self.camera_bearing).scaled(-1.0)
    }

    /// Build the simulation RNG, honoring `rng_seed` when present.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        PlazaConfig::default().validate().expect("default config");
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        let config = PlazaConfig {
            tick_rate_hz: 0.0,
            ..PlazaConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn spawn_annulus_must_fit_bounds() {
        let config = PlazaConfig {
            spawn_radius_max: 1_000.0,
            ..PlazaConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn camera_forward_points_away_from_camera() {
        let config = PlazaConfig::default();
        let forward = config.camera_forward();
        assert!((forward.length() - 1.0).abs() < 1e-5);
        assert!(forward.x < 0.0 && forward.z < 0.0);
    }
}
