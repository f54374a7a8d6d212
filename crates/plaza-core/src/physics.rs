//! Transient physics overrides: knockback, throw, gentle drop, and the
//! fade/fall death cycle.
//!
//! These are deliberately simplified integrators tuned for visual
//! plausibility. Knockback gravity is expressed per tick (matching the
//! original tuning), throw gravity per second.

use ordered_float::OrderedFloat;
use plaza_index::{NeighborhoodIndex, UniformGridIndex};
use rand::Rng;
use rand::rngs::SmallRng;

use crate::agent::GentleDrop;
use crate::config::PlazaConfig;
use crate::registry::AgentKey;
use crate::view::NeighborView;
use crate::{PlanarVec, Vec3};

/// Initial knockback velocity for a hit along `direction`.
#[must_use]
pub fn launch_velocity(direction: PlanarVec, config: &PlazaConfig, rng: &mut SmallRng) -> Vec3 {
    let speed = rng.random_range(config.knockback_speed.0..=config.knockback_speed.1);
    let lift = rng.random_range(config.knockback_lift.0..=config.knockback_lift.1);
    Vec3::new(direction.x * speed, lift, direction.z * speed)
}

/// Advance a knockback by one tick.
///
/// Returns `true` once the agent has settled: on the ground with the
/// minimum airborne duration elapsed, which guarantees a visible arc even
/// for instantaneous hits.
pub fn integrate_knockback(
    position: &mut Vec3,
    velocity: &mut Vec3,
    elapsed: &mut f32,
    config: &PlazaConfig,
    dt: f32,
) -> bool {
    *elapsed += dt;
    position.x += velocity.x * dt;
    position.z += velocity.z * dt;
    position.y += velocity.y * dt;
    velocity.y -= config.knockback_gravity_per_tick;
    if position.y <= 0.0 {
        position.y = 0.0;
        if *elapsed >= config.knockback_min_duration {
            return true;
        }
    }
    false
}

/// What one tick of ballistic flight produced.
#[derive(Debug, Clone, Default)]
pub struct ThrowTick {
    /// The body reached the ground this tick.
    pub landed: bool,
    /// The body crossed the kill radius; the thrown agent itself dies.
    pub edge_exit: bool,
    /// Agents clipped by the height-ignoring pole test this tick.
    pub struck: Vec<AgentKey>,
}

/// Advance a thrown body by one tick.
pub fn integrate_thrown(
    position: &mut Vec3,
    velocity: &mut Vec3,
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    dt: f32,
) -> ThrowTick {
    let mut outcome = ThrowTick::default();

    velocity.y -= config.throw_gravity * dt;
    let drag = (1.0 - config.throw_drag * dt).max(0.0);
    velocity.x *= drag;
    velocity.z *= drag;
    let horizontal_speed = (velocity.x * velocity.x + velocity.z * velocity.z).sqrt();
    if horizontal_speed < config.throw_min_horizontal_speed {
        velocity.x = 0.0;
        velocity.z = 0.0;
    }

    position.x += velocity.x * dt;
    position.z += velocity.z * dt;
    position.y += velocity.y * dt;
    if position.y > config.throw_max_height {
        position.y = config.throw_max_height;
        velocity.y = 0.0;
    }

    let planar = position.planar();
    if planar.length() > config.kill_radius {
        outcome.edge_exit = true;
        return outcome;
    }

    if position.y > 0.0 {
        let entries = view.entries();
        let radius = config.throw_collision_radius;
        index.for_each_within(
            (planar.x, planar.z),
            radius * radius,
            &mut |idx, _dist: OrderedFloat<f32>| {
                let entry = &entries[idx];
                if entry.key != self_key && entry.strikeable() {
                    outcome.struck.push(entry.key);
                }
            },
        );
    }

    if position.y <= 0.0 {
        position.y = 0.0;
        outcome.landed = true;
    }
    outcome
}

/// Advance a gentle drop by one tick; returns `true` once grounded.
///
/// The descent decelerates but never below a floor speed, so the drop
/// always terminates.
pub fn integrate_gentle_drop(
    position: &mut Vec3,
    drop: &mut GentleDrop,
    config: &PlazaConfig,
    dt: f32,
) -> bool {
    position.y -= drop.vy * dt;
    drop.vy = (drop.vy - config.gentle_drop_decel * dt).max(1.0);
    if position.y <= 0.0 {
        position.y = 0.0;
        return true;
    }
    false
}

fn ease_out_cubic(t: f32) -> f32 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

/// Advance the death cycle by one tick; returns `true` when the fade is
/// complete and the agent should respawn.
pub fn integrate_dying(
    progress: &mut f32,
    opacity: &mut f32,
    fall_pitch: &mut f32,
    config: &PlazaConfig,
    dt: f32,
) -> bool {
    *progress += dt / config.death_duration;
    *opacity = (1.0 - *progress).clamp(0.0, 1.0);
    *fall_pitch = ease_out_cubic(*progress) * std::f32::consts::FRAC_PI_2;
    *progress >= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use rand::SeedableRng;

    fn empty_scene() -> (NeighborView, UniformGridIndex) {
        let registry = AgentRegistry::new();
        let view = NeighborView::capture(&registry);
        let mut index = UniformGridIndex::default();
        index.rebuild(&view.ground_positions()).expect("rebuild");
        (view, index)
    }

    #[test]
    fn knockback_never_settles_before_minimum_duration() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let mut position = Vec3::new(0.0, 0.0, 0.0);
        // Downward launch grounds immediately, but must still hold airborne
        // state until the minimum duration elapses.
        let mut velocity = Vec3::new(5.0, -10.0, 0.0);
        let mut elapsed = 0.0;

        let mut ticks = 0u32;
        while !integrate_knockback(&mut position, &mut velocity, &mut elapsed, &config, dt) {
            ticks += 1;
            assert!(ticks < 10_000, "knockback never settled");
        }
        assert!(
            elapsed + 1e-6 >= config.knockback_min_duration,
            "settled after {elapsed}s"
        );
        assert_eq!(position.y, 0.0);
    }

    #[test]
    fn knockback_arc_rises_then_grounds() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let mut position = Vec3::default();
        let mut velocity = Vec3::new(18.0, 20.0, 0.0);
        let mut elapsed = 0.0;

        integrate_knockback(&mut position, &mut velocity, &mut elapsed, &config, dt);
        assert!(position.y > 0.0);

        let mut ticks = 0u32;
        while !integrate_knockback(&mut position, &mut velocity, &mut elapsed, &config, dt) {
            ticks += 1;
            assert!(ticks < 10_000, "knockback never settled");
        }
        assert!(position.x > 0.0);
    }

    #[test]
    fn thrown_height_is_clamped_and_drag_bleeds_speed() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let (view, index) = empty_scene();
        let mut position = Vec3::new(0.0, config.drag_height, 0.0);
        let mut velocity = Vec3::new(40.0, 30.0, 0.0);

        let first = integrate_thrown(
            &mut position,
            &mut velocity,
            &config,
            &view,
            &index,
            AgentKey::default(),
            dt,
        );
        assert!(!first.landed && !first.edge_exit);
        assert!(position.y <= config.throw_max_height + 1e-6);
        assert!(velocity.x < 40.0);
    }

    #[test]
    fn thrown_body_lands_once_velocity_decays() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let (view, index) = empty_scene();
        let mut position = Vec3::new(0.0, config.drag_height, 0.0);
        let mut velocity = Vec3::new(10.0, 0.0, 0.0);

        let mut ticks = 0u32;
        loop {
            let tick = integrate_thrown(
                &mut position,
                &mut velocity,
                &config,
                &view,
                &index,
                AgentKey::default(),
                dt,
            );
            if tick.landed {
                break;
            }
            ticks += 1;
            assert!(ticks < 10_000, "thrown body never landed");
        }
        assert_eq!(position.y, 0.0);
        assert!(velocity.x.abs() < 1.0, "drag should have bled speed");
    }

    #[test]
    fn thrown_body_dies_at_the_edge() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let (view, index) = empty_scene();
        let mut position = Vec3::new(config.kill_radius - 1.0, 4.0, 0.0);
        let mut velocity = Vec3::new(200.0, 5.0, 0.0);

        let tick = integrate_thrown(
            &mut position,
            &mut velocity,
            &config,
            &view,
            &index,
            AgentKey::default(),
            dt,
        );
        assert!(tick.edge_exit);
    }

    #[test]
    fn pole_collision_reports_struck_agents() {
        let config = PlazaConfig::default();
        let mut rng = SmallRng::seed_from_u64(8);
        let mut registry = AgentRegistry::new();
        let victim = registry.add("victim", "c", &config, &mut rng).expect("add");
        {
            let agent = registry.get_mut(victim).expect("agent");
            agent.position = Vec3::new(50.0, 0.0, 0.0);
            agent.state = crate::agent::AgentState::Walking { drop: None };
        }
        let view = NeighborView::capture(&registry);
        let mut index = UniformGridIndex::default();
        index.rebuild(&view.ground_positions()).expect("rebuild");

        let dt = config.dt();
        let mut position = Vec3::new(48.0, 6.0, 0.0);
        let mut velocity = Vec3::new(5.0, 0.0, 0.0);
        let tick = integrate_thrown(
            &mut position,
            &mut velocity,
            &config,
            &view,
            &index,
            AgentKey::default(),
            dt,
        );
        assert_eq!(tick.struck, vec![victim]);
    }

    #[test]
    fn gentle_drop_reaches_the_ground() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let mut position = Vec3::new(0.0, config.drag_height, 0.0);
        let mut drop = GentleDrop {
            vy: config.gentle_drop_speed,
        };
        let mut ticks = 0u32;
        while !integrate_gentle_drop(&mut position, &mut drop, &config, dt) {
            ticks += 1;
            assert!(ticks < 1_000, "drop never grounded");
        }
        assert_eq!(position.y, 0.0);
    }

    #[test]
    fn death_cycle_fades_and_completes_on_schedule() {
        let config = PlazaConfig::default();
        let dt = config.dt();
        let mut progress = 0.0;
        let mut opacity = 1.0;
        let mut fall_pitch = 0.0;

        let mut elapsed = 0.0;
        while !integrate_dying(&mut progress, &mut opacity, &mut fall_pitch, &config, dt) {
            elapsed += dt;
            assert!(elapsed < 5.0, "death cycle never completed");
        }
        elapsed += dt;
        assert!((elapsed - config.death_duration).abs() <= dt + 1e-6);
        assert!(opacity <= 1e-6);
        assert!((fall_pitch - std::f32::consts::FRAC_PI_2).abs() < 1e-3);
    }
}
