//! Short-range collision avoidance, stuck/blocked detection, and waypoint
//! detours.

use ordered_float::OrderedFloat;
use plaza_index::{NeighborhoodIndex, UniformGridIndex};
use rand::Rng;
use rand::rngs::SmallRng;

use crate::agent::Agent;
use crate::config::PlazaConfig;
use crate::registry::AgentKey;
use crate::view::NeighborView;
use crate::{PlanarVec, wrap_signed_angle};

/// Result of one steering pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteerOutput {
    /// Unit movement direction after avoidance, when the agent should move.
    pub direction: Option<PlanarVec>,
    /// The planner gave up on local detours; the caller should replan.
    pub force_replan: bool,
}

const DETOUR_OFFSETS: [f32; 7] = [
    0.0,
    std::f32::consts::FRAC_PI_6,
    -std::f32::consts::FRAC_PI_6,
    std::f32::consts::FRAC_PI_3,
    -std::f32::consts::FRAC_PI_3,
    std::f32::consts::FRAC_PI_2,
    -std::f32::consts::FRAC_PI_2,
];

fn count_obstructions(
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    point: PlanarVec,
    radius: f32,
) -> usize {
    let entries = view.entries();
    let mut count = 0;
    index.for_each_within((point.x, point.z), radius * radius, &mut |idx, _| {
        let entry = &entries[idx];
        if entry.key != self_key && entry.obstructs() {
            count += 1;
        }
    });
    count
}

fn path_is_blocked(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    from: PlanarVec,
    to: PlanarVec,
) -> bool {
    let samples = config.blocked_samples;
    let mut obstructed = 0usize;
    for i in 1..=samples {
        let t = i as f32 / (samples as f32 + 1.0);
        let sample = PlanarVec::new(
            from.x + (to.x - from.x) * t,
            from.z + (to.z - from.z) * t,
        );
        if count_obstructions(view, index, self_key, sample, config.blocked_obstruction_radius)
            > 0
        {
            obstructed += 1;
        }
    }
    obstructed as f32 > config.blocked_fraction * samples as f32
}

/// Evaluate the seven deflection candidates around the target bearing.
///
/// Returns `true` when a waypoint was installed; `false` means no candidate
/// beat the quality threshold and the caller should replan outright.
fn try_detour(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    agent: &mut Agent,
) -> bool {
    let position = agent.planar();
    let Some(toward) = position.direction_to(agent.target) else {
        return false;
    };
    let base_bearing = toward.bearing();

    let best = DETOUR_OFFSETS
        .iter()
        .map(|offset| {
            let bearing = wrap_signed_angle(base_bearing + offset);
            let candidate = position
                .plus(PlanarVec::from_bearing(bearing).scaled(config.detour_step))
                .clamped_to_radius(config.bounds_radius);
            let obstacles = count_obstructions(
                view,
                index,
                self_key,
                candidate,
                config.blocked_obstruction_radius,
            );
            let score = 10.0 * obstacles as f32 + 0.1 * candidate.distance_to(agent.target);
            (candidate, score)
        })
        .min_by_key(|(_, score)| OrderedFloat(*score));

    match best {
        Some((candidate, score)) if score <= config.detour_quality_threshold => {
            agent.waypoint = Some(candidate);
            true
        }
        _ => {
            agent.waypoint = None;
            false
        }
    }
}

/// One steering pass for a grounded, locomoting agent.
///
/// Mutates the agent's waypoint, escape target and progress timers, and
/// returns the blended movement direction. The blocked check runs before the
/// stuck timer and resets it when it fires, so only one of the two detour
/// paths can trigger per tick.
pub fn steer(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    agent: &mut Agent,
    dt: f32,
    rng: &mut SmallRng,
    allow_detour: bool,
) -> SteerOutput {
    let position = agent.planar();

    if let Some(waypoint) = agent.waypoint
        && position.distance_to(waypoint) < config.waypoint_clear_radius
    {
        agent.waypoint = None;
    }

    // Hard separation override: sidestep whoever is inside the personal
    // bubble and schedule a fast replan.
    let entries = view.entries();
    let mut nearest: Option<(usize, f32)> = None;
    index.for_each_within(
        (position.x, position.z),
        config.min_separation * config.min_separation,
        &mut |idx, dist_sq: OrderedFloat<f32>| {
            let entry = &entries[idx];
            if entry.key == self_key || !entry.obstructs() {
                return;
            }
            let dist_sq = dist_sq.into_inner();
            if nearest.is_none_or(|(_, best)| dist_sq < best) {
                nearest = Some((idx, dist_sq));
            }
        },
    );
    if let Some((idx, _)) = nearest {
        let offender = entries[idx].position;
        let away = offender
            .direction_to(position)
            .unwrap_or_else(|| PlanarVec::from_bearing(rng.random_range(0.0..std::f32::consts::TAU)));
        agent.target = position
            .plus(away.scaled(config.escape_distance))
            .clamped_to_radius(config.bounds_radius);
        agent.waypoint = None;
        agent.replan_timer = rng.random_range(0.5..1.0);
        agent.stuck_timer = 0.0;
        agent.last_distance_to_target = position.distance_to(agent.target);
        return SteerOutput {
            direction: Some(away),
            force_replan: false,
        };
    }

    let dist_to_target = position.distance_to(agent.target);
    let mut force_replan = false;
    let mut blocked_fired = false;

    agent.blocked_check_timer += dt;
    if agent.blocked_check_timer >= config.blocked_check_interval {
        agent.blocked_check_timer = 0.0;
        if allow_detour
            && dist_to_target > config.arrival_radius
            && path_is_blocked(config, view, index, self_key, position, agent.target)
        {
            if !try_detour(config, view, index, self_key, agent) {
                force_replan = true;
            }
            blocked_fired = true;
        }
    }

    // The blocked handler outranks the stuck timer: on a tick where it
    // fired, the timer is reset and accumulates nothing.
    let per_tick_progress = agent.last_distance_to_target - dist_to_target;
    if blocked_fired {
        agent.stuck_timer = 0.0;
    } else if dist_to_target > config.arrival_radius
        && per_tick_progress < config.stuck_min_progress
    {
        agent.stuck_timer += dt;
    } else {
        agent.stuck_timer = 0.0;
    }
    if agent.stuck_timer >= config.stuck_threshold {
        agent.stuck_timer = 0.0;
        if allow_detour && !try_detour(config, view, index, self_key, agent) {
            force_replan = true;
        }
    }
    agent.last_distance_to_target = dist_to_target;

    let goal = agent.current_goal();
    let Some(desired) = position.direction_to(goal) else {
        return SteerOutput {
            direction: None,
            force_replan,
        };
    };

    let mut blended = desired;
    let radius = config.avoidance_radius;
    index.for_each_within(
        (position.x, position.z),
        radius * radius,
        &mut |idx, dist_sq: OrderedFloat<f32>| {
            let entry = &entries[idx];
            if entry.key == self_key || !entry.obstructs() {
                return;
            }
            let dist = dist_sq.into_inner().sqrt().max(1e-3);
            let weight = (radius - dist) / radius;
            let away_x = (position.x - entry.position.x) / dist;
            let away_z = (position.z - entry.position.z) / dist;
            blended.x += away_x * weight * config.avoidance_strength;
            blended.z += away_z * weight * config.avoidance_strength;
        },
    );

    SteerOutput {
        direction: blended.normalized().or(Some(desired)),
        force_replan,
    }
}
