//! Density-aware movement target selection.

use ordered_float::OrderedFloat;
use plaza_index::{NeighborhoodIndex, UniformGridIndex};
use rand::Rng;
use rand::rngs::SmallRng;

use crate::PlanarVec;
use crate::config::PlazaConfig;
use crate::registry::AgentKey;
use crate::view::NeighborView;

/// Crowding score for a prospective target point, before tie-break jitter.
///
/// Lower is better. Combines soft repulsion from other agents' current
/// positions, a heavier penalty around other agents' chosen targets (so two
/// agents never converge on the same empty spot), and a bias away from the
/// visually crowded negative-z region.
pub(crate) fn score_point(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    point: PlanarVec,
) -> f32 {
    let density_radius = config.density_radius;
    let mut score = 0.0_f32;

    let entries = view.entries();
    index.for_each_within(
        (point.x, point.z),
        density_radius * density_radius,
        &mut |idx, dist_sq: OrderedFloat<f32>| {
            let entry = &entries[idx];
            if entry.key == self_key || !entry.obstructs() {
                return;
            }
            let dist = dist_sq.into_inner().sqrt();
            score += (density_radius - dist).max(0.0) / density_radius;
        },
    );

    let avoid_radius = config.target_avoid_radius;
    for entry in entries {
        if entry.key == self_key || entry.parked || entry.dying {
            continue;
        }
        let dist = point.distance_to(entry.target);
        if dist < avoid_radius {
            score += 3.0 * (avoid_radius - dist) / avoid_radius;
        }
    }

    if point.z < 0.0 {
        score += 2.0 * (-point.z / config.bounds_radius).min(1.0);
    }

    score
}

/// Sample an outward-biased candidate point around the origin.
fn sample_candidate(config: &PlazaConfig, rng: &mut SmallRng) -> PlanarVec {
    let max_dist = config.bounds_radius;
    let angle = rng.random_range(0.0..std::f32::consts::TAU);
    let radius = if rng.random::<f32>() < 0.6 {
        rng.random_range(0.3 * max_dist..max_dist)
    } else {
        rng.random_range(0.3 * max_dist..0.7 * max_dist)
    };
    PlanarVec::from_bearing(angle).scaled(radius)
}

/// Pick the next movement target for the agent at `position`.
///
/// Candidates too close to the agent are rejected up front; survivors are
/// scored, the lowest 20% kept, near-ties within 10% of the best collapsed,
/// and the winner maximizes `0.7·distance-from-agent + 0.3·distance-from-
/// origin` so agents prefer long outward paths over short shuffles.
#[must_use]
pub fn select_target(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    self_key: AgentKey,
    position: PlanarVec,
    rng: &mut SmallRng,
) -> PlanarVec {
    let mut scored: Vec<(PlanarVec, f32)> = Vec::with_capacity(config.target_candidates);
    for _ in 0..config.target_candidates {
        let candidate = sample_candidate(config, rng);
        if candidate.distance_to(position) < config.min_target_distance {
            continue;
        }
        let jitter = rng.random_range(0.0..0.2);
        let score = score_point(config, view, index, self_key, candidate) * (1.0 + jitter);
        scored.push((candidate, score));
    }

    if scored.is_empty() {
        // Nothing survived the distance filter; fall back to the outer half.
        let angle = rng.random_range(0.0..std::f32::consts::TAU);
        let radius = rng.random_range(0.5 * config.bounds_radius..config.bounds_radius);
        return PlanarVec::from_bearing(angle).scaled(radius);
    }

    scored.sort_by_key(|(_, score)| OrderedFloat(*score));
    let keep = (scored.len() / 5).max(1);
    let best = scored[0].1;
    let cutoff = best * 1.1 + 1e-6;

    scored
        .iter()
        .take(keep)
        .filter(|(_, score)| *score <= cutoff)
        .max_by_key(|(candidate, _)| {
            let preference =
                0.7 * candidate.distance_to(position) + 0.3 * candidate.length();
            OrderedFloat(preference)
        })
        .map_or(scored[0].0, |(candidate, _)| *candidate)
}

/// Draw the next randomized replan delay.
#[must_use]
pub fn next_replan_interval(config: &PlazaConfig, rng: &mut SmallRng) -> f32 {
    rng.random_range(config.replan_interval.0..=config.replan_interval.1)
}
