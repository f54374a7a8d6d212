//! The simulation facade: fixed-cadence clock, per-tick agent dispatch, and
//! the read-only snapshot surface for the host.

use std::collections::BTreeMap;

use plaza_index::{NeighborhoodIndex, UniformGridIndex};
use rand::Rng;
use rand::rngs::SmallRng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::agent::{
    Agent, AgentState, DespawnPhase, FormationRole, KnockCause, Pose, StateKind, pose_for,
};
use crate::config::{ConfigError, PlazaConfig};
use crate::formation::{FormationChoreographer, exit_target};
use crate::interact::InteractionController;
use crate::physics;
use crate::registry::{AgentKey, AgentRegistry, RosterEntry, SyncOutcome};
use crate::steering::{self, SteerOutput};
use crate::target;
use crate::view::NeighborView;
use crate::{PlanarVec, Tick, Vec3, angle_between, wrap_signed_angle};

/// Failure confined to a single agent's update.
///
/// Faults never abort the tick; the offending agent is neutralized and the
/// fault reported so the host can log it.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum AgentUpdateError {
    /// Position or facing left the finite range; the agent was respawned.
    #[error("non-finite {field} detected")]
    NumericFault { field: &'static str },
}

/// One neutralized agent failure, attributed by id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentFault {
    pub id: String,
    pub error: AgentUpdateError,
}

/// What a single `advance` call did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Fixed steps executed by this call.
    pub steps: u32,
    /// Tick counter after the call.
    pub tick: Tick,
    /// Per-agent faults neutralized during the executed steps.
    pub faults: Vec<AgentFault>,
    /// Simulated time discarded because the catch-up cap was hit.
    pub discarded_seconds: f32,
}

/// Per-agent read-only snapshot handed to the external renderer.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub cluster_id: String,
    pub position: Vec3,
    pub facing: f32,
    pub state: StateKind,
    pub pose: Pose,
    pub animation_clock: f32,
    pub opacity: f32,
    pub fall_pitch: f32,
    pub is_hovered: bool,
    pub formation_role: FormationRole,
}

/// Count of agents per behavioral state.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StateSummary {
    pub counts: BTreeMap<StateKind, usize>,
}

impl StateSummary {
    /// Agents currently in `kind`.
    #[must_use]
    pub fn count(&self, kind: StateKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Total agents across all states.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Cross-agent effect produced during the per-agent pass and applied after
/// it, so an update never mutates another live agent mid-iteration.
#[derive(Debug, Clone)]
enum Impact {
    Knock {
        victim: AgentKey,
        velocity: Vec3,
        cause: KnockCause,
    },
    Kill {
        victim: AgentKey,
    },
}

/// Owns the full crowd simulation.
///
/// The host feeds wall-clock deltas into [`Simulation::advance`]; the core
/// internally throttles to the fixed tick rate regardless of the driver's
/// cadence. Roster syncs, pointer events and formation toggles are applied
/// synchronously between ticks.
#[derive(Debug)]
pub struct Simulation {
    config: PlazaConfig,
    registry: AgentRegistry,
    rng: SmallRng,
    index: UniformGridIndex,
    interaction: InteractionController,
    choreographer: FormationChoreographer,
    accumulator: f32,
    tick: Tick,
}

impl Simulation {
    /// Build a simulation from a validated configuration.
    pub fn new(config: PlazaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = config.seeded_rng();
        Ok(Self {
            config,
            registry: AgentRegistry::new(),
            rng,
            index: UniformGridIndex::default(),
            interaction: InteractionController::new(),
            choreographer: FormationChoreographer::new(),
            accumulator: 0.0,
            tick: Tick::zero(),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PlazaConfig {
        &self.config
    }

    /// Ticks processed since boot.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// The live agent set.
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Whether formation mode is active.
    #[must_use]
    pub fn is_formation_active(&self) -> bool {
        self.choreographer.is_active()
    }

    /// Diff the registry against a desired roster.
    ///
    /// While formation mode is active, roles are reassigned afterwards so
    /// late joiners do not wander through the grid.
    pub fn sync(&mut self, roster: &[RosterEntry]) -> SyncOutcome {
        let outcome = self.registry.sync(roster, &self.config, &mut self.rng);
        if !outcome.added.is_empty() || !outcome.removed.is_empty() {
            debug!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "roster synced"
            );
            self.choreographer
                .refresh(&mut self.registry, &self.config, &mut self.rng);
        }
        outcome
    }

    /// Feed wall-clock time; runs zero or more fixed steps.
    ///
    /// Catch-up is capped; any backlog beyond the cap is discarded rather
    /// than freezing the host in a spiral of ever-longer ticks.
    pub fn advance(&mut self, delta_seconds: f32) -> TickReport {
        let mut report = TickReport::default();
        if delta_seconds.is_finite() && delta_seconds > 0.0 {
            self.accumulator += delta_seconds;
        }
        let dt = self.config.dt();
        while self.accumulator >= dt && report.steps < self.config.max_steps_per_advance {
            self.accumulator -= dt;
            report.steps += 1;
            report.faults.extend(self.run_step());
        }
        if self.accumulator >= dt {
            report.discarded_seconds = self.accumulator;
            debug!(
                discarded = self.accumulator,
                "dropping simulation backlog past the catch-up cap"
            );
            self.accumulator = 0.0;
        }
        report.tick = self.tick;
        report
    }

    /// Run exactly one fixed step, ignoring the wall-clock accumulator.
    pub fn step(&mut self) -> TickReport {
        let faults = self.run_step();
        TickReport {
            steps: 1,
            tick: self.tick,
            faults,
            discarded_seconds: 0.0,
        }
    }

    /// World-space pointer press.
    pub fn pointer_down(&mut self, x: f32, z: f32, timestamp_ms: f64) {
        self.interaction
            .pointer_down(&mut self.registry, &self.config, x, z, timestamp_ms);
    }

    /// World-space pointer motion.
    pub fn pointer_move(&mut self, x: f32, z: f32, timestamp_ms: f64) {
        self.interaction
            .pointer_move(&mut self.registry, &self.config, x, z, timestamp_ms);
    }

    /// World-space pointer release.
    pub fn pointer_up(&mut self, x: f32, z: f32, timestamp_ms: f64) {
        self.interaction.pointer_up(
            &mut self.registry,
            &self.config,
            &mut self.rng,
            x,
            z,
            timestamp_ms,
        );
    }

    /// Enter formation mode for a cluster.
    pub fn formation_activate(&mut self, cluster_id: &str) {
        self.choreographer
            .activate(cluster_id, &mut self.registry, &self.config, &mut self.rng);
    }

    /// Leave formation mode.
    pub fn formation_deactivate(&mut self) {
        self.choreographer
            .deactivate(&mut self.registry, &self.config);
    }

    /// Renderable per-agent snapshots, in stable registry order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        self.registry
            .iter()
            .map(|(_, agent)| AgentSnapshot {
                id: agent.id.clone(),
                cluster_id: agent.cluster_id.clone(),
                position: agent.position,
                facing: agent.facing,
                state: agent.state.kind(),
                pose: pose_for(&agent.state, agent.animation_clock),
                animation_clock: agent.animation_clock,
                opacity: agent.opacity,
                fall_pitch: agent.fall_pitch,
                is_hovered: agent.is_hovered,
                formation_role: agent.formation_role,
            })
            .collect()
    }

    /// Count agents per behavioral state.
    #[must_use]
    pub fn summary(&self) -> StateSummary {
        let mut summary = StateSummary::default();
        for (_, agent) in self.registry.iter() {
            *summary.counts.entry(agent.state.kind()).or_insert(0) += 1;
        }
        summary
    }

    fn run_step(&mut self) -> Vec<AgentFault> {
        let mut faults = Vec::new();
        let view = NeighborView::capture(&self.registry);
        if let Err(err) = self.index.rebuild(&view.ground_positions()) {
            error!(%err, "spatial index rebuild failed; reusing previous buckets");
        }

        let dt = self.config.dt();
        let mut impacts = Vec::new();
        let keys: Vec<AgentKey> = self.registry.iter_keys().collect();
        for key in keys {
            let Some(agent) = self.registry.get_mut(key) else {
                continue;
            };
            if let Err(error) = update_agent(
                &self.config,
                &view,
                &self.index,
                key,
                agent,
                &mut self.rng,
                dt,
                &mut impacts,
            ) {
                error!(id = %agent.id, %error, "agent update neutralized");
                faults.push(AgentFault {
                    id: agent.id.clone(),
                    error,
                });
                agent.respawn(&self.config, &mut self.rng);
            }
        }

        self.apply_impacts(impacts);
        self.tick = self.tick.next();
        faults
    }

    fn apply_impacts(&mut self, impacts: Vec<Impact>) {
        for impact in impacts {
            match impact {
                Impact::Knock {
                    victim,
                    velocity,
                    cause,
                } => {
                    let Some(agent) = self.registry.get_mut(victim) else {
                        continue;
                    };
                    if matches!(
                        agent.state,
                        AgentState::Dying { .. }
                            | AgentState::Thrown { .. }
                            | AgentState::KnockedBack { .. }
                            | AgentState::Dragged
                    ) {
                        continue;
                    }
                    trace!(id = %agent.id, "knockback applied");
                    agent.state = AgentState::KnockedBack {
                        velocity,
                        elapsed: 0.0,
                        cause,
                    };
                    agent.waypoint = None;
                }
                Impact::Kill { victim } => {
                    let Some(agent) = self.registry.get_mut(victim) else {
                        continue;
                    };
                    if matches!(agent.state, AgentState::Dying { .. }) {
                        continue;
                    }
                    trace!(id = %agent.id, "struck down");
                    start_dying(agent, &mut self.rng);
                }
            }
        }
    }
}

fn start_dying(agent: &mut Agent, rng: &mut SmallRng) {
    agent.state = AgentState::Dying {
        progress: 0.0,
        tilt: rng.random_range(-0.3..=0.3),
    };
    agent.waypoint = None;
}

/// State to land in after an airborne override clears, honoring any
/// formation role picked up mid-flight.
fn settled_state(agent: &mut Agent, config: &PlazaConfig, rng: &mut SmallRng) -> AgentState {
    match agent.formation_role {
        FormationRole::March => {
            if let Some(slot) = agent.formation_slot {
                agent.target = slot;
            }
            AgentState::FormationMarching
        }
        FormationRole::Exit => {
            agent.target = exit_target(config, rng);
            AgentState::Despawning {
                phase: DespawnPhase::Fleeing,
            }
        }
        FormationRole::None => {
            agent.replan_timer = 0.0;
            AgentState::Walking { drop: None }
        }
    }
}

/// Exponential yaw smoothing toward `desired`.
fn turn_toward(agent: &mut Agent, desired: f32, config: &PlazaConfig, dt: f32) {
    let blend = 1.0 - (-config.turn_rate * dt).exp();
    agent.facing = wrap_signed_angle(agent.facing + angle_between(agent.facing, desired) * blend);
}

/// Move along `direction` at `speed`, clamped to the play area, turning
/// smoothly into the direction of travel.
fn locomote(
    agent: &mut Agent,
    direction: PlanarVec,
    speed: f32,
    config: &PlazaConfig,
    dt: f32,
    clamp_to_bounds: bool,
) {
    let next = agent
        .planar()
        .plus(direction.scaled(speed * dt));
    let next = if clamp_to_bounds {
        next.clamped_to_radius(config.bounds_radius)
    } else {
        next
    };
    agent.position.x = next.x;
    agent.position.z = next.z;
    turn_toward(agent, direction.bearing(), config, dt);
}

fn finite_check(agent: &Agent) -> Result<(), AgentUpdateError> {
    if !agent.position.x.is_finite()
        || !agent.position.y.is_finite()
        || !agent.position.z.is_finite()
    {
        return Err(AgentUpdateError::NumericFault { field: "position" });
    }
    if !agent.facing.is_finite() {
        return Err(AgentUpdateError::NumericFault { field: "facing" });
    }
    Ok(())
}

/// One agent's tick: physics and formation overrides first, then pointer
/// suspension, then ordinary state-machine timers, targeting and steering.
#[allow(clippy::too_many_arguments)]
fn update_agent(
    config: &PlazaConfig,
    view: &NeighborView,
    index: &UniformGridIndex,
    key: AgentKey,
    agent: &mut Agent,
    rng: &mut SmallRng,
    dt: f32,
    impacts: &mut Vec<Impact>,
) -> Result<(), AgentUpdateError> {
    agent.animation_clock += dt;

    // Ambient aggression roll for unengaged agents.
    if !agent.state.is_engaged() {
        agent.seek_roll_timer -= dt;
        if agent.seek_roll_timer <= 0.0 {
            agent.seek_roll_timer = config.seek_roll_interval;
            if rng.random::<f64>() < config.seek_probability
                && let Some(victim) = pick_victim(config, view, key, agent.planar(), rng)
            {
                debug!(id = %agent.id, "seeking a victim");
                agent.state = AgentState::Seeking { victim };
            }
        }
    }

    match agent.state.clone() {
        AgentState::Dying {
            mut progress,
            tilt,
        } => {
            let done = physics::integrate_dying(
                &mut progress,
                &mut agent.opacity,
                &mut agent.fall_pitch,
                config,
                dt,
            );
            if done {
                agent.respawn(config, rng);
                if agent.formation_role != FormationRole::None {
                    agent.state = settled_state(agent, config, rng);
                }
            } else {
                agent.state = AgentState::Dying { progress, tilt };
            }
        }

        AgentState::Thrown { mut velocity } => {
            let outcome = physics::integrate_thrown(
                &mut agent.position,
                &mut velocity,
                config,
                view,
                index,
                key,
                dt,
            );
            let struck_someone = !outcome.struck.is_empty();
            for victim in outcome.struck {
                impacts.push(Impact::Kill { victim });
            }
            if outcome.edge_exit || struck_someone {
                // A mid-air collision downs the flyer too, not just the
                // agents it clipped.
                start_dying(agent, rng);
            } else if outcome.landed {
                agent.position.y = 0.0;
                agent.state = settled_state(agent, config, rng);
            } else {
                agent.state = AgentState::Thrown { velocity };
            }
        }

        AgentState::KnockedBack {
            mut velocity,
            mut elapsed,
            cause,
        } => {
            let settled = physics::integrate_knockback(
                &mut agent.position,
                &mut velocity,
                &mut elapsed,
                config,
                dt,
            );
            if settled {
                agent.position.y = 0.0;
                if agent.formation_role != FormationRole::None {
                    agent.state = settled_state(agent, config, rng);
                } else {
                    agent.state = match cause {
                        KnockCause::User => {
                            agent.facing = config.camera_bearing;
                            AgentState::Waving {
                                hold: rng.random_range(config.wave_hold.0..=config.wave_hold.1),
                            }
                        }
                        KnockCause::Agent(aggressor) if view.get(aggressor).is_some() => {
                            AgentState::RunningAway {
                                from: aggressor,
                                hold: rng.random_range(config.flee_hold.0..=config.flee_hold.1),
                            }
                        }
                        KnockCause::Agent(_) => {
                            agent.replan_timer = 0.0;
                            AgentState::Walking { drop: None }
                        }
                    };
                }
            } else {
                agent.state = AgentState::KnockedBack {
                    velocity,
                    elapsed,
                    cause,
                };
            }
        }

        // Position driven externally; only the animation clock runs.
        AgentState::Dragged => {}

        AgentState::Despawning { phase } => match phase {
            DespawnPhase::Fleeing => {
                let position = agent.planar();
                let arrived = position.distance_to(agent.target) < config.arrival_radius;
                if arrived || position.length() > config.kill_radius {
                    agent.state = AgentState::Despawning {
                        phase: DespawnPhase::Fading { progress: 0.0 },
                    };
                } else if let Some(direction) = position.direction_to(agent.target) {
                    let speed = config.base_speed * config.exit_speed_factor;
                    locomote(agent, direction, speed, config, dt, false);
                }
            }
            DespawnPhase::Fading { mut progress } => {
                progress += dt / config.exit_fade;
                agent.opacity = (1.0 - progress).clamp(0.0, 1.0);
                agent.state = if progress >= 1.0 {
                    AgentState::Despawning {
                        phase: DespawnPhase::Parked,
                    }
                } else {
                    AgentState::Despawning {
                        phase: DespawnPhase::Fading { progress },
                    }
                };
            }
            DespawnPhase::Parked => {}
        },

        AgentState::FormationMarching => {
            let slot = agent.formation_slot.unwrap_or(agent.target);
            agent.target = slot;
            let position = agent.planar();
            // One fast-path step can overshoot the tight arrive radius, so
            // anything within a single step snaps straight into the slot.
            let step = config.base_speed * config.formation_speed_factor * dt;
            if position.distance_to(slot) <= config.formation_arrive_radius.max(step) {
                agent.position.x = slot.x;
                agent.position.z = slot.z;
                agent.facing = config.camera_bearing;
                agent.state = AgentState::FormationIdle;
            } else if let Some(direction) = position.direction_to(slot) {
                let speed = config.base_speed * config.formation_speed_factor;
                locomote(agent, direction, speed, config, dt, true);
            }
        }

        AgentState::FormationIdle => {
            fade_in(agent, config, dt);
            turn_toward(agent, config.camera_bearing, config, dt);
        }

        AgentState::Hitting {
            victim,
            mut remaining,
        } => {
            fade_in(agent, config, dt);
            remaining -= dt;
            if let Some(entry) = view.get(victim)
                && let Some(direction) = agent.planar().direction_to(entry.position)
            {
                turn_toward(agent, direction.bearing(), config, dt);
            }
            agent.state = if remaining <= 0.0 {
                AgentState::Idle {
                    hold: rng
                        .random_range(config.post_hit_idle_hold.0..=config.post_hit_idle_hold.1),
                }
            } else {
                AgentState::Hitting { victim, remaining }
            };
        }

        AgentState::RunningAway { from, mut hold } => {
            fade_in(agent, config, dt);
            hold -= dt;
            let position = agent.planar();
            let aggressor = view.get(from);
            let too_far = aggressor
                .map(|entry| position.distance_to(entry.position) > config.flee_max_distance);
            match (aggressor, too_far, hold <= 0.0) {
                (None, _, _) | (_, Some(true), _) | (_, _, true) => {
                    agent.replan_timer = 0.0;
                    agent.state = AgentState::Walking { drop: None };
                }
                (Some(entry), _, _) => {
                    // Retarget every tick, mostly away with a pull home.
                    let away = entry
                        .position
                        .direction_to(position)
                        .unwrap_or_else(|| PlanarVec::from_bearing(agent.facing));
                    let home = position
                        .direction_to(PlanarVec::default())
                        .unwrap_or_default();
                    let blend = away.scaled(0.9).plus(home.scaled(0.1));
                    if let Some(direction) = blend.normalized() {
                        agent.target = position
                            .plus(direction.scaled(config.escape_distance))
                            .clamped_to_radius(config.bounds_radius);
                        let output = steering::steer(
                            config, view, index, key, agent, dt, rng, false,
                        );
                        if let Some(step_dir) = output.direction {
                            let speed = config.base_speed * config.flee_speed_factor;
                            locomote(agent, step_dir, speed, config, dt, true);
                        }
                    }
                    agent.state = AgentState::RunningAway { from, hold };
                }
            }
        }

        AgentState::Waving { mut hold } => {
            fade_in(agent, config, dt);
            hold -= dt;
            turn_toward(agent, config.camera_bearing, config, dt);
            agent.state = if hold <= 0.0 {
                AgentState::Walking { drop: None }
            } else {
                AgentState::Waving { hold }
            };
        }

        AgentState::Seeking { victim } => {
            fade_in(agent, config, dt);
            let position = agent.planar();
            let Some(entry) = view.get(victim).filter(|entry| entry.strikeable()) else {
                agent.replan_timer = 0.0;
                agent.state = AgentState::Walking { drop: None };
                return finite_check(agent);
            };
            let dist = position.distance_to(entry.position);
            if dist > config.seek_abandon_distance {
                debug!(id = %agent.id, "pursuit abandoned");
                agent.replan_timer = 0.0;
                agent.state = AgentState::Walking { drop: None };
                return finite_check(agent);
            }
            agent.target = entry.position;

            let in_range = dist <= config.hit_range;
            let facing_error = position
                .direction_to(entry.position)
                .map_or(0.0, |dir| angle_between(agent.facing, dir.bearing()).abs());
            if in_range && facing_error <= config.hit_facing_cone {
                let direction = position
                    .direction_to(entry.position)
                    .unwrap_or_else(|| PlanarVec::from_bearing(agent.facing));
                impacts.push(Impact::Knock {
                    victim,
                    velocity: physics::launch_velocity(direction, config, rng),
                    cause: KnockCause::Agent(key),
                });
                agent.state = AgentState::Hitting {
                    victim,
                    remaining: config.hit_duration,
                };
            } else {
                let output = steering::steer(config, view, index, key, agent, dt, rng, false);
                if let Some(direction) = output.direction {
                    let speed = config.base_speed * config.seek_speed_factor;
                    locomote(agent, direction, speed, config, dt, true);
                }
            }
        }

        AgentState::Idle { mut hold } => {
            fade_in(agent, config, dt);
            hold -= dt;
            agent.state = if hold <= 0.0 {
                agent.replan_timer = 0.0;
                AgentState::Walking { drop: None }
            } else {
                AgentState::Idle { hold }
            };
        }

        AgentState::Walking { drop: Some(mut drop) } => {
            let grounded =
                physics::integrate_gentle_drop(&mut agent.position, &mut drop, config, dt);
            agent.state = AgentState::Walking {
                drop: if grounded { None } else { Some(drop) },
            };
        }

        AgentState::Walking { drop: None } => {
            fade_in(agent, config, dt);
            let position = agent.planar();

            // A due replan runs before the arrival check; otherwise an agent
            // standing on its own target (fresh spawns, idle exits) would
            // bounce between Idle and Walking forever.
            agent.replan_timer -= dt;
            if agent.replan_timer <= 0.0 {
                agent.target = target::select_target(config, view, index, key, position, rng);
                agent.replan_timer = target::next_replan_interval(config, rng);
                agent.waypoint = None;
            }

            if position.distance_to(agent.target) < config.arrival_radius {
                agent.waypoint = None;
                agent.state = AgentState::Idle {
                    hold: rng.random_range(config.idle_hold.0..=config.idle_hold.1),
                };
                return finite_check(agent);
            }

            let output: SteerOutput =
                steering::steer(config, view, index, key, agent, dt, rng, true);
            if output.force_replan {
                agent.target =
                    target::select_target(config, view, index, key, agent.planar(), rng);
                agent.replan_timer = target::next_replan_interval(config, rng);
            }
            if let Some(direction) = output.direction {
                let speed = config.base_speed * config.walk_speed_factor;
                locomote(agent, direction, speed, config, dt, true);
            }
        }
    }

    if agent.state.is_grounded() {
        agent.position.y = 0.0;
    }
    finite_check(agent)
}

/// Opacity ramp back to full after a formation fade-out ends.
fn fade_in(agent: &mut Agent, config: &PlazaConfig, dt: f32) {
    if agent.opacity < 1.0 {
        agent.opacity = (agent.opacity + dt / config.exit_fade).min(1.0);
    }
}

/// Random grounded, unengaged victim for the seek roll, restricted to the
/// abandon range so a fresh pursuit cannot give up on its first tick.
fn pick_victim(
    config: &PlazaConfig,
    view: &NeighborView,
    self_key: AgentKey,
    position: PlanarVec,
    rng: &mut SmallRng,
) -> Option<AgentKey> {
    let candidates: Vec<AgentKey> = view
        .entries()
        .iter()
        .filter(|entry| {
            entry.key != self_key
                && entry.grounded
                && !entry.engaged
                && position.distance_to(entry.position) <= config.seek_abandon_distance
        })
        .map(|entry| entry.key)
        .collect();
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.random_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_config() -> PlazaConfig {
        PlazaConfig {
            rng_seed: Some(7),
            ..PlazaConfig::default()
        }
    }

    fn sim_with_agents(ids: &[&str]) -> Simulation {
        let mut sim = Simulation::new(fixed_config()).expect("config");
        let roster: Vec<RosterEntry> = ids
            .iter()
            .map(|id| RosterEntry::new(*id, "cluster"))
            .collect();
        sim.sync(&roster);
        sim
    }

    #[test]
    fn empty_registry_ticks_without_incident() {
        let mut sim = Simulation::new(fixed_config()).expect("config");
        let report = sim.advance(1.0);
        assert!(report.steps > 0);
        assert!(report.faults.is_empty());
        assert!(sim.snapshots().is_empty());
    }

    #[test]
    fn advance_throttles_to_the_fixed_cadence() {
        let mut sim = sim_with_agents(&["a"]);
        let dt = sim.config().dt();

        // Feeding less than one step accumulates without stepping.
        let report = sim.advance(dt * 0.4);
        assert_eq!(report.steps, 0);
        let report = sim.advance(dt * 0.7);
        assert_eq!(report.steps, 1);
    }

    #[test]
    fn advance_caps_catch_up_and_reports_the_discard() {
        let mut sim = sim_with_agents(&["a"]);
        let report = sim.advance(10.0);
        assert_eq!(report.steps, sim.config().max_steps_per_advance);
        assert!(report.discarded_seconds > 0.0);

        // The backlog was dropped, not deferred.
        let report = sim.advance(0.0);
        assert_eq!(report.steps, 0);
    }

    #[test]
    fn walker_closes_on_its_target_every_tick() {
        let mut sim = sim_with_agents(&["a"]);
        let key = sim.registry().key_of("a").expect("key");
        {
            let agent = sim.registry.get_mut(key).expect("agent");
            agent.position = Vec3::default();
            agent.target = PlanarVec::new(100.0, 0.0);
            agent.state = AgentState::Walking { drop: None };
            agent.replan_timer = 1_000.0;
            agent.last_distance_to_target = 100.0;
        }

        let mut last = 100.0;
        let mut arrived = false;
        for _ in 0..400 {
            sim.step();
            let agent = sim.registry().get(key).expect("agent");
            if agent.state.kind() == StateKind::Idle {
                arrived = true;
                break;
            }
            let dist = agent.planar().distance_to(PlanarVec::new(100.0, 0.0));
            assert!(dist < last, "distance failed to shrink: {dist} >= {last}");
            last = dist;
        }
        assert!(arrived, "walker never reached its target");

        // Arrival distance at walk speed: 90 units at 25.5 units/s is
        // roughly 85 ticks; 400 is a generous ceiling checked above.
    }

    #[test]
    fn click_knockback_settles_into_a_wave_after_the_minimum_air_time() {
        let mut sim = sim_with_agents(&["a"]);
        let key = sim.registry().key_of("a").expect("key");
        let planar = sim.registry().get(key).expect("agent").planar();
        {
            let agent = sim.registry.get_mut(key).expect("agent");
            agent.state = AgentState::Walking { drop: None };
        }

        sim.pointer_down(planar.x, planar.z, 0.0);
        sim.pointer_up(planar.x, planar.z, 50.0);
        assert_eq!(
            sim.registry().get(key).expect("agent").state.kind(),
            StateKind::KnockedBack
        );

        let dt = sim.config().dt();
        let min_ticks = (sim.config().knockback_min_duration / dt).floor() as u32;
        for i in 0..200u32 {
            sim.step();
            let kind = sim.registry().get(key).expect("agent").state.kind();
            if kind != StateKind::KnockedBack {
                assert!(i + 1 >= min_ticks, "settled after only {} ticks", i + 1);
                assert_eq!(kind, StateKind::Waving);
                assert_eq!(sim.registry().get(key).expect("agent").position.y, 0.0);
                return;
            }
        }
        panic!("knockback never settled");
    }

    #[test]
    fn mid_air_collision_downs_the_flyer_and_the_struck_agent() {
        let mut sim = sim_with_agents(&["flyer", "bystander"]);
        let flyer = sim.registry().key_of("flyer").expect("flyer");
        let bystander = sim.registry().key_of("bystander").expect("bystander");
        {
            let agent = sim.registry.get_mut(bystander).expect("agent");
            agent.position = Vec3::new(50.0, 0.0, 0.0);
            agent.state = AgentState::Idle { hold: 60.0 };
        }
        {
            let agent = sim.registry.get_mut(flyer).expect("agent");
            agent.position = Vec3::new(44.0, 6.0, 0.0);
            agent.state = AgentState::Thrown {
                velocity: Vec3::new(10.0, 0.0, 0.0),
            };
        }

        // One tick: the flyer passes within the pole-collision radius while
        // still airborne, so both bodies go down.
        sim.step();
        assert_eq!(
            sim.registry().get(flyer).expect("agent").state.kind(),
            StateKind::Dying
        );
        assert_eq!(
            sim.registry().get(bystander).expect("agent").state.kind(),
            StateKind::Dying
        );
    }

    #[test]
    fn seek_roll_only_picks_victims_within_pursuit_range() {
        let mut sim = sim_with_agents(&["hunter", "near", "far"]);
        let hunter = sim.registry().key_of("hunter").expect("hunter");
        let near = sim.registry().key_of("near").expect("near");
        let far = sim.registry().key_of("far").expect("far");
        for (key, x) in [(hunter, 0.0), (near, 50.0), (far, 340.0)] {
            let agent = sim.registry.get_mut(key).expect("agent");
            agent.position = Vec3::new(x, 0.0, 0.0);
            agent.state = AgentState::Walking { drop: None };
        }

        // The far agent sits beyond the abandon distance; only the near one
        // is ever eligible.
        let view = NeighborView::capture(sim.registry());
        let mut rng = sim.config().seeded_rng();
        for _ in 0..32 {
            let victim = pick_victim(sim.config(), &view, hunter, PlanarVec::default(), &mut rng);
            assert_eq!(victim, Some(near));
        }
    }

    #[test]
    fn numeric_faults_are_neutralized_without_aborting_the_tick() {
        let mut sim = sim_with_agents(&["bad", "good"]);
        let bad = sim.registry().key_of("bad").expect("bad");
        sim.registry.get_mut(bad).expect("agent").position.x = f32::NAN;

        let report = sim.step();
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].id, "bad");

        let agent = sim.registry().get(bad).expect("agent");
        assert!(agent.position.x.is_finite());
        assert_eq!(agent.state.kind(), StateKind::Waving);
        assert_eq!(sim.registry().len(), 2);
    }

    #[test]
    fn summary_counts_every_agent_exactly_once() {
        let mut sim = sim_with_agents(&["a", "b", "c"]);
        sim.step();
        let summary = sim.summary();
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn snapshots_track_registry_order_and_opacity() {
        let mut sim = sim_with_agents(&["a", "b"]);
        sim.step();
        let snapshots = sim.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].id, "a");
        assert_eq!(snapshots[1].id, "b");
        for snapshot in &snapshots {
            assert!((0.0..=1.0).contains(&snapshot.opacity));
        }
    }

    #[test]
    fn stale_aggressor_reference_neutralizes_to_walking() {
        let mut sim = sim_with_agents(&["victim", "bully"]);
        let victim = sim.registry().key_of("victim").expect("victim");
        let bully = sim.registry().key_of("bully").expect("bully");
        sim.registry.get_mut(victim).expect("agent").state = AgentState::RunningAway {
            from: bully,
            hold: 10.0,
        };
        sim.sync(&[RosterEntry::new("victim", "cluster")]);

        sim.step();
        let agent = sim.registry().get(victim).expect("agent");
        assert_ne!(agent.state.kind(), StateKind::RunningAway);
    }
}
