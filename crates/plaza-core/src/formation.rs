//! Cluster formation mode: march members onto a grid, usher everyone else
//! offscreen, and restore the crowd on deactivation.

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::info;

use crate::PlanarVec;
use crate::agent::{AgentState, DespawnPhase, FormationRole};
use crate::config::PlazaConfig;
use crate::registry::AgentRegistry;

/// Drives formation mode for a chosen cluster.
#[derive(Debug, Default)]
pub struct FormationChoreographer {
    active: Option<String>,
}

impl FormationChoreographer {
    /// Create an inactive choreographer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether formation mode is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The cluster currently forming up, if any.
    #[must_use]
    pub fn active_cluster(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Enter formation mode for `cluster_id`.
    ///
    /// Safe to call while already active; roles and slots are reassigned
    /// from scratch, which also covers roster changes mid-formation.
    pub fn activate(
        &mut self,
        cluster_id: impl Into<String>,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        rng: &mut SmallRng,
    ) {
        let cluster_id = cluster_id.into();
        info!(cluster = %cluster_id, "formation activated");
        self.active = Some(cluster_id);
        self.assign(registry, config, rng);
    }

    /// Leave formation mode and restore normal behavior.
    ///
    /// Members resume replanning immediately; parked agents fade back in
    /// and walk home from wherever they stand rather than teleporting.
    pub fn deactivate(&mut self, registry: &mut AgentRegistry, config: &PlazaConfig) {
        if self.active.take().is_none() {
            return;
        }
        info!("formation deactivated");
        for key in registry.iter_keys().collect::<Vec<_>>() {
            let Some(agent) = registry.get_mut(key) else {
                continue;
            };
            agent.formation_role = FormationRole::None;
            agent.formation_slot = None;
            if formation_controls(&agent.state) {
                agent.state = AgentState::Walking { drop: None };
                agent.waypoint = None;
                agent.replan_timer = 0.0;
                agent.target = agent.planar().clamped_to_radius(config.bounds_radius);
            }
        }
    }

    /// Reapply roles and slots to the current roster.
    ///
    /// Called after a roster sync while active, so newly added agents pick
    /// up a role instead of wandering through the formation.
    pub fn refresh(
        &mut self,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        rng: &mut SmallRng,
    ) {
        if self.active.is_some() {
            self.assign(registry, config, rng);
        }
    }

    fn assign(&self, registry: &mut AgentRegistry, config: &PlazaConfig, rng: &mut SmallRng) {
        let Some(cluster) = self.active.as_deref() else {
            return;
        };

        let members: Vec<_> = registry
            .iter()
            .filter(|(_, agent)| agent.cluster_id == cluster)
            .map(|(key, _)| key)
            .collect();
        let slots = grid_slots(members.len(), config.formation_spacing);

        for (key, slot) in members.iter().zip(&slots) {
            let Some(agent) = registry.get_mut(*key) else {
                continue;
            };
            agent.formation_role = FormationRole::March;
            agent.formation_slot = Some(*slot);
            if formation_controls(&agent.state) {
                agent.state = AgentState::FormationMarching;
                agent.target = *slot;
                agent.waypoint = None;
            }
        }

        let outsiders: Vec<_> = registry
            .iter()
            .filter(|(_, agent)| agent.cluster_id != cluster)
            .map(|(key, _)| key)
            .collect();
        for key in outsiders {
            let exit = exit_target(config, rng);
            let Some(agent) = registry.get_mut(key) else {
                continue;
            };
            agent.formation_role = FormationRole::Exit;
            agent.formation_slot = None;
            if formation_controls(&agent.state) {
                if matches!(
                    agent.state,
                    AgentState::Despawning {
                        phase: DespawnPhase::Fading { .. } | DespawnPhase::Parked,
                    }
                ) {
                    // Already offscreen; no need to restart the flight.
                    continue;
                }
                agent.state = AgentState::Despawning {
                    phase: DespawnPhase::Fleeing,
                };
                agent.target = exit;
                agent.waypoint = None;
            }
        }
    }
}

/// Whether formation mode may overwrite this state.
///
/// Physics and pointer overrides outrank formation; those agents keep
/// their state and pick up their role once they settle.
fn formation_controls(state: &AgentState) -> bool {
    !matches!(
        state,
        AgentState::Dragged
            | AgentState::KnockedBack { .. }
            | AgentState::Thrown { .. }
            | AgentState::Dying { .. }
    )
}

/// Evenly spaced grid positions centered at the origin, row-major.
#[must_use]
pub fn grid_slots(count: usize, spacing: f32) -> Vec<PlanarVec> {
    if count == 0 {
        return Vec::new();
    }
    let rows = (count as f32).sqrt().ceil() as usize;
    let cols = count.div_ceil(rows);
    let mut slots = Vec::with_capacity(count);
    for i in 0..count {
        let row = i / cols;
        let col = i % cols;
        let x = (col as f32 - (cols as f32 - 1.0) / 2.0) * spacing;
        let z = (row as f32 - (rows as f32 - 1.0) / 2.0) * spacing;
        slots.push(PlanarVec::new(x, z));
    }
    slots
}

/// Staggered offscreen exit point along the fixed lateral direction.
pub(crate) fn exit_target(config: &PlazaConfig, rng: &mut SmallRng) -> PlanarVec {
    let along = PlanarVec::from_bearing(config.exit_bearing).scaled(config.exit_distance);
    let sideways = PlanarVec::from_bearing(config.exit_bearing + std::f32::consts::FRAC_PI_2)
        .scaled(rng.random_range(-config.exit_depth_jitter..=config.exit_depth_jitter));
    along.plus(sideways)
}
