//! Tick-start snapshot of the crowd.
//!
//! Each agent's update reads other agents through this immutable view
//! instead of the live registry. Snapshotting at tick start keeps borrows
//! simple and makes runs independent of update order, and cross-agent
//! effects are applied as deferred impacts after the pass.

use slotmap::SecondaryMap;

use crate::PlanarVec;
use crate::agent::{AgentState, DespawnPhase};
use crate::registry::{AgentKey, AgentRegistry};

/// Read-only per-agent facts captured at tick start.
#[derive(Debug, Clone, Copy)]
pub struct NeighborEntry {
    pub key: AgentKey,
    pub position: PlanarVec,
    pub elevation: f32,
    pub target: PlanarVec,
    pub dying: bool,
    pub thrown: bool,
    pub parked: bool,
    pub grounded: bool,
    pub engaged: bool,
}

impl NeighborEntry {
    /// Whether this agent occupies ground space for avoidance and density.
    #[must_use]
    pub fn obstructs(&self) -> bool {
        self.grounded
    }

    /// Whether a thrown body can strike this agent (a height-ignoring pole
    /// test against anything that is neither thrown nor dying nor parked).
    #[must_use]
    pub fn strikeable(&self) -> bool {
        !self.thrown && !self.dying && !self.parked
    }
}

/// Immutable crowd snapshot in registry iteration order.
#[derive(Debug, Default)]
pub struct NeighborView {
    entries: Vec<NeighborEntry>,
    index_of: SecondaryMap<AgentKey, usize>,
}

impl NeighborView {
    /// Capture the current registry state.
    #[must_use]
    pub fn capture(registry: &AgentRegistry) -> Self {
        let mut entries = Vec::with_capacity(registry.len());
        let mut index_of = SecondaryMap::new();
        for (key, agent) in registry.iter() {
            let parked = matches!(
                agent.state,
                AgentState::Despawning {
                    phase: DespawnPhase::Parked | DespawnPhase::Fading { .. },
                }
            );
            index_of.insert(key, entries.len());
            entries.push(NeighborEntry {
                key,
                position: agent.planar(),
                elevation: agent.position.y,
                target: agent.target,
                dying: matches!(agent.state, AgentState::Dying { .. }),
                thrown: matches!(agent.state, AgentState::Thrown { .. }),
                parked,
                grounded: agent.state.is_grounded(),
                engaged: agent.state.is_engaged(),
            });
        }
        Self { entries, index_of }
    }

    /// All captured entries, in registry iteration order.
    #[must_use]
    pub fn entries(&self) -> &[NeighborEntry] {
        &self.entries
    }

    /// Number of captured agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the capture is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a specific agent, when it existed at capture time.
    #[must_use]
    pub fn get(&self, key: AgentKey) -> Option<&NeighborEntry> {
        self.index_of.get(key).map(|idx| &self.entries[*idx])
    }

    /// Dense index of an agent within the capture (and the spatial index).
    #[must_use]
    pub fn index_of(&self, key: AgentKey) -> Option<usize> {
        self.index_of.get(key).copied()
    }

    /// Ground positions in capture order, for spatial index rebuilds.
    #[must_use]
    pub fn ground_positions(&self) -> Vec<(f32, f32)> {
        self.entries
            .iter()
            .map(|entry| (entry.position.x, entry.position.z))
            .collect()
    }
}
