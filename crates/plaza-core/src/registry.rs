//! Ownership of the live agent set and the roster diff contract.

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::agent::Agent;
use crate::config::PlazaConfig;

new_key_type! {
    /// Stable generational handle for agents.
    pub struct AgentKey;
}

/// One desired roster row handed in by the polling collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    #[serde(default)]
    pub cluster_id: String,
}

impl RosterEntry {
    /// Convenience constructor.
    #[must_use]
    pub fn new(id: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
        }
    }
}

/// Ids touched by a `sync` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Owns the live set of agents.
///
/// Iteration order is insertion order and survives removals, keeping tick
/// results reproducible for a given seed and call sequence.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: SlotMap<AgentKey, Agent>,
    by_id: HashMap<String, AgentKey>,
    order: Vec<AgentKey>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live agents (parked agents included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true when no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether `key` refers to a live agent.
    #[must_use]
    pub fn contains(&self, key: AgentKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Look up the handle for an id.
    #[must_use]
    pub fn key_of(&self, id: &str) -> Option<AgentKey> {
        self.by_id.get(id).copied()
    }

    /// Borrow an agent by handle.
    #[must_use]
    pub fn get(&self, key: AgentKey) -> Option<&Agent> {
        self.slots.get(key)
    }

    /// Mutably borrow an agent by handle.
    #[must_use]
    pub fn get_mut(&mut self, key: AgentKey) -> Option<&mut Agent> {
        self.slots.get_mut(key)
    }

    /// Iterate handles in stable insertion order.
    pub fn iter_keys(&self) -> impl Iterator<Item = AgentKey> + '_ {
        self.order.iter().copied()
    }

    /// Iterate agents in stable insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentKey, &Agent)> {
        self.order
            .iter()
            .filter_map(|key| self.slots.get(*key).map(|agent| (*key, agent)))
    }

    /// Add an agent; a no-op returning `None` when the id is already present.
    pub fn add(
        &mut self,
        id: &str,
        cluster_id: &str,
        config: &PlazaConfig,
        rng: &mut SmallRng,
    ) -> Option<AgentKey> {
        if id.is_empty() || self.by_id.contains_key(id) {
            return None;
        }
        let agent = Agent::spawn(id, cluster_id, config, rng);
        let key = self.slots.insert(agent);
        self.by_id.insert(id.to_string(), key);
        self.order.push(key);
        Some(key)
    }

    /// Remove an agent by id; a no-op returning `false` when absent.
    ///
    /// Callers release external resources tied to the id (textures, labels)
    /// only after this returns `true`.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(key) = self.by_id.remove(id) else {
            return false;
        };
        self.slots.remove(key);
        self.order.retain(|existing| *existing != key);
        true
    }

    /// Diff the registry against a desired roster.
    ///
    /// Missing ids are added, absent ids removed, and ids present in both
    /// get their `cluster_id` updated in place without touching position,
    /// animation, or state. Repeated calls with an unchanged roster return
    /// empty outcomes and leave every agent untouched.
    pub fn sync(
        &mut self,
        roster: &[RosterEntry],
        config: &PlazaConfig,
        rng: &mut SmallRng,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let mut desired: HashSet<&str> = HashSet::with_capacity(roster.len());

        for entry in roster {
            if entry.id.is_empty() {
                warn!(cluster = %entry.cluster_id, "skipping roster entry without an id");
                continue;
            }
            if !desired.insert(entry.id.as_str()) {
                continue;
            }
            if let Some(key) = self.by_id.get(entry.id.as_str()) {
                if let Some(agent) = self.slots.get_mut(*key)
                    && agent.cluster_id != entry.cluster_id
                {
                    agent.cluster_id = entry.cluster_id.clone();
                }
            } else if self
                .add(&entry.id, &entry.cluster_id, config, rng)
                .is_some()
            {
                outcome.added.push(entry.id.clone());
            }
        }

        let stale: Vec<String> = self
            .by_id
            .keys()
            .filter(|id| !desired.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if self.remove(&id) {
                outcome.removed.push(id);
            }
        }

        outcome
    }
}
