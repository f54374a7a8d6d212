//! Pointer intents: hover, click-to-hit, and drag/throw.
//!
//! Coordinates arrive already resolved to world space. Calls are applied
//! synchronously between ticks, so every effect is visible by the next tick.

use ordered_float::OrderedFloat;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::agent::{AgentState, GentleDrop, KnockCause};
use crate::config::PlazaConfig;
use crate::physics;
use crate::registry::{AgentKey, AgentRegistry};
use crate::{PlanarVec, Vec3};

/// Bookkeeping for a pointer press that may become a drag.
#[derive(Debug, Clone, Copy)]
struct PressTracker {
    key: AgentKey,
    origin: PlanarVec,
    last_position: PlanarVec,
    last_timestamp_ms: f64,
    dragging: bool,
    /// Exponentially smoothed pointer velocity, units per second.
    smoothed_velocity: PlanarVec,
}

/// Translates resolved pointer intents into state-machine events.
#[derive(Debug, Default)]
pub struct InteractionController {
    press: Option<PressTracker>,
    hovered: Option<AgentKey>,
}

impl InteractionController {
    /// Create an idle controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The agent currently held by the pointer, if any.
    #[must_use]
    pub fn dragged_agent(&self) -> Option<AgentKey> {
        self.press.filter(|press| press.dragging).map(|press| press.key)
    }

    /// Press at a world-space point; arms a drag on the nearest pickable
    /// agent within the pick radius.
    pub fn pointer_down(
        &mut self,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        x: f32,
        z: f32,
        timestamp_ms: f64,
    ) {
        let point = PlanarVec::new(x, z);
        let Some(key) = pick_agent(registry, point, config.drag_pick_radius) else {
            self.press = None;
            return;
        };
        self.press = Some(PressTracker {
            key,
            origin: point,
            last_position: point,
            last_timestamp_ms: timestamp_ms,
            dragging: false,
            smoothed_velocity: PlanarVec::default(),
        });
    }

    /// Move the pointer; refreshes the hover highlight and drives any
    /// active drag.
    pub fn pointer_move(
        &mut self,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        x: f32,
        z: f32,
        timestamp_ms: f64,
    ) {
        let point = PlanarVec::new(x, z);
        self.update_hover(registry, config, point);

        let Some(press) = self.press.as_mut() else {
            return;
        };
        let Some(agent) = registry.get_mut(press.key) else {
            // The pressed agent left the registry; the gesture just ends.
            self.press = None;
            return;
        };

        if !press.dragging {
            if press.origin.distance_to(point) <= config.drag_slop {
                return;
            }
            if !agent.state.accepts_pointer() {
                self.press = None;
                return;
            }
            press.dragging = true;
            agent.state = AgentState::Dragged;
            agent.waypoint = None;
            debug!(id = %agent.id, "drag started");
        }

        let elapsed = ((timestamp_ms - press.last_timestamp_ms) / 1_000.0) as f32;
        if elapsed > 1e-4 {
            let instant = press
                .last_position
                .direction_to(point)
                .map_or(PlanarVec::default(), |dir| {
                    dir.scaled(press.last_position.distance_to(point) / elapsed)
                });
            let alpha = config.throw_smoothing_alpha;
            press.smoothed_velocity = PlanarVec::new(
                alpha * instant.x + (1.0 - alpha) * press.smoothed_velocity.x,
                alpha * instant.z + (1.0 - alpha) * press.smoothed_velocity.z,
            );
            press.last_timestamp_ms = timestamp_ms;
        }
        press.last_position = point;

        agent.position = Vec3::new(point.x, config.drag_height, point.z);
    }

    /// Release the pointer; resolves the gesture into a click hit, a throw,
    /// or a gentle drop.
    pub fn pointer_up(
        &mut self,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        rng: &mut SmallRng,
        x: f32,
        z: f32,
        timestamp_ms: f64,
    ) {
        let _ = (x, z, timestamp_ms);
        let Some(press) = self.press.take() else {
            return;
        };
        let Some(agent) = registry.get_mut(press.key) else {
            return;
        };

        if !press.dragging {
            // A press without travel is a click: a user-initiated hit
            // pushing the victim away from the camera.
            if agent.state.accepts_pointer() {
                let velocity = physics::launch_velocity(config.camera_forward(), config, rng);
                agent.state = AgentState::KnockedBack {
                    velocity,
                    elapsed: 0.0,
                    cause: KnockCause::User,
                };
                agent.waypoint = None;
                debug!(id = %agent.id, "click knockback");
            }
            return;
        }

        let scaled = press.smoothed_velocity.scaled(config.throw_release_scale);
        if scaled.length() > config.throw_threshold {
            agent.state = AgentState::Thrown {
                velocity: Vec3::new(scaled.x, 0.0, scaled.z),
            };
            debug!(id = %agent.id, speed = scaled.length(), "thrown");
        } else {
            agent.state = AgentState::Walking {
                drop: Some(GentleDrop {
                    vy: config.gentle_drop_speed,
                }),
            };
            debug!(id = %agent.id, "gentle drop");
        }
    }

    fn update_hover(
        &mut self,
        registry: &mut AgentRegistry,
        config: &PlazaConfig,
        point: PlanarVec,
    ) {
        let next = pick_agent(registry, point, config.hover_radius);
        if next == self.hovered {
            return;
        }
        if let Some(previous) = self.hovered.take()
            && let Some(agent) = registry.get_mut(previous)
        {
            agent.is_hovered = false;
        }
        if let Some(key) = next
            && let Some(agent) = registry.get_mut(key)
        {
            agent.is_hovered = true;
            self.hovered = Some(key);
        }
    }
}

/// Nearest pointer-receptive agent within `radius` of `point`.
fn pick_agent(registry: &AgentRegistry, point: PlanarVec, radius: f32) -> Option<AgentKey> {
    registry
        .iter()
        .filter(|(_, agent)| agent.state.accepts_pointer())
        .map(|(key, agent)| (key, agent.planar().distance_to(point)))
        .filter(|(_, dist)| *dist <= radius)
        .min_by_key(|(_, dist)| OrderedFloat(*dist))
        .map(|(key, _)| key)
}
