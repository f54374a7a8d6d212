//! Per-character record, tagged behavioral state, and pose mapping.

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::config::PlazaConfig;
use crate::registry::AgentKey;
use crate::{PlanarVec, Vec3};

/// Role assigned while formation mode is active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FormationRole {
    /// Normal behavior; formation mode does not touch this agent.
    #[default]
    None,
    /// Marching toward (or holding) a grid slot.
    March,
    /// Exiting offscreen and parking invisible.
    Exit,
}

/// Who launched a knockback; decides the settle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnockCause {
    /// A user click; the agent waves once it lands.
    User,
    /// Another agent's hit; the victim flees the aggressor on landing.
    Agent(AgentKey),
}

/// Descent bookkeeping for the gentle-drop sub-state of Walking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GentleDrop {
    /// Current downward speed, units per second.
    pub vy: f32,
}

/// Stage of the formation-mode exit sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DespawnPhase {
    /// Sprinting toward the offscreen exit point.
    Fleeing,
    /// Offscreen; fading out. Progress runs 0 → 1.
    Fading { progress: f32 },
    /// Invisible and motionless, kept alive in the registry.
    Parked,
}

/// The authoritative per-agent behavioral state.
///
/// Exactly one variant is active at a time; payload fields for inactive
/// variants cannot exist by construction. Variants are listed in ascending
/// override precedence so the tick dispatcher can match top-down.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    /// Default locomotion toward the target or pending waypoint.
    Walking {
        /// Gentle descent after a slow drag release; `None` once grounded.
        drop: Option<GentleDrop>,
    },
    /// Arrived and standing; forces a replan on expiry.
    Idle { hold: f32 },
    /// Stalking a victim at bonus speed until a hit lands.
    Seeking { victim: AgentKey },
    /// Facing the camera bearing with an arm up.
    Waving { hold: f32 },
    /// Fleeing a named aggressor, retargeting every tick.
    RunningAway { from: AgentKey, hold: f32 },
    /// Committed attack animation after a hit is executed.
    Hitting { victim: AgentKey, remaining: f32 },
    /// Formation mode: moving toward an assigned grid slot.
    FormationMarching,
    /// Formation mode: holding the grid slot, facing the camera.
    FormationIdle,
    /// Formation mode: exit, fade, and park sequence for non-members.
    Despawning { phase: DespawnPhase },
    /// Position driven externally by the pointer; floats at a fixed height.
    Dragged,
    /// Airborne reaction to a hit.
    KnockedBack {
        velocity: Vec3,
        elapsed: f32,
        cause: KnockCause,
    },
    /// Ballistic flight after a drag release.
    Thrown { velocity: Vec3 },
    /// Fade/fall cycle ending in an in-place respawn. Progress runs 0 → 1.
    Dying { progress: f32, tilt: f32 },
}

/// Fieldless discriminant for summaries and reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKind {
    Walking,
    Idle,
    Seeking,
    Waving,
    RunningAway,
    Hitting,
    FormationMarching,
    FormationIdle,
    Despawning,
    Dragged,
    KnockedBack,
    Thrown,
    Dying,
}

impl AgentState {
    /// Discriminant of the active variant.
    #[must_use]
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Walking { .. } => StateKind::Walking,
            Self::Idle { .. } => StateKind::Idle,
            Self::Seeking { .. } => StateKind::Seeking,
            Self::Waving { .. } => StateKind::Waving,
            Self::RunningAway { .. } => StateKind::RunningAway,
            Self::Hitting { .. } => StateKind::Hitting,
            Self::FormationMarching => StateKind::FormationMarching,
            Self::FormationIdle => StateKind::FormationIdle,
            Self::Despawning { .. } => StateKind::Despawning,
            Self::Dragged => StateKind::Dragged,
            Self::KnockedBack { .. } => StateKind::KnockedBack,
            Self::Thrown { .. } => StateKind::Thrown,
            Self::Dying { .. } => StateKind::Dying,
        }
    }

    /// Whether the variant is a grounded locomotion state whose elevation
    /// must be exactly zero at the end of a tick.
    ///
    /// The gentle-drop sub-state of Walking is still descending and is not
    /// grounded until the drop payload clears.
    #[must_use]
    pub fn is_grounded(&self) -> bool {
        match self {
            Self::Walking { drop } => drop.is_none(),
            Self::Idle { .. }
            | Self::Seeking { .. }
            | Self::Waving { .. }
            | Self::RunningAway { .. }
            | Self::Hitting { .. }
            | Self::FormationMarching
            | Self::FormationIdle => true,
            _ => false,
        }
    }

    /// Whether the agent can be picked up or clicked.
    #[must_use]
    pub fn accepts_pointer(&self) -> bool {
        !matches!(
            self,
            Self::Dying { .. } | Self::Thrown { .. } | Self::KnockedBack { .. }
        )
    }

    /// Whether the agent is busy enough to be skipped by the seek roll.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        !matches!(self, Self::Walking { drop: None } | Self::Idle { .. })
    }
}

/// One simulated character.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Stable identifier, unique within the registry.
    pub id: String,
    /// Opaque grouping tag from the roster source.
    pub cluster_id: String,
    /// World position; `y` is transient elevation.
    pub position: Vec3,
    /// Yaw in radians, normalized to (−π, π].
    pub facing: f32,
    /// Current desired destination on the ground plane.
    pub target: PlanarVec,
    /// Optional intermediate detour installed by the steering planner.
    pub waypoint: Option<PlanarVec>,
    /// Seconds until the next scheduled replan.
    pub replan_timer: f32,
    /// Accumulated seconds of sub-threshold progress.
    pub stuck_timer: f32,
    /// Seconds since the last path-blocked sampling check.
    pub blocked_check_timer: f32,
    /// Distance to target at the end of the previous tick.
    pub last_distance_to_target: f32,
    /// Seconds until the next ambient aggression roll.
    pub seek_roll_timer: f32,
    /// Active behavioral state.
    pub state: AgentState,
    /// Monotonic phase accumulator feeding the pose function.
    pub animation_clock: f32,
    /// Render opacity in [0, 1].
    pub opacity: f32,
    /// Forward pitch while dying, radians.
    pub fall_pitch: f32,
    /// Pointer is over this agent.
    pub is_hovered: bool,
    /// Role while formation mode is active.
    pub formation_role: FormationRole,
    /// Assigned grid slot while marching.
    pub formation_slot: Option<PlanarVec>,
}

impl Agent {
    /// Spawn a fresh agent at a random point on the spawn annulus, waving.
    #[must_use]
    pub fn spawn(
        id: impl Into<String>,
        cluster_id: impl Into<String>,
        config: &PlazaConfig,
        rng: &mut SmallRng,
    ) -> Self {
        let position = random_annulus_point(config, rng);
        let hold = rng.random_range(config.wave_hold.0..=config.wave_hold.1);
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            position: Vec3::new(position.x, 0.0, position.z),
            facing: config.camera_bearing,
            // Targeting the spawn point with a zeroed timer makes the
            // selector run on the agent's first tick.
            target: position,
            waypoint: None,
            replan_timer: 0.0,
            stuck_timer: 0.0,
            blocked_check_timer: 0.0,
            last_distance_to_target: 0.0,
            seek_roll_timer: rng.random_range(0.0..config.seek_roll_interval.max(0.1)),
            state: AgentState::Waving { hold },
            animation_clock: rng.random_range(0.0..std::f32::consts::TAU),
            opacity: 1.0,
            fall_pitch: 0.0,
            is_hovered: false,
            formation_role: FormationRole::None,
            formation_slot: None,
        }
    }

    /// Reset after the death cycle: new annulus position, cleared tint and
    /// rotation, a fresh animation clock, and a spawn wave.
    pub fn respawn(&mut self, config: &PlazaConfig, rng: &mut SmallRng) {
        let position = random_annulus_point(config, rng);
        self.position = Vec3::new(position.x, 0.0, position.z);
        self.target = position;
        self.waypoint = None;
        self.replan_timer = 0.0;
        self.stuck_timer = 0.0;
        self.blocked_check_timer = 0.0;
        self.last_distance_to_target = 0.0;
        self.opacity = 1.0;
        self.fall_pitch = 0.0;
        self.animation_clock = 0.0;
        self.facing = config.camera_bearing;
        let hold = rng.random_range(config.wave_hold.0..=config.wave_hold.1);
        self.state = AgentState::Waving { hold };
    }

    /// Ground-plane position.
    #[must_use]
    pub fn planar(&self) -> PlanarVec {
        self.position.planar()
    }

    /// The point locomotion currently steers toward.
    #[must_use]
    pub fn current_goal(&self) -> PlanarVec {
        self.waypoint.unwrap_or(self.target)
    }

    /// Whether the agent is currently dragged by the pointer.
    #[must_use]
    pub fn is_dragged(&self) -> bool {
        matches!(self.state, AgentState::Dragged)
    }
}

/// Uniform random point on the spawn annulus.
#[must_use]
pub fn random_annulus_point(config: &PlazaConfig, rng: &mut SmallRng) -> PlanarVec {
    let angle = rng.random_range(0.0..std::f32::consts::TAU);
    let radius = rng.random_range(config.spawn_radius_min..config.spawn_radius_max);
    PlanarVec::from_bearing(angle).scaled(radius)
}

/// Animation families the external renderer knows how to draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoseKind {
    Stand,
    Walk,
    Run,
    Wave,
    Punch,
    Flail,
    Float,
    Collapse,
}

/// Resolved pose handed to the renderer: a family plus a cycle phase in
/// [0, 1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub kind: PoseKind,
    pub phase: f32,
}

const WALK_CYCLE_HZ: f32 = 1.4;
const RUN_CYCLE_HZ: f32 = 2.2;
const WAVE_CYCLE_HZ: f32 = 1.0;
const PUNCH_CYCLE_HZ: f32 = 2.0;
const FLAIL_CYCLE_HZ: f32 = 1.8;

fn cycle(clock: f32, hz: f32) -> f32 {
    (clock * hz).fract()
}

/// Map behavioral state and animation clock to a renderable pose.
///
/// Pure: independent of movement math, so pose and locomotion can be tested
/// separately.
#[must_use]
pub fn pose_for(state: &AgentState, clock: f32) -> Pose {
    match state {
        AgentState::Walking { drop: Some(_) } => Pose {
            kind: PoseKind::Float,
            phase: cycle(clock, WALK_CYCLE_HZ),
        },
        AgentState::Walking { drop: None } | AgentState::Seeking { .. } => Pose {
            kind: PoseKind::Walk,
            phase: cycle(clock, WALK_CYCLE_HZ),
        },
        AgentState::Idle { .. } | AgentState::FormationIdle => Pose {
            kind: PoseKind::Stand,
            phase: cycle(clock, WAVE_CYCLE_HZ),
        },
        AgentState::Waving { .. } => Pose {
            kind: PoseKind::Wave,
            phase: cycle(clock, WAVE_CYCLE_HZ),
        },
        AgentState::RunningAway { .. } | AgentState::FormationMarching => Pose {
            kind: PoseKind::Run,
            phase: cycle(clock, RUN_CYCLE_HZ),
        },
        AgentState::Hitting { .. } => Pose {
            kind: PoseKind::Punch,
            phase: cycle(clock, PUNCH_CYCLE_HZ),
        },
        AgentState::Despawning { phase } => match phase {
            DespawnPhase::Parked => Pose {
                kind: PoseKind::Stand,
                phase: 0.0,
            },
            _ => Pose {
                kind: PoseKind::Run,
                phase: cycle(clock, RUN_CYCLE_HZ),
            },
        },
        AgentState::Dragged => Pose {
            kind: PoseKind::Stand,
            phase: cycle(clock, WAVE_CYCLE_HZ),
        },
        AgentState::KnockedBack { .. } | AgentState::Thrown { .. } => Pose {
            kind: PoseKind::Flail,
            phase: cycle(clock, FLAIL_CYCLE_HZ),
        },
        AgentState::Dying { progress, .. } => Pose {
            kind: PoseKind::Collapse,
            phase: progress.clamp(0.0, 1.0),
        },
    }
}
