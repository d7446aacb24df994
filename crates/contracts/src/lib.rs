//! Cross-boundary contracts between the location tracker, the signal parser, and the world model.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod serde_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Exit slots per location: six concrete directions plus `Unknown` and `NoMove`.
pub const NUM_EXITS: usize = 8;
pub const NUM_CONCRETE_EXITS: usize = 6;

// ---------------------------------------------------------------------------
// Identifiers and geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct LocationId(pub u32);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc:{}", self.0)
    }
}

/// Unique identifier the game server attaches to a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ServerId(#[serde(with = "serde_u64_string")] pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv:{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance.
    pub fn distance(&self, other: &Coordinate) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        let dz = f64::from(self.z) - f64::from(other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Directions and moves
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExitDirection {
    North,
    South,
    East,
    West,
    Up,
    Down,
    Unknown,
    /// Degenerate direction of a move that stays in place (e.g. `look`).
    NoMove,
}

pub const ALL_EXITS: [ExitDirection; NUM_EXITS] = [
    ExitDirection::North,
    ExitDirection::South,
    ExitDirection::East,
    ExitDirection::West,
    ExitDirection::Up,
    ExitDirection::Down,
    ExitDirection::Unknown,
    ExitDirection::NoMove,
];

pub const CONCRETE_EXITS: [ExitDirection; NUM_CONCRETE_EXITS] = [
    ExitDirection::North,
    ExitDirection::South,
    ExitDirection::East,
    ExitDirection::West,
    ExitDirection::Up,
    ExitDirection::Down,
];

impl ExitDirection {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_concrete(self) -> bool {
        self.index() < NUM_CONCRETE_EXITS
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::West => Self::East,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Unknown => Self::Unknown,
            Self::NoMove => Self::NoMove,
        }
    }

    /// Coordinate delta of one step in this direction.
    pub fn offset(self) -> Coordinate {
        match self {
            Self::North => Coordinate::new(0, 1, 0),
            Self::South => Coordinate::new(0, -1, 0),
            Self::East => Coordinate::new(1, 0, 0),
            Self::West => Coordinate::new(-1, 0, 0),
            Self::Up => Coordinate::new(0, 0, 1),
            Self::Down => Coordinate::new(0, 0, -1),
            Self::Unknown | Self::NoMove => Coordinate::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    North,
    South,
    East,
    West,
    Up,
    Down,
    Look,
    Flee,
    Scout,
    Other,
    Unknown,
}

impl MoveType {
    pub fn direction(self) -> ExitDirection {
        match self {
            Self::North => ExitDirection::North,
            Self::South => ExitDirection::South,
            Self::East => ExitDirection::East,
            Self::West => ExitDirection::West,
            Self::Up => ExitDirection::Up,
            Self::Down => ExitDirection::Down,
            Self::Look => ExitDirection::NoMove,
            Self::Flee | Self::Scout | Self::Other | Self::Unknown => ExitDirection::Unknown,
        }
    }

    pub fn is_concrete(self) -> bool {
        self.direction().is_concrete()
    }

    /// Moves whose destination could be behind any exit.
    pub fn probes_all_exits(self) -> bool {
        matches!(self, Self::Flee | Self::Scout | Self::Other | Self::Unknown)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExitFlags {
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub door: bool,
    #[serde(default)]
    pub road: bool,
    #[serde(default)]
    pub climb: bool,
}

impl ExitFlags {
    pub fn open() -> Self {
        Self {
            exit: true,
            ..Self::default()
        }
    }

    pub fn door() -> Self {
        Self {
            exit: true,
            door: true,
            ..Self::default()
        }
    }
}

/// Per-direction exit observation carried by a signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitsSnapshot {
    /// False when the parser saw no exit line for this signal.
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub flags: [ExitFlags; NUM_CONCRETE_EXITS],
    #[serde(default)]
    pub server_ids: [Option<ServerId>; NUM_CONCRETE_EXITS],
}

impl ExitsSnapshot {
    pub fn with_exits(directions: &[ExitDirection]) -> Self {
        let mut snapshot = Self {
            valid: true,
            ..Self::default()
        };
        for direction in directions.iter().filter(|d| d.is_concrete()) {
            snapshot.flags[direction.index()] = ExitFlags::open();
        }
        snapshot
    }

    pub fn flags(&self, direction: ExitDirection) -> ExitFlags {
        if direction.is_concrete() {
            self.flags[direction.index()]
        } else {
            ExitFlags::default()
        }
    }

    pub fn server_id(&self, direction: ExitDirection) -> Option<ServerId> {
        if direction.is_concrete() {
            self.server_ids[direction.index()]
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Light {
    Lit,
    Dark,
}

/// What the prompt reveals about the rooms next to the current one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectedRoomFlags {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub direct_sunlight: [bool; NUM_CONCRETE_EXITS],
    #[serde(default)]
    pub troll_mode: bool,
}

impl ConnectedRoomFlags {
    pub fn has_direct_sunlight(&self, direction: ExitDirection) -> bool {
        direction.is_concrete() && self.direct_sunlight[direction.index()]
    }
}

/// One parsed observation. Immutable once built; shared as [`SharedSignal`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signal {
    pub move_type: MoveType,
    #[serde(default)]
    pub server_id: Option<ServerId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exits: ExitsSnapshot,
    #[serde(default)]
    pub light: Option<Light>,
    #[serde(default)]
    pub connected: ConnectedRoomFlags,
    /// Signals dropped by the parser before this one.
    #[serde(default)]
    pub skipped: u32,
}

pub type SharedSignal = Arc<Signal>;

impl Signal {
    pub fn new(move_type: MoveType) -> Self {
        Self {
            move_type,
            server_id: None,
            name: None,
            description: None,
            exits: ExitsSnapshot::default(),
            light: None,
            connected: ConnectedRoomFlags::default(),
            skipped: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_server_id(mut self, server_id: u64) -> Self {
        self.server_id = Some(ServerId(server_id));
        self
    }

    pub fn with_exits(mut self, exits: ExitsSnapshot) -> Self {
        self.exits = exits;
        self
    }

    pub fn with_light(mut self, light: Light) -> Self {
        self.light = Some(light);
        self
    }

    pub fn with_connected(mut self, connected: ConnectedRoomFlags) -> Self {
        self.connected = connected;
        self
    }

    pub fn with_skipped(mut self, skipped: u32) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn shared(self) -> SharedSignal {
        Arc::new(self)
    }
}

// ---------------------------------------------------------------------------
// Locations (read model owned by the world model)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exit {
    #[serde(default)]
    pub flags: ExitFlags,
    #[serde(default)]
    pub outgoing: BTreeSet<LocationId>,
    #[serde(default)]
    pub incoming: BTreeSet<LocationId>,
}

impl Exit {
    pub fn contains_out(&self, id: LocationId) -> bool {
        self.outgoing.contains(&id)
    }

    pub fn contains_in(&self, id: LocationId) -> bool {
        self.incoming.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sundeath {
    #[default]
    Undefined,
    Sundeath,
    NoSundeath,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub id: LocationId,
    #[serde(default)]
    pub server_id: Option<ServerId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub position: Coordinate,
    /// Never-confirmed locations synthesized during exploration.
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub exits: [Exit; NUM_EXITS],
    #[serde(default)]
    pub light: Option<Light>,
    #[serde(default)]
    pub sundeath: Sundeath,
}

impl Location {
    pub fn new(id: LocationId, position: Coordinate) -> Self {
        Self {
            id,
            server_id: None,
            name: String::new(),
            description: String::new(),
            position,
            temporary: false,
            exits: Default::default(),
            light: None,
            sundeath: Sundeath::Undefined,
        }
    }

    pub fn exit(&self, direction: ExitDirection) -> &Exit {
        &self.exits[direction.index()]
    }

    pub fn exit_mut(&mut self, direction: ExitDirection) -> &mut Exit {
        &mut self.exits[direction.index()]
    }

    /// Whether any concrete exit has been recorded yet.
    pub fn has_recorded_exits(&self) -> bool {
        CONCRETE_EXITS
            .iter()
            .any(|direction| self.exit(*direction).flags.exit)
    }
}

// ---------------------------------------------------------------------------
// World changes
// ---------------------------------------------------------------------------

/// A mutation request submitted to the world model as part of one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldChange {
    AddExit {
        from: LocationId,
        direction: ExitDirection,
        to: LocationId,
    },
    RemoveExit {
        from: LocationId,
        direction: ExitDirection,
        to: LocationId,
    },
    SetExitFlags {
        location: LocationId,
        direction: ExitDirection,
        flags: ExitFlags,
    },
    SetServerId {
        location: LocationId,
        server_id: ServerId,
    },
    SetSundeath {
        location: LocationId,
        sundeath: Sundeath,
    },
    UpdateLocation {
        location: LocationId,
        name: Option<String>,
        description: Option<String>,
        light: Option<Light>,
    },
    MakePermanent {
        location: LocationId,
    },
    /// Removes the location only if it is still temporary when applied.
    RemoveLocation {
        location: LocationId,
    },
}

impl WorldChange {
    /// The location the change is primarily about.
    pub fn subject(&self) -> LocationId {
        match self {
            Self::AddExit { from, .. } | Self::RemoveExit { from, .. } => *from,
            Self::SetExitFlags { location, .. }
            | Self::SetServerId { location, .. }
            | Self::SetSundeath { location, .. }
            | Self::UpdateLocation { location, .. }
            | Self::MakePermanent { location }
            | Self::RemoveLocation { location } => *location,
        }
    }

    pub fn is_add_exit(&self) -> bool {
        matches!(self, Self::AddExit { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid tracker config json: {0}")]
    Parse(String),
    #[error("unsupported config schema version {0}")]
    UnsupportedSchema(String),
    #[error("{field} must be a positive finite number, got {value}")]
    NonPositiveFactor { field: &'static str, value: String },
    #[error("max_paths must be at least 1")]
    ZeroMaxPaths,
    #[error("matching_tolerance must be a percentage, got {0}")]
    ToleranceOutOfRange(u8),
}

/// Numeric parameters of hypothesis scoring and pruning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub schema_version: String,
    pub accept_best_relative: f64,
    pub accept_best_absolute: f64,
    pub new_room_penalty: f64,
    pub correct_position_bonus: f64,
    pub multiple_connections_penalty: f64,
    pub max_paths: u32,
    /// Percentage of description words allowed to differ for a tolerant match.
    pub matching_tolerance: u8,
    pub max_skipped: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            accept_best_relative: 10.0,
            accept_best_absolute: 3.0,
            new_room_penalty: 5.0,
            correct_position_bonus: 5.0,
            multiple_connections_penalty: 2.0,
            max_paths: 1000,
            matching_tolerance: 8,
            max_skipped: 1,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION_V1 {
            return Err(ConfigError::UnsupportedSchema(self.schema_version.clone()));
        }
        let factors = [
            ("accept_best_relative", self.accept_best_relative),
            ("accept_best_absolute", self.accept_best_absolute),
            ("new_room_penalty", self.new_room_penalty),
            ("correct_position_bonus", self.correct_position_bonus),
            ("multiple_connections_penalty", self.multiple_connections_penalty),
        ];
        for (field, value) in factors {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositiveFactor {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if self.max_paths == 0 {
            return Err(ConfigError::ZeroMaxPaths);
        }
        if self.matching_tolerance > 100 {
            return Err(ConfigError::ToleranceOutOfRange(self.matching_tolerance));
        }
        Ok(())
    }
}
