//! Location tracking state machine: decides, after every parsed signal, where in the
//! world model the player most likely is, forking and pruning hypotheses as needed.

pub mod changes;
pub mod comparison;
pub mod context;
pub mod holds;
pub mod matcher;
pub mod path;
pub mod probe;
pub mod strategy;
pub mod tracker;
pub mod world;

pub use changes::ChangeCollector;
pub use comparison::{compare, Comparison};
pub use context::StepContext;
pub use holds::{HoldStats, LockerToken, RoomHolds};
pub use matcher::{ApprovedMatcher, SyncingMatcher};
pub use path::{ForkTarget, NodeId, PathTree};
pub use probe::CandidateRecipient;
pub use strategy::{DirectionFollowing, MultiProbe};
pub use tracker::{PositionChanged, StepMetrics, Tracker, TrackerError, TrackerState};
pub use world::{WorldError, WorldMap, WorldModel};
