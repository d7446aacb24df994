//! The coordinator: one state machine step per signal, changes submitted once
//! the step has settled.

mod inspect;
mod patch;
mod step;

use std::collections::BTreeSet;

use contracts::{ConfigError, LocationId, SharedSignal, TrackerConfig, WorldChange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::changes::ChangeCollector;
use crate::comparison::{compare, has_unrecorded_details, Comparison};
use crate::context::StepContext;
use crate::holds::{LockerToken, RoomHolds};
use crate::path::{NodeId, PathTree};
use crate::world::{WorldError, WorldModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// Exactly one location is believed; no hypotheses are live.
    Approved,
    Experimenting,
    Syncing,
}

/// Emitted whenever a settled step leaves the tracker outside `Syncing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChanged {
    pub sequence: u64,
    pub location: LocationId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepMetrics {
    pub live_paths: usize,
    pub submitted_changes: usize,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("cannot force position to unknown location {0}")]
    UnknownLocation(LocationId),
}

/// State that the step logic mutates while the path tree and hold table are
/// lent out to a [`StepContext`].
#[derive(Debug)]
struct Machine {
    state: TrackerState,
    most_likely: Option<LocationId>,
    paths: Vec<NodeId>,
    next_locker: u32,
}

#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,
    machine: Machine,
    tree: PathTree,
    holds: RoomHolds,
    last_signal: Option<SharedSignal>,
    sequence: u64,
    position_events: Vec<PositionChanged>,
    last_batch: Vec<WorldChange>,
    last_step_metrics: StepMetrics,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::with_valid_config(TrackerConfig::default())
    }
}

impl Tracker {
    /// A tracker with no anchor; the first signals are used to sync.
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: TrackerConfig) -> Self {
        Self {
            config,
            machine: Machine {
                state: TrackerState::Syncing,
                most_likely: None,
                paths: Vec::new(),
                next_locker: 0,
            },
            tree: PathTree::new(),
            holds: RoomHolds::new(),
            last_signal: None,
            sequence: 0,
            position_events: Vec::new(),
            last_batch: Vec::new(),
            last_step_metrics: StepMetrics::default(),
        }
    }

    // --- Operations ---

    /// Process one signal and submit the resulting changes as one batch.
    pub fn handle<W: WorldModel>(
        &mut self,
        world: &mut W,
        signal: SharedSignal,
    ) -> Result<(), TrackerError> {
        let mut changes = ChangeCollector::new();
        {
            let mut ctx = StepContext::new(
                &mut *world,
                &mut self.tree,
                &mut self.holds,
                &mut changes,
                &self.config,
            );
            self.machine.step(&mut ctx, &signal);
        }
        self.last_signal = Some(signal);
        self.settle(world, changes)
    }

    /// Override the current position. With `also_update`, the last handled
    /// signal is used to patch the new anchor.
    pub fn force_position<W: WorldModel>(
        &mut self,
        world: &mut W,
        location: LocationId,
        also_update: bool,
    ) -> Result<(), TrackerError> {
        if world.location(location).is_none() {
            return Err(TrackerError::UnknownLocation(location));
        }
        let mut changes = ChangeCollector::new();
        {
            let mut ctx = StepContext::new(
                &mut *world,
                &mut self.tree,
                &mut self.holds,
                &mut changes,
                &self.config,
            );
            self.machine.release_all(&mut ctx);
            self.machine.most_likely = Some(location);
            self.machine.enter(TrackerState::Approved);
            if let Some(signal) = self.last_signal.as_deref().filter(|_| also_update) {
                let tolerance = ctx.config.matching_tolerance;
                let needs_update = ctx.location(location).is_some_and(|current| {
                    compare(current, signal, tolerance) != Comparison::Equal
                        || has_unrecorded_details(current, signal)
                });
                patch::apply(&mut ctx, signal, None, location, needs_update);
            }
        }
        debug!(%location, also_update, "position forced");
        self.settle(world, changes)
    }

    /// Abandon every hypothesis and start syncing again.
    pub fn release_all_paths<W: WorldModel>(&mut self, world: &mut W) -> Result<(), TrackerError> {
        let mut changes = ChangeCollector::new();
        {
            let mut ctx = StepContext::new(
                &mut *world,
                &mut self.tree,
                &mut self.holds,
                &mut changes,
                &self.config,
            );
            self.machine.release_all(&mut ctx);
            self.machine.enter(TrackerState::Syncing);
        }
        self.settle(world, changes)
    }

    // --- Accessors ---

    pub fn state(&self) -> TrackerState {
        self.machine.state
    }

    pub fn most_likely(&self) -> Option<LocationId> {
        self.machine.most_likely
    }

    /// Live hypotheses; the most likely one is last.
    pub fn paths(&self) -> &[NodeId] {
        &self.machine.paths
    }

    pub fn path_tree(&self) -> &PathTree {
        &self.tree
    }

    pub fn holds(&self) -> &RoomHolds {
        &self.holds
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The batch submitted by the last operation.
    pub fn last_changes(&self) -> &[WorldChange] {
        &self.last_batch
    }

    pub fn last_step_metrics(&self) -> StepMetrics {
        self.last_step_metrics
    }

    pub fn drain_position_events(&mut self) -> Vec<PositionChanged> {
        std::mem::take(&mut self.position_events)
    }

    // --- Settling ---

    fn settle<W: WorldModel>(
        &mut self,
        world: &mut W,
        changes: ChangeCollector,
    ) -> Result<(), TrackerError> {
        let batch = changes.into_changes();
        self.last_step_metrics = StepMetrics {
            live_paths: self.machine.paths.len(),
            submitted_changes: batch.len(),
        };
        if !batch.is_empty() {
            if let Err(err) = world.apply_changes(&batch) {
                warn!(%err, changes = batch.len(), "world rejected change batch, resyncing");
                self.recover(world, &batch);
                return Err(err.into());
            }
            debug!(changes = batch.len(), "submitted world changes");
        }
        self.last_batch = batch;

        if self.machine.state != TrackerState::Syncing {
            if let Some(location) = self.machine.most_likely {
                self.sequence = self.sequence.saturating_add(1);
                self.position_events.push(PositionChanged {
                    sequence: self.sequence,
                    location,
                });
            }
        }
        Ok(())
    }

    /// Drop every belief after the world refused a batch. Temporary locations
    /// the refused batch touched are removed unless a hypothesis still holds
    /// them.
    fn recover<W: WorldModel>(&mut self, world: &mut W, rejected: &[WorldChange]) {
        let mut changes = ChangeCollector::new();
        {
            let mut ctx = StepContext::new(
                &mut *world,
                &mut self.tree,
                &mut self.holds,
                &mut changes,
                &self.config,
            );
            self.machine.release_all(&mut ctx);
            let touched = rejected
                .iter()
                .map(WorldChange::subject)
                .collect::<BTreeSet<_>>();
            for location in touched {
                let orphaned = ctx.holds.count(location) == 0
                    && ctx.location(location).is_some_and(|l| l.temporary);
                if orphaned {
                    ctx.changes.remove_location(location);
                }
            }
        }
        self.machine.most_likely = None;
        self.machine.enter(TrackerState::Syncing);

        let cleanup = changes.into_changes();
        if !cleanup.is_empty() {
            if let Err(err) = world.apply_changes(&cleanup) {
                warn!(%err, "cleanup after rejected batch failed");
            }
        }
        self.last_step_metrics = StepMetrics {
            live_paths: 0,
            submitted_changes: cleanup.len(),
        };
        self.last_batch = cleanup;
    }
}

impl Machine {
    fn locker(&mut self) -> LockerToken {
        self.next_locker = self.next_locker.wrapping_add(1);
        LockerToken(self.next_locker)
    }

    fn enter(&mut self, state: TrackerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "tracker state changed");
            self.state = state;
        }
    }

    fn release_all<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>) {
        for path in std::mem::take(&mut self.paths) {
            ctx.deny(path);
        }
    }
}
