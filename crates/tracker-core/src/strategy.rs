//! Hypothesis expansion while experimenting.
//!
//! Both strategies feed candidates into a shared [`Frontier`], which forks
//! children from the previous paths, tracks the best and second best by
//! probability, and prunes the result once the step is over. They differ only
//! in how candidates are discovered.

use std::collections::BTreeSet;

use contracts::{ExitDirection, LocationId, SharedSignal};
use tracing::debug;

use crate::comparison::{compare, Comparison};
use crate::context::StepContext;
use crate::holds::LockerToken;
use crate::path::{ForkTarget, NodeId};
use crate::probe::{try_coordinate, try_exits, try_position, CandidateRecipient};
use crate::world::WorldModel;

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Frontier {
    short_paths: Vec<NodeId>,
    pool: Vec<NodeId>,
    best: Option<NodeId>,
    second: Option<NodeId>,
    forked: u32,
    locker: LockerToken,
}

impl Frontier {
    fn new(short_paths: Vec<NodeId>, locker: LockerToken) -> Self {
        Self {
            short_paths,
            pool: Vec::new(),
            best: None,
            second: None,
            forked: 0,
            locker,
        }
    }

    fn augment<W: WorldModel>(
        &mut self,
        ctx: &mut StepContext<'_, W>,
        parent: NodeId,
        candidate: LocationId,
        direction: ExitDirection,
    ) {
        let origin = ctx
            .tree
            .location(parent)
            .and_then(|id| ctx.location(id))
            .map(|here| here.position + direction.offset());
        let Some(expected) = origin.or_else(|| ctx.location(candidate).map(|c| c.position)) else {
            return;
        };
        let target = ForkTarget {
            location: candidate,
            expected,
            direction,
        };
        let Some(node) = ctx.fork(parent, target, self.locker) else {
            return;
        };
        self.forked += 1;

        let probability = ctx.tree.probability(node);
        match self.best {
            Some(best) if probability <= ctx.tree.probability(best) => {
                let beats_second = self
                    .second
                    .map_or(true, |second| probability > ctx.tree.probability(second));
                if beats_second {
                    self.second = Some(node);
                }
                self.pool.push(node);
            }
            previous => {
                if let Some(previous) = previous {
                    self.pool.push(previous);
                    self.second = Some(previous);
                }
                self.best = Some(node);
            }
        }
    }

    /// Deny unproductive and hopeless paths. The best path, if any, is last.
    fn evaluate<W: WorldModel>(self, ctx: &mut StepContext<'_, W>) -> Vec<NodeId> {
        for path in &self.short_paths {
            ctx.deny(*path);
        }
        let Some(best) = self.best else {
            debug!("no candidate survived the step");
            return Vec::new();
        };

        let config = ctx.config;
        let best_probability = ctx.tree.probability(best);
        let decisive = self.second.map_or(true, |second| {
            let second = ctx.tree.probability(second);
            best_probability > second * config.accept_best_relative
                || best_probability > second + config.accept_best_absolute
        });
        if decisive {
            for path in self.pool {
                ctx.deny(path);
            }
            debug!(forked = self.forked, "single best path");
            return vec![best];
        }

        let limit = f64::from(config.max_paths) / f64::from(self.forked.max(1));
        let best_location = ctx.tree.location(best);
        let mut survivors = Vec::new();
        for path in self.pool {
            let probability = ctx.tree.probability(path);
            let hopeless = best_probability > probability * limit;
            let duplicate =
                probability <= best_probability && ctx.tree.location(path) == best_location;
            if hopeless || duplicate {
                ctx.deny(path);
            } else {
                survivors.push(path);
            }
        }
        survivors.push(best);
        debug!(
            forked = self.forked,
            kept = survivors.len(),
            "several paths remain"
        );
        survivors
    }
}

// ---------------------------------------------------------------------------
// Direction following
// ---------------------------------------------------------------------------

/// Expansion for a clean directional move. Looks behind the move's exit and at
/// the expected coordinate of every path end, synthesizing a temporary
/// location where nothing fits. Every candidate is offered to every path.
#[derive(Debug)]
pub struct DirectionFollowing {
    signal: SharedSignal,
    frontier: Frontier,
    candidates: Vec<LocationId>,
    seen: BTreeSet<LocationId>,
    found_here: bool,
}

impl DirectionFollowing {
    pub fn new(signal: SharedSignal, short_paths: Vec<NodeId>, locker: LockerToken) -> Self {
        Self {
            signal,
            frontier: Frontier::new(short_paths, locker),
            candidates: Vec::new(),
            seen: BTreeSet::new(),
            found_here: false,
        }
    }

    pub fn run<W: WorldModel>(mut self, ctx: &mut StepContext<'_, W>) -> Vec<NodeId> {
        let move_type = self.signal.move_type;
        let direction = move_type.direction();

        let mut ends = Vec::new();
        let mut visited = BTreeSet::new();
        for path in &self.frontier.short_paths {
            if let Some(end) = ctx.tree.location(*path) {
                if visited.insert(end) {
                    ends.push(end);
                }
            }
        }

        for end in ends {
            let Some(expected) = ctx.location(end).map(|l| l.position + direction.offset()) else {
                continue;
            };
            self.found_here = false;
            try_exits(ctx, &mut self, end, move_type, true);
            try_coordinate(ctx, &mut self, end, move_type);
            if !self.found_here {
                let created = ctx.world.create_temporary(&self.signal, expected);
                debug!(location = %created, position = %expected, "synthesized temporary location");
                try_position(ctx, &mut self, expected);
            }
        }

        let parents = self.frontier.short_paths.clone();
        for candidate in std::mem::take(&mut self.candidates) {
            for parent in &parents {
                self.frontier.augment(ctx, *parent, candidate, direction);
            }
        }
        self.frontier.evaluate(ctx)
    }
}

impl CandidateRecipient for DirectionFollowing {
    fn receive_candidate<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, location: LocationId) {
        let tolerance = ctx.config.matching_tolerance;
        let consistent = ctx
            .location(location)
            .is_some_and(|candidate| compare(candidate, &self.signal, tolerance) != Comparison::Different);
        if !consistent {
            return;
        }
        self.found_here = true;
        if self.seen.insert(location) {
            self.candidates.push(location);
        }
    }
}

// ---------------------------------------------------------------------------
// Multi probe
// ---------------------------------------------------------------------------

/// Expansion for undirected or unreliable moves. Probes exits both ways and the
/// neighbouring coordinates of each path separately and only accepts exact
/// matches. Never creates locations.
#[derive(Debug)]
pub struct MultiProbe {
    signal: SharedSignal,
    frontier: Frontier,
    current: Option<NodeId>,
    offered: BTreeSet<LocationId>,
}

impl MultiProbe {
    pub fn new(signal: SharedSignal, short_paths: Vec<NodeId>, locker: LockerToken) -> Self {
        Self {
            signal,
            frontier: Frontier::new(short_paths, locker),
            current: None,
            offered: BTreeSet::new(),
        }
    }

    pub fn run<W: WorldModel>(mut self, ctx: &mut StepContext<'_, W>) -> Vec<NodeId> {
        let move_type = self.signal.move_type;
        for path in self.frontier.short_paths.clone() {
            let Some(here) = ctx.tree.location(path) else {
                continue;
            };
            self.current = Some(path);
            self.offered.clear();
            try_exits(ctx, &mut self, here, move_type, true);
            try_exits(ctx, &mut self, here, move_type, false);
            try_coordinate(ctx, &mut self, here, move_type);
        }
        self.current = None;
        self.frontier.evaluate(ctx)
    }
}

impl CandidateRecipient for MultiProbe {
    fn receive_candidate<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, location: LocationId) {
        let Some(parent) = self.current else {
            return;
        };
        if !self.offered.insert(location) {
            return;
        }
        let tolerance = ctx.config.matching_tolerance;
        let exact = ctx
            .location(location)
            .is_some_and(|candidate| compare(candidate, &self.signal, tolerance) == Comparison::Equal);
        if exact {
            let direction = self.signal.move_type.direction();
            self.frontier.augment(ctx, parent, location, direction);
        }
    }
}
