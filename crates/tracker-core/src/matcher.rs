//! Candidate matchers for the Approved and Syncing states.

use std::collections::BTreeSet;

use contracts::{ExitDirection, LocationId, SharedSignal};
use tracing::warn;

use crate::comparison::{compare, has_unrecorded_details, Comparison};
use crate::context::StepContext;
use crate::holds::LockerToken;
use crate::path::{ForkTarget, NodeId};
use crate::probe::CandidateRecipient;
use crate::world::WorldModel;

// ---------------------------------------------------------------------------
// Approved
// ---------------------------------------------------------------------------

/// Looks for exactly one location consistent with the signal. A second distinct
/// match makes the attempt ambiguous.
#[derive(Debug, Clone)]
pub struct ApprovedMatcher {
    signal: SharedSignal,
    matched: Option<LocationId>,
    more_than_one: bool,
    needs_update: bool,
}

impl ApprovedMatcher {
    pub fn new(signal: SharedSignal) -> Self {
        Self {
            signal,
            matched: None,
            more_than_one: false,
            needs_update: false,
        }
    }

    /// Forget everything seen so far; used between probe steps.
    pub fn reset(&mut self) {
        self.matched = None;
        self.more_than_one = false;
        self.needs_update = false;
    }

    pub fn one_match(&self) -> Option<LocationId> {
        if self.more_than_one {
            None
        } else {
            self.matched
        }
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }
}

impl CandidateRecipient for ApprovedMatcher {
    fn receive_candidate<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, location: LocationId) {
        let tolerance = ctx.config.matching_tolerance;
        let Some((outcome, temporary, unrecorded)) = ctx.location(location).map(|candidate| {
            (
                compare(candidate, &self.signal, tolerance),
                candidate.temporary,
                has_unrecorded_details(candidate, &self.signal),
            )
        }) else {
            return;
        };
        match outcome {
            Comparison::Different => {
                if temporary {
                    ctx.changes.remove_location(location);
                }
            }
            outcome => match self.matched {
                Some(previous) if previous != location => self.more_than_one = true,
                Some(_) => {}
                None => {
                    self.matched = Some(location);
                    self.needs_update = outcome == Comparison::Tolerance || unrecorded;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Syncing
// ---------------------------------------------------------------------------

/// Forks one child per offered location from a disposable root.
///
/// Offering more than `max_paths` distinct locations discards everything and
/// ignores the rest of the step.
#[derive(Debug)]
pub struct SyncingMatcher {
    root: Option<NodeId>,
    paths: Vec<NodeId>,
    seen: BTreeSet<LocationId>,
    locker: LockerToken,
}

impl SyncingMatcher {
    pub fn new(root: NodeId, locker: LockerToken) -> Self {
        Self {
            root: Some(root),
            paths: Vec::new(),
            seen: BTreeSet::new(),
            locker,
        }
    }

    /// Tear down the root if nothing was forked from it and hand over the paths.
    pub fn finish<W: WorldModel>(self, ctx: &mut StepContext<'_, W>) -> Vec<NodeId> {
        if let Some(root) = self.root {
            ctx.deny(root);
        }
        self.paths
    }

    fn discard_all<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>) {
        warn!(
            max_paths = ctx.config.max_paths,
            "too many syncing candidates, discarding all"
        );
        for path in self.paths.drain(..) {
            ctx.deny(path);
        }
        if let Some(root) = self.root.take() {
            if ctx.tree.is_live(root) {
                ctx.deny(root);
            }
        }
    }
}

impl CandidateRecipient for SyncingMatcher {
    fn receive_candidate<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, location: LocationId) {
        let Some(root) = self.root else {
            return;
        };
        if !self.seen.insert(location) {
            return;
        }
        if self.seen.len() > ctx.config.max_paths as usize {
            self.discard_all(ctx);
            return;
        }
        let Some(position) = ctx.location(location).map(|l| l.position) else {
            return;
        };
        let target = ForkTarget {
            location,
            expected: position,
            direction: ExitDirection::NoMove,
        };
        if let Some(node) = ctx.fork(root, target, self.locker) {
            self.paths.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeCollector;
    use crate::holds::RoomHolds;
    use crate::path::PathTree;
    use crate::world::WorldMap;
    use contracts::{Coordinate, MoveType, Signal, TrackerConfig, WorldChange};

    struct Parts {
        tree: PathTree,
        holds: RoomHolds,
        changes: ChangeCollector,
        config: TrackerConfig,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                tree: PathTree::new(),
                holds: RoomHolds::new(),
                changes: ChangeCollector::new(),
                config: TrackerConfig::default(),
            }
        }

        fn ctx<'a>(&'a mut self, map: &'a mut WorldMap) -> StepContext<'a, WorldMap> {
            StepContext::new(
                map,
                &mut self.tree,
                &mut self.holds,
                &mut self.changes,
                &self.config,
            )
        }
    }

    fn hall_signal() -> SharedSignal {
        Signal::new(MoveType::Look).with_name("Hall").shared()
    }

    #[test]
    fn single_candidate_matches() {
        let mut map = WorldMap::new();
        let hall = map.add_room("Hall", "", Coordinate::default());
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let mut matcher = ApprovedMatcher::new(hall_signal());
        matcher.receive_candidate(&mut ctx, hall);
        matcher.receive_candidate(&mut ctx, hall);
        assert_eq!(matcher.one_match(), Some(hall));
        assert!(!matcher.needs_update());
    }

    #[test]
    fn two_matches_are_ambiguous_until_reset() {
        let mut map = WorldMap::new();
        let first = map.add_room("Hall", "", Coordinate::new(0, 0, 0));
        let second = map.add_room("Hall", "", Coordinate::new(5, 0, 0));
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let mut matcher = ApprovedMatcher::new(hall_signal());
        matcher.receive_candidate(&mut ctx, first);
        matcher.receive_candidate(&mut ctx, second);
        assert_eq!(matcher.one_match(), None);

        matcher.reset();
        matcher.receive_candidate(&mut ctx, second);
        assert_eq!(matcher.one_match(), Some(second));
    }

    #[test]
    fn different_temporary_candidate_is_queued_for_removal() {
        let mut map = WorldMap::new();
        let temp = map.create_temporary(
            &Signal::new(MoveType::North).with_name("Kitchen"),
            Coordinate::default(),
        );
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let mut matcher = ApprovedMatcher::new(hall_signal());
        matcher.receive_candidate(&mut ctx, temp);
        assert_eq!(matcher.one_match(), None);
        assert_eq!(
            parts.changes.changes(),
            &[WorldChange::RemoveLocation { location: temp }]
        );
    }

    #[test]
    fn tolerant_match_needs_update() {
        let mut map = WorldMap::new();
        let unnamed = map.add_room("", "", Coordinate::default());
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let mut matcher = ApprovedMatcher::new(hall_signal());
        matcher.receive_candidate(&mut ctx, unnamed);
        assert_eq!(matcher.one_match(), Some(unnamed));
        assert!(matcher.needs_update());
    }

    #[test]
    fn syncing_forks_each_distinct_candidate_once() {
        let mut map = WorldMap::new();
        let a = map.add_room("Hall", "", Coordinate::new(0, 0, 0));
        let b = map.add_room("Hall", "", Coordinate::new(3, 0, 0));
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let root = ctx.tree.root(None);
        let mut matcher = SyncingMatcher::new(root, LockerToken(9));
        for id in [a, b, a] {
            matcher.receive_candidate(&mut ctx, id);
        }
        let paths = matcher.finish(&mut ctx);

        assert_eq!(paths.len(), 2);
        assert!(ctx.tree.is_live(root));
        for path in &paths {
            assert!((ctx.tree.probability(*path) - 5.0).abs() < 1e-9);
        }
        assert_eq!(ctx.holds.count(a), 1);
        assert_eq!(ctx.holds.count(b), 1);
    }

    #[test]
    fn syncing_without_candidates_frees_the_root() {
        let mut map = WorldMap::new();
        let mut parts = Parts::new();
        let mut ctx = parts.ctx(&mut map);
        let root = ctx.tree.root(None);
        let paths = SyncingMatcher::new(root, LockerToken(1)).finish(&mut ctx);
        assert!(paths.is_empty());
        assert_eq!(ctx.tree.live_count(), 0);
    }

    #[test]
    fn syncing_overflow_discards_everything() {
        let mut map = WorldMap::new();
        let ids: Vec<_> = (0..4)
            .map(|x| map.add_room("Hall", "", Coordinate::new(x, 0, 0)))
            .collect();
        let mut parts = Parts::new();
        parts.config.max_paths = 2;
        let mut ctx = parts.ctx(&mut map);
        let root = ctx.tree.root(None);
        let mut matcher = SyncingMatcher::new(root, LockerToken(1));
        for id in &ids {
            matcher.receive_candidate(&mut ctx, *id);
        }
        let paths = matcher.finish(&mut ctx);

        assert!(paths.is_empty());
        assert_eq!(ctx.tree.live_count(), 0);
        assert!(ctx.holds.is_empty());
        assert_eq!(ctx.holds.stats().outstanding(), 0);
    }
}
