use contracts::{Coordinate, LocationId, SharedSignal, Signal};
use tracing::{debug, warn};

use super::{patch, Machine, TrackerState};
use crate::context::StepContext;
use crate::matcher::{ApprovedMatcher, SyncingMatcher};
use crate::path::NodeId;
use crate::probe::{try_coordinate, try_exits, try_position, CandidateRecipient};
use crate::strategy::{DirectionFollowing, MultiProbe};
use crate::world::WorldModel;

/// Places the approved matcher looks, in order, once a server id lookup fails.
#[derive(Debug, Clone, Copy)]
enum ApprovedProbe {
    ForwardExit,
    ReverseExit,
    Expected,
    Below,
    Above,
}

const APPROVED_PROBES: [ApprovedProbe; 5] = [
    ApprovedProbe::ForwardExit,
    ApprovedProbe::ReverseExit,
    ApprovedProbe::Expected,
    ApprovedProbe::Below,
    ApprovedProbe::Above,
];

impl Machine {
    pub(super) fn step<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, signal: &SharedSignal) {
        match self.state {
            TrackerState::Approved => self.approved(ctx, signal),
            TrackerState::Experimenting => self.experimenting(ctx, signal),
            TrackerState::Syncing => self.syncing(ctx, signal),
        }
    }

    fn approved<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, signal: &SharedSignal) {
        let Some(prior) = self.most_likely else {
            self.enter(TrackerState::Syncing);
            self.syncing(ctx, signal);
            return;
        };

        let mut matcher = ApprovedMatcher::new(signal.clone());
        if let Some(location) = find_unique(ctx, &mut matcher, prior, signal) {
            patch::apply(ctx, signal, Some(prior), location, matcher.needs_update());
            self.most_likely = Some(location);
            debug!(%location, "followed approved position");
            return;
        }

        self.paths = vec![ctx.tree.root(Some(prior))];
        self.enter(TrackerState::Experimenting);
        self.experimenting(ctx, signal);
    }

    fn experimenting<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, signal: &SharedSignal) {
        let short_paths = std::mem::take(&mut self.paths);
        let locker = self.locker();
        let paths = if signal.move_type.is_concrete() && signal.skipped == 0 {
            DirectionFollowing::new(signal.clone(), short_paths, locker).run(ctx)
        } else {
            MultiProbe::new(signal.clone(), short_paths, locker).run(ctx)
        };
        self.evaluate_paths(ctx, paths);
    }

    fn syncing<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, signal: &SharedSignal) {
        if signal.skipped > ctx.config.max_skipped {
            warn!(
                skipped = signal.skipped,
                max_skipped = ctx.config.max_skipped,
                "too many skipped signals to sync"
            );
            return;
        }
        let root = ctx.tree.root(None);
        let mut matcher = SyncingMatcher::new(root, self.locker());
        let by_server_id = signal
            .server_id
            .and_then(|server_id| ctx.world.find_by_server_id(server_id));
        if let Some(id) = by_server_id {
            matcher.receive_candidate(ctx, id);
        }
        for id in ctx
            .world
            .find_candidates(signal, ctx.config.matching_tolerance)
        {
            matcher.receive_candidate(ctx, id);
        }
        let paths = matcher.finish(ctx);
        self.evaluate_paths(ctx, paths);
    }

    fn evaluate_paths<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, paths: Vec<NodeId>) {
        match paths.len() {
            0 => self.enter(TrackerState::Syncing),
            1 => {
                let only = paths[0];
                self.most_likely = ctx.tree.location(only);
                ctx.approve(only);
                self.enter(TrackerState::Approved);
            }
            count => {
                self.most_likely = paths.last().and_then(|last| ctx.tree.location(*last));
                self.paths = paths;
                debug!(paths = count, "still experimenting");
                self.enter(TrackerState::Experimenting);
            }
        }
    }
}

/// Run the approved probes until one of them yields exactly one match.
fn find_unique<W: WorldModel>(
    ctx: &mut StepContext<'_, W>,
    matcher: &mut ApprovedMatcher,
    prior: LocationId,
    signal: &Signal,
) -> Option<LocationId> {
    let by_server_id = signal
        .server_id
        .and_then(|server_id| ctx.world.find_by_server_id(server_id));
    if let Some(id) = by_server_id {
        matcher.receive_candidate(ctx, id);
        if let Some(found) = matcher.one_match() {
            return Some(found);
        }
    }

    let move_type = signal.move_type;
    let expected = ctx
        .location(prior)
        .map(|l| l.position + move_type.direction().offset())?;
    for probe in APPROVED_PROBES {
        matcher.reset();
        match probe {
            ApprovedProbe::ForwardExit => try_exits(ctx, matcher, prior, move_type, true),
            ApprovedProbe::ReverseExit => try_exits(ctx, matcher, prior, move_type, false),
            ApprovedProbe::Expected => try_coordinate(ctx, matcher, prior, move_type),
            ApprovedProbe::Below => try_position(ctx, matcher, expected + Coordinate::new(0, 0, -1)),
            ApprovedProbe::Above => try_position(ctx, matcher, expected + Coordinate::new(0, 0, 1)),
        }
        if let Some(found) = matcher.one_match() {
            return Some(found);
        }
    }
    None
}
