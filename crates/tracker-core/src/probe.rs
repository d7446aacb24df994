//! Enumerating the locations a move could have led to.
//!
//! Probes collect ids first and offer them afterwards, so recipients are free
//! to mutate the world or the tree while receiving.

use std::collections::BTreeSet;

use contracts::{Coordinate, Exit, LocationId, MoveType, ALL_EXITS, CONCRETE_EXITS};

use crate::context::StepContext;
use crate::world::WorldModel;

/// Anything that consumes locations offered by a probe.
pub trait CandidateRecipient {
    fn receive_candidate<W: WorldModel>(&mut self, ctx: &mut StepContext<'_, W>, location: LocationId);
}

fn side(exit: &Exit, outgoing: bool) -> &BTreeSet<LocationId> {
    if outgoing {
        &exit.outgoing
    } else {
        &exit.incoming
    }
}

/// Offer the targets of `here`'s exit for the move, outgoing or incoming.
///
/// A move without a concrete direction offers `here` itself and, when the
/// destination could lie behind any exit, the targets of every exit.
pub fn try_exits<W: WorldModel, R: CandidateRecipient>(
    ctx: &mut StepContext<'_, W>,
    recipient: &mut R,
    here: LocationId,
    move_type: MoveType,
    outgoing: bool,
) {
    let Some(location) = ctx.location(here) else {
        return;
    };
    let direction = move_type.direction();
    let mut offered = Vec::new();
    if direction.is_concrete() {
        offered.extend(side(location.exit(direction), outgoing).iter().copied());
    } else {
        offered.push(here);
        if move_type.probes_all_exits() {
            for exit in ALL_EXITS {
                offered.extend(side(location.exit(exit), outgoing).iter().copied());
            }
        }
    }
    for id in offered {
        recipient.receive_candidate(ctx, id);
    }
}

/// Offer whatever sits at the coordinate the move should have reached. Moves
/// that could go anywhere probe `here`'s own position and its six neighbours.
pub fn try_coordinate<W: WorldModel, R: CandidateRecipient>(
    ctx: &mut StepContext<'_, W>,
    recipient: &mut R,
    here: LocationId,
    move_type: MoveType,
) {
    let Some(position) = ctx.location(here).map(|location| location.position) else {
        return;
    };
    if move_type.probes_all_exits() {
        try_position(ctx, recipient, position);
        for direction in CONCRETE_EXITS {
            try_position(ctx, recipient, position + direction.offset());
        }
    } else {
        try_position(ctx, recipient, position + move_type.direction().offset());
    }
}

pub fn try_position<W: WorldModel, R: CandidateRecipient>(
    ctx: &mut StepContext<'_, W>,
    recipient: &mut R,
    position: Coordinate,
) {
    for id in ctx.world.locations_at(position) {
        recipient.receive_candidate(ctx, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeCollector;
    use crate::holds::RoomHolds;
    use crate::path::PathTree;
    use crate::world::WorldMap;
    use contracts::{ExitDirection, TrackerConfig};

    #[derive(Default)]
    struct Recorder(Vec<LocationId>);

    impl CandidateRecipient for Recorder {
        fn receive_candidate<W: WorldModel>(
            &mut self,
            _ctx: &mut StepContext<'_, W>,
            location: LocationId,
        ) {
            self.0.push(location);
        }
    }

    struct Plus {
        map: WorldMap,
        center: LocationId,
        north: LocationId,
        east: LocationId,
        up: LocationId,
    }

    /// A room with neighbours north, east and up; only north and east are
    /// connected by exits.
    fn plus() -> Plus {
        let mut map = WorldMap::new();
        let center = map.add_room("Square", "", Coordinate::new(0, 0, 0));
        let north = map.add_room("Gate", "", Coordinate::new(0, 1, 0));
        let east = map.add_room("Market", "", Coordinate::new(1, 0, 0));
        let up = map.add_room("Roof", "", Coordinate::new(0, 0, 1));
        map.connect_both(center, ExitDirection::North, north);
        map.connect(east, ExitDirection::West, center);
        Plus {
            map,
            center,
            north,
            east,
            up,
        }
    }

    fn probe<F>(map: &mut WorldMap, run: F) -> Vec<LocationId>
    where
        F: FnOnce(&mut StepContext<'_, WorldMap>, &mut Recorder),
    {
        let mut tree = PathTree::new();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        let config = TrackerConfig::default();
        let mut ctx = StepContext::new(map, &mut tree, &mut holds, &mut changes, &config);
        let mut recorder = Recorder::default();
        run(&mut ctx, &mut recorder);
        recorder.0
    }

    #[test]
    fn concrete_move_follows_one_exit() {
        let mut fx = plus();
        let center = fx.center;
        let out = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, center, MoveType::North, true)
        });
        assert_eq!(out, vec![fx.north]);

        let none = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, center, MoveType::East, true)
        });
        assert!(none.is_empty());
    }

    #[test]
    fn incoming_side_finds_one_way_exits() {
        let mut fx = plus();
        let center = fx.center;
        // Market's west exit leads into the square's east side.
        let found = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, center, MoveType::East, false)
        });
        assert_eq!(found, vec![fx.east]);
    }

    #[test]
    fn look_offers_only_the_room_itself() {
        let mut fx = plus();
        let center = fx.center;
        let found = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, center, MoveType::Look, true)
        });
        assert_eq!(found, vec![center]);
    }

    #[test]
    fn flee_offers_self_and_every_exit() {
        let mut fx = plus();
        let center = fx.center;
        let found = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, center, MoveType::Flee, true)
        });
        assert_eq!(found, vec![center, fx.north]);
    }

    #[test]
    fn coordinate_probe_for_concrete_move() {
        let mut fx = plus();
        let center = fx.center;
        let found = probe(&mut fx.map, |ctx, rec| {
            try_coordinate(ctx, rec, center, MoveType::Up)
        });
        assert_eq!(found, vec![fx.up]);
    }

    #[test]
    fn coordinate_probe_for_undirected_move_covers_neighbours() {
        let mut fx = plus();
        let center = fx.center;
        let mut found = probe(&mut fx.map, |ctx, rec| {
            try_coordinate(ctx, rec, center, MoveType::Scout)
        });
        found.sort();
        let mut expected = vec![fx.center, fx.north, fx.east, fx.up];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn unknown_location_offers_nothing() {
        let mut fx = plus();
        let found = probe(&mut fx.map, |ctx, rec| {
            try_exits(ctx, rec, LocationId(404), MoveType::Flee, true);
            try_coordinate(ctx, rec, LocationId(404), MoveType::Flee);
        });
        assert!(found.is_empty());
    }
}
