use contracts::{
    Coordinate, ExitDirection, Location, LocationId, MoveType, ServerId, Signal, TrackerConfig,
    WorldChange,
};
use proptest::prelude::*;
use tracker_core::{ChangeCollector, LockerToken, RoomHolds, Tracker, TrackerState, WorldMap, WorldModel};

const STEPS: [(MoveType, i32, i32); 4] = [
    (MoveType::North, 0, 1),
    (MoveType::South, 0, -1),
    (MoveType::East, 1, 0),
    (MoveType::West, -1, 0),
];

/// A `size` x `size` grid of uniquely identified rooms, connected both ways.
fn identified_grid(size: i32) -> (WorldMap, Vec<Vec<LocationId>>) {
    let mut map = WorldMap::new();
    let mut ids = Vec::new();
    for x in 0..size {
        let mut column = Vec::new();
        for y in 0..size {
            let mut room = Location::new(LocationId((x * size + y) as u32), Coordinate::new(x, y, 0));
            room.name = format!("Room {x},{y}");
            room.server_id = Some(ServerId(1000 + (x * size + y) as u64));
            column.push(map.add_location(room));
        }
        ids.push(column);
    }
    for x in 0..size {
        for y in 0..size {
            if y + 1 < size {
                map.connect_both(ids[x as usize][y as usize], ExitDirection::North, ids[x as usize][y as usize + 1]);
            }
            if x + 1 < size {
                map.connect_both(ids[x as usize][y as usize], ExitDirection::East, ids[x as usize + 1][y as usize]);
            }
        }
    }
    (map, ids)
}

/// Rooms that all look alike, some connected.
fn lookalike_map(count: i32) -> WorldMap {
    let mut map = WorldMap::new();
    let mut previous = None;
    for i in 0..count {
        let room = map.add_room("Cell", "", Coordinate::new(i * 2, 0, 0));
        if let Some(previous) = previous.filter(|_| i % 2 == 1) {
            map.connect_both(previous, ExitDirection::East, room);
        }
        previous = Some(room);
    }
    map
}

fn signal_for(kind: u8, skipped: u32) -> Signal {
    let move_type = match kind % 7 {
        0 => MoveType::North,
        1 => MoveType::South,
        2 => MoveType::East,
        3 => MoveType::West,
        4 => MoveType::Look,
        5 => MoveType::Flee,
        _ => MoveType::Up,
    };
    Signal::new(move_type).with_name("Cell").with_skipped(skipped)
}

fn assert_holds_balanced(tracker: &Tracker) -> Result<(), TestCaseError> {
    let holds = tracker.holds();
    let counted: u64 = holds
        .held_locations()
        .map(|location| u64::from(holds.count(location)))
        .sum();
    prop_assert_eq!(holds.stats().outstanding(), counted);
    if tracker.state() != TrackerState::Experimenting {
        prop_assert!(holds.is_empty());
        prop_assert_eq!(holds.stats().outstanding(), 0);
        prop_assert_eq!(tracker.path_tree().live_count(), 0);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn property_identified_walk_never_forks(size in 2_i32..5, walk in prop::collection::vec(0_usize..4, 1..30)) {
        let (mut map, ids) = identified_grid(size);
        let mut tracker = Tracker::default();
        tracker.force_position(&mut map, ids[0][0], false).expect("anchor exists");
        let (mut x, mut y) = (0_i32, 0_i32);

        for step in walk {
            let (move_type, dx, dy) = STEPS[step];
            let inside = (0..size).contains(&(x + dx)) && (0..size).contains(&(y + dy));
            let move_type = if inside {
                x += dx;
                y += dy;
                move_type
            } else {
                MoveType::Look
            };
            let here = ids[x as usize][y as usize];
            let server_id = map.location(here).and_then(|l| l.server_id).expect("identified");
            let signal = Signal::new(move_type)
                .with_name(format!("Room {x},{y}"))
                .with_server_id(server_id.0)
                .shared();
            tracker.handle(&mut map, signal).expect("handled");

            prop_assert_eq!(tracker.state(), TrackerState::Approved);
            prop_assert_eq!(tracker.most_likely(), Some(here));
            prop_assert_eq!(tracker.holds().stats().holds, 0);
            prop_assert_eq!(tracker.path_tree().live_count(), 0);
        }
    }

    #[test]
    fn property_frontier_never_exceeds_max_paths(
        max_paths in 1_u32..6,
        rooms in 2_i32..12,
        signals in prop::collection::vec(0_u8..7, 1..12),
    ) {
        let mut map = lookalike_map(rooms);
        let config = TrackerConfig { max_paths, ..TrackerConfig::default() };
        let mut tracker = Tracker::new(config).expect("valid config");

        for kind in signals {
            tracker.handle(&mut map, signal_for(kind, 0).shared()).expect("handled");
            prop_assert!(tracker.paths().len() <= max_paths as usize);
        }
    }

    #[test]
    fn property_holds_are_given_back(
        rooms in 2_i32..8,
        signals in prop::collection::vec((0_u8..7, 0_u32..3), 1..16),
    ) {
        let mut map = lookalike_map(rooms);
        let mut tracker = Tracker::default();

        for (kind, skipped) in signals {
            tracker.handle(&mut map, signal_for(kind, skipped).shared()).expect("handled");
            assert_holds_balanced(&tracker)?;
        }

        tracker.release_all_paths(&mut map).expect("released");
        prop_assert!(tracker.holds().is_empty());
        prop_assert_eq!(tracker.holds().stats().outstanding(), 0);
        prop_assert_eq!(tracker.path_tree().live_count(), 0);
        prop_assert_eq!(map.temporary_count(), 0);
    }

    #[test]
    fn property_temporary_room_removed_only_after_last_release(holders in 2_u32..8, keep_at in prop::option::of(0_u32..8)) {
        let mut map = WorldMap::new();
        let origin = map.add_room("Yard", "", Coordinate::default());
        let temp = map.create_temporary(
            &Signal::new(MoveType::North).with_name("Shed"),
            Coordinate::new(0, 1, 0),
        );
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        for locker in 0..holders {
            holds.hold(temp, LockerToken(locker));
        }

        let keep_at = keep_at.filter(|k| *k < holders);
        for i in 0..holders {
            prop_assert!(!changes.is_pending_removal(temp));
            if Some(i) == keep_at {
                holds.keep(temp, ExitDirection::North, Some(origin), &map, &mut changes);
            } else {
                holds.release(temp, &map, &mut changes);
            }
        }

        let removed = changes
            .changes()
            .contains(&WorldChange::RemoveLocation { location: temp });
        prop_assert_eq!(removed, keep_at.is_none());
        prop_assert_eq!(changes.is_pending_permanent(temp), keep_at.is_some());
        prop_assert_eq!(holds.stats().outstanding(), 0);
    }
}
