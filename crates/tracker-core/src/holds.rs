//! Reference counting of hypothesis interest in locations.
//!
//! A held location must not be deleted even if it is temporary. When the last
//! hold goes away, a location that is still temporary (and not already queued to
//! become permanent in this step) is queued for removal.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{ExitDirection, LocationId};
use tracing::trace;

use crate::changes::ChangeCollector;
use crate::world::WorldModel;

/// Identifies the matcher or strategy instance that registered a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockerToken(pub u32);

#[derive(Debug, Clone, Default)]
struct HoldEntry {
    count: u32,
    lockers: BTreeSet<LockerToken>,
}

/// Running totals, used to check that every hold is eventually given back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldStats {
    pub holds: u64,
    pub releases: u64,
    pub keeps: u64,
}

impl HoldStats {
    pub fn outstanding(&self) -> u64 {
        self.holds - self.releases - self.keeps
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomHolds {
    entries: BTreeMap<LocationId, HoldEntry>,
    stats: HoldStats,
}

impl RoomHolds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&mut self, location: LocationId, locker: LockerToken) {
        let entry = self.entries.entry(location).or_default();
        entry.count += 1;
        entry.lockers.insert(locker);
        self.stats.holds += 1;
        trace!(%location, count = entry.count, "hold");
    }

    /// Give back one hold. Panics if `location` holds nothing.
    pub fn release<W: WorldModel>(
        &mut self,
        location: LocationId,
        world: &W,
        changes: &mut ChangeCollector,
    ) {
        self.stats.releases += 1;
        self.drop_hold(location, world, changes);
    }

    /// Convert a hold into a confirmation: record the traversed exit, make the
    /// location permanent if needed, then give the hold back.
    pub fn keep<W: WorldModel>(
        &mut self,
        location: LocationId,
        direction: ExitDirection,
        from: Option<LocationId>,
        world: &W,
        changes: &mut ChangeCollector,
    ) {
        assert!(
            self.count(location) > 0,
            "keep of location {location} which holds nothing"
        );
        if direction.is_concrete() {
            if let Some(from) = from {
                let recorded = world
                    .location(from)
                    .is_some_and(|origin| origin.exit(direction).contains_out(location));
                if !recorded {
                    changes.add_exit(from, direction, location);
                }
            }
        }
        if world.location(location).is_some_and(|l| l.temporary) {
            changes.make_permanent(location);
        }
        self.stats.keeps += 1;
        self.drop_hold(location, world, changes);
    }

    pub fn count(&self, location: LocationId) -> u32 {
        self.entries.get(&location).map_or(0, |entry| entry.count)
    }

    /// Number of distinct lockers interested in `location`.
    pub fn num_lockers(&self, location: LocationId) -> usize {
        self.entries
            .get(&location)
            .map_or(0, |entry| entry.lockers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn held_locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.entries.keys().copied()
    }

    pub fn stats(&self) -> HoldStats {
        self.stats
    }

    fn drop_hold<W: WorldModel>(
        &mut self,
        location: LocationId,
        world: &W,
        changes: &mut ChangeCollector,
    ) {
        let Some(entry) = self.entries.get_mut(&location) else {
            panic!("release of location {location} which was never held");
        };
        assert!(entry.count > 0, "hold count underflow for {location}");
        entry.count -= 1;
        trace!(%location, count = entry.count, "release");
        if entry.count > 0 {
            return;
        }
        self.entries.remove(&location);
        let temporary = world.location(location).is_some_and(|l| l.temporary);
        if temporary && !changes.is_pending_permanent(location) {
            changes.remove_location(location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldMap;
    use contracts::{Coordinate, MoveType, Signal, WorldChange};

    fn map_with_temp() -> (WorldMap, LocationId, LocationId) {
        let mut map = WorldMap::new();
        let hall = map.add_room("Hall", "", Coordinate::default());
        let temp = map.create_temporary(
            &Signal::new(MoveType::North).with_name("Garden"),
            Coordinate::new(0, 1, 0),
        );
        (map, hall, temp)
    }

    #[test]
    fn temporary_survives_until_last_release() {
        let (map, _, temp) = map_with_temp();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        holds.hold(temp, LockerToken(1));
        holds.hold(temp, LockerToken(2));

        holds.release(temp, &map, &mut changes);
        assert!(changes.is_empty());
        assert_eq!(holds.count(temp), 1);

        holds.release(temp, &map, &mut changes);
        assert_eq!(
            changes.changes(),
            &[WorldChange::RemoveLocation { location: temp }]
        );
        assert!(holds.is_empty());
    }

    #[test]
    fn permanent_location_is_never_removed() {
        let (map, hall, _) = map_with_temp();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        holds.hold(hall, LockerToken(1));
        holds.release(hall, &map, &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn keep_records_exit_and_permanence() {
        let (map, hall, temp) = map_with_temp();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        holds.hold(temp, LockerToken(1));
        holds.keep(temp, ExitDirection::North, Some(hall), &map, &mut changes);
        assert_eq!(
            changes.changes(),
            &[
                WorldChange::AddExit {
                    from: hall,
                    direction: ExitDirection::North,
                    to: temp,
                },
                WorldChange::MakePermanent { location: temp },
            ]
        );
        assert_eq!(holds.stats().outstanding(), 0);
    }

    #[test]
    fn keep_then_other_release_does_not_remove() {
        let (map, hall, temp) = map_with_temp();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        holds.hold(temp, LockerToken(1));
        holds.hold(temp, LockerToken(2));
        holds.keep(temp, ExitDirection::North, Some(hall), &map, &mut changes);
        holds.release(temp, &map, &mut changes);
        assert!(!changes.is_pending_removal(temp));
        assert!(changes.is_pending_permanent(temp));
    }

    #[test]
    fn keep_without_origin_skips_exit() {
        let (map, _, temp) = map_with_temp();
        let mut holds = RoomHolds::new();
        let mut changes = ChangeCollector::new();
        holds.hold(temp, LockerToken(1));
        holds.keep(temp, ExitDirection::NoMove, None, &map, &mut changes);
        assert_eq!(
            changes.changes(),
            &[WorldChange::MakePermanent { location: temp }]
        );
    }

    #[test]
    fn lockers_are_counted_once() {
        let mut holds = RoomHolds::new();
        holds.hold(LocationId(1), LockerToken(1));
        holds.hold(LocationId(1), LockerToken(1));
        holds.hold(LocationId(1), LockerToken(2));
        assert_eq!(holds.count(LocationId(1)), 3);
        assert_eq!(holds.num_lockers(LocationId(1)), 2);
        assert_eq!(holds.num_lockers(LocationId(2)), 0);
    }

    #[test]
    #[should_panic(expected = "never held")]
    fn releasing_an_unheld_location_panics() {
        let (map, hall, _) = map_with_temp();
        let mut holds = RoomHolds::new();
        holds.release(hall, &map, &mut ChangeCollector::new());
    }
}
