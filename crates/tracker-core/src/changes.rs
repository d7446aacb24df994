//! Per-signal accumulation of world changes with lifecycle de-duplication.

use std::collections::BTreeMap;

use contracts::{ExitDirection, LocationId, WorldChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Keep,
    Remove,
}

/// Collects the changes produced while one signal is processed.
///
/// Requests to make a location permanent and to remove it collapse per location:
/// a removal replaces a pending make-permanent, while a make-permanent after a
/// pending removal (or a repeated request of either kind) is dropped.
#[derive(Debug, Clone, Default)]
pub struct ChangeCollector {
    changes: Vec<WorldChange>,
    lifecycle: BTreeMap<LocationId, Lifecycle>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change; exact duplicates are dropped.
    pub fn push(&mut self, change: WorldChange) {
        match change {
            WorldChange::MakePermanent { location } => self.make_permanent(location),
            WorldChange::RemoveLocation { location } => self.remove_location(location),
            other => {
                if !self.changes.contains(&other) {
                    self.changes.push(other);
                }
            }
        }
    }

    pub fn add_exit(&mut self, from: LocationId, direction: ExitDirection, to: LocationId) {
        self.push(WorldChange::AddExit {
            from,
            direction,
            to,
        });
    }

    pub fn make_permanent(&mut self, location: LocationId) {
        if self.lifecycle.contains_key(&location) {
            return;
        }
        self.lifecycle.insert(location, Lifecycle::Keep);
        self.changes.push(WorldChange::MakePermanent { location });
    }

    pub fn remove_location(&mut self, location: LocationId) {
        match self.lifecycle.get(&location) {
            Some(Lifecycle::Remove) => return,
            Some(Lifecycle::Keep) => self
                .changes
                .retain(|change| *change != WorldChange::MakePermanent { location }),
            None => {}
        }
        self.lifecycle.insert(location, Lifecycle::Remove);
        self.changes.push(WorldChange::RemoveLocation { location });
    }

    pub fn is_pending_permanent(&self, location: LocationId) -> bool {
        self.lifecycle.get(&location) == Some(&Lifecycle::Keep)
    }

    pub fn is_pending_removal(&self, location: LocationId) -> bool {
        self.lifecycle.get(&location) == Some(&Lifecycle::Remove)
    }

    pub fn changes(&self) -> &[WorldChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn into_changes(self) -> Vec<WorldChange> {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: LocationId = LocationId(3);

    #[test]
    fn removal_replaces_pending_make_permanent() {
        let mut changes = ChangeCollector::new();
        changes.make_permanent(ROOM);
        changes.remove_location(ROOM);
        assert_eq!(
            changes.changes(),
            &[WorldChange::RemoveLocation { location: ROOM }]
        );
        assert!(changes.is_pending_removal(ROOM));
    }

    #[test]
    fn make_permanent_after_removal_is_a_no_op() {
        let mut changes = ChangeCollector::new();
        changes.remove_location(ROOM);
        changes.push(WorldChange::MakePermanent { location: ROOM });
        assert_eq!(
            changes.changes(),
            &[WorldChange::RemoveLocation { location: ROOM }]
        );
        assert!(!changes.is_pending_permanent(ROOM));
    }

    #[test]
    fn repeated_lifecycle_requests_collapse() {
        let mut changes = ChangeCollector::new();
        changes.make_permanent(ROOM);
        changes.make_permanent(ROOM);
        changes.remove_location(LocationId(4));
        changes.remove_location(LocationId(4));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn duplicate_exit_additions_are_dropped() {
        let mut changes = ChangeCollector::new();
        changes.add_exit(LocationId(1), ExitDirection::North, ROOM);
        changes.add_exit(LocationId(1), ExitDirection::North, ROOM);
        changes.add_exit(LocationId(1), ExitDirection::South, ROOM);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn order_of_unrelated_changes_is_preserved() {
        let mut changes = ChangeCollector::new();
        changes.add_exit(LocationId(1), ExitDirection::Up, ROOM);
        changes.make_permanent(ROOM);
        let collected = changes.into_changes();
        assert!(collected[0].is_add_exit());
        assert_eq!(collected[1], WorldChange::MakePermanent { location: ROOM });
    }
}
