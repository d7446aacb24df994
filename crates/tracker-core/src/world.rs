//! World model seam: the read/query/mutate interface the tracker consumes, and an
//! in-memory map implementing it.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{
    Coordinate, ExitDirection, Location, LocationId, ServerId, Signal, WorldChange,
    CONCRETE_EXITS,
};
use thiserror::Error;

use crate::comparison::{compare, Comparison};

// ---------------------------------------------------------------------------
// Collaborator interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("change batch references unknown location {0}")]
    UnknownLocation(LocationId),
}

/// The persistent world map as seen by the tracker.
pub trait WorldModel {
    fn location(&self, id: LocationId) -> Option<&Location>;

    fn find_by_server_id(&self, server_id: ServerId) -> Option<LocationId>;

    fn locations_at(&self, position: Coordinate) -> Vec<LocationId>;

    /// Every location whose observable attributes are consistent with the signal.
    fn find_candidates(&self, signal: &Signal, tolerance: u8) -> Vec<LocationId>;

    /// Synthesize a temporary location from the signal's attributes.
    fn create_temporary(&mut self, signal: &Signal, position: Coordinate) -> LocationId;

    /// Apply a batch as one unit. Nothing is applied when the batch is rejected.
    fn apply_changes(&mut self, changes: &[WorldChange]) -> Result<(), WorldError>;
}

// ---------------------------------------------------------------------------
// WorldMap
// ---------------------------------------------------------------------------

/// In-memory world map keyed by location id.
#[derive(Debug, Clone, Default)]
pub struct WorldMap {
    locations: BTreeMap<LocationId, Location>,
    by_server_id: BTreeMap<ServerId, LocationId>,
    next_id: u32,
}

impl WorldMap {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Location management ---

    /// Insert a location as given; its id is reserved from future allocation.
    pub fn add_location(&mut self, location: Location) -> LocationId {
        let id = location.id;
        self.next_id = self.next_id.max(id.0 + 1);
        if let Some(server_id) = location.server_id {
            self.by_server_id.entry(server_id).or_insert(id);
        }
        self.locations.insert(id, location);
        id
    }

    /// Insert a permanent location with a fresh id.
    pub fn add_room(&mut self, name: &str, description: &str, position: Coordinate) -> LocationId {
        let mut location = Location::new(self.allocate_id(), position);
        location.name = name.to_string();
        location.description = description.to_string();
        self.add_location(location)
    }

    /// Record a one-way exit `from --direction--> to`.
    pub fn connect(&mut self, from: LocationId, direction: ExitDirection, to: LocationId) {
        if !self.locations.contains_key(&from) || !self.locations.contains_key(&to) {
            return;
        }
        if let Some(origin) = self.locations.get_mut(&from) {
            let exit = origin.exit_mut(direction);
            exit.flags.exit = true;
            exit.outgoing.insert(to);
        }
        if let Some(target) = self.locations.get_mut(&to) {
            target.exit_mut(direction.opposite()).incoming.insert(from);
        }
    }

    /// Record exits both ways between two locations.
    pub fn connect_both(&mut self, from: LocationId, direction: ExitDirection, to: LocationId) {
        self.connect(from, direction, to);
        self.connect(to, direction.opposite(), from);
    }

    pub fn locations(&self) -> &BTreeMap<LocationId, Location> {
        &self.locations
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn temporary_count(&self) -> usize {
        self.locations.values().filter(|l| l.temporary).count()
    }

    fn allocate_id(&mut self) -> LocationId {
        let id = LocationId(self.next_id);
        self.next_id += 1;
        id
    }

    // --- Change application ---

    fn referenced(change: &WorldChange) -> Vec<LocationId> {
        match change {
            WorldChange::AddExit { from, to, .. } | WorldChange::RemoveExit { from, to, .. } => {
                vec![*from, *to]
            }
            WorldChange::RemoveLocation { .. } => Vec::new(),
            other => vec![other.subject()],
        }
    }

    fn apply_one(&mut self, change: &WorldChange) {
        match change {
            WorldChange::AddExit {
                from,
                direction,
                to,
            } => self.connect(*from, *direction, *to),
            WorldChange::RemoveExit {
                from,
                direction,
                to,
            } => {
                if let Some(origin) = self.locations.get_mut(from) {
                    origin.exit_mut(*direction).outgoing.remove(to);
                }
                if let Some(target) = self.locations.get_mut(to) {
                    target.exit_mut(direction.opposite()).incoming.remove(from);
                }
            }
            WorldChange::SetExitFlags {
                location,
                direction,
                flags,
            } => {
                if let Some(entry) = self.locations.get_mut(location) {
                    entry.exit_mut(*direction).flags = *flags;
                }
            }
            WorldChange::SetServerId {
                location,
                server_id,
            } => {
                if let Some(entry) = self.locations.get_mut(location) {
                    entry.server_id = Some(*server_id);
                    self.by_server_id.insert(*server_id, *location);
                }
            }
            WorldChange::SetSundeath { location, sundeath } => {
                if let Some(entry) = self.locations.get_mut(location) {
                    entry.sundeath = *sundeath;
                }
            }
            WorldChange::UpdateLocation {
                location,
                name,
                description,
                light,
            } => {
                if let Some(entry) = self.locations.get_mut(location) {
                    if let Some(name) = name {
                        entry.name = name.clone();
                    }
                    if let Some(description) = description {
                        entry.description = description.clone();
                    }
                    if light.is_some() {
                        entry.light = *light;
                    }
                }
            }
            WorldChange::MakePermanent { location } => {
                if let Some(entry) = self.locations.get_mut(location) {
                    entry.temporary = false;
                }
            }
            WorldChange::RemoveLocation { location } => self.remove_temporary(*location),
        }
    }

    fn remove_temporary(&mut self, id: LocationId) {
        let still_temporary = self.locations.get(&id).is_some_and(|l| l.temporary);
        if !still_temporary {
            return;
        }
        if let Some(removed) = self.locations.remove(&id) {
            if let Some(server_id) = removed.server_id {
                if self.by_server_id.get(&server_id) == Some(&id) {
                    self.by_server_id.remove(&server_id);
                }
            }
        }
        for location in self.locations.values_mut() {
            for exit in location.exits.iter_mut() {
                exit.outgoing.remove(&id);
                exit.incoming.remove(&id);
            }
        }
    }
}

impl WorldModel for WorldMap {
    fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    fn find_by_server_id(&self, server_id: ServerId) -> Option<LocationId> {
        self.by_server_id.get(&server_id).copied()
    }

    fn locations_at(&self, position: Coordinate) -> Vec<LocationId> {
        self.locations
            .values()
            .filter(|location| location.position == position)
            .map(|location| location.id)
            .collect()
    }

    fn find_candidates(&self, signal: &Signal, tolerance: u8) -> Vec<LocationId> {
        self.locations
            .values()
            .filter(|location| compare(location, signal, tolerance) != Comparison::Different)
            .map(|location| location.id)
            .collect()
    }

    fn create_temporary(&mut self, signal: &Signal, position: Coordinate) -> LocationId {
        let mut location = Location::new(self.allocate_id(), position);
        location.temporary = true;
        location.name = signal.name.clone().unwrap_or_default();
        location.description = signal.description.clone().unwrap_or_default();
        location.light = signal.light;
        if let Some(server_id) = signal.server_id {
            if !self.by_server_id.contains_key(&server_id) {
                location.server_id = Some(server_id);
            }
        }
        if signal.exits.valid {
            for direction in CONCRETE_EXITS {
                location.exit_mut(direction).flags = signal.exits.flags(direction);
            }
        }
        self.add_location(location)
    }

    fn apply_changes(&mut self, changes: &[WorldChange]) -> Result<(), WorldError> {
        let mut missing = BTreeSet::new();
        for change in changes {
            for id in Self::referenced(change) {
                if !self.locations.contains_key(&id) {
                    missing.insert(id);
                }
            }
        }
        if let Some(id) = missing.into_iter().next() {
            return Err(WorldError::UnknownLocation(id));
        }
        for change in changes {
            self.apply_one(change);
        }
        Ok(())
    }
}
