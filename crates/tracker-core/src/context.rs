use contracts::{Location, LocationId, TrackerConfig};

use crate::changes::ChangeCollector;
use crate::holds::{LockerToken, RoomHolds};
use crate::path::{ForkTarget, NodeId, PathTree};
use crate::world::WorldModel;

/// Everything one signal's processing may touch. Built per signal and dropped
/// before the collected changes are submitted.
pub struct StepContext<'a, W: WorldModel> {
    pub world: &'a mut W,
    pub tree: &'a mut PathTree,
    pub holds: &'a mut RoomHolds,
    pub changes: &'a mut ChangeCollector,
    pub config: &'a TrackerConfig,
}

impl<'a, W: WorldModel> StepContext<'a, W> {
    pub fn new(
        world: &'a mut W,
        tree: &'a mut PathTree,
        holds: &'a mut RoomHolds,
        changes: &'a mut ChangeCollector,
        config: &'a TrackerConfig,
    ) -> Self {
        Self {
            world,
            tree,
            holds,
            changes,
            config,
        }
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.world.location(id)
    }

    pub fn fork(
        &mut self,
        parent: NodeId,
        target: ForkTarget,
        locker: LockerToken,
    ) -> Option<NodeId> {
        self.tree
            .fork(parent, target, locker, &*self.world, self.holds, self.config)
    }

    pub fn approve(&mut self, node: NodeId) {
        self.tree
            .approve(node, &*self.world, self.holds, self.changes);
    }

    pub fn deny(&mut self, node: NodeId) {
        self.tree.deny(node, &*self.world, self.holds, self.changes);
    }
}
