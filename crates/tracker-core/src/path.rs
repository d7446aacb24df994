//! Hypothesis tree stored in a generation-tagged arena.
//!
//! A child refers to its parent; a parent only records which child ids currently
//! point at it. Approving or denying a node turns it into a zombie: its slot is
//! recycled under a new generation and any later operation on the old id panics.

use std::collections::BTreeSet;

use contracts::{Coordinate, ExitDirection, Location, LocationId, TrackerConfig, CONCRETE_EXITS};
use tracing::trace;

use crate::changes::ChangeCollector;
use crate::holds::{LockerToken, RoomHolds};
use crate::world::WorldModel;

/// Below this distance the target sits where the move should have led.
const CORRECT_POSITION_RADIUS: f64 = 0.5;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Where a fork should lead and how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkTarget {
    pub location: LocationId,
    pub expected: Coordinate,
    pub direction: ExitDirection,
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PathNode {
    probability: f64,
    location: Option<LocationId>,
    /// Absent only for roots, which hold nothing.
    direction: Option<ExitDirection>,
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<PathNode>,
}

#[derive(Debug, Clone, Default)]
pub struct PathTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parentless node with probability 1 that holds nothing.
    pub fn root(&mut self, location: Option<LocationId>) -> NodeId {
        self.insert(PathNode {
            probability: 1.0,
            location,
            direction: None,
            parent: None,
            children: BTreeSet::new(),
        })
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn probability(&self, id: NodeId) -> f64 {
        self.node(id).probability
    }

    pub fn location(&self, id: NodeId) -> Option<LocationId> {
        self.node(id).location
    }

    pub fn direction(&self, id: NodeId) -> Option<ExitDirection> {
        self.node(id).direction
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        !self.node(id).children.is_empty()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).children.iter().copied().collect()
    }

    // --- Fork / approve / deny ---

    /// Create a child of `parent` leading to `target.location` and register a
    /// hold on it. Returns `None` if the world no longer knows the target.
    pub fn fork<W: WorldModel>(
        &mut self,
        parent: NodeId,
        target: ForkTarget,
        locker: LockerToken,
        world: &W,
        holds: &mut RoomHolds,
        config: &TrackerConfig,
    ) -> Option<NodeId> {
        let parent_node = self.node(parent);
        let parent_probability = parent_node.probability;
        let here = parent_node.location.and_then(|id| world.location(id));
        let there = world.location(target.location)?;

        let score = fork_score(here, there, &target, holds.num_lockers(target.location), config);
        let probability = probability_from(parent_probability, score);

        let child = self.insert(PathNode {
            probability,
            location: Some(target.location),
            direction: Some(target.direction),
            parent: Some(parent),
            children: BTreeSet::new(),
        });
        self.node_mut(parent).children.insert(child);
        holds.hold(target.location, locker);
        trace!(
            location = %target.location,
            direction = ?target.direction,
            score,
            probability,
            "forked path"
        );
        Some(child)
    }

    /// Commit the chain from `id` up to its root: every hold along the way
    /// becomes a keep, every node on the chain becomes a zombie, and other
    /// children of the chain are detached but left alive.
    pub fn approve<W: WorldModel>(
        &mut self,
        id: NodeId,
        world: &W,
        holds: &mut RoomHolds,
        changes: &mut ChangeCollector,
    ) {
        assert!(self.is_live(id), "approve of zombie path node {id:?}");
        let mut current = Some(id);
        while let Some(node_id) = current {
            let from = self
                .node(node_id)
                .parent
                .and_then(|parent| self.node(parent).location);
            let node = self.remove(node_id);
            if let (Some(direction), Some(location)) = (node.direction, node.location) {
                holds.keep(location, direction, from, world, changes);
            }
            for child in &node.children {
                self.node_mut(*child).parent = None;
            }
            if let Some(parent) = node.parent {
                self.node_mut(parent).children.remove(&node_id);
            }
            current = node.parent;
        }
    }

    /// Discard `id` and every ancestor left without children. No-op while `id`
    /// still has children.
    pub fn deny<W: WorldModel>(
        &mut self,
        id: NodeId,
        world: &W,
        holds: &mut RoomHolds,
        changes: &mut ChangeCollector,
    ) {
        assert!(self.is_live(id), "deny of zombie path node {id:?}");
        let mut current = Some(id);
        while let Some(node_id) = current {
            if self.has_children(node_id) {
                break;
            }
            let node = self.remove(node_id);
            if let (Some(_), Some(location)) = (node.direction, node.location) {
                holds.release(location, world, changes);
            }
            if let Some(parent) = node.parent {
                self.node_mut(parent).children.remove(&node_id);
            }
            current = node.parent;
        }
    }

    // --- Slots ---

    fn insert(&mut self, node: PathNode) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn remove(&mut self, id: NodeId) -> PathNode {
        let taken = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| {
                let node = slot.node.take();
                if node.is_some() {
                    slot.generation = slot.generation.wrapping_add(1);
                }
                node
            });
        let Some(node) = taken else {
            panic!("path node {id:?} is a zombie");
        };
        self.free.push(id.index);
        self.live -= 1;
        node
    }

    fn get(&self, id: NodeId) -> Option<&PathNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node(&self, id: NodeId) -> &PathNode {
        match self.get(id) {
            Some(node) => node,
            None => panic!("path node {id:?} is a zombie"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut PathNode {
        let found = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut());
        match found {
            Some(node) => node,
            None => panic!("path node {id:?} is a zombie"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Lower is better: geometric distance adjusted by exit knowledge, contention
/// and temporariness.
fn fork_score(
    here: Option<&Location>,
    there: &Location,
    target: &ForkTarget,
    holders: usize,
    config: &TrackerConfig,
) -> f64 {
    let preferred = 1.0 / config.correct_position_bonus;
    let mut score = target.expected.distance(&there.position);

    if score < CORRECT_POSITION_RADIUS {
        // staying put is a poor explanation of an undirected move
        score = if target.direction == ExitDirection::Unknown {
            config.multiple_connections_penalty
        } else {
            preferred
        };
    } else if let Some(here) = here {
        if target.direction == ExitDirection::Unknown {
            if CONCRETE_EXITS
                .iter()
                .any(|direction| here.exit(*direction).contains_out(there.id))
            {
                score = preferred;
            }
        } else {
            let exit = here.exit(target.direction);
            if exit.contains_out(there.id) {
                score = preferred;
            } else if !exit.outgoing.is_empty() || there.id == here.id {
                score *= config.multiple_connections_penalty;
            } else if !there
                .exit(target.direction.opposite())
                .incoming
                .is_empty()
            {
                score *= config.multiple_connections_penalty;
            }
        }
    }

    score /= holders.max(1) as f64;
    if there.temporary {
        score *= config.new_room_penalty;
    }
    score
}

/// A score of zero or below means maximal preference.
fn probability_from(parent_probability: f64, score: f64) -> f64 {
    if score.is_nan() || score <= 0.0 {
        return f64::MAX;
    }
    (parent_probability / score).min(f64::MAX)
}
