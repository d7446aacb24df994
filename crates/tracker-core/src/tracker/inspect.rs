use serde_json::{json, Value};

use super::*;

impl Tracker {
    /// Debug view of the current beliefs: state, anchor, every live path with
    /// its probability, and the hold table.
    pub fn inspect(&self) -> Value {
        let paths = self
            .machine
            .paths
            .iter()
            .map(|path| {
                json!({
                    "location": self.tree.location(*path),
                    "probability": self.tree.probability(*path),
                    "direction": self.tree.direction(*path),
                })
            })
            .collect::<Vec<_>>();
        let holds = self
            .holds
            .held_locations()
            .map(|location| {
                json!({
                    "location": location,
                    "count": self.holds.count(location),
                    "lockers": self.holds.num_lockers(location),
                })
            })
            .collect::<Vec<_>>();
        let stats = self.holds.stats();
        json!({
            "state": self.machine.state,
            "most_likely": self.machine.most_likely,
            "paths": paths,
            "live_nodes": self.tree.live_count(),
            "holds": holds,
            "hold_stats": {
                "holds": stats.holds,
                "releases": stats.releases,
                "keeps": stats.keeps,
            },
            "pending_position_events": self.position_events.len(),
        })
    }
}
