//! Matching a location's recorded attributes against what a signal observed.

use contracts::{Location, Signal, CONCRETE_EXITS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Comparison {
    Equal,
    Tolerance,
    Different,
}

impl Comparison {
    fn worsen(self, other: Comparison) -> Comparison {
        self.max(other)
    }
}

/// Compare `location` with the observable attributes of `signal`.
///
/// Server ids are authoritative when both sides carry one. Otherwise the name
/// must match exactly, descriptions may differ in up to `tolerance` percent of
/// their words, and exit presence must agree once the location records exits.
pub fn compare(location: &Location, signal: &Signal, tolerance: u8) -> Comparison {
    if let (Some(seen), Some(recorded)) = (signal.server_id, location.server_id) {
        return if seen == recorded {
            Comparison::Equal
        } else {
            Comparison::Different
        };
    }

    let mut result = Comparison::Equal;

    if let Some(name) = signal.name.as_deref().filter(|name| !name.is_empty()) {
        if location.name.is_empty() {
            result = result.worsen(Comparison::Tolerance);
        } else if location.name != name {
            return Comparison::Different;
        }
    }

    if let Some(description) = signal.description.as_deref() {
        let mismatch = word_mismatch_percent(&location.description, description);
        if mismatch > 0 {
            if location.description.is_empty() || mismatch <= u32::from(tolerance) {
                result = result.worsen(Comparison::Tolerance);
            } else {
                return Comparison::Different;
            }
        }
    }

    if signal.exits.valid {
        let has_recorded = location.has_recorded_exits();
        for direction in CONCRETE_EXITS {
            let seen = signal.exits.flags(direction);
            let recorded = location.exit(direction).flags;
            if seen.exit != recorded.exit {
                if has_recorded {
                    return Comparison::Different;
                }
                result = result.worsen(Comparison::Tolerance);
            } else if seen.exit && seen.door != recorded.door {
                result = result.worsen(Comparison::Tolerance);
            }
        }
    }

    result
}

/// Whether the signal reveals details the location does not record yet:
/// a changed light level or an exit target named by server id where the
/// exit has no known connection.
pub fn has_unrecorded_details(location: &Location, signal: &Signal) -> bool {
    if signal.light.is_some() && signal.light != location.light {
        return true;
    }
    if !signal.exits.valid {
        return false;
    }
    CONCRETE_EXITS.iter().any(|direction| {
        signal.exits.server_id(*direction).is_some()
            && location.exit(*direction).outgoing.is_empty()
    })
}

fn word_mismatch_percent(recorded: &str, seen: &str) -> u32 {
    let recorded: Vec<&str> = recorded.split_whitespace().collect();
    let seen: Vec<&str> = seen.split_whitespace().collect();
    let longest = recorded.len().max(seen.len());
    if longest == 0 {
        return 0;
    }
    let differing = (0..longest)
        .filter(|i| recorded.get(*i) != seen.get(*i))
        .count();
    (differing * 100 / longest) as u32
}
