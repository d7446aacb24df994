//! Non-destructive corrections queued after the approved position is confirmed.

use contracts::{Light, LocationId, Signal, Sundeath, WorldChange, CONCRETE_EXITS};

use crate::context::StepContext;
use crate::world::WorldModel;

/// Queue the changes that bring `location` in line with what `signal` showed.
/// `from` is the previous position when the signal was a move out of it.
pub(super) fn apply<W: WorldModel>(
    ctx: &mut StepContext<'_, W>,
    signal: &Signal,
    from: Option<LocationId>,
    location: LocationId,
    needs_update: bool,
) {
    let direction = signal.move_type.direction();
    if let Some(from) = from.filter(|_| direction.is_concrete()) {
        let recorded = ctx
            .location(from)
            .is_some_and(|origin| origin.exit(direction).contains_out(location));
        if !recorded {
            ctx.changes.add_exit(from, direction, location);
        }
    }

    let Some(current) = ctx.location(location).cloned() else {
        return;
    };

    if let Some(server_id) = signal.server_id {
        if current.server_id.is_none() && ctx.world.find_by_server_id(server_id).is_none() {
            ctx.changes.push(WorldChange::SetServerId {
                location,
                server_id,
            });
        }
    }

    if signal.exits.valid {
        for direction in CONCRETE_EXITS {
            let exit = current.exit(direction);
            let named = signal
                .exits
                .server_id(direction)
                .and_then(|server_id| ctx.world.find_by_server_id(server_id));
            if let Some(target) = named.filter(|target| !exit.contains_out(*target)) {
                for stale in &exit.outgoing {
                    ctx.changes.push(WorldChange::RemoveExit {
                        from: location,
                        direction,
                        to: *stale,
                    });
                }
                ctx.changes.add_exit(location, direction, target);
            }
            let seen = signal.exits.flags(direction);
            if seen != exit.flags {
                ctx.changes.push(WorldChange::SetExitFlags {
                    location,
                    direction,
                    flags: seen,
                });
            }
        }
    }

    if signal.connected.valid {
        let lit = signal.light == Some(Light::Lit);
        for direction in CONCRETE_EXITS {
            let mark = if signal.connected.has_direct_sunlight(direction) {
                Sundeath::Sundeath
            } else if signal.connected.troll_mode && lit {
                Sundeath::NoSundeath
            } else {
                continue;
            };
            for target in &current.exit(direction).outgoing {
                let differs = ctx
                    .location(*target)
                    .is_some_and(|neighbour| neighbour.sundeath != mark);
                if differs {
                    ctx.changes.push(WorldChange::SetSundeath {
                        location: *target,
                        sundeath: mark,
                    });
                }
            }
        }
    }

    if needs_update {
        ctx.changes.push(WorldChange::UpdateLocation {
            location,
            name: signal.name.clone(),
            description: signal.description.clone(),
            light: signal.light,
        });
    }
}
