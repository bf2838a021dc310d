//! Target selection and movement.

use strata_ecs::{Entity, World};
use tracing::{debug, trace};

use crate::components::{CombatStats, Faction, Position, WantsToMelee};

/// Every living combatant picks the nearest living enemy. Adjacent enemies are
/// attacked, distant ones approached by one cell.
pub fn update(world: &mut World) {
    let combatants = world
        .query::<(&Faction, &Position, &CombatStats)>()
        .iter()
        .filter(|(_, (_, _, stats))| stats.is_alive())
        .map(|(entity, (&faction, &position, _))| (entity, faction, position))
        .collect::<Vec<_>>();

    for &(entity, faction, position) in &combatants {
        let Some((target, target_pos)) = nearest_enemy(&combatants, faction, position) else {
            continue;
        };

        if position.distance(target_pos) <= 1 {
            trace!(%entity, %target, "wants to melee");
            if let Err(e) = world.insert_one(entity, WantsToMelee { target }) {
                debug!(%entity, "cannot queue melee: {e}");
            }
        } else if let Ok(mut pos) = world.get_mut::<Position>(entity) {
            *pos = position.step_towards(target_pos);
        }
    }
}

fn nearest_enemy(
    combatants: &[(Entity, Faction, Position)],
    faction: Faction,
    position: Position,
) -> Option<(Entity, Position)> {
    combatants
        .iter()
        .filter(|(_, other, _)| *other == faction.enemy())
        .min_by_key(|(entity, _, other_pos)| (position.distance(*other_pos), entity.id()))
        .map(|&(entity, _, other_pos)| (entity, other_pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_enemy_is_targeted() {
        let mut world = World::new();
        let hero = world.spawn((
            Faction::Heroes,
            Position { x: 0, y: 0 },
            CombatStats::new(10, 1, 3),
        ));
        let orc = world.spawn((
            Faction::Monsters,
            Position { x: 1, y: 1 },
            CombatStats::new(10, 1, 3),
        ));
        update(&mut world);
        assert_eq!(world.get::<WantsToMelee>(hero).unwrap().target, orc);
        assert_eq!(world.get::<WantsToMelee>(orc).unwrap().target, hero);
    }

    #[test]
    fn distant_enemy_is_approached() {
        let mut world = World::new();
        let hero = world.spawn((
            Faction::Heroes,
            Position { x: 0, y: 0 },
            CombatStats::new(10, 1, 3),
        ));
        world.spawn((
            Faction::Monsters,
            Position { x: 5, y: 0 },
            CombatStats::new(10, 1, 3),
        ));
        update(&mut world);
        assert_eq!(*world.get::<Position>(hero).unwrap(), Position { x: 1, y: 0 });
        assert!(world.get::<WantsToMelee>(hero).is_err());
    }
}
