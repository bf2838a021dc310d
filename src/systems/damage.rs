//! Applies queued damage and removes the dead.

use strata_ecs::World;
use tracing::{debug, info};

use crate::components::{CombatStats, Faction, Name, SufferDamage};

/// Subtract all queued damage from hit points and clear the queue.
pub fn update(world: &mut World) {
    let mut hit = Vec::new();
    for (entity, (stats, damage)) in world.query_mut::<(&mut CombatStats, &SufferDamage)>() {
        stats.hp -= damage.amount.iter().sum::<i32>();
        hit.push(entity);
    }
    for entity in hit {
        if let Err(e) = world.remove_one::<SufferDamage>(entity) {
            debug!(%entity, "cannot clear damage: {e}");
        }
    }
}

/// Despawn every combatant whose hit points ran out. Returns how many died per faction.
pub fn delete_the_dead(world: &mut World) -> (u32, u32) {
    let dead = world
        .query::<(&CombatStats, Option<&Name>, Option<&Faction>)>()
        .iter()
        .filter(|(_, (stats, _, _))| !stats.is_alive())
        .map(|(entity, (_, name, faction))| (entity, name.cloned(), faction.copied()))
        .collect::<Vec<_>>();

    let (mut heroes, mut monsters) = (0, 0);
    for (victim, name, faction) in dead {
        match name {
            Some(Name(name)) => info!("{name} dies"),
            None => info!("{victim} dies"),
        }
        match faction {
            Some(Faction::Heroes) => heroes += 1,
            Some(Faction::Monsters) => monsters += 1,
            None => {}
        }
        if let Err(e) = world.despawn(victim) {
            debug!(%victim, "cannot despawn: {e}");
        }
    }
    (heroes, monsters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_is_applied_once() {
        let mut world = World::new();
        let e = world.spawn((
            CombatStats::new(10, 0, 1),
            SufferDamage {
                amount: vec![2, 3],
            },
        ));
        update(&mut world);
        assert_eq!(world.get::<CombatStats>(e).unwrap().hp, 5);
        assert!(world.get::<SufferDamage>(e).is_err());

        update(&mut world);
        assert_eq!(world.get::<CombatStats>(e).unwrap().hp, 5);
    }

    #[test]
    fn dead_are_despawned() {
        let mut world = World::new();
        let alive = world.spawn((CombatStats::new(5, 0, 1), Faction::Heroes));
        let dead = world.spawn((CombatStats { hp: 0, ..CombatStats::new(5, 0, 1) }, Faction::Monsters));
        assert_eq!(delete_the_dead(&mut world), (0, 1));
        assert!(world.contains(alive));
        assert!(!world.contains(dead));
    }
}
