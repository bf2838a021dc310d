//! Resolves melee intents into queued damage.

use rand::Rng;
use strata_ecs::{Entity, World};
use tracing::{debug, info};

use crate::components::{CombatStats, Name, SufferDamage, WantsToMelee};

/// Turn every `WantsToMelee` into `SufferDamage` on its target. Attacks roll a
/// small random bonus on top of `power - defense`. The intents are consumed.
pub fn update(world: &mut World, rng: &mut impl Rng) {
    let attacks = world
        .query::<(&WantsToMelee, &Name, &CombatStats)>()
        .iter()
        .map(|(attacker, (intent, name, stats))| (attacker, intent.target, name.0.clone(), *stats))
        .collect::<Vec<_>>();

    for (attacker, target, name, stats) in attacks {
        if world.remove_one::<WantsToMelee>(attacker).is_err() {
            debug!(%attacker, "melee intent already consumed");
        }
        if !stats.is_alive() {
            continue;
        }

        let Some((target_name, target_stats)) = describe(world, target) else {
            continue;
        };
        if !target_stats.is_alive() {
            continue;
        }

        let damage = (stats.power + rng.gen_range(0..=1) - target_stats.defense).max(0);
        if damage == 0 {
            info!("{name} is unable to hurt {target_name}");
        } else {
            info!("{name} hits {target_name} for {damage} hp");
            SufferDamage::queue(world, target, damage);
        }
    }
}

fn describe(world: &World, target: Entity) -> Option<(String, CombatStats)> {
    let entity = world.entity(target).ok()?;
    let name = entity.get::<Name>()?.0.clone();
    let stats = *entity.get::<CombatStats>()?;
    Some((name, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn melee_queues_damage_and_consumes_intent() {
        let mut world = World::new();
        let target = world.spawn((Name("Goblin".into()), CombatStats::new(10, 1, 2)));
        let attacker = world.spawn((
            Name("Hero".into()),
            CombatStats::new(10, 0, 5),
            WantsToMelee { target },
        ));
        let mut rng = StdRng::seed_from_u64(7);
        update(&mut world, &mut rng);

        let damage = world.get::<SufferDamage>(target).unwrap().amount.clone();
        assert_eq!(damage.len(), 1);
        assert!((4..=5).contains(&damage[0]));
        assert!(world.get::<WantsToMelee>(attacker).is_err());
    }

    #[test]
    fn dead_target_is_skipped() {
        let mut world = World::new();
        let target = world.spawn((Name("Corpse".into()), CombatStats::new(0, 0, 0)));
        world.spawn((
            Name("Hero".into()),
            CombatStats::new(10, 0, 5),
            WantsToMelee { target },
        ));
        update(&mut world, &mut StdRng::seed_from_u64(1));
        assert!(world.get::<SufferDamage>(target).is_err());
    }
}
