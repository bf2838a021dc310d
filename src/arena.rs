//! Headless battle between heroes and monsters, driven tick by tick.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_ecs::World;
use tracing::{debug, info};

use crate::components::{CombatStats, Faction, Name, Position};
use crate::settings::ArenaSettings;
use crate::systems::{ai, damage, melee};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    HeroesWin,
    MonstersWin,
    Draw,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::HeroesWin => write!(f, "heroes win"),
            Outcome::MonstersWin => write!(f, "monsters win"),
            Outcome::Draw => write!(f, "draw"),
        }
    }
}

/// End-of-battle report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub ticks: u32,
    pub outcome: Outcome,
    pub heroes_left: u32,
    pub monsters_left: u32,
    pub heroes_lost: u32,
    pub monsters_lost: u32,
}

pub struct Arena {
    world: World,
    rng: StdRng,
    tick: u32,
    heroes_lost: u32,
    monsters_lost: u32,
}

impl Arena {
    pub fn new(settings: &ArenaSettings) -> Self {
        let mut arena = Self {
            world: World::new(),
            rng: StdRng::seed_from_u64(settings.simulation.seed),
            tick: 0,
            heroes_lost: 0,
            monsters_lost: 0,
        };
        arena.populate(settings);
        arena
    }

    fn populate(&mut self, settings: &ArenaSettings) {
        let spawn = &settings.spawn;
        let (width, height) = (spawn.width.max(2), spawn.height.max(1));

        for i in 0..spawn.heroes {
            let position = Position {
                x: self.rng.gen_range(0..width / 2),
                y: self.rng.gen_range(0..height),
            };
            self.world.spawn((
                Name(format!("Hero {}", i + 1)),
                Faction::Heroes,
                position,
                CombatStats::new(30, 2, 5),
            ));
        }

        let rng = &mut self.rng;
        let monsters = (0..spawn.monsters)
            .map(|i| {
                let position = Position {
                    x: rng.gen_range(width / 2..width),
                    y: rng.gen_range(0..height),
                };
                let (kind, stats) = if rng.gen_bool(0.5) {
                    ("Orc", CombatStats::new(16, 1, 4))
                } else {
                    ("Goblin", CombatStats::new(10, 1, 3))
                };
                (Name(format!("{kind} {}", i + 1)), Faction::Monsters, position, stats)
            })
            .collect::<Vec<_>>();
        self.world.spawn_batch(monsters);

        info!(
            heroes = spawn.heroes,
            monsters = spawn.monsters,
            "arena populated"
        );
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Run one round of every system.
    pub fn step(&mut self) {
        self.tick += 1;
        ai::update(&mut self.world);
        melee::update(&mut self.world, &mut self.rng);
        damage::update(&mut self.world);
        let (heroes, monsters) = damage::delete_the_dead(&mut self.world);
        self.heroes_lost += heroes;
        self.monsters_lost += monsters;
        debug!(
            tick = self.tick,
            entities = self.world.len(),
            archetypes = self.world.archetypes().len(),
            "tick complete"
        );
    }

    fn count(&self, faction: Faction) -> u32 {
        let mut query = self.world.query::<&Faction>();
        query.iter().filter(|(_, f)| **f == faction).count() as u32
    }

    /// Step until one side is wiped out or `max_ticks` have passed.
    pub fn run(&mut self, max_ticks: u32) -> Summary {
        while self.tick < max_ticks
            && self.count(Faction::Heroes) > 0
            && self.count(Faction::Monsters) > 0
        {
            self.step();
        }

        let heroes_left = self.count(Faction::Heroes);
        let monsters_left = self.count(Faction::Monsters);
        let outcome = match (heroes_left, monsters_left) {
            (0, 0) => Outcome::Draw,
            (_, 0) => Outcome::HeroesWin,
            (0, _) => Outcome::MonstersWin,
            _ => Outcome::Draw,
        };
        Summary {
            ticks: self.tick,
            outcome,
            heroes_left,
            monsters_left,
            heroes_lost: self.heroes_lost,
            monsters_lost: self.monsters_lost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SimulationSettings, SpawnSettings};

    fn settings(seed: u64) -> ArenaSettings {
        ArenaSettings {
            simulation: SimulationSettings {
                max_ticks: 500,
                seed,
            },
            spawn: SpawnSettings {
                heroes: 2,
                monsters: 5,
                width: 16,
                height: 8,
            },
        }
    }

    #[test]
    fn populates_both_sides() {
        let arena = Arena::new(&settings(1));
        assert_eq!(arena.world().len(), 7);
        assert_eq!(arena.count(Faction::Heroes), 2);
        assert_eq!(arena.count(Faction::Monsters), 5);
    }

    #[test]
    fn battle_runs_until_one_side_falls() {
        let mut arena = Arena::new(&settings(3));
        let summary = arena.run(500);
        assert!(summary.heroes_left == 0 || summary.monsters_left == 0);
        assert_eq!(summary.heroes_left + summary.heroes_lost, 2);
        assert_eq!(summary.monsters_left + summary.monsters_lost, 5);
        assert_eq!(arena.world().len(), summary.heroes_left + summary.monsters_left);
    }

    #[test]
    fn same_seed_same_battle() {
        let a = Arena::new(&settings(42)).run(500);
        let b = Arena::new(&settings(42)).run(500);
        assert_eq!(a, b);
    }
}
