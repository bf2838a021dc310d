//! Components used by the arena simulation.

use strata_ecs::Entity;

/// Display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

/// Which side an entity fights for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Faction {
    Heroes,
    Monsters,
}

impl Faction {
    pub fn enemy(self) -> Self {
        match self {
            Faction::Heroes => Faction::Monsters,
            Faction::Monsters => Faction::Heroes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatStats {
    pub max_hp: i32,
    pub hp: i32,
    pub defense: i32,
    pub power: i32,
}

impl CombatStats {
    pub fn new(max_hp: i32, defense: i32, power: i32) -> Self {
        Self {
            max_hp,
            hp: max_hp,
            defense,
            power,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

/// Grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Chebyshev distance, so diagonal neighbours are adjacent.
    pub fn distance(self, other: Position) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// One step towards `target`, moving diagonally when both axes differ.
    pub fn step_towards(self, target: Position) -> Position {
        Position {
            x: self.x + (target.x - self.x).signum(),
            y: self.y + (target.y - self.y).signum(),
        }
    }
}

/// Intent to attack `target` this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WantsToMelee {
    pub target: Entity,
}

/// Damage queued against an entity, applied by the damage system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SufferDamage {
    pub amount: Vec<i32>,
}

impl SufferDamage {
    /// Queue `amount` against `victim`, adding to any damage already queued.
    pub fn queue(world: &mut strata_ecs::World, victim: Entity, amount: i32) {
        if let Ok(mut pending) = world.get_mut::<SufferDamage>(victim) {
            pending.amount.push(amount);
            return;
        }
        let damage = SufferDamage {
            amount: vec![amount],
        };
        if world.insert_one(victim, damage).is_err() {
            tracing::debug!(%victim, "damage target vanished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ecs::World;

    #[test]
    fn distance_and_steps() {
        let a = Position { x: 0, y: 0 };
        let b = Position { x: 3, y: -1 };
        assert_eq!(a.distance(b), 3);
        assert_eq!(a.step_towards(b), Position { x: 1, y: -1 });
        assert_eq!(b.step_towards(b), b);
    }

    #[test]
    fn damage_accumulates() {
        let mut world = World::new();
        let victim = world.spawn((CombatStats::new(10, 0, 1),));
        SufferDamage::queue(&mut world, victim, 3);
        SufferDamage::queue(&mut world, victim, 4);
        assert_eq!(world.get::<SufferDamage>(victim).unwrap().amount, vec![3, 4]);
    }
}
