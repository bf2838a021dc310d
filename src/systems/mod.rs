//! Per-tick rules. Each system only touches the world through its public surface.

pub mod ai;
pub mod damage;
pub mod melee;
