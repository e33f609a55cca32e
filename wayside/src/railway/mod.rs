//! Registry, safety layer, train movement and the cycle that drives them.

pub mod registry;
pub mod vital;
pub mod driver;
pub mod maintenance;
pub mod control;
