//! The basalt voxel world: generation, editing tools and the update tick on top of [`basalt_map`].

mod config;
mod generator;
mod tools;
mod world;

pub use config::*;
pub use generator::*;
pub use tools::*;
pub use world::*;

pub use basalt_map;
