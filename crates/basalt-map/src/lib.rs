//! The basalt voxel map.
//!
//! # Hierarchy
//!
//! A world is a dense array of 16³ [chunks](crate::CHUNK_EDGE). Each chunk holds one [`NodeTag`]: empty, uniform
//! (every voxel has the same type) or mixed. A mixed chunk points at a run of 64 block tags, one per 4³ block, and a mixed
//! block points at a 64-cell payload. Payloads are deduplicated by content in the [`ContentAddressedStore`], so any number of
//! identical blocks share one copy.
//!
//! # Editing
//!
//! Edits never touch the hierarchy directly. Tools open an [`EditSession`] and write into flat per-chunk buffers. A commit
//! re-encodes those buffers, all or nothing, and reports a [`ChangeSet`] describing exactly which words changed.
//!
//! # Empty space
//!
//! The [`ChangePropagator`] keeps a coarse six-directional clear distance per group of 4³ chunks, refreshed around every
//! chunk whose emptiness may have changed. Ray traversal skips whole empty chunks and blocks on its own.

mod cell;
mod change_set;
mod commit;
mod config;
mod coordinates;
mod error;
mod hierarchy;
mod pool;
mod propagation;
mod raycast;
mod snapshot;
mod staging;
mod store;
mod tag;
mod units;
mod world_store;

pub use cell::*;
pub use change_set::*;
pub use config::*;
pub use coordinates::*;
pub use error::*;
pub use hierarchy::*;
pub use pool::*;
pub use propagation::*;
pub use raycast::*;
pub use snapshot::*;
pub use staging::*;
pub use store::*;
pub use tag::*;
pub use units::*;
pub use world_store::*;

pub use basalt_core;
