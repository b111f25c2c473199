pub mod allocator;
pub mod geometry;
pub mod work_timer;

use ahash::{AHashMap, AHashSet};
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

// Re-exports.
pub use approx;
pub use ilattice::glam as glam;
pub use ilattice;
pub use static_assertions;
