use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The payload table grows once it would be more than this fraction full.
    pub load_factor: f32,
    /// Table slots kept free on top of the load factor.
    pub min_reserved_slots: u32,
    /// The number of consecutive table slots an insert may probe before giving up.
    pub probe_limit: u32,
    /// Staged chunks allowed before an eager commit is forced. Each staged chunk costs 8 KiB.
    pub max_staged_chunks: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            load_factor: 0.5,
            min_reserved_slots: 64,
            probe_limit: 250,
            max_staged_chunks: 8192,
        }
    }
}
