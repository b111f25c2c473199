use basalt_map::StoreConfig;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub world: WorldConfig,
    pub store: StoreConfig,
    pub tools: ToolConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Requested size in voxels. The world is rounded up to whole generation segments.
    pub size: [u32; 3],
    /// Edge length of a generation segment, in coarse groups of 4³ chunks.
    pub segment_size_in_groups: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            size: [512, 256, 512],
            segment_size_in_groups: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// The most voxels a single flood fill may replace.
    pub flood_fill_limit: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            flood_fill_limit: 1 << 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::Error),
}

impl Config {
    pub fn read_file(path: &str) -> Result<Self, ConfigError> {
        let reader = std::fs::File::open(path)?;

        Ok(ron::de::from_reader(reader)?)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = ron::from_str("(world: (size: (64, 32, 64)), store: (probe_limit: 100))").unwrap();
        assert_eq!(config.world.size, [64, 32, 64]);
        assert_eq!(config.world.segment_size_in_groups, 1);
        assert_eq!(config.store.probe_limit, 100);
        assert_eq!(config.store.load_factor, StoreConfig::default().load_factor);
        assert_eq!(config.tools, ToolConfig::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::read_file("does/not/exist.ron"),
            Err(ConfigError::Io(_))
        ));
    }
}
