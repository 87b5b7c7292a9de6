//! Construction-time sharding configuration.
//!
//! A [`ShardingConfig`] is loaded once per process (typically from JSON) and is
//! static for the process lifetime. Every worker must load the same config.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::block_size::BlockSizeTable;
use crate::device::Device;
use crate::error::{Result, ShardingError};
use crate::feature::Feature;

fn default_embedding_dim() -> usize {
    8
}

/// Configuration of one row-wise sharded embedding group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Number of workers in the group.
    pub world_size: usize,
    /// Width of every pooled embedding.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Unweighted id-list features.
    #[serde(default)]
    pub id_list_features: Vec<Feature>,
    /// Id-score-list features.
    #[serde(default)]
    pub id_score_list_features: Vec<Feature>,
    /// Whether an owned feature needs positions carried through bucketization.
    #[serde(default)]
    pub has_feature_processor: bool,
    /// Whether to compute the unbucketize permutation for id-list features.
    #[serde(default)]
    pub output_permute: bool,
    /// Placement target for construction-time buffers.
    #[serde(default)]
    pub device: Device,
    /// Timeout for a single collective, if any.
    #[serde(default)]
    pub collective_timeout_ms: Option<u64>,
}

impl ShardingConfig {
    /// Creates a configuration with no features.
    pub fn new(world_size: usize, embedding_dim: usize) -> Self {
        Self {
            world_size,
            embedding_dim,
            id_list_features: Vec::new(),
            id_score_list_features: Vec::new(),
            has_feature_processor: false,
            output_permute: false,
            device: Device::Cpu,
            collective_timeout_ms: None,
        }
    }

    /// Adds an id-list feature.
    pub fn with_id_list_feature(mut self, feature: Feature) -> Self {
        self.id_list_features.push(feature);
        self
    }

    /// Adds an id-score-list feature.
    pub fn with_id_score_list_feature(mut self, feature: Feature) -> Self {
        self.id_score_list_features.push(feature);
        self
    }

    /// Enables position carrying for id-list features.
    pub fn with_feature_processor(mut self, enabled: bool) -> Self {
        self.has_feature_processor = enabled;
        self
    }

    /// Enables the unbucketize permutation for id-list features.
    pub fn with_output_permute(mut self, enabled: bool) -> Self {
        self.output_permute = enabled;
        self
    }

    /// Sets the collective timeout.
    pub fn with_collective_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ShardingError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| ShardingError::config(format!("invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(ShardingError::config("world_size must be at least 1"));
        }
        if self.embedding_dim == 0 {
            return Err(ShardingError::config("embedding_dim must be at least 1"));
        }
        if self.id_list_features.is_empty() && self.id_score_list_features.is_empty() {
            return Err(ShardingError::config("no features configured"));
        }
        let mut seen = HashSet::new();
        for feature in self.all_features() {
            if feature.hash_size() == 0 {
                return Err(ShardingError::config(format!(
                    "feature '{}' has zero hash size",
                    feature.name()
                )));
            }
            if !seen.insert(feature.name()) {
                return Err(ShardingError::config(format!(
                    "duplicate feature name '{}'",
                    feature.name()
                )));
            }
        }
        Ok(())
    }

    /// Iterates id-list features followed by id-score-list features.
    pub fn all_features(&self) -> impl Iterator<Item = &Feature> {
        self.id_list_features
            .iter()
            .chain(self.id_score_list_features.iter())
    }

    /// Returns the id-list feature hash sizes.
    pub fn id_list_hash_sizes(&self) -> Vec<u64> {
        self.id_list_features.iter().map(Feature::hash_size).collect()
    }

    /// Returns the id-score-list feature hash sizes.
    pub fn id_score_list_hash_sizes(&self) -> Vec<u64> {
        self.id_score_list_features
            .iter()
            .map(Feature::hash_size)
            .collect()
    }

    /// Returns the id-list feature names.
    pub fn id_list_keys(&self) -> Vec<String> {
        self.id_list_features
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Returns the id-score-list feature names.
    pub fn id_score_list_keys(&self) -> Vec<String> {
        self.id_score_list_features
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Computes the id-list block size table.
    pub fn id_list_block_sizes(&self) -> BlockSizeTable {
        BlockSizeTable::new(&self.id_list_hash_sizes(), self.world_size, self.device)
    }

    /// Computes the id-score-list block size table.
    pub fn id_score_list_block_sizes(&self) -> BlockSizeTable {
        BlockSizeTable::new(
            &self.id_score_list_hash_sizes(),
            self.world_size,
            self.device,
        )
    }

    /// Returns the collective timeout, if configured.
    pub fn collective_timeout(&self) -> Option<Duration> {
        self.collective_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> ShardingConfig {
        ShardingConfig::new(2, 4)
            .with_id_list_feature(Feature::new("user", 10))
            .with_id_score_list_feature(Feature::weighted("item", 7))
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample().validate().is_ok());
        assert_eq!(sample().id_list_block_sizes().as_slice(), &[5]);
        assert_eq!(sample().id_score_list_block_sizes().as_slice(), &[4]);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut cfg = sample();
        cfg.world_size = 0;
        assert!(matches!(cfg.validate(), Err(ShardingError::Config { .. })));

        let cfg = sample().with_id_list_feature(Feature::new("user", 3));
        assert!(cfg.validate().unwrap_err().to_string().contains("duplicate"));

        let cfg = sample().with_id_list_feature(Feature::new("empty", 0));
        assert!(cfg.validate().unwrap_err().to_string().contains("zero hash size"));

        let cfg = ShardingConfig::new(2, 4);
        assert!(cfg.validate().unwrap_err().to_string().contains("no features"));
    }

    #[test]
    fn test_from_json_str_defaults() {
        let cfg = ShardingConfig::from_json_str(
            r#"{"world_size": 3, "id_list_features": [{"name": "a", "hash_size": 9}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.embedding_dim, 8);
        assert_eq!(cfg.device, Device::Cpu);
        assert!(!cfg.has_feature_processor);
        assert!(cfg.collective_timeout().is_none());
        assert_eq!(cfg.id_list_block_sizes().as_slice(), &[3]);
    }

    #[test]
    fn test_from_json_file_roundtrip() {
        let cfg = sample()
            .with_feature_processor(true)
            .with_collective_timeout(Duration::from_millis(250));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&cfg).unwrap().as_bytes())
            .unwrap();

        let loaded = ShardingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.collective_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = ShardingConfig::from_json_file("/nonexistent/embshard.json").unwrap_err();
        assert!(matches!(err, ShardingError::Config { .. }));
    }
}
