use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};
use crate::segment::meta::MAX_SEGMENTS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IndexOptions {
    /// Posting entries buffered in the memtable before it is spilled to an L0 segment.
    #[serde(default = "IndexOptions::default_memtable_spill_threshold")]
    #[validate(range(min = 1))]
    pub memtable_spill_threshold: u64,
    #[serde(default = "IndexOptions::default_segments_per_level")]
    #[validate(range(min = 2, max = 64))]
    pub segments_per_level: u32,
    #[serde(default = "IndexOptions::default_max_levels")]
    #[validate(range(min = 2, max = 16))]
    pub max_levels: u32,
    /// Segments with at most this many documents cache fieldnorms and the docmap at open.
    #[serde(default = "IndexOptions::default_eager_cache_max_docs")]
    pub eager_cache_max_docs: u32,
    #[serde(default = "IndexOptions::default_k1")]
    #[validate(range(min = 0.0, max = 3.0))]
    pub k1: f32,
    #[serde(default = "IndexOptions::default_b")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub b: f32,
    #[serde(default = "IndexOptions::default_auto_compact")]
    pub auto_compact: bool,
}

impl IndexOptions {
    fn default_memtable_spill_threshold() -> u64 {
        32_000_000
    }

    fn default_segments_per_level() -> u32 {
        16
    }

    fn default_max_levels() -> u32 {
        8
    }

    fn default_eager_cache_max_docs() -> u32 {
        100_000
    }

    fn default_k1() -> f32 {
        1.2
    }

    fn default_b() -> f32 {
        0.75
    }

    fn default_auto_compact() -> bool {
        true
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let options: IndexOptions = toml::from_str(s)?;
        options.validate_all()?;
        Ok(options)
    }

    /// Field ranges plus the checks that span several fields.
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;
        if !self.k1.is_finite() || !self.b.is_finite() {
            return Err(Error::InvalidConfig("k1 and b must be finite".into()));
        }
        let steady_state = self.max_levels as usize * self.segments_per_level as usize;
        if steady_state > MAX_SEGMENTS {
            return Err(Error::InvalidConfig(format!(
                "{} levels of {} segments overflow the {MAX_SEGMENTS}-entry metadata page",
                self.max_levels, self.segments_per_level
            )));
        }
        Ok(())
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            memtable_spill_threshold: Self::default_memtable_spill_threshold(),
            segments_per_level: Self::default_segments_per_level(),
            max_levels: Self::default_max_levels(),
            eager_cache_max_docs: Self::default_eager_cache_max_docs(),
            k1: Self::default_k1(),
            b: Self::default_b(),
            auto_compact: Self::default_auto_compact(),
        }
    }
}
