use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Options recognized by [`crate::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Boundaries below this confidence are kept but flagged `requires_review`
    pub min_boundary_confidence: f64,

    /// Run the semantic-similarity boundary signal
    pub enable_semantic_detector: bool,

    /// Hard cap on emitted boundaries per document
    pub max_boundaries: usize,

    /// Wall-clock budget for the whole run, in milliseconds
    pub time_budget_ms: u64,

    /// Line-offset tolerance used when aligning candidates from different signals
    pub alignment_tolerance: usize,

    /// Overlap-coefficient value below which the semantic signal starts a new segment
    pub semantic_split_threshold: f64,

    /// Minimum run of UPPER_CASE assignments treated as a configuration section
    pub min_config_block_len: usize,

    /// Worker pool size for per-boundary work (0 = available parallelism)
    pub worker_threads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_boundary_confidence: 0.6,
            enable_semantic_detector: true,
            max_boundaries: 20,
            time_budget_ms: 30_000,
            alignment_tolerance: 4,
            semantic_split_threshold: 0.2,
            min_config_block_len: 2,
            worker_threads: 0,
        }
    }
}

impl EngineOptions {
    /// Stricter review gate: fewer automatic templates, tighter alignment
    pub fn strict() -> Self {
        Self {
            min_boundary_confidence: 0.75,
            alignment_tolerance: 2,
            min_config_block_len: 3,
            ..Default::default()
        }
    }

    /// Looser gate for exploratory uploads
    pub fn permissive() -> Self {
        Self {
            min_boundary_confidence: 0.45,
            alignment_tolerance: 6,
            max_boundaries: 50,
            ..Default::default()
        }
    }

    /// Number of pool threads to spawn for `boundary_count` tasks
    #[must_use]
    pub fn effective_workers(&self, boundary_count: usize) -> usize {
        let configured = if self.worker_threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.worker_threads
        };
        configured.min(boundary_count).max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_boundary_confidence) {
            return Err(EngineError::invalid_config(format!(
                "min_boundary_confidence ({}) must be within 0..=1",
                self.min_boundary_confidence
            )));
        }

        if !(0.0..=1.0).contains(&self.semantic_split_threshold) {
            return Err(EngineError::invalid_config(format!(
                "semantic_split_threshold ({}) must be within 0..=1",
                self.semantic_split_threshold
            )));
        }

        if self.max_boundaries == 0 {
            return Err(EngineError::invalid_config("max_boundaries must be > 0"));
        }

        if self.min_config_block_len < 2 {
            return Err(EngineError::invalid_config(format!(
                "min_config_block_len ({}) must be at least 2",
                self.min_config_block_len
            )));
        }

        Ok(())
    }
}
