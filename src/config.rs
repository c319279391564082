//! Run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::key::DepthEpoch;

pub const DEFAULT_PREVIEW_ROWS: usize = 10;
pub const DEFAULT_MAX_PROMPT_TOKENS: usize = 24_000;

/// Per-stage regenerate switches. A disabled stage is skipped and its
/// previous artifacts are left as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageFlags {
    /// Partition and cluster the input table.
    pub partition: bool,
    pub summarize: bool,
    pub cluster_comparison: bool,
    pub epoch_comparison: bool,
    pub depth_comparison: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl StageFlags {
    pub fn all() -> Self {
        Self {
            partition: true,
            summarize: true,
            cluster_comparison: true,
            epoch_comparison: true,
            depth_comparison: true,
        }
    }

    pub fn none() -> Self {
        Self {
            partition: false,
            summarize: false,
            cluster_comparison: false,
            epoch_comparison: false,
            depth_comparison: false,
        }
    }

    /// Whether any enabled stage calls the text generator.
    pub fn needs_generator(&self) -> bool {
        self.summarize || self.cluster_comparison || self.epoch_comparison || self.depth_comparison
    }
}

/// Everything one controller run needs besides the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Input table (CSV) with base and `Cluster_Depth_<d>_Epoch_<e>` columns.
    pub input: PathBuf,
    /// Root of the artifact store.
    pub work_dir: PathBuf,
    /// Rows of each cluster shard shown to the leaf summarizer.
    pub preview_rows: usize,
    /// Upper bound on tokens in any single aggregation prompt.
    pub max_prompt_tokens: usize,
    /// Units in flight at once within a stage.
    pub concurrency: usize,
    /// Restrict partitioning to these pairs.
    pub depth_epochs: Option<Vec<DepthEpoch>>,
    pub stages: StageFlags,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data_encoded.csv"),
            work_dir: PathBuf::from("strata_work"),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            max_prompt_tokens: DEFAULT_MAX_PROMPT_TOKENS,
            concurrency: 1,
            depth_epochs: None,
            stages: StageFlags::default(),
        }
    }
}

impl RunConfig {
    /// Load a JSON config file; omitted fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.preview_rows == 0 {
            return Err(PipelineError::Config("preview_rows must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be positive".into()));
        }
        if self.max_prompt_tokens < 256 {
            return Err(PipelineError::Config(format!(
                "max_prompt_tokens {} is too small (min 256)",
                self.max_prompt_tokens
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"work_dir": "out", "stages": {"summarize": false},
                "depth_epochs": [{"depth": 10, "epoch": 1}]}"#,
        )
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("out"));
        assert_eq!(config.preview_rows, DEFAULT_PREVIEW_ROWS);
        assert!(!config.stages.summarize);
        assert!(config.stages.partition && config.stages.depth_comparison);
        assert_eq!(config.depth_epochs, Some(vec![DepthEpoch::new(10, 1)]));
    }

    #[test]
    fn load_rejects_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"concurrency": 0}"#).unwrap();
        let err = RunConfig::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn generator_needed_only_for_report_stages() {
        let mut flags = StageFlags::none();
        flags.partition = true;
        assert!(!flags.needs_generator());
        flags.depth_comparison = true;
        assert!(flags.needs_generator());
    }
}
