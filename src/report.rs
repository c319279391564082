//! Stage reports and the run manifest.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::config::StageFlags;
use crate::error::{ErrorClass, PipelineError};
use crate::key::{ArtifactKind, PartitionKey};

/// Pipeline stages in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Partition,
    Summarize,
    ClusterComparison,
    EpochComparison,
    DepthComparison,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Partition,
        Stage::Summarize,
        Stage::ClusterComparison,
        Stage::EpochComparison,
        Stage::DepthComparison,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Partition => "partition",
            Self::Summarize => "summarize",
            Self::ClusterComparison => "cluster_comparison",
            Self::EpochComparison => "epoch_comparison",
            Self::DepthComparison => "depth_comparison",
        }
    }

    pub fn enabled(self, flags: &StageFlags) -> bool {
        match self {
            Self::Partition => flags.partition,
            Self::Summarize => flags.summarize,
            Self::ClusterComparison => flags.cluster_comparison,
            Self::EpochComparison => flags.epoch_comparison,
            Self::DepthComparison => flags.depth_comparison,
        }
    }

    /// Artifact sets this stage regenerates.
    pub fn outputs(self) -> &'static [ArtifactKind] {
        match self {
            Self::Partition => &[ArtifactKind::PartitionShard, ArtifactKind::ClusterShard],
            Self::Summarize => &[ArtifactKind::ClusterSummary],
            Self::ClusterComparison => &[ArtifactKind::ClusterComparison],
            Self::EpochComparison => &[ArtifactKind::EpochComparison],
            Self::DepthComparison => &[ArtifactKind::DepthComparison],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotRun,
    /// Disabled by its flag; previous artifacts untouched.
    Skipped,
    /// Enabled but found nothing to do.
    NoOp,
    Done,
    /// Some units failed, the rest were written.
    PartiallyFailed,
    /// Every unit failed.
    Failed,
}

/// One unit (shard or group) that produced no artifact.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub key: PartitionKey,
    pub class: ErrorClass,
    pub error: String,
}

impl UnitFailure {
    pub fn new(key: PartitionKey, error: &PipelineError) -> Self {
        Self {
            key,
            class: error.class(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    /// Keys written by this stage, ascending.
    pub produced: Vec<PartitionKey>,
    /// Failed units, ascending by key.
    pub failures: Vec<UnitFailure>,
    /// Child reports cut to fit the prompt budget.
    #[serde(skip_serializing_if = "is_zero")]
    pub truncated_children: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl StageReport {
    pub fn not_run(stage: Stage) -> Self {
        Self::with_status(stage, StageStatus::NotRun)
    }

    pub fn skipped(stage: Stage) -> Self {
        Self::with_status(stage, StageStatus::Skipped)
    }

    fn with_status(stage: Stage, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            produced: Vec::new(),
            failures: Vec::new(),
            truncated_children: 0,
        }
    }

    /// Build a finished report; status follows from what succeeded and failed.
    pub fn finish(
        stage: Stage,
        mut produced: Vec<PartitionKey>,
        mut failures: Vec<UnitFailure>,
    ) -> Self {
        produced.sort();
        failures.sort_by_key(|f| f.key);
        let status = match (produced.is_empty(), failures.is_empty()) {
            (true, true) => StageStatus::NoOp,
            (false, true) => StageStatus::Done,
            (false, false) => StageStatus::PartiallyFailed,
            (true, false) => StageStatus::Failed,
        };
        Self {
            stage,
            status,
            produced,
            failures,
            truncated_children: 0,
        }
    }
}

/// Written to `<work_dir>/run_manifest.json` after every run.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: String,
    pub finished_at: String,
    pub input: PathBuf,
    /// blake3 of the input table, when it could be read.
    pub input_blake3: Option<String>,
    pub work_dir: PathBuf,
    pub flags: StageFlags,
    pub stages: Vec<StageReport>,
    /// Set when the final report carried a parseable findings block.
    pub findings: Option<PathBuf>,
}

impl RunManifest {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Every unit failure across all stages.
    pub fn failures(&self) -> impl Iterator<Item = (Stage, &UnitFailure)> {
        self.stages
            .iter()
            .flat_map(|r| r.failures.iter().map(move |f| (r.stage, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_outcomes() {
        let key = PartitionKey::for_epoch(1, 1);
        let failure = UnitFailure::new(key, &PipelineError::MissingInput("gone".into()));

        assert_eq!(
            StageReport::finish(Stage::Summarize, vec![], vec![]).status,
            StageStatus::NoOp
        );
        assert_eq!(
            StageReport::finish(Stage::Summarize, vec![key], vec![]).status,
            StageStatus::Done
        );
        assert_eq!(
            StageReport::finish(Stage::Summarize, vec![key], vec![failure.clone()]).status,
            StageStatus::PartiallyFailed
        );
        assert_eq!(
            StageReport::finish(Stage::Summarize, vec![], vec![failure]).status,
            StageStatus::Failed
        );
    }

    #[test]
    fn finish_sorts_keys() {
        let report = StageReport::finish(
            Stage::ClusterComparison,
            vec![PartitionKey::for_epoch(10, 1), PartitionKey::for_epoch(2, 1)],
            vec![],
        );
        assert_eq!(
            report.produced,
            vec![PartitionKey::for_epoch(2, 1), PartitionKey::for_epoch(10, 1)]
        );
    }

    #[test]
    fn stage_order_and_flags() {
        let mut flags = StageFlags::all();
        flags.epoch_comparison = false;
        let enabled: Vec<_> = Stage::ORDER
            .iter()
            .filter(|s| s.enabled(&flags))
            .map(|s| s.as_str())
            .collect();
        assert_eq!(
            enabled,
            ["partition", "summarize", "cluster_comparison", "depth_comparison"]
        );
    }
}
