//! Stage controller: partition → summarize → compare clusters → compare
//! epochs → compare depths.
//!
//! Stages always run in that order. Each one reads only the artifacts the
//! stage below left in the store, so a disabled stage simply leaves its old
//! artifacts in place for the next enabled one to consume. An enabled stage
//! first clears everything it owns and then regenerates it in full.
//!
//! Failures are isolated per unit (one shard or one group): the unit's
//! artifact is left absent, the failure is recorded with its key, and the
//! stage carries on. No stage failure stops the run.
//!
//! Usage:
//! ```bash
//! strata run --input data_encoded.csv --work-dir strata_work
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{reduce_group, Level};
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::findings::extract_findings;
use crate::gateway::TextGenerator;
use crate::key::{ArtifactKind, PartitionKey};
use crate::partition::{cluster, partition};
use crate::record::{Shard, TransactionTable};
use crate::report::{RunManifest, Stage, StageReport, StageStatus, UnitFailure};
use crate::store::{write_atomic, ArtifactStore};
use crate::summarize::summarize_cluster;

pub const MANIFEST_FILE: &str = "run_manifest.json";
pub const FINDINGS_FILE: &str = "final_summary.json";

/// Drives one run over a work directory.
pub struct Pipeline {
    config: RunConfig,
    store: ArtifactStore,
    generator: Arc<dyn TextGenerator>,
}

impl Pipeline {
    /// Validate `config` and open its work directory.
    pub fn new(config: RunConfig, generator: Arc<dyn TextGenerator>) -> Result<Self, PipelineError> {
        config.validate()?;
        let store = ArtifactStore::open(&config.work_dir)?;
        Ok(Self {
            config,
            store,
            generator,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.store.root().join(MANIFEST_FILE)
    }

    pub fn findings_path(&self) -> PathBuf {
        self.store.dir(ArtifactKind::DepthComparison).join(FINDINGS_FILE)
    }

    /// Run every stage in order and write the run manifest.
    ///
    /// Only failing to write the manifest is an error; unit and stage
    /// failures are recorded in the returned manifest.
    pub async fn run(&self) -> Result<RunManifest, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now().to_rfc3339();
        let flags = self.config.stages;
        info!(%run_id, work_dir = %self.store.root().display(), "starting run");

        let input_blake3 = hash_file(&self.config.input);

        let mut stages = Vec::with_capacity(Stage::ORDER.len());
        for stage in Stage::ORDER {
            let report = if stage.enabled(&flags) {
                self.run_stage(stage).await
            } else {
                info!(stage = %stage, "stage disabled; keeping existing artifacts");
                StageReport::skipped(stage)
            };
            log_report(&report);
            stages.push(report);
        }

        let findings_path = self.findings_path();
        let manifest = RunManifest {
            run_id,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            input: self.config.input.clone(),
            input_blake3,
            work_dir: self.store.root().to_path_buf(),
            flags,
            stages,
            findings: findings_path.is_file().then_some(findings_path),
        };

        let json = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.manifest_path(), &json)?;
        info!(%run_id, manifest = %self.manifest_path().display(), "run complete");
        Ok(manifest)
    }

    /// Clear the stage's outputs and regenerate them.
    ///
    /// The partition stage clears only once its input table has loaded, so a
    /// bad input leaves the previous run's artifacts in place.
    pub async fn run_stage(&self, stage: Stage) -> StageReport {
        info!(stage = %stage, "running stage");
        if stage != Stage::Partition {
            if let Err(e) = self.clear_outputs(stage) {
                return failed(stage, e);
            }
        }

        match stage {
            Stage::Partition => self.partition_stage(),
            Stage::Summarize => self.summarize_stage().await,
            Stage::ClusterComparison => self.aggregate_stage(stage, ArtifactKind::ClusterSummary).await,
            Stage::EpochComparison => {
                self.aggregate_stage(stage, ArtifactKind::ClusterComparison).await
            }
            Stage::DepthComparison => {
                let path = self.findings_path();
                if path.is_file() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        return failed(stage, PipelineError::io(&path, e));
                    }
                }
                let report = self.aggregate_stage(stage, ArtifactKind::EpochComparison).await;
                if report.produced.contains(&PartitionKey::root()) {
                    self.write_findings();
                }
                report
            }
        }
    }

    // =========================================================================
    // Partition + cluster
    // =========================================================================

    fn partition_stage(&self) -> StageReport {
        let stage = Stage::Partition;
        let table = match TransactionTable::load(&self.config.input) {
            Ok(table) => table,
            Err(e) => {
                warn!(input = %self.config.input.display(), "input unusable; keeping existing partitions");
                return failed(stage, e);
            }
        };
        if let Err(e) = self.clear_outputs(stage) {
            return failed(stage, e);
        }
        info!(
            input = %self.config.input.display(),
            rows = table.len(),
            pairs = table.pairs().len(),
            "loaded input table"
        );

        let mut produced = Vec::new();
        let mut failures = Vec::new();

        for shard in partition(&table, self.config.depth_epochs.as_deref()) {
            let written = shard
                .to_csv()
                .and_then(|csv| self.store.write(ArtifactKind::PartitionShard, &shard.key, csv));
            match written {
                Ok(path) => {
                    info!(key = %shard.key, rows = shard.len(), path = %path.display(), "saved partition");
                    produced.push(shard.key);
                }
                Err(e) => failures.push(unit_failure(stage, shard.key, &e)),
            }
        }

        let partitions = match self.store.list(ArtifactKind::PartitionShard) {
            Ok(keys) => keys,
            Err(e) => return failed(stage, e),
        };
        for key in partitions {
            match self.cluster_partition(key) {
                Ok(clusters) => produced.extend(clusters),
                Err(e) => failures.push(unit_failure(stage, key, &e)),
            }
        }

        StageReport::finish(stage, produced, failures)
    }

    fn cluster_partition(&self, key: PartitionKey) -> Result<Vec<PartitionKey>, PipelineError> {
        let shard = Shard::read(self.store.path(ArtifactKind::PartitionShard, &key), key)?;
        let mut written = Vec::new();
        for group in cluster(&shard) {
            self.store
                .write(ArtifactKind::ClusterShard, &group.key, group.to_csv()?)?;
            written.push(group.key);
        }
        info!(key = %key, clusters = written.len(), "split partition into clusters");
        Ok(written)
    }

    // =========================================================================
    // Report stages
    // =========================================================================

    async fn summarize_stage(&self) -> StageReport {
        let stage = Stage::Summarize;
        let keys = match self.store.list(ArtifactKind::ClusterShard) {
            Ok(keys) => keys,
            Err(e) => return failed(stage, e),
        };
        info!(stage = %stage, units = keys.len(), concurrency = self.concurrency(), "summarizing clusters");

        let generator = self.generator.as_ref();
        let preview_rows = self.config.preview_rows;
        let results: Vec<_> = stream::iter(keys.into_iter().map(|key| async move {
            let outcome = summarize_cluster(generator, &self.store, key, preview_rows)
                .await
                .map(|_| 0);
            (key, outcome)
        }))
        .buffer_unordered(self.concurrency())
        .collect()
        .await;

        collect_outcomes(stage, results)
    }

    async fn aggregate_stage(&self, stage: Stage, child: ArtifactKind) -> StageReport {
        let Some(level) = Level::over(child) else {
            return StageReport::not_run(stage);
        };
        let groups = match level.groups(&self.store) {
            Ok(groups) => groups,
            Err(e) => return failed(stage, e),
        };
        if groups.is_empty() {
            info!(stage = %stage, child = %child, "no child reports found; nothing to do");
            return StageReport::finish(stage, Vec::new(), Vec::new());
        }
        info!(stage = %stage, groups = groups.len(), concurrency = self.concurrency(), "reducing groups");

        let generator = self.generator.as_ref();
        let max_tokens = self.config.max_prompt_tokens;
        let level = &level;
        let results: Vec<_> = stream::iter(groups.into_iter().map(|(parent, children)| async move {
            let outcome = reduce_group(level, generator, &self.store, parent, &children, max_tokens)
                .await;
            (parent, outcome)
        }))
        .buffer_unordered(self.concurrency())
        .collect()
        .await;

        collect_outcomes(stage, results)
    }

    fn write_findings(&self) {
        let report = match self
            .store
            .read_text(ArtifactKind::DepthComparison, &PartitionKey::root())
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "final report unreadable; no findings extracted");
                return;
            }
        };
        let findings = match extract_findings(&report) {
            Ok(findings) => findings,
            Err(e) => {
                warn!(error = %e, "final report has no structured findings");
                return;
            }
        };
        let path = self.findings_path();
        let written = serde_json::to_vec_pretty(&findings)
            .map_err(PipelineError::from)
            .and_then(|json| write_atomic(&path, &json));
        match written {
            Ok(()) => info!(
                path = %path.display(),
                findings = findings.key_findings.len(),
                "saved structured findings"
            ),
            Err(e) => warn!(error = %e, "could not save structured findings"),
        }
    }

    fn clear_outputs(&self, stage: Stage) -> Result<(), PipelineError> {
        for kind in stage.outputs() {
            self.store.clear(*kind)?;
        }
        Ok(())
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }
}

fn collect_outcomes(
    stage: Stage,
    results: Vec<(PartitionKey, Result<usize, PipelineError>)>,
) -> StageReport {
    let mut produced = Vec::new();
    let mut failures = Vec::new();
    let mut truncated = 0;
    for (key, outcome) in results {
        match outcome {
            Ok(cut) => {
                produced.push(key);
                truncated += cut;
            }
            Err(e) => failures.push(unit_failure(stage, key, &e)),
        }
    }
    let mut report = StageReport::finish(stage, produced, failures);
    report.truncated_children = truncated;
    report
}

fn unit_failure(stage: Stage, key: PartitionKey, error: &PipelineError) -> UnitFailure {
    warn!(stage = %stage, key = %key, class = ?error.class(), error = %error, "unit failed");
    UnitFailure::new(key, error)
}

/// A stage that could not start at all, recorded against the root key.
fn failed(stage: Stage, error: PipelineError) -> StageReport {
    StageReport::finish(stage, Vec::new(), vec![unit_failure(stage, PartitionKey::root(), &error)])
}

fn log_report(report: &StageReport) {
    match report.status {
        StageStatus::Skipped | StageStatus::NotRun => {}
        StageStatus::NoOp => info!(stage = %report.stage, "stage had nothing to do"),
        StageStatus::Done => info!(
            stage = %report.stage,
            produced = report.produced.len(),
            "stage done"
        ),
        StageStatus::PartiallyFailed | StageStatus::Failed => warn!(
            stage = %report.stage,
            status = ?report.status,
            produced = report.produced.len(),
            failed = report.failures.len(),
            "stage finished with failures"
        ),
    }
}

fn hash_file(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(blake3::hash(&bytes).to_hex().to_string()),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "input not hashed");
            None
        }
    }
}
