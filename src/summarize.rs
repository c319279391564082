//! Leaf summarizer: one cluster shard in, one cluster summary out.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::gateway::TextGenerator;
use crate::key::{ArtifactKind, PartitionKey};
use crate::prompts::LEAF_SUMMARY;
use crate::record::Shard;
use crate::store::ArtifactStore;

/// Render the first `rows` rows of `shard` as a plain text table.
///
/// Cells are right-aligned to their column width and separated by one
/// space; the header row comes first and there is no index column.
pub fn render_preview(shard: &Shard, rows: usize) -> String {
    let headers: Vec<String> = Shard::headers().iter().map(|h| h.to_string()).collect();
    let body: Vec<Vec<String>> = shard.rows.iter().take(rows).map(Shard::row_cells).collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            body.iter()
                .map(|cells| cells[col].chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    std::iter::once(&headers)
        .chain(body.iter())
        .map(|cells| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:>width$}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the leaf prompt for one cluster shard.
pub fn leaf_prompt(shard: &Shard, preview_rows: usize) -> String {
    LEAF_SUMMARY.render(&shard.key, &render_preview(shard, preview_rows))
}

/// Summarize the cluster shard stored under `key` and persist the result.
///
/// A generation failure leaves the summary absent and is returned to the
/// caller; it is never retried here.
pub async fn summarize_cluster(
    generator: &dyn TextGenerator,
    store: &ArtifactStore,
    key: PartitionKey,
    preview_rows: usize,
) -> Result<PathBuf, PipelineError> {
    let shard = Shard::read(store.path(ArtifactKind::ClusterShard, &key), key)?;
    if shard.is_empty() {
        return Err(PipelineError::MissingInput(format!("cluster shard {key} has no rows")));
    }

    let prompt = leaf_prompt(&shard, preview_rows);
    debug!(key = %key, rows = shard.len(), prompt_chars = prompt.len(), "summarizing cluster");

    let summary = generator
        .generate(&prompt)
        .await
        .map_err(|source| PipelineError::Generation { key, source })?;

    let path = store.write(ArtifactKind::ClusterSummary, &key, summary)?;
    info!(key = %key, path = %path.display(), "saved cluster summary");
    Ok(path)
}
