//! Prompt templates for the four report levels.
//!
//! Each template is fixed instructional text plus a heading naming the group
//! being reduced. Child reports are appended under per-child headers.

use crate::budget::Section;
use crate::key::{ArtifactKind, PartitionKey};

/// A report-level prompt template.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub instructions: &'static str,
    /// Placed between the instructions and the material. `{depth}` and
    /// `{epoch}` are filled from the group key.
    pub heading: &'static str,
    /// Closing line after the material.
    pub closing: &'static str,
}

impl PromptTemplate {
    fn heading_for(&self, key: &PartitionKey) -> String {
        let mut heading = self.heading.to_string();
        if let Some(d) = key.depth() {
            heading = heading.replace("{depth}", &d.to_string());
        }
        if let Some(e) = key.epoch() {
            heading = heading.replace("{epoch}", &e.to_string());
        }
        heading
    }

    /// Render with a raw body (the leaf preview table).
    pub fn render(&self, key: &PartitionKey, body: &str) -> String {
        let mut parts = vec![self.instructions.trim().to_string()];
        let heading = self.heading_for(key);
        if !heading.is_empty() {
            parts.push(heading);
        }
        parts.push(body.trim_end().to_string());
        if !self.closing.is_empty() {
            parts.push(self.closing.to_string());
        }
        parts.join("\n\n")
    }

    /// Render with one section per child report, in the given order.
    pub fn render_sections(&self, key: &PartitionKey, sections: &[Section]) -> String {
        let body = sections
            .iter()
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.render(key, &body)
    }
}

/// Header identifying one child report inside an aggregation prompt.
pub fn child_header(kind: ArtifactKind, key: &PartitionKey) -> String {
    let label = match kind {
        ArtifactKind::ClusterSummary => "Cluster",
        ArtifactKind::ClusterComparison => "Epoch",
        ArtifactKind::EpochComparison => "Depth",
        ArtifactKind::PartitionShard | ArtifactKind::ClusterShard | ArtifactKind::DepthComparison => {
            return format!("### {key}:");
        }
    };
    let noun = match kind {
        ArtifactKind::ClusterComparison => "Analysis",
        _ => "Summary",
    };
    match key.leaf() {
        Some(id) => format!("### {label} {id} {noun}:"),
        None => format!("### {key}:"),
    }
}

/// Template that reduces artifacts of `child` into the next level up.
pub fn aggregation_template(child: ArtifactKind) -> Option<PromptTemplate> {
    match child {
        ArtifactKind::ClusterSummary => Some(CLUSTER_COMPARISON),
        ArtifactKind::ClusterComparison => Some(EPOCH_COMPARISON),
        ArtifactKind::EpochComparison => Some(DEPTH_COMPARISON),
        _ => None,
    }
}

// =============================================================================
// Templates
// =============================================================================

pub const LEAF_SUMMARY: PromptTemplate = PromptTemplate {
    slug: "leaf_summary_v1",
    instructions: r#"You are a blockchain analyst working with on-chain transaction data.
The rows below all belong to one transaction cluster. Describe the characteristics of these transactions in full and explain what the cluster has in common.

Some columns have been re-encoded:
- `Hash` (transaction hash) -> `H0`, `H1`, `H2`, ...
- `From` (sender) -> `F0`, `F1`, `F2`, ...
- `To` (receiver) -> `T0`, `T1`, `T2`, ...
The IDs are unique per original value but are not real addresses."#,
    heading: "Sample data:",
    closing: "Write the summary:",
};

pub const CLUSTER_COMPARISON: PromptTemplate = PromptTemplate {
    slug: "cluster_comparison_v1",
    instructions: r#"You are a blockchain analyst comparing transaction clusters.
You are given the summaries of **every cluster within one depth and epoch**. Compare them:

1. Explain why these transactions were separated into different clusters.
2. Find what the clusters have in common and where they differ.
3. Check whether major participants (`From`/`To`) appear in several clusters.
4. Look for patterns in `Value`, for example one cluster of large transfers and one of small ones, a cluster dominated by one `TokenName`, or timing patterns in `TimeStamp`.
5. Offer hypotheses: arbitrage, one actor splitting transfers, flows from different sources.

Make the analysis complete and focus on useful insight."#,
    heading: "## Depth {depth}, Epoch {epoch}: all cluster summaries",
    closing: "",
};

pub const EPOCH_COMPARISON: PromptTemplate = PromptTemplate {
    slug: "epoch_comparison_v1",
    instructions: r#"You are a blockchain analyst studying how transaction clusters evolve over time.
You are given the cluster analyses of **every epoch within one depth**. Synthesize them:

1. Compare cluster structure across epochs.
   - Does transaction behaviour converge between epochs?
   - Do some epochs have notably more or fewer clusters?
   - Does any epoch introduce a new kind of transaction?
2. Find what every epoch at this depth shares.
   - Which `From` or `To` participants are core to this depth?
   - Which `TokenName` or `TokenSymbol` values stay active in every epoch?
   - Does `Value` stay within a stable range?
   - Do some cluster patterns recur across epochs?
3. Suggest why the clustering changes.
   - Market movements, specific events, or strategies such as arbitrage that dominate some epochs.

Give the key insights for this depth: the similarities, differences and shared traits of its epochs."#,
    heading: "## Depth {depth}: analyses per epoch",
    closing: "",
};

pub const DEPTH_COMPARISON: PromptTemplate = PromptTemplate {
    slug: "depth_comparison_v1",
    instructions: r#"You are a blockchain analyst comparing clustering strategies across traversal depths.
You are given the summary report of **every depth**. Compare them as a whole:

1. Is the clustering consistent across depths?
   - Do deeper layers behave differently from shallow ones?
   - Are some depths more concentrated and others more dispersed?
   - Does the number of clusters change with depth?
2. Identify the factors that change with depth.
   - Distribution of `TokenName` per depth.
   - How `Value` changes with depth.
   - `From` or `To` participants that appear only at particular depths.
3. Suggest why the depths differ.
   - Consensus mechanics, fees or block size.
   - Shifts in behaviour over historical time.
   - Strategies such as arbitrage that dominate particular depths.

Give a thorough view of the overall transaction patterns.

Finish with a fenced JSON block listing the most important findings:
```json
{"key_findings": ["...", "..."]}
```"#,
    heading: "## Comparison across all depths",
    closing: "",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_prompt_wraps_preview() {
        let p = LEAF_SUMMARY.render(&PartitionKey::for_cluster(1, 2, 3), "Hash Value\n  H0   1.5");
        assert!(p.starts_with("You are a blockchain analyst"));
        assert!(p.contains("`H0`, `H1`"));
        let data = p.find("Sample data:").unwrap();
        let preview = p.find("H0   1.5").unwrap();
        let closing = p.find("Write the summary:").unwrap();
        assert!(data < preview && preview < closing);
    }

    #[test]
    fn headings_fill_key_components() {
        let p = CLUSTER_COMPARISON.render_sections(
            &PartitionKey::for_epoch(10, 2),
            &[
                Section::new("### Cluster 0 Summary:", "zero"),
                Section::new("### Cluster 1 Summary:", "one"),
            ],
        );
        assert!(p.contains("## Depth 10, Epoch 2: all cluster summaries"));
        assert!(p.find("zero").unwrap() < p.find("one").unwrap());
        assert!(!p.contains("{depth}"));
    }

    #[test]
    fn child_headers_name_the_child() {
        assert_eq!(
            child_header(ArtifactKind::ClusterSummary, &PartitionKey::for_cluster(1, 1, 12)),
            "### Cluster 12 Summary:"
        );
        assert_eq!(
            child_header(ArtifactKind::ClusterComparison, &PartitionKey::for_epoch(1, 3)),
            "### Epoch 3 Analysis:"
        );
        assert_eq!(
            child_header(ArtifactKind::EpochComparison, &PartitionKey::for_depth(4)),
            "### Depth 4 Summary:"
        );
    }

    #[test]
    fn templates_chain_by_level() {
        assert_eq!(
            aggregation_template(ArtifactKind::ClusterSummary).map(|t| t.slug),
            Some("cluster_comparison_v1")
        );
        assert_eq!(
            aggregation_template(ArtifactKind::EpochComparison).map(|t| t.slug),
            Some("depth_comparison_v1")
        );
        assert!(aggregation_template(ArtifactKind::DepthComparison).is_none());
        assert!(DEPTH_COMPARISON.instructions.contains("key_findings"));
    }
}
