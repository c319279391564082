//! Aggregation: reduce every group of child reports into one parent report.
//!
//! The same algorithm serves all three comparison levels. It is parameterized
//! only by the child artifact kind; the parent kind, prompt template and child
//! headers follow from it.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::budget::{count_tokens, fit_sections, Section};
use crate::error::PipelineError;
use crate::gateway::TextGenerator;
use crate::key::{ArtifactKind, PartitionKey};
use crate::prompts::{aggregation_template, child_header, PromptTemplate};
use crate::store::ArtifactStore;

/// One reduction level: children of `child` grouped under their parent key.
#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub child: ArtifactKind,
    pub parent: ArtifactKind,
    pub template: PromptTemplate,
}

impl Level {
    /// The level reducing `child` artifacts, if `child` has a parent level.
    pub fn over(child: ArtifactKind) -> Option<Self> {
        Some(Self {
            child,
            parent: child.reduces_to()?,
            template: aggregation_template(child)?,
        })
    }

    /// Existing child keys grouped by parent key, both ascending.
    pub fn groups(
        &self,
        store: &ArtifactStore,
    ) -> Result<BTreeMap<PartitionKey, Vec<PartitionKey>>, PipelineError> {
        let mut groups: BTreeMap<PartitionKey, Vec<PartitionKey>> = BTreeMap::new();
        for key in store.list(self.child)? {
            if let Some(parent) = key.parent() {
                groups.entry(parent).or_default().push(key);
            }
        }
        Ok(groups)
    }
}

/// A rendered aggregation prompt.
#[derive(Debug, Clone)]
pub struct GroupPrompt {
    pub prompt: String,
    /// Children that made it into the prompt, ascending.
    pub children: Vec<PartitionKey>,
    /// How many child bodies were cut to fit.
    pub truncated: usize,
}

/// Read the children of one group and render the prompt under `max_tokens`.
///
/// A child that cannot be read is left out with a warning; a group with no
/// readable child is a `MissingInput` failure.
pub fn build_group_prompt(
    level: &Level,
    store: &ArtifactStore,
    parent: &PartitionKey,
    children: &[PartitionKey],
    max_tokens: usize,
) -> Result<GroupPrompt, PipelineError> {
    let mut sections = Vec::with_capacity(children.len());
    let mut included = Vec::with_capacity(children.len());
    for child in children {
        match store.read_text(level.child, child) {
            Ok(text) => {
                sections.push(Section::new(child_header(level.child, child), text));
                included.push(*child);
            }
            Err(e) => warn!(parent = %parent, child = %child, error = %e, "skipping unreadable child"),
        }
    }
    if sections.is_empty() {
        return Err(PipelineError::MissingInput(format!(
            "no readable {} artifacts for {parent}",
            level.child
        )));
    }

    let scaffold = count_tokens(&level.template.render_sections(parent, &[]));
    let separators = 2 * sections.len();
    let available = max_tokens.saturating_sub(scaffold + separators);
    let (sections, truncated) = fit_sections(sections, available);
    if truncated > 0 {
        debug!(parent = %parent, truncated, available, "child reports truncated to fit budget");
    }

    Ok(GroupPrompt {
        prompt: level.template.render_sections(parent, &sections),
        children: included,
        truncated,
    })
}

/// Reduce one group: build the prompt, generate once, persist the parent report.
///
/// Returns how many child reports were truncated to fit the budget.
pub async fn reduce_group(
    level: &Level,
    generator: &dyn TextGenerator,
    store: &ArtifactStore,
    parent: PartitionKey,
    children: &[PartitionKey],
    max_tokens: usize,
) -> Result<usize, PipelineError> {
    let group = build_group_prompt(level, store, &parent, children, max_tokens)?;
    debug!(
        parent = %parent,
        children = group.children.len(),
        template = level.template.slug,
        "reducing group"
    );

    let report = generator
        .generate(&group.prompt)
        .await
        .map_err(|source| PipelineError::Generation {
            key: parent,
            source,
        })?;

    let path = store.write(level.parent, &parent, report)?;
    info!(key = %parent, kind = %level.parent, path = %path.display(), "saved report");
    Ok(group.truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(kind: ArtifactKind, items: &[(PartitionKey, &str)]) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        for (key, text) in items {
            store.write(kind, key, text).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn levels_chain_upward() {
        let level = Level::over(ArtifactKind::ClusterSummary).unwrap();
        assert_eq!(level.parent, ArtifactKind::ClusterComparison);
        let top = Level::over(ArtifactKind::EpochComparison).unwrap();
        assert_eq!(top.parent, ArtifactKind::DepthComparison);
        assert!(Level::over(ArtifactKind::DepthComparison).is_none());
        assert!(Level::over(ArtifactKind::ClusterShard).is_none());
    }

    #[test]
    fn groups_by_parent_key() {
        let (_dir, store) = store_with(
            ArtifactKind::ClusterSummary,
            &[
                (PartitionKey::for_cluster(1, 1, 1), "b"),
                (PartitionKey::for_cluster(1, 1, 0), "a"),
                (PartitionKey::for_cluster(1, 2, 0), "c"),
                (PartitionKey::for_cluster(10, 1, 0), "d"),
            ],
        );
        let groups = Level::over(ArtifactKind::ClusterSummary)
            .unwrap()
            .groups(&store)
            .unwrap();
        let parents: Vec<_> = groups.keys().copied().collect();
        assert_eq!(
            parents,
            vec![
                PartitionKey::for_epoch(1, 1),
                PartitionKey::for_epoch(1, 2),
                PartitionKey::for_epoch(10, 1),
            ]
        );
        assert_eq!(
            groups[&PartitionKey::for_epoch(1, 1)],
            vec![PartitionKey::for_cluster(1, 1, 0), PartitionKey::for_cluster(1, 1, 1)]
        );
    }

    #[test]
    fn prompt_contains_every_sibling_in_order() {
        let children = [
            PartitionKey::for_epoch(3, 1),
            PartitionKey::for_epoch(3, 2),
            PartitionKey::for_epoch(3, 10),
        ];
        let (_dir, store) = store_with(
            ArtifactKind::ClusterComparison,
            &[
                (children[0], "first epoch text"),
                (children[1], "second epoch text"),
                (children[2], "tenth epoch text"),
            ],
        );
        let level = Level::over(ArtifactKind::ClusterComparison).unwrap();
        let group =
            build_group_prompt(&level, &store, &PartitionKey::for_depth(3), &children, 24_000)
                .unwrap();

        assert_eq!(group.truncated, 0);
        let p = &group.prompt;
        assert!(p.contains("## Depth 3: analyses per epoch"));
        let first = p.find("### Epoch 1 Analysis:\nfirst epoch text").unwrap();
        let second = p.find("### Epoch 2 Analysis:\nsecond epoch text").unwrap();
        let tenth = p.find("### Epoch 10 Analysis:\ntenth epoch text").unwrap();
        assert!(first < second && second < tenth);
    }

    #[test]
    fn budget_keeps_every_header() {
        let long = "Repeated transfers between the same wallets. ".repeat(400);
        let children = [PartitionKey::for_depth(1), PartitionKey::for_depth(2)];
        let (_dir, store) = store_with(
            ArtifactKind::EpochComparison,
            &[(children[0], long.as_str()), (children[1], long.as_str())],
        );
        let level = Level::over(ArtifactKind::EpochComparison).unwrap();
        let group =
            build_group_prompt(&level, &store, &PartitionKey::root(), &children, 1_000).unwrap();

        assert_eq!(group.truncated, 2);
        assert!(group.prompt.contains("### Depth 1 Summary:"));
        assert!(group.prompt.contains("### Depth 2 Summary:"));
        assert!(count_tokens(&group.prompt) <= 1_000 + 16);
        assert!(group.prompt.contains("key_findings"));
    }

    struct Fixed(&'static str);

    #[async_trait::async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String, crate::gateway::ProviderError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn reduce_group_writes_parent_and_counts_cuts() {
        let long = "Repeated transfers between the same wallets. ".repeat(400);
        let children = [PartitionKey::for_depth(1), PartitionKey::for_depth(2)];
        let (_dir, store) = store_with(
            ArtifactKind::EpochComparison,
            &[(children[0], long.as_str()), (children[1], "short")],
        );
        let level = Level::over(ArtifactKind::EpochComparison).unwrap();

        let truncated = reduce_group(
            &level,
            &Fixed("final"),
            &store,
            PartitionKey::root(),
            &children,
            1_000,
        )
        .await
        .unwrap();

        assert_eq!(truncated, 1);
        assert_eq!(
            store
                .read_text(ArtifactKind::DepthComparison, &PartitionKey::root())
                .unwrap(),
            "final"
        );
    }

    #[test]
    fn missing_children_are_skipped() {
        let present = PartitionKey::for_cluster(1, 1, 0);
        let (_dir, store) = store_with(ArtifactKind::ClusterSummary, &[(present, "only one")]);
        let level = Level::over(ArtifactKind::ClusterSummary).unwrap();
        let group = build_group_prompt(
            &level,
            &store,
            &PartitionKey::for_epoch(1, 1),
            &[present, PartitionKey::for_cluster(1, 1, 1)],
            24_000,
        )
        .unwrap();
        assert_eq!(group.children, vec![present]);

        let err = build_group_prompt(
            &level,
            &store,
            &PartitionKey::for_epoch(1, 1),
            &[PartitionKey::for_cluster(1, 1, 5)],
            24_000,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }
}
