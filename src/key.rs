//! Partition keys and the artifact naming scheme.
//!
//! Every artifact the pipeline persists is addressed by a [`PartitionKey`]
//! prefix of `(depth, epoch, cluster)`. File names are the wire format between
//! stages, so rendering and parsing live here and nowhere else:
//!
//! | kind                 | arity | file name                                   |
//! |----------------------|-------|---------------------------------------------|
//! | partition shard      | 2     | `Depth_<d>_Epoch_<e>.csv`                   |
//! | cluster shard        | 3     | `Depth_<d>_Epoch_<e>_Cluster_<c>.csv`       |
//! | cluster summary      | 3     | `summary_Depth_<d>_Epoch_<e>_Cluster_<c>.txt` |
//! | cluster comparison   | 2     | `analysis_Depth_<d>_Epoch_<e>.txt`          |
//! | epoch comparison     | 1     | `summary_Depth_<d>.txt`                     |
//! | depth comparison     | 0     | `final_summary.txt`                         |
//!
//! Numbers must be canonical (no sign, no leading zeros) so that parsing and
//! re-rendering a name is the identity.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

const DELIMITER: char = '_';
const LABELS: [&str; 3] = ["Depth", "Epoch", "Cluster"];
const ASSIGNMENT_PREFIX: &str = "Cluster";

// =============================================================================
// PartitionKey
// =============================================================================

/// A `(depth, epoch, cluster)` prefix.
///
/// Fields are filled left to right: an epoch is only present with a depth and
/// a cluster only with an epoch. The empty key addresses the single
/// depth-comparison report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct PartitionKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    epoch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<i64>,
}

impl PartitionKey {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn for_depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn for_epoch(depth: u32, epoch: u32) -> Self {
        Self {
            depth: Some(depth),
            epoch: Some(epoch),
            cluster: None,
        }
    }

    pub fn for_cluster(depth: u32, epoch: u32, cluster: i64) -> Self {
        Self {
            depth: Some(depth),
            epoch: Some(epoch),
            cluster: Some(cluster),
        }
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    pub fn cluster(&self) -> Option<i64> {
        self.cluster
    }

    /// Number of populated components (0..=3).
    pub fn arity(&self) -> usize {
        [
            self.depth.is_some(),
            self.epoch.is_some(),
            self.cluster.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// The key one level up (last component dropped). `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        match self.arity() {
            0 => None,
            1 => Some(Self::root()),
            2 => self.depth.map(Self::for_depth),
            _ => match (self.depth, self.epoch) {
                (Some(d), Some(e)) => Some(Self::for_epoch(d, e)),
                _ => None,
            },
        }
    }

    /// The last populated component, which identifies this key among its siblings.
    pub fn leaf(&self) -> Option<i64> {
        self.cluster
            .or(self.epoch.map(i64::from))
            .or(self.depth.map(i64::from))
    }

    fn tokens(&self) -> Vec<String> {
        let values = [
            self.depth.map(|v| v.to_string()),
            self.epoch.map(|v| v.to_string()),
            self.cluster.map(|v| v.to_string()),
        ];
        LABELS
            .iter()
            .zip(values)
            .filter_map(|(label, value)| value.map(|v| format!("{label}{DELIMITER}{v}")))
            .collect()
    }

    /// Parse `Depth_<d>[_Epoch_<e>[_Cluster_<c>]]` tokens, requiring exactly `arity` components.
    fn from_tokens(tokens: &[&str], arity: usize) -> Option<Self> {
        if tokens.len() != arity * 2 {
            return None;
        }
        for (pair, label) in tokens.chunks(2).zip(LABELS) {
            if pair[0] != label {
                return None;
            }
        }
        let value = |idx: usize| tokens.get(idx * 2 + 1).copied();
        let key = match arity {
            0 => Self::root(),
            1 => Self::for_depth(parse_canonical(value(0)?)?),
            2 => Self::for_epoch(parse_canonical(value(0)?)?, parse_canonical(value(1)?)?),
            3 => Self::for_cluster(
                parse_canonical(value(0)?)?,
                parse_canonical(value(1)?)?,
                parse_canonical(value(2)?)?,
            ),
            _ => return None,
        };
        Some(key)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arity() == 0 {
            return f.write_str("all depths");
        }
        f.write_str(&self.tokens().join(" "))
    }
}

fn parse_canonical<T>(token: &str) -> Option<T>
where
    T: FromStr + ToString,
{
    let value: T = token.parse().ok()?;
    (value.to_string() == token).then_some(value)
}

// =============================================================================
// Assignment columns
// =============================================================================

/// A `(depth, epoch)` pair identifying one cluster-assignment column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize)]
pub struct DepthEpoch {
    pub depth: u32,
    pub epoch: u32,
}

impl DepthEpoch {
    pub fn new(depth: u32, epoch: u32) -> Self {
        Self { depth, epoch }
    }

    /// Input column carrying this pair's cluster ids: `Cluster_Depth_<d>_Epoch_<e>`.
    pub fn column_name(&self) -> String {
        format!(
            "{ASSIGNMENT_PREFIX}{DELIMITER}Depth{DELIMITER}{}{DELIMITER}Epoch{DELIMITER}{}",
            self.depth, self.epoch
        )
    }

    /// Inverse of [`column_name`](Self::column_name). Other headers yield `None`.
    pub fn from_column_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(ASSIGNMENT_PREFIX)?.strip_prefix(DELIMITER)?;
        let tokens: Vec<&str> = rest.split(DELIMITER).collect();
        let key = PartitionKey::from_tokens(&tokens, 2)?;
        Some(Self::new(key.depth?, key.epoch?))
    }

    pub fn key(&self) -> PartitionKey {
        PartitionKey::for_epoch(self.depth, self.epoch)
    }
}

impl From<DepthEpoch> for PartitionKey {
    fn from(pair: DepthEpoch) -> Self {
        pair.key()
    }
}

// =============================================================================
// Artifact kinds
// =============================================================================

/// Every persisted artifact set, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PartitionShard,
    ClusterShard,
    ClusterSummary,
    ClusterComparison,
    EpochComparison,
    DepthComparison,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::PartitionShard,
        ArtifactKind::ClusterShard,
        ArtifactKind::ClusterSummary,
        ArtifactKind::ClusterComparison,
        ArtifactKind::EpochComparison,
        ArtifactKind::DepthComparison,
    ];

    /// Key components carried by artifacts of this kind.
    pub fn arity(self) -> usize {
        match self {
            Self::PartitionShard => 2,
            Self::ClusterShard => 3,
            Self::ClusterSummary => 3,
            Self::ClusterComparison => 2,
            Self::EpochComparison => 1,
            Self::DepthComparison => 0,
        }
    }

    fn prefix(self) -> Option<&'static str> {
        match self {
            Self::PartitionShard | Self::ClusterShard => None,
            Self::ClusterSummary => Some("summary"),
            Self::ClusterComparison => Some("analysis"),
            Self::EpochComparison => Some("summary"),
            Self::DepthComparison => Some("final_summary"),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::PartitionShard | Self::ClusterShard => "csv",
            _ => "txt",
        }
    }

    /// Directory under the work dir holding this artifact set.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::PartitionShard => "partitions",
            Self::ClusterShard => "clusters",
            Self::ClusterSummary => "cluster_summaries",
            Self::ClusterComparison => "cluster_analysis",
            Self::EpochComparison => "epoch_summaries",
            Self::DepthComparison => "depth_comparison",
        }
    }

    /// The artifact kind an aggregation over this kind produces.
    pub fn reduces_to(self) -> Option<ArtifactKind> {
        match self {
            Self::ClusterSummary => Some(Self::ClusterComparison),
            Self::ClusterComparison => Some(Self::EpochComparison),
            Self::EpochComparison => Some(Self::DepthComparison),
            _ => None,
        }
    }

    pub fn file_name(self, key: &PartitionKey) -> String {
        debug_assert_eq!(key.arity(), self.arity(), "key arity does not match {self:?}");
        let mut parts: Vec<String> = self.prefix().map(str::to_string).into_iter().collect();
        parts.extend(key.tokens());
        format!("{}.{}", parts.join("_"), self.extension())
    }

    /// Parse a file name of this kind back into its key.
    ///
    /// Names with the wrong extension, prefix, label or token count yield `None`;
    /// they are simply not artifacts of this kind.
    pub fn parse_file_name(self, name: &str) -> Option<PartitionKey> {
        let stem = name
            .strip_suffix(self.extension())?
            .strip_suffix('.')?;
        let tokens: Vec<&str> = stem.split(DELIMITER).collect();
        let rest = match self.prefix() {
            Some(prefix) => {
                let prefix_tokens: Vec<&str> = prefix.split(DELIMITER).collect();
                if tokens.len() < prefix_tokens.len()
                    || tokens[..prefix_tokens.len()] != prefix_tokens[..]
                {
                    return None;
                }
                &tokens[prefix_tokens.len()..]
            }
            None => &tokens[..],
        };
        PartitionKey::from_tokens(rest, self.arity())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PartitionShard => "partition_shard",
            Self::ClusterShard => "cluster_shard",
            Self::ClusterSummary => "cluster_summary",
            Self::ClusterComparison => "cluster_comparison",
            Self::EpochComparison => "epoch_comparison",
            Self::DepthComparison => "depth_comparison",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Try every kind in pipeline order and return the first that accepts `name`.
pub fn classify_file_name(name: &str) -> Option<(ArtifactKind, PartitionKey)> {
    ArtifactKind::ALL
        .iter()
        .find_map(|kind| kind.parse_file_name(name).map(|key| (*kind, key)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_kind() {
        let c = PartitionKey::for_cluster(1, 2, 3);
        let e = PartitionKey::for_epoch(1, 2);
        let d = PartitionKey::for_depth(1);
        assert_eq!(ArtifactKind::PartitionShard.file_name(&e), "Depth_1_Epoch_2.csv");
        assert_eq!(
            ArtifactKind::ClusterShard.file_name(&c),
            "Depth_1_Epoch_2_Cluster_3.csv"
        );
        assert_eq!(
            ArtifactKind::ClusterSummary.file_name(&c),
            "summary_Depth_1_Epoch_2_Cluster_3.txt"
        );
        assert_eq!(
            ArtifactKind::ClusterComparison.file_name(&e),
            "analysis_Depth_1_Epoch_2.txt"
        );
        assert_eq!(ArtifactKind::EpochComparison.file_name(&d), "summary_Depth_1.txt");
        assert_eq!(
            ArtifactKind::DepthComparison.file_name(&PartitionKey::root()),
            "final_summary.txt"
        );
    }

    #[test]
    fn round_trips_multi_digit_keys() {
        for (d, e, c) in [(10, 1, 3), (1, 0, 13), (1, 10, 3), (123, 45, 6789), (2, 3, -1)] {
            let key = PartitionKey::for_cluster(d, e, c);
            for kind in [ArtifactKind::ClusterShard, ArtifactKind::ClusterSummary] {
                let name = kind.file_name(&key);
                let parsed = kind.parse_file_name(&name).unwrap();
                assert_eq!(parsed, key);
                assert_eq!(kind.file_name(&parsed), name);
            }
        }
    }

    #[test]
    fn depth_ten_is_not_depth_one_epoch_zero() {
        let parsed = ArtifactKind::ClusterShard
            .parse_file_name("Depth_10_Epoch_1_Cluster_3.csv")
            .unwrap();
        assert_eq!(parsed.depth(), Some(10));
        assert_eq!(parsed.epoch(), Some(1));
        assert_eq!(parsed.cluster(), Some(3));
    }

    #[test]
    fn rejects_malformed_names() {
        let kind = ArtifactKind::ClusterSummary;
        assert!(kind.parse_file_name("summary_Depth_1_Epoch_2.txt").is_none());
        assert!(kind.parse_file_name("summary_Depth_1_Epoch_2_Cluster_3.csv").is_none());
        assert!(kind.parse_file_name("summary_Depth_01_Epoch_2_Cluster_3.txt").is_none());
        assert!(kind.parse_file_name("summary_Depth_x_Epoch_2_Cluster_3.txt").is_none());
        assert!(kind.parse_file_name("analysis_Depth_1_Epoch_2_Cluster_3.txt").is_none());
        assert!(kind.parse_file_name("summary_Depth_1_Epoch_2_Cluster_3_extra.txt").is_none());
        assert!(ArtifactKind::EpochComparison
            .parse_file_name("summary_Depth_1_Epoch_2_Cluster_3.txt")
            .is_none());
        assert!(ArtifactKind::DepthComparison
            .parse_file_name("final_summary_Depth_1.txt")
            .is_none());
    }

    #[test]
    fn parent_drops_last_component() {
        let c = PartitionKey::for_cluster(4, 5, 6);
        assert_eq!(c.parent(), Some(PartitionKey::for_epoch(4, 5)));
        assert_eq!(
            PartitionKey::for_epoch(4, 5).parent(),
            Some(PartitionKey::for_depth(4))
        );
        assert_eq!(PartitionKey::for_depth(4).parent(), Some(PartitionKey::root()));
        assert_eq!(PartitionKey::root().parent(), None);
        assert_eq!(c.leaf(), Some(6));
    }

    #[test]
    fn keys_order_numerically() {
        let mut keys = vec![
            PartitionKey::for_epoch(10, 1),
            PartitionKey::for_epoch(2, 1),
            PartitionKey::for_epoch(2, 10),
            PartitionKey::for_epoch(2, 9),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PartitionKey::for_epoch(2, 1),
                PartitionKey::for_epoch(2, 9),
                PartitionKey::for_epoch(2, 10),
                PartitionKey::for_epoch(10, 1),
            ]
        );
    }

    #[test]
    fn assignment_columns() {
        let pair = DepthEpoch::from_column_name("Cluster_Depth_12_Epoch_3").unwrap();
        assert_eq!(pair, DepthEpoch::new(12, 3));
        assert_eq!(pair.column_name(), "Cluster_Depth_12_Epoch_3");
        assert!(DepthEpoch::from_column_name("Cluster_Value").is_none());
        assert!(DepthEpoch::from_column_name("Cluster_Depth_1").is_none());
        assert!(DepthEpoch::from_column_name("BlockNumber").is_none());
    }

    #[test]
    fn classify_picks_the_matching_kind() {
        assert_eq!(
            classify_file_name("summary_Depth_3.txt"),
            Some((ArtifactKind::EpochComparison, PartitionKey::for_depth(3)))
        );
        assert_eq!(
            classify_file_name("Depth_3_Epoch_1.csv"),
            Some((ArtifactKind::PartitionShard, PartitionKey::for_epoch(3, 1)))
        );
        assert_eq!(classify_file_name("notes.md"), None);
    }
}
