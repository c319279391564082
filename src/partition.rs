//! Partitioner and clusterer.
//!
//! The partitioner fans the input table out into one shard per
//! `(depth, epoch)` assignment column; the clusterer fans each of those out
//! into one shard per cluster id.

use std::collections::BTreeMap;

use tracing::debug;

use crate::key::{DepthEpoch, PartitionKey};
use crate::record::{Shard, ShardRow, TransactionTable};

/// Split `table` into one shard per `(depth, epoch)` pair.
///
/// Shards come back ascending by `(depth, epoch)` compared as integers. When
/// `only` is given, pairs outside it are not produced and requested pairs the
/// table lacks are skipped. Every shard has exactly one row per input row.
pub fn partition(table: &TransactionTable, only: Option<&[DepthEpoch]>) -> Vec<Shard> {
    if let Some(wanted) = only {
        for pair in wanted {
            if table.assignments(*pair).is_none() {
                debug!(column = %pair.column_name(), "requested pair not in input; skipping");
            }
        }
    }

    table
        .pairs()
        .into_iter()
        .filter(|pair| only.map_or(true, |wanted| wanted.contains(pair)))
        .filter_map(|pair| {
            let assignments = table.assignments(pair)?;
            let rows = table
                .transactions()
                .iter()
                .zip(assignments)
                .map(|(tx, cluster)| ShardRow {
                    transaction: tx.clone(),
                    cluster: *cluster,
                })
                .collect();
            Some(Shard {
                key: pair.key(),
                rows,
            })
        })
        .collect()
}

/// Split a partition shard into one shard per cluster id.
///
/// Clusters come back ascending by id, rows keep their shard order, and rows
/// with no cluster id are dropped.
pub fn cluster(shard: &Shard) -> Vec<Shard> {
    let (Some(depth), Some(epoch)) = (shard.key.depth(), shard.key.epoch()) else {
        return Vec::new();
    };

    let mut groups: BTreeMap<i64, Vec<ShardRow>> = BTreeMap::new();
    let mut unassigned = 0usize;
    for row in &shard.rows {
        match row.cluster {
            Some(id) => groups.entry(id).or_default().push(row.clone()),
            None => unassigned += 1,
        }
    }
    if unassigned > 0 {
        debug!(shard = %shard.key, unassigned, "dropping rows without a cluster id");
    }

    groups
        .into_iter()
        .map(|(id, rows)| Shard {
            key: PartitionKey::for_cluster(depth, epoch, id),
            rows,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "\
layer,BlockNumber,TimeStamp,Hash,From,To,Value,TokenName,TokenSymbol,Cluster_Depth_1_Epoch_1,Cluster_Depth_1_Epoch_2,Cluster_Depth_10_Epoch_1
1,1,t1,H1,F1,T1,1,A,a,0,1,5
1,2,t2,H2,F2,T2,2,A,a,1,1,
1,3,t3,H3,F3,T3,3,A,a,0,2,5
";

    fn table() -> TransactionTable {
        TransactionTable::from_reader(INPUT.as_bytes(), "input.csv").unwrap()
    }

    #[test]
    fn one_shard_per_pair_with_every_row() {
        let table = table();
        let shards = partition(&table, None);
        let keys: Vec<_> = shards.iter().map(|s| s.key).collect();
        assert_eq!(
            keys,
            vec![
                PartitionKey::for_epoch(1, 1),
                PartitionKey::for_epoch(1, 2),
                PartitionKey::for_epoch(10, 1),
            ]
        );
        for shard in &shards {
            assert_eq!(shard.len(), table.len());
        }
        assert_eq!(shards[2].rows[1].cluster, None);
    }

    #[test]
    fn allow_list_filters_and_skips_unknown_pairs() {
        let table = table();
        let wanted = [DepthEpoch::new(1, 2), DepthEpoch::new(4, 4)];
        let shards = partition(&table, Some(&wanted));
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].key, PartitionKey::for_epoch(1, 2));
    }

    #[test]
    fn clusters_ascend_and_keep_row_order() {
        let shards = partition(&table(), None);
        let clusters = cluster(&shards[0]);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].key, PartitionKey::for_cluster(1, 1, 0));
        let hashes: Vec<_> = clusters[0]
            .rows
            .iter()
            .map(|r| r.transaction.hash.as_str())
            .collect();
        assert_eq!(hashes, ["H1", "H3"]);
        assert_eq!(clusters[1].key, PartitionKey::for_cluster(1, 1, 1));
        assert_eq!(clusters[1].len(), 1);
    }

    #[test]
    fn unassigned_rows_are_dropped() {
        let shards = partition(&table(), None);
        let clusters = cluster(&shards[2]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key, PartitionKey::for_cluster(10, 1, 5));
        assert_eq!(clusters[0].len(), 2);
    }
}
