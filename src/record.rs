//! Transaction records, the input table and CSV shards.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::key::{DepthEpoch, PartitionKey};

/// Columns every shard carries, in output order.
pub const BASE_COLUMNS: [&str; 9] = [
    "layer",
    "BlockNumber",
    "TimeStamp",
    "Hash",
    "From",
    "To",
    "Value",
    "TokenName",
    "TokenSymbol",
];

/// Canonical name of the cluster-id column inside a shard.
pub const ASSIGNMENT_COLUMN: &str = "Cluster_Value";

const ASSIGNMENT_HEADER_PREFIX: &str = "Cluster_Depth_";

/// One transaction. `Value` is kept verbatim so decimals survive untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub layer: String,
    #[serde(rename = "BlockNumber")]
    pub block_number: u64,
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "TokenName")]
    pub token_name: String,
    #[serde(rename = "TokenSymbol")]
    pub token_symbol: String,
}

impl Transaction {
    /// Field values in [`BASE_COLUMNS`] order.
    pub fn fields(&self) -> [String; 9] {
        [
            self.layer.clone(),
            self.block_number.to_string(),
            self.timestamp.clone(),
            self.hash.clone(),
            self.from.clone(),
            self.to.clone(),
            self.value.clone(),
            self.token_name.clone(),
            self.token_symbol.clone(),
        ]
    }
}

/// Parse a cluster-id cell. Blank and NaN cells are "no assignment".
///
/// Whole floats such as `3.0` are accepted because dataframe tools write
/// integer columns that way once a single cell is missing.
pub fn parse_cluster_id(raw: &str) -> Result<Option<i64>, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(Some(v));
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Ok(Some(v as i64))
        }
        _ => Err(format!("cluster id {raw:?} is not an integer")),
    }
}

fn missing_base_columns(headers: &csv::StringRecord) -> Vec<&'static str> {
    BASE_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect()
}

/// Locate the `Cluster_Depth_<d>_Epoch_<e>` columns.
///
/// A pair named twice is an error. Headers with the assignment prefix that do
/// not parse (e.g. `Cluster_Depth_01_Epoch_1`) are returned separately.
fn assignment_columns(
    headers: &csv::StringRecord,
    source: &Path,
) -> Result<(Vec<(usize, DepthEpoch)>, Vec<String>), PipelineError> {
    let mut columns: Vec<(usize, DepthEpoch)> = Vec::new();
    let mut skipped = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        match DepthEpoch::from_column_name(name) {
            Some(pair) => {
                if columns.iter().any(|(_, seen)| *seen == pair) {
                    return Err(PipelineError::invalid(
                        source,
                        format!("duplicate assignment column {name}"),
                    ));
                }
                columns.push((idx, pair));
            }
            None if name.starts_with(ASSIGNMENT_HEADER_PREFIX) => {
                warn!(column = name, "ignoring malformed assignment column");
                skipped.push(name.to_string());
            }
            None => {}
        }
    }
    Ok((columns, skipped))
}

// =============================================================================
// Input table
// =============================================================================

/// The full input: transactions plus one assignment vector per `(depth, epoch)` column.
#[derive(Debug, Clone)]
pub struct TransactionTable {
    source: PathBuf,
    transactions: Vec<Transaction>,
    assignments: BTreeMap<DepthEpoch, Vec<Option<i64>>>,
    skipped_columns: Vec<String>,
}

impl TransactionTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PipelineError::MissingInput(format!("input table {} not found", path.display()))
            }
            _ => PipelineError::io(path, e),
        })?;
        Self::from_reader(file, path)
    }

    /// Read a table from any CSV source; `source` is used in error messages.
    pub fn from_reader<R: Read>(reader: R, source: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let source = source.as_ref().to_path_buf();
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let missing = missing_base_columns(&headers);
        if !missing.is_empty() {
            return Err(PipelineError::invalid(
                &source,
                format!("missing base columns: {}", missing.join(", ")),
            ));
        }

        let (columns, skipped_columns) = assignment_columns(&headers, &source)?;

        let mut transactions = Vec::new();
        let mut assignments: BTreeMap<DepthEpoch, Vec<Option<i64>>> =
            columns.iter().map(|(_, pair)| (*pair, Vec::new())).collect();

        for (row_idx, record) in rdr.records().enumerate() {
            let record = record?;
            let tx: Transaction = record.deserialize(Some(&headers))?;
            for (col_idx, pair) in &columns {
                let cell = record.get(*col_idx).unwrap_or("");
                let id = parse_cluster_id(cell).map_err(|message| {
                    PipelineError::invalid(
                        &source,
                        format!("row {}, column {}: {message}", row_idx + 2, pair.column_name()),
                    )
                })?;
                if let Some(values) = assignments.get_mut(pair) {
                    values.push(id);
                }
            }
            transactions.push(tx);
        }

        if let Some((pair, values)) = assignments
            .iter()
            .find(|(_, values)| values.len() != transactions.len())
        {
            return Err(PipelineError::invalid(
                &source,
                format!(
                    "column {} has {} ids for {} rows",
                    pair.column_name(),
                    values.len(),
                    transactions.len()
                ),
            ));
        }

        Ok(Self {
            source,
            transactions,
            assignments,
            skipped_columns,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Assignment columns present, ascending by `(depth, epoch)` as integers.
    pub fn pairs(&self) -> Vec<DepthEpoch> {
        self.assignments.keys().copied().collect()
    }

    pub fn assignments(&self, pair: DepthEpoch) -> Option<&[Option<i64>]> {
        self.assignments.get(&pair).map(Vec::as_slice)
    }

    /// Headers that look like assignment columns but do not name a canonical pair.
    pub fn skipped_columns(&self) -> &[String] {
        &self.skipped_columns
    }
}

// =============================================================================
// Shards
// =============================================================================

/// A transaction together with its cluster id for the shard's `(depth, epoch)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRow {
    pub transaction: Transaction,
    pub cluster: Option<i64>,
}

/// Rows matching one partition key, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub key: PartitionKey,
    pub rows: Vec<ShardRow>,
}

impl Shard {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header row: base columns then [`ASSIGNMENT_COLUMN`].
    pub fn headers() -> Vec<&'static str> {
        let mut headers = BASE_COLUMNS.to_vec();
        headers.push(ASSIGNMENT_COLUMN);
        headers
    }

    /// Cells of one row in [`headers`](Self::headers) order.
    pub fn row_cells(row: &ShardRow) -> Vec<String> {
        let mut cells = row.transaction.fields().to_vec();
        cells.push(row.cluster.map(|c| c.to_string()).unwrap_or_default());
        cells
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, PipelineError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(Self::headers())?;
        for row in &self.rows {
            wtr.write_record(Self::row_cells(row))?;
        }
        wtr.into_inner()
            .map_err(|e| PipelineError::Csv(csv::Error::from(e.into_error())))
    }

    /// Read a shard written by [`to_csv`](Self::to_csv).
    ///
    /// A file without the assignment column is a `MissingInput` error.
    pub fn read(path: impl AsRef<Path>, key: PartitionKey) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path)?;
        let headers = rdr.headers()?.clone();

        let assignment_idx = headers
            .iter()
            .position(|h| h == ASSIGNMENT_COLUMN)
            .ok_or_else(|| {
                PipelineError::MissingInput(format!(
                    "{} has no {ASSIGNMENT_COLUMN} column",
                    path.display()
                ))
            })?;
        let missing = missing_base_columns(&headers);
        if !missing.is_empty() {
            return Err(PipelineError::invalid(
                path,
                format!("missing base columns: {}", missing.join(", ")),
            ));
        }

        let mut shard = Shard::new(key);
        for (row_idx, record) in rdr.records().enumerate() {
            let record = record?;
            let transaction: Transaction = record.deserialize(Some(&headers))?;
            let cluster = parse_cluster_id(record.get(assignment_idx).unwrap_or(""))
                .map_err(|message| {
                    PipelineError::invalid(path, format!("row {}: {message}", row_idx + 2))
                })?;
            shard.rows.push(ShardRow {
                transaction,
                cluster,
            });
        }
        Ok(shard)
    }
}
