#![forbid(unsafe_code)]

//! # cluster-strata
//!
//! Bottom-up report generation over clustered blockchain transactions.
//!
//! The input is one transaction table carrying a cluster assignment column
//! per `(depth, epoch)` pair. The pipeline partitions it by `(depth, epoch)`,
//! splits each partition by cluster, has a text generator summarize every
//! cluster, and then reduces those summaries one level at a time: clusters
//! within an epoch, epochs within a depth, and finally all depths.
//!
//! Every intermediate result is a file in an [`ArtifactStore`] addressed by a
//! typed [`PartitionKey`], so any stage can be re-run on its own from the
//! artifacts the stage below left behind.

pub mod aggregate;
pub mod budget;
pub mod config;
pub mod error;
pub mod findings;
pub mod gateway;
pub mod key;
pub mod partition;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod report;
pub mod store;
pub mod summarize;

pub use config::{RunConfig, StageFlags};
pub use error::{ErrorClass, PipelineError};
pub use gateway::{GeneratorConfig, ProviderError, TextGenerator};
pub use key::{classify_file_name, ArtifactKind, DepthEpoch, PartitionKey};
pub use pipeline::Pipeline;
pub use report::{RunManifest, Stage, StageReport, StageStatus, UnitFailure};
pub use store::ArtifactStore;
