//! rollwatch-cluster: the facade over the cluster orchestration API.
//!
//! The reconciler only needs two calls from the orchestrator: list the tasks a
//! deployment started in a cluster, and describe those tasks to learn their
//! last-known status. [`ClusterFacade`] is that contract. It is object safe
//! (boxed futures) so callers hold it as `Arc<dyn ClusterFacade>` and tests
//! can inject fakes.
//!
//! [`StoreCluster`] implements the facade over the task records kept in the
//! rollwatch state store. Task launchers write those records; the daemon reads
//! them back through this facade.

pub mod error;
pub mod facade;
pub mod store_cluster;

pub use error::{ClusterError, ClusterResult};
pub use facade::{ClusterFacade, ClusterFuture, MAX_DESCRIBE_TASKS, TaskDescription};
pub use store_cluster::{MISSING_REASON, StoreCluster};
