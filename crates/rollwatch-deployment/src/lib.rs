//! rollwatch-deployment: drives in-progress deployments to completion.
//!
//! The [`DeploymentWorker`] runs one reconciliation pass per call: it loads
//! the environment's in-progress deployment, asks the cluster which of the
//! deployment's tasks are still pending, computes the next deployment record,
//! and writes it back only if the deployment is still the environment's
//! in-progress one.
//!
//! # Pass
//!
//! ```text
//! reconcile_in_progress(env)
//!   ├── DeploymentStore::get_in_progress_deployment   (none → no-op)
//!   ├── EnvironmentStore::get_environment             (none → no-op)
//!   ├── ClusterFacade::list_tasks + describe_tasks    (batches of 100)
//!   ├── classify: completed iff tasks non-empty and none PENDING
//!   ├── re-read in-progress deployment                (changed → abandon)
//!   └── EnvironmentStore::update_deployment
//! ```
//!
//! No state is kept between passes; the monitor's cadence provides retries.

pub mod error;
pub mod progress;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
pub use progress::is_deployment_completed;
pub use worker::DeploymentWorker;
