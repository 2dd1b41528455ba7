//! rollwatch-state: embedded state store for rollwatch.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for environments, their deployments, and the cluster task records
//! the store-backed cluster facade reads.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! An environment record embeds every deployment ever made for it, so a
//! deployment update is a single-key write. Task records use the composite
//! key `{cluster}/{arn}`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. The reconciler and monitor only see
//! it through the [`EnvironmentStore`] and [`DeploymentStore`] traits.

pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{StateError, StateResult, ValidationError};
pub use store::StateStore;
pub use traits::{DeploymentStore, EnvironmentStore};
pub use types::*;
