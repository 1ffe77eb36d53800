//! Converges the desired data plane configuration onto one or more admin API endpoints.
//!
//! Each data plane target is owned by a single [`Syncer`] task, which serializes pushes to that
//! target. Desired configurations are delivered through a `watch` channel, so a burst of
//! changes results in a single push of the latest value.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
pub mod client;
mod fingerprint;
pub mod metrics;
mod syncer;
mod workspace;

pub use self::{
    backoff::Backoff,
    client::{AdminApi, AdminClient, AdminError, ClientConfig, RootInfo, Status},
    fingerprint::{Fingerprint, EMPTY_CONFIGURATION_HASH},
    metrics::SyncMetrics,
    syncer::{SyncError, SyncOutcome, SyncResult, Syncer},
    workspace::WorkspaceManager,
};
