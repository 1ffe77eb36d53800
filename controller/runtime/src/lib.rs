#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use gateway_sync_controller_core as core;
pub use gateway_sync_controller_k8s_api as k8s;
pub use gateway_sync_controller_k8s_index as index;
pub use gateway_sync_controller_sync as sync;

mod admission;
mod args;

pub use self::{admission::Admission, args::Args};
