#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dataplane;
pub mod duration;
mod features;
mod resource_id;
mod validate;

pub use self::{
    features::{FeatureFlags, FeatureGates, ParseGatesError, EXPRESSION_ROUTES_GATE},
    resource_id::ResourceId,
    validate::{EntityValidator, Verdict},
};
