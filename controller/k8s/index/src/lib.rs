//! Binds Gateway API `HTTPRoute`s to the listeners of their parent `Gateway`s, validates them and
//! translates the accepted routes into the data plane's entity model.
//!
//! The validation chain is made of pure functions over snapshots of the watched resources so
//! that it may be called concurrently, e.g. by the admission webhook while the [`Index`] is
//! being updated. Only the final [`EntityValidator`](gateway_sync_controller_core::EntityValidator)
//! step reaches out to the data plane.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attachment;
mod backend_refs;
pub mod index;
mod parent_refs;
mod rejection;
pub mod translate;
mod validate;


pub use self::{
    index::{Index, SharedIndex},
    parent_refs::Attachment,
    rejection::{
        Reason, Rejection, GATEWAY_LISTENERS_INVALID, NO_GATEWAY_LISTENERS, NO_PARENT_REFS,
        SCHEMA_INVALID, SCHEMA_UNAVAILABLE, SPEC_INVALID,
    },
    validate::{check_http_route, validate_http_route, NamespaceLabels},
};
