use crate::dataplane::Route;
use anyhow::Result;

/// The data plane's judgement of a single translated entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

/// Validates one translated entity against the live data plane.
///
/// Implemented by the admin API client in production. An `Err` means the data plane could not
/// be asked, not that the entity was rejected.
#[async_trait::async_trait]
pub trait EntityValidator: Send + Sync {
    async fn validate_route(&self, route: &Route) -> Result<Verdict>;
}

#[async_trait::async_trait]
impl<V: EntityValidator + ?Sized> EntityValidator for std::sync::Arc<V> {
    async fn validate_route(&self, route: &Route) -> Result<Verdict> {
        (**self).validate_route(route).await
    }
}
