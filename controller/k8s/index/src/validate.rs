use crate::{
    attachment, backend_refs, parent_refs,
    rejection::{
        Reason, Rejection, GATEWAY_LISTENERS_INVALID, SCHEMA_INVALID, SCHEMA_UNAVAILABLE,
    },
    translate,
};
use gateway_sync_controller_core::{EntityValidator, FeatureFlags, Verdict};
use gateway_sync_controller_k8s_api::{
    gateway::{Gateway, HttpRoute},
    Labels, ResourceExt,
};

/// Labels of the namespaces observed in the cluster, by namespace name.
pub type NamespaceLabels = ahash::AHashMap<String, Labels>;

/// Runs the checks that need nothing but the provided snapshots.
///
/// In order: the route must attach to at least one listener, every attached listener must admit
/// it, its matchers must be supported by the data plane's router, and its backends must be
/// Services. The first failure is returned.
pub fn check_http_route(
    route: &HttpRoute,
    gateways: &[&Gateway],
    namespaces: &NamespaceLabels,
    features: &FeatureFlags,
) -> Result<(), Rejection> {
    let route_ns = route.namespace().unwrap_or_default();

    let attachments = parent_refs::resolve(route, gateways)?;
    for attachment in &attachments {
        attachment::check(attachment, &route_ns, namespaces)
            .map_err(|reason| Rejection::new(GATEWAY_LISTENERS_INVALID, reason))?;
    }

    check_matchers(route, features).map_err(Rejection::spec)?;
    backend_refs::check(route).map_err(Rejection::spec)
}

/// Runs [`check_http_route`] and then asks the data plane to validate each translated route.
pub async fn validate_http_route<V>(
    validator: &V,
    features: &FeatureFlags,
    namespaces: &NamespaceLabels,
    route: &HttpRoute,
    gateways: &[&Gateway],
) -> Result<(), Rejection>
where
    V: EntityValidator + ?Sized,
{
    check_http_route(route, gateways, namespaces, features)?;

    for entity in translate::routes(route, features) {
        match validator.validate_route(&entity).await {
            Ok(Verdict::Valid) => {}
            Ok(Verdict::Invalid(message)) => {
                return Err(Rejection::new(SCHEMA_INVALID, Reason::DataPlane(message)));
            }
            Err(error) => {
                return Err(Rejection::new(
                    SCHEMA_UNAVAILABLE,
                    Reason::ValidatorUnavailable(error.to_string()),
                ));
            }
        }
    }

    Ok(())
}

fn check_matchers(route: &HttpRoute, features: &FeatureFlags) -> Result<(), Reason> {
    if features.expression_routes {
        return Ok(());
    }
    let matches_query_params = route
        .rules()
        .flat_map(|rule| rule.matches())
        .any(|m| m.query_params.as_ref().is_some_and(|params| !params.is_empty()));
    if matches_query_params {
        return Err(Reason::QueryParamsRequireExpressions);
    }
    Ok(())
}
