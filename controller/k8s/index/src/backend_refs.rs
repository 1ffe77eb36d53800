use crate::rejection::Reason;
use gateway_sync_controller_k8s_api::gateway::HttpRoute;

const SERVICE_KIND: &str = "Service";

/// Checks that every backend of every rule is a core `Service`.
///
/// Backends are scanned in rule order and the first violation is reported. The group is checked
/// before the kind.
pub(crate) fn check(route: &HttpRoute) -> Result<(), Reason> {
    for backend in route.rules().flat_map(|rule| rule.backend_refs()) {
        if let Some(group) = backend.group.as_deref().filter(|g| !is_core_group(g)) {
            return Err(Reason::UnsupportedBackendGroup(group.to_string()));
        }
        if let Some(kind) = backend.kind.as_deref().filter(|k| *k != SERVICE_KIND) {
            return Err(Reason::UnsupportedBackendKind(kind.to_string()));
        }
    }
    Ok(())
}

fn is_core_group(group: &str) -> bool {
    group.is_empty() || group == "core"
}
