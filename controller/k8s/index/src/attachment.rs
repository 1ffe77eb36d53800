use crate::{parent_refs::Attachment, rejection::Reason, validate::NamespaceLabels};
use gateway_sync_controller_k8s_api::gateway::{FromNamespaces, HttpRoute, GROUP};

/// Listener protocols that admit HTTPRoutes when a listener does not list its route kinds.
const HTTP_PROTOCOLS: [&str; 2] = ["HTTP", "HTTPS"];

/// Checks that an attached listener admits the route's kind and namespace.
pub(crate) fn check(
    attachment: &Attachment<'_>,
    route_ns: &str,
    namespaces: &NamespaceLabels,
) -> Result<(), Reason> {
    check_kind(attachment)?;
    check_namespace(attachment, route_ns, namespaces)
}

fn check_kind(Attachment { listener, .. }: &Attachment<'_>) -> Result<(), Reason> {
    let (group, kind) = HttpRoute::group_kind();
    let kinds = listener
        .allowed_routes
        .as_ref()
        .and_then(|allowed| allowed.kinds.as_deref())
        .unwrap_or_default();

    if kinds.is_empty() {
        if HTTP_PROTOCOLS.contains(&listener.protocol.as_str()) {
            return Ok(());
        }
        return Err(Reason::ProtocolNotSupported {
            listener: listener.name.clone(),
            protocol: listener.protocol.clone(),
        });
    }

    let supported = kinds
        .iter()
        .any(|k| k.kind == kind && k.group.as_deref().unwrap_or(GROUP) == group);
    if !supported {
        return Err(Reason::KindNotAllowed {
            kind,
            listener: listener.name.clone(),
        });
    }
    Ok(())
}

fn check_namespace(
    Attachment { gateway, listener }: &Attachment<'_>,
    route_ns: &str,
    namespaces: &NamespaceLabels,
) -> Result<(), Reason> {
    let policy = listener
        .allowed_routes
        .as_ref()
        .and_then(|allowed| allowed.namespaces.as_ref());

    let allowed = match policy.and_then(|p| p.from).unwrap_or_default() {
        FromNamespaces::All => true,
        FromNamespaces::Same => gateway.namespace == route_ns,
        // Namespaces whose labels have not been observed are never selected.
        FromNamespaces::Selector => {
            let selector = policy.and_then(|p| p.selector.as_ref());
            match (selector, namespaces.get(route_ns)) {
                (Some(selector), Some(labels)) => selector.matches(labels),
                _ => false,
            }
        }
    };

    if !allowed {
        return Err(Reason::NamespaceNotAllowed {
            namespace: route_ns.to_string(),
            listener: listener.name.clone(),
        });
    }
    Ok(())
}
