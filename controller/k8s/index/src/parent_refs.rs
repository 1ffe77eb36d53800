use crate::rejection::{Reason, Rejection, NO_GATEWAY_LISTENERS, NO_PARENT_REFS};
use gateway_sync_controller_core::ResourceId;
use gateway_sync_controller_k8s_api::{
    gateway::{Gateway, HttpRoute, Listener},
    ResourceExt,
};

/// A route bound to one listener of one of its parent gateways.
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment<'g> {
    pub gateway: ResourceId,
    pub listener: &'g Listener,
}

/// Resolves the listeners a route attaches to among the candidate `gateways`.
///
/// References that name no candidate contribute nothing. The route is rejected only when no
/// reference resolves to any listener: listener selection failures take precedence over
/// gateways that no reference names. Among listener failures, the first parent reference to fail
/// is reported.
pub(crate) fn resolve<'g>(
    route: &HttpRoute,
    gateways: &[&'g Gateway],
) -> Result<Vec<Attachment<'g>>, Rejection> {
    let route_ns = route.namespace().unwrap_or_default();
    let ids = gateways
        .iter()
        .map(|gw| ResourceId::new(gw.namespace().unwrap_or_default(), gw.name_any()))
        .collect::<Vec<_>>();

    let mut attachments = Vec::<Attachment<'g>>::new();
    let mut listener_failure = None;
    let mut matched = vec![false; gateways.len()];

    for parent in route.parent_refs().filter(|p| p.targets_gateway()) {
        let namespace = parent.namespace.as_deref().unwrap_or(&route_ns);
        let Some(i) = ids
            .iter()
            .position(|id| id.namespace == namespace && id.name == parent.name)
        else {
            continue;
        };
        matched[i] = true;
        let id = &ids[i];
        let listeners = &gateways[i].spec.listeners;

        let selected = match parent.section_name.as_deref() {
            Some(section) => match listeners.iter().find(|l| l.name == section) {
                Some(listener) => vec![listener],
                None => {
                    listener_failure.get_or_insert_with(|| Reason::ListenerNotFound {
                        listener: section.to_string(),
                        gateway: id.clone(),
                    });
                    continue;
                }
            },
            None if listeners.is_empty() => {
                listener_failure.get_or_insert_with(|| Reason::NoListeners(id.clone()));
                continue;
            }
            None => listeners.iter().collect(),
        };
        for listener in selected {
            let attachment = Attachment {
                gateway: id.clone(),
                listener,
            };
            if !attachments.contains(&attachment) {
                attachments.push(attachment);
            }
        }
    }

    if !attachments.is_empty() {
        return Ok(attachments);
    }
    if let Some(reason) = listener_failure {
        return Err(Rejection::new(NO_GATEWAY_LISTENERS, reason));
    }
    let reason = match matched.iter().position(|m| !m) {
        Some(i) => Reason::NoMatchingParentRef(ids[i].clone()),
        None => Reason::NoGateways(ResourceId::new(route_ns, route.name_any())),
    };
    Err(Rejection::new(NO_PARENT_REFS, reason))
}
