//! Holds the watched Gateways, HTTPRoutes and Namespace labels and publishes the data plane
//! configuration for the routes that pass validation.
//!
//! Every change re-evaluates all routes, since a Gateway or Namespace change may accept or
//! reject routes that did not change themselves. The configuration is only published when it
//! differs from the last published value, so subscribers are not woken for no-op updates.
//!
//! Nothing is published until the Gateway, HTTPRoute and Namespace watches have each delivered
//! their initial listing. Until then the configuration is incomplete and pushing it would drop
//! routes the data plane already serves.

use crate::{
    rejection::Rejection,
    translate,
    validate::{check_http_route, NamespaceLabels},
};
use ahash::AHashMap as HashMap;
use gateway_sync_controller_core::{dataplane::Config, FeatureFlags, ResourceId};
use gateway_sync_controller_k8s_api::{
    gateway::{Gateway, HttpRoute},
    Labels, Namespace, ResourceExt,
};
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::watch;

#[derive(Debug)]
pub struct Index {
    features: FeatureFlags,

    /// When set, Gateways of other classes are ignored.
    gateway_class_name: Option<String>,

    gateways: BTreeMap<ResourceId, Gateway>,
    routes: BTreeMap<ResourceId, HttpRoute>,
    namespaces: NamespaceLabels,
    rejections: HashMap<ResourceId, Rejection>,
    synced: Synced,

    config: watch::Sender<Option<Config>>,
}

/// Tracks which watches have delivered their initial listing.
#[derive(Debug, Default)]
struct Synced {
    gateways: bool,
    routes: bool,
    namespaces: bool,
}

pub type SharedIndex = Arc<RwLock<Index>>;

// === impl Index ===

impl Index {
    pub fn new(features: FeatureFlags, gateway_class_name: Option<String>) -> Self {
        let (config, _) = watch::channel(None);
        Self {
            features,
            gateway_class_name,
            gateways: BTreeMap::new(),
            routes: BTreeMap::new(),
            namespaces: NamespaceLabels::default(),
            rejections: HashMap::default(),
            synced: Synced::default(),
            config,
        }
    }

    pub fn shared(features: FeatureFlags, gateway_class_name: Option<String>) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(features, gateway_class_name)))
    }

    /// Observes the configuration built from the accepted routes.
    ///
    /// The value is `None` until every watch has completed its initial listing.
    pub fn config_rx(&self) -> watch::Receiver<Option<Config>> {
        self.config.subscribe()
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }

    pub fn namespaces(&self) -> &NamespaceLabels {
        &self.namespaces
    }

    /// Returns the reason the given route was last rejected, if it was.
    pub fn rejection(&self, route: &ResourceId) -> Option<&Rejection> {
        self.rejections.get(route)
    }

    pub fn is_accepted(&self, route: &ResourceId) -> bool {
        self.routes.contains_key(route) && !self.rejections.contains_key(route)
    }

    /// Returns the known Gateways that the route's parent references name, in a stable order.
    pub fn candidate_gateways(&self, route: &HttpRoute) -> Vec<&Gateway> {
        let route_ns = route.namespace().unwrap_or_default();
        let ids = route
            .parent_refs()
            .filter(|parent| parent.targets_gateway())
            .map(|parent| {
                let namespace = parent.namespace.as_deref().unwrap_or(&route_ns);
                ResourceId::new(namespace, parent.name.as_str())
            })
            .collect::<BTreeSet<_>>();
        ids.iter().filter_map(|id| self.gateways.get(id)).collect()
    }

    fn is_managed(&self, gateway: &Gateway) -> bool {
        self.gateway_class_name
            .as_deref()
            .map_or(true, |class| gateway.spec.gateway_class_name == class)
    }

    fn insert_gateway(&mut self, gateway: Gateway) {
        let id = resource_id(&gateway);
        if self.is_managed(&gateway) {
            self.gateways.insert(id, gateway);
        } else {
            tracing::debug!(
                gateway = %id,
                class = %gateway.spec.gateway_class_name,
                "Ignoring gateway"
            );
            self.gateways.remove(&id);
        }
    }

    fn reindex(&mut self) {
        let mut rejections = HashMap::default();
        let mut accepted = Vec::with_capacity(self.routes.len());

        for (id, route) in self.routes.iter() {
            let gateways = self.candidate_gateways(route);
            match check_http_route(route, &gateways, &self.namespaces, &self.features) {
                Ok(()) => accepted.push(route),
                Err(rejection) => {
                    if self.rejections.get(id) != Some(&rejection) {
                        tracing::info!(route = %id, %rejection, "HTTPRoute rejected");
                    }
                    rejections.insert(id.clone(), rejection);
                }
            }
        }

        let accepted_routes = accepted.len();
        let config = translate::config(accepted, &self.features);
        self.rejections = rejections;

        if !self.synced.is_complete() {
            tracing::trace!(synced = ?self.synced, "Waiting for initial listings");
            return;
        }

        let changed = self.config.send_if_modified(|current| {
            if current.as_ref() == Some(&config) {
                return false;
            }
            *current = Some(config);
            true
        });
        if changed {
            tracing::debug!(
                routes = accepted_routes,
                rejected = self.rejections.len(),
                "Updated configuration"
            );
        }
    }
}

impl Synced {
    fn is_complete(&self) -> bool {
        self.gateways && self.routes && self.namespaces
    }
}

fn resource_id(resource: &impl ResourceExt) -> ResourceId {
    ResourceId::new(resource.namespace().unwrap_or_default(), resource.name_any())
}

impl kubert::index::IndexNamespacedResource<Gateway> for Index {
    fn apply(&mut self, gateway: Gateway) {
        self.insert_gateway(gateway);
        self.reindex();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.gateways.remove(&ResourceId::new(namespace, name)).is_some() {
            self.reindex();
        }
    }

    fn reset(&mut self, gateways: Vec<Gateway>, removed: NamespacedRemoved) {
        for gateway in gateways {
            self.insert_gateway(gateway);
        }
        for (namespace, names) in removed {
            for name in names {
                self.gateways.remove(&ResourceId::new(namespace.clone(), name));
            }
        }
        self.synced.gateways = true;
        self.reindex();
    }
}

impl kubert::index::IndexNamespacedResource<HttpRoute> for Index {
    fn apply(&mut self, route: HttpRoute) {
        self.routes.insert(resource_id(&route), route);
        self.reindex();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.routes.remove(&ResourceId::new(namespace, name)).is_some() {
            self.reindex();
        }
    }

    fn reset(&mut self, routes: Vec<HttpRoute>, removed: NamespacedRemoved) {
        for route in routes {
            self.routes.insert(resource_id(&route), route);
        }
        for (namespace, names) in removed {
            for name in names {
                self.routes.remove(&ResourceId::new(namespace.clone(), name));
            }
        }
        self.synced.routes = true;
        self.reindex();
    }
}

impl kubert::index::IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, namespace: Namespace) {
        let name = namespace.name_any();
        let labels = Labels::from(namespace.labels().clone());
        if self.namespaces.get(&name) != Some(&labels) {
            self.namespaces.insert(name, labels);
            self.reindex();
        }
    }

    fn delete(&mut self, name: String) {
        if self.namespaces.remove(&name).is_some() {
            self.reindex();
        }
    }

    fn reset(&mut self, namespaces: Vec<Namespace>, removed: ClusterRemoved) {
        for namespace in namespaces {
            let labels = Labels::from(namespace.labels().clone());
            self.namespaces.insert(namespace.name_any(), labels);
        }
        for name in removed {
            self.namespaces.remove(&name);
        }
        self.synced.namespaces = true;
        self.reindex();
    }
}
