//! Translates accepted HTTPRoutes into data plane entities.
//!
//! Every rule becomes an upstream whose targets are the rule's backends, fronted by a service of
//! the same name. Every match of the rule becomes a route on that service; a rule without
//! matches gets a single catch-all route. Entity names are derived from the route's namespace,
//! name and the positions of the rule and match so they are stable across reconciliations.

use gateway_sync_controller_core::{
    dataplane::{Config, Route, Service, Target, Upstream},
    FeatureFlags,
};
use gateway_sync_controller_k8s_api::{
    gateway::{
        HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, PathMatchType, ValueMatchType,
        HTTP_ROUTE_KIND,
    },
    ResourceExt,
};

const SERVICE_PORT: u16 = 80;

/// Marks every entity this controller creates so that operators can filter them on the data
/// plane.
pub const MANAGED_BY_TAG: &str = "managed-by-gateway-sync-controller";
const DEFAULT_BACKEND_PORT: u16 = 80;
const DEFAULT_BACKEND_WEIGHT: u16 = 1;

/// The entities a single HTTPRoute translates to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entities {
    pub services: Vec<Service>,
    pub upstreams: Vec<Upstream>,
}

/// Builds the complete configuration for a set of accepted routes.
pub fn config<'r>(
    routes: impl IntoIterator<Item = &'r HttpRoute>,
    features: &FeatureFlags,
) -> Config {
    let mut services = Vec::new();
    let mut upstreams = Vec::new();
    for route in routes {
        let entities = http_route(route, features);
        services.extend(entities.services);
        upstreams.extend(entities.upstreams);
    }
    Config::new(services, upstreams)
}

/// The data plane routes a single HTTPRoute translates to.
pub fn routes(route: &HttpRoute, features: &FeatureFlags) -> Vec<Route> {
    http_route(route, features)
        .services
        .into_iter()
        .flat_map(|svc| svc.routes)
        .collect()
}

pub fn http_route(route: &HttpRoute, features: &FeatureFlags) -> Entities {
    let namespace = route.namespace().unwrap_or_default();
    let name = route.name_any();
    let tags = vec![
        MANAGED_BY_TAG.to_string(),
        format!("k8s-namespace:{namespace}"),
        format!("k8s-name:{name}"),
        format!("k8s-kind:{HTTP_ROUTE_KIND}"),
    ];
    let hosts = route.spec.hostnames.as_deref().unwrap_or_default();

    let mut entities = Entities::default();
    for (rule_idx, rule) in route.rules().enumerate() {
        let base = format!("httproute.{namespace}.{name}.{rule_idx}");

        let catch_all = HttpRouteMatch::default();
        let mut matches = rule.matches().peekable();
        let matches = if matches.peek().is_none() {
            vec![&catch_all]
        } else {
            matches.collect()
        };
        let routes = matches
            .into_iter()
            .enumerate()
            .map(|(match_idx, m)| Route {
                name: format!("{base}.{match_idx}"),
                protocols: vec!["http".to_string(), "https".to_string()],
                preserve_host: true,
                tags: tags.clone(),
                ..translate_match(m, hosts, features)
            })
            .collect();

        entities.upstreams.push(Upstream {
            name: base.clone(),
            targets: targets(rule, &namespace),
            tags: tags.clone(),
        });
        entities.services.push(Service {
            name: base.clone(),
            host: base,
            port: SERVICE_PORT,
            protocol: "http".to_string(),
            routes,
            tags: tags.clone(),
        });
    }
    entities
}

fn targets(rule: &HttpRouteRule, route_ns: &str) -> Vec<Target> {
    rule.backend_refs()
        .map(|backend| Target {
            target: format!(
                "{}.{}.svc:{}",
                backend.name,
                backend.namespace.as_deref().unwrap_or(route_ns),
                backend.port.unwrap_or(DEFAULT_BACKEND_PORT),
            ),
            weight: backend.weight.unwrap_or(DEFAULT_BACKEND_WEIGHT),
        })
        .collect()
}

/// Produces the matching fields of a route; naming and tagging are left to the caller.
fn translate_match(m: &HttpRouteMatch, hosts: &[String], features: &FeatureFlags) -> Route {
    if features.expression_routes {
        return Route {
            expression: Some(expression(m, hosts)),
            ..Default::default()
        };
    }

    let mut route = Route {
        hosts: hosts.to_vec(),
        paths: vec![path(m.path.as_ref())],
        methods: m.method.iter().cloned().collect(),
        ..Default::default()
    };
    for header in m.headers.iter().flatten() {
        let value = match header.r#type.unwrap_or_default() {
            ValueMatchType::Exact => header.value.clone(),
            ValueMatchType::RegularExpression => format!("~*{}", header.value),
        };
        route
            .headers
            .entry(header.name.clone())
            .or_default()
            .push(value);
    }
    route
}

/// Paths prefixed with `~` are regular expressions to the traditional router.
fn path(path: Option<&HttpPathMatch>) -> String {
    let value = path.and_then(|p| p.value.as_deref()).unwrap_or("/");
    match path.and_then(|p| p.r#type).unwrap_or_default() {
        PathMatchType::Exact => format!("~{value}$"),
        PathMatchType::PathPrefix => value.to_string(),
        PathMatchType::RegularExpression => format!("~{value}"),
    }
}

fn expression(m: &HttpRouteMatch, hosts: &[String]) -> String {
    let mut predicates = Vec::new();

    if !hosts.is_empty() {
        let hosts = hosts
            .iter()
            .map(|host| match host.strip_prefix('*') {
                Some(suffix) => format!("http.host =^ {}", quote(suffix)),
                None => format!("http.host == {}", quote(host)),
            })
            .collect::<Vec<_>>();
        predicates.push(any(hosts));
    }

    let value = m.path.as_ref().and_then(|p| p.value.as_deref()).unwrap_or("/");
    let op = match m.path.as_ref().and_then(|p| p.r#type).unwrap_or_default() {
        PathMatchType::Exact => "==",
        PathMatchType::PathPrefix => "^=",
        PathMatchType::RegularExpression => "~",
    };
    predicates.push(format!("http.path {op} {}", quote(value)));

    if let Some(method) = &m.method {
        predicates.push(format!("http.method == {}", quote(method)));
    }

    for header in m.headers.iter().flatten() {
        let field = format!(
            "http.headers.{}",
            header.name.to_ascii_lowercase().replace('-', "_")
        );
        predicates.push(value_predicate(&field, header.r#type, &header.value));
    }

    for param in m.query_params.iter().flatten() {
        let field = format!("http.queries.{}", param.name);
        predicates.push(value_predicate(&field, param.r#type, &param.value));
    }

    predicates.join(" && ")
}

fn value_predicate(field: &str, match_type: Option<ValueMatchType>, value: &str) -> String {
    let op = match match_type.unwrap_or_default() {
        ValueMatchType::Exact => "==",
        ValueMatchType::RegularExpression => "~",
    };
    format!("{field} {op} {}", quote(value))
}

fn any(mut predicates: Vec<String>) -> String {
    if predicates.len() == 1 {
        return predicates.remove(0);
    }
    format!("({})", predicates.join(" || "))
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mk_route(spec: serde_json::Value) -> HttpRoute {
        let spec = serde_json::from_value(spec).expect("spec must deserialize");
        let mut route = HttpRoute::new("web", spec);
        route.metadata.namespace = Some("apps".to_string());
        route
    }

    fn tags() -> Vec<String> {
        vec![
            "managed-by-gateway-sync-controller".to_string(),
            "k8s-namespace:apps".to_string(),
            "k8s-name:web".to_string(),
            "k8s-kind:HTTPRoute".to_string(),
        ]
    }

    #[test]
    fn traditional_router() {
        let route = mk_route(serde_json::json!({
            "parentRefs": [{ "name": "gw" }],
            "hostnames": ["example.com"],
            "rules": [{
                "matches": [
                    { "path": { "type": "Exact", "value": "/login" }, "method": "POST" },
                    {
                        "path": { "type": "PathPrefix", "value": "/api" },
                        "headers": [{ "name": "x-version", "value": "2" }],
                    },
                ],
                "backendRefs": [
                    { "name": "api", "port": 8080, "weight": 3 },
                    { "name": "legacy", "namespace": "old", "port": 80 },
                ],
            }],
        }));

        let entities = http_route(&route, &FeatureFlags::default());

        assert_eq!(
            entities.upstreams,
            vec![Upstream {
                name: "httproute.apps.web.0".to_string(),
                targets: vec![
                    Target {
                        target: "api.apps.svc:8080".to_string(),
                        weight: 3,
                    },
                    Target {
                        target: "legacy.old.svc:80".to_string(),
                        weight: 1,
                    },
                ],
                tags: tags(),
            }]
        );

        let [svc] = entities.services.as_slice() else {
            panic!("expected a single service: {:?}", entities.services);
        };
        assert_eq!(svc.host, "httproute.apps.web.0");
        assert_eq!(svc.routes.len(), 2);
        assert_eq!(svc.tags, tags());

        let login = &svc.routes[0];
        assert_eq!(login.name, "httproute.apps.web.0.0");
        assert_eq!(login.hosts, vec!["example.com".to_string()]);
        assert_eq!(login.paths, vec!["~/login$".to_string()]);
        assert_eq!(login.methods, vec!["POST".to_string()]);
        assert_eq!(login.expression, None);
        assert_eq!(login.tags, tags());

        let api = &svc.routes[1];
        assert_eq!(api.name, "httproute.apps.web.0.1");
        assert_eq!(api.paths, vec!["/api".to_string()]);
        assert_eq!(api.headers.get("x-version"), Some(&vec!["2".to_string()]));
    }

    #[test]
    fn expression_router() {
        let route = mk_route(serde_json::json!({
            "hostnames": ["example.com", "*.example.org"],
            "rules": [{
                "matches": [{
                    "path": { "type": "RegularExpression", "value": "^/v[0-9]+" },
                    "headers": [{ "name": "X-Env", "type": "RegularExpression", "value": "prod.*" }],
                    "queryParams": [{ "name": "user", "value": "a\"b" }],
                }],
                "backendRefs": [{ "name": "api", "port": 80 }],
            }],
        }));

        let routes = routes(
            &route,
            &FeatureFlags {
                expression_routes: true,
            },
        );
        let [route] = routes.as_slice() else {
            panic!("expected a single route: {routes:?}");
        };
        assert!(route.hosts.is_empty());
        assert!(route.paths.is_empty());
        assert_eq!(
            route.expression.as_deref(),
            Some(
                r#"(http.host == "example.com" || http.host =^ ".example.org") && http.path ~ "^/v[0-9]+" && http.headers.x_env ~ "prod.*" && http.queries.user == "a\"b""#
            )
        );
    }

    #[test]
    fn rule_without_matches_is_catch_all() {
        let route = mk_route(serde_json::json!({
            "rules": [{ "backendRefs": [{ "name": "api" }] }],
        }));

        let traditional = routes(&route, &FeatureFlags::default());
        assert_eq!(traditional.len(), 1);
        assert_eq!(traditional[0].paths, vec!["/".to_string()]);

        let expressions = routes(
            &route,
            &FeatureFlags {
                expression_routes: true,
            },
        );
        assert_eq!(
            expressions[0].expression.as_deref(),
            Some(r#"http.path ^= "/""#)
        );
    }

    #[test]
    fn config_is_canonical() {
        let a = mk_route(serde_json::json!({ "rules": [{}, {}] }));
        let mut b = mk_route(serde_json::json!({ "rules": [{}] }));
        b.metadata.name = Some("api".to_string());

        let config = config([&a, &b], &FeatureFlags::default());
        let names = config
            .services
            .iter()
            .map(|svc| svc.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "httproute.apps.api.0",
                "httproute.apps.web.0",
                "httproute.apps.web.1",
            ]
        );
        assert_eq!(config, super::config([&b, &a], &FeatureFlags::default()));
    }
}
