//! The declarative entity model pushed to the data plane's admin API.
//!
//! Only the subset of the data plane's schema produced by route translation is modeled here.
//! Collections are kept in canonical order (see [`Config::canonicalize`]) so that serializing
//! two equivalent configurations yields identical bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: &str = "3.0";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_format_version")]
    pub format_version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,

    /// Set instead of the traditional matchers when the expression router is in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    #[serde(default)]
    pub strip_path: bool,

    #[serde(default)]
    pub preserve_host: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub target: String,
    pub weight: u16,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            services: Vec::new(),
            upstreams: Vec::new(),
        }
    }
}

impl Config {
    pub fn new(services: Vec<Service>, upstreams: Vec<Upstream>) -> Self {
        let mut config = Self {
            services,
            upstreams,
            ..Default::default()
        };
        config.canonicalize();
        config
    }

    /// Sorts every collection so that equivalent configurations serialize identically.
    pub fn canonicalize(&mut self) {
        self.services.sort_by(|a, b| a.name.cmp(&b.name));
        for svc in self.services.iter_mut() {
            svc.routes.sort_by(|a, b| a.name.cmp(&b.name));
        }
        self.upstreams.sort_by(|a, b| a.name.cmp(&b.name));
        for upstream in self.upstreams.iter_mut() {
            upstream.targets.sort_by(|a, b| a.target.cmp(&b.target));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.upstreams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, routes: &[&str]) -> Service {
        Service {
            name: name.to_string(),
            host: format!("{name}.upstream"),
            port: 80,
            protocol: "http".to_string(),
            routes: routes
                .iter()
                .map(|r| Route {
                    name: r.to_string(),
                    ..Default::default()
                })
                .collect(),
            tags: vec![],
        }
    }

    #[test]
    fn canonical_order_ignores_input_order() {
        let a = Config::new(vec![service("b", &["b.1", "b.0"]), service("a", &[])], vec![]);
        let b = Config::new(vec![service("a", &[]), service("b", &["b.0", "b.1"])], vec![]);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn serializes_format_version() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "_format_version": "3.0" }));
    }
}
