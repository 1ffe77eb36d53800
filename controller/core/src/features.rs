use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;

/// Enables translation to, and validation for, the data plane's expression router.
pub const EXPRESSION_ROUTES_GATE: &str = "ExpressionRoutes";

/// Feature gates as configured on the command line, e.g. `ExpressionRoutes=true`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureGates(BTreeMap<String, bool>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseGatesError {
    #[error("feature gate {0:?} must be formatted as key=bool")]
    Malformed(String),

    #[error("feature gate {key} has an invalid value {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Read-only capabilities passed explicitly into every validation and translation call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// The data plane routes with expressions, which is required for query parameter matching.
    pub expression_routes: bool,
}

// === impl FeatureGates ===

impl FeatureGates {
    pub fn enabled(&self, gate: &str) -> bool {
        self.0.get(gate).copied().unwrap_or(false)
    }
}

impl FromStr for FeatureGates {
    type Err = ParseGatesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ParseGatesError::Malformed(pair.to_string()))?;
            let enabled = value
                .trim()
                .parse::<bool>()
                .map_err(|_| ParseGatesError::InvalidValue {
                    key: key.trim().to_string(),
                    value: value.to_string(),
                })?;
            gates.insert(key.trim().to_string(), enabled);
        }
        Ok(Self(gates))
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for FeatureGates {
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// === impl FeatureFlags ===

impl FeatureFlags {
    /// Expression routing must be both requested and supported by the data plane's router.
    pub fn new(gates: &FeatureGates, expressions_router: bool) -> Self {
        Self {
            expression_routes: gates.enabled(EXPRESSION_ROUTES_GATE) && expressions_router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gates() {
        let gates = "ExpressionRoutes=true, Other=false"
            .parse::<FeatureGates>()
            .expect("gates must parse");
        assert!(gates.enabled(EXPRESSION_ROUTES_GATE));
        assert!(!gates.enabled("Other"));
        assert!(!gates.enabled("Unknown"));
    }

    #[test]
    fn empty_gates() {
        assert_eq!("".parse::<FeatureGates>(), Ok(FeatureGates::default()));
    }

    #[test]
    fn rejects_malformed_gates() {
        assert_eq!(
            "ExpressionRoutes".parse::<FeatureGates>(),
            Err(ParseGatesError::Malformed("ExpressionRoutes".to_string()))
        );
        assert!(matches!(
            "ExpressionRoutes=yes".parse::<FeatureGates>(),
            Err(ParseGatesError::InvalidValue { .. })
        ));
    }

    #[test]
    fn expression_routes_require_router_support() {
        let gates = FeatureGates::from_iter([(EXPRESSION_ROUTES_GATE, true)]);
        assert!(FeatureFlags::new(&gates, true).expression_routes);
        assert!(!FeatureFlags::new(&gates, false).expression_routes);
        assert!(!FeatureFlags::new(&FeatureGates::default(), true).expression_routes);
    }
}
