use gateway_sync_controller_core::ResourceId;
use std::fmt;

pub const NO_PARENT_REFS: &str = "couldn't determine parentRefs for httproute";
pub const NO_GATEWAY_LISTENERS: &str = "couldn't find gateway listeners for httproute";
pub const GATEWAY_LISTENERS_INVALID: &str =
    "httproute linked gateway listeners did not pass validation";
pub const SPEC_INVALID: &str = "httproute spec did not pass validation";
pub const SCHEMA_INVALID: &str = "httproute failed schema validation";
pub const SCHEMA_UNAVAILABLE: &str = "unable to validate httproute schema";

/// The reason a route was rejected.
///
/// The message is the user-facing umbrella (e.g. [`SPEC_INVALID`]); the reason is the specific,
/// machine-actionable cause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub message: &'static str,
    pub reason: Reason,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("httproute {0} does not reference any known gateway")]
    NoGateways(ResourceId),

    #[error("no parentRef matched gateway {0}")]
    NoMatchingParentRef(ResourceId),

    #[error("sectionname referenced listener {listener} was not found on gateway {gateway}")]
    ListenerNotFound {
        listener: String,
        gateway: ResourceId,
    },

    #[error("no listeners could be found for gateway {0}")]
    NoListeners(ResourceId),

    #[error("{kind} not supported by listener {listener}")]
    KindNotAllowed { kind: String, listener: String },

    #[error("listener {listener} protocol {protocol} does not support HTTPRoute")]
    ProtocolNotSupported { listener: String, protocol: String },

    #[error("httproute namespace {namespace} is not allowed by listener {listener}")]
    NamespaceNotAllowed { namespace: String, listener: String },

    #[error("queryparam matching is supported with expression router only")]
    QueryParamsRequireExpressions,

    #[error("{0} is not a supported group for httproute backendRefs, only core is supported")]
    UnsupportedBackendGroup(String),

    #[error("{0} is not a supported kind for httproute backendRefs, only Service is supported")]
    UnsupportedBackendKind(String),

    /// The data plane judged a translated entity invalid; the message is its own.
    #[error("{0}")]
    DataPlane(String),

    #[error("{0}")]
    ValidatorUnavailable(String),
}

impl Rejection {
    pub fn new(message: &'static str, reason: Reason) -> Self {
        Self { message, reason }
    }

    pub(crate) fn spec(reason: Reason) -> Self {
        Self::new(SPEC_INVALID, reason)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.reason)
    }
}

impl std::error::Error for Rejection {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}
