use crate::{
    core::EntityValidator,
    index::{validate_http_route, SharedIndex},
    k8s::gateway::{Gateway, HttpRoute},
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{core::DynamicObject, Resource, ResourceExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Validates HTTPRoutes against the Gateways, Namespaces and features known to the index and
/// against the data plane's entity schemas.
#[derive(Clone)]
pub struct Admission {
    index: SharedIndex,
    validator: Arc<dyn EntityValidator>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(index: SharedIndex, validator: Arc<dyn EntityValidator>) -> Self {
        Self { index, validator }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<HttpRoute>(&req) {
            return self.admit_http_route(req).await;
        }

        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    async fn admit_http_route(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let route = match parse_http_route(req) {
            Ok(route) => route,
            Err(error) => {
                info!(%error, "Failed to parse HTTPRoute");
                return rsp.deny(error);
            }
        };
        let ns = route.namespace().unwrap_or_default();
        let name = route.name_any();

        // Snapshot the index so that the data plane is never consulted while the lock is held.
        let (features, namespaces, gateways) = {
            let index = self.index.read();
            let gateways = index
                .candidate_gateways(&route)
                .into_iter()
                .cloned()
                .collect::<Vec<Gateway>>();
            (index.features(), index.namespaces().clone(), gateways)
        };
        let gateways = gateways.iter().collect::<Vec<_>>();

        if let Err(rejection) = validate_http_route(
            self.validator.as_ref(),
            &features,
            &namespaces,
            &route,
            &gateways,
        )
        .await
        {
            info!(%rejection, %ns, %name, "Denied");
            return rsp.deny(rejection);
        }

        rsp
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_http_route(req: AdmissionRequest) -> Result<HttpRoute> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    let mut route = HttpRoute::new(&obj.name_any(), spec);
    route.metadata = obj.metadata;
    // Objects being created may not carry their namespace yet.
    if route.metadata.namespace.is_none() {
        route.metadata.namespace = req.namespace;
    }
    Ok(route)
}
