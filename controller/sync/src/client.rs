//! A client for the data plane's admin API.

use anyhow::Context;
use gateway_sync_controller_core::{
    dataplane::{Config, Route},
    EntityValidator, Verdict,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    RequestBuilder, Response, StatusCode,
};
use serde::Deserialize;
use std::{fmt, time::Duration};

/// Header carrying the admin API token.
pub const ADMIN_TOKEN_HEADER: &str = "Kong-Admin-Token";

/// The admin API operations used to converge configuration.
///
/// Implemented by [`AdminClient`]; tests substitute an in-memory data plane.
#[async_trait::async_trait]
pub trait AdminApi: Send + Sync {
    /// Identifies the data plane in logs and metrics.
    fn target(&self) -> &str;

    async fn root(&self) -> Result<RootInfo, AdminError>;

    async fn status(&self) -> Result<Status, AdminError>;

    async fn workspace_exists(&self, workspace: &str) -> Result<bool, AdminError>;

    async fn create_workspace(&self, workspace: &str) -> Result<(), AdminError>;

    /// Returns the applied configuration, or `None` if the data plane only reports a stub.
    async fn applied_config(&self) -> Result<Option<Config>, AdminError>;

    /// Replaces the data plane's entire configuration.
    async fn post_config(&self, body: &[u8]) -> Result<(), AdminError>;
}

#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub token: Option<String>,

    /// Additional headers sent with every request.
    pub headers: Vec<(String, String)>,

    /// Applied to every request.
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// The data plane's self description, as returned by `GET /`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RootInfo {
    pub version: String,

    #[serde(default)]
    pub configuration: RootConfiguration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RootConfiguration {
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub router_flavor: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    NotReady,
    Ready {
        /// The hash of the configuration the data plane last applied, if it reports one.
        configuration_hash: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("{url} reported a conflict: {body}")]
    Conflict { url: String, body: String },

    #[error("configuration rejected by the data plane: {0}")]
    Rejected(ConfigError),

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The structured body of a rejected configuration push.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigError {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub code: u32,

    #[serde(default)]
    pub flattened_errors: Vec<EntityError>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct EntityError {
    #[serde(default)]
    pub entity_name: Option<String>,

    #[serde(default)]
    pub entity_type: Option<String>,

    #[serde(default)]
    pub errors: Vec<FieldError>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FieldError {
    #[serde(default)]
    pub field: Option<String>,
    pub message: String,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    configuration_hash: Option<String>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

// === impl AdminClient ===

impl AdminClient {
    pub fn new(base_url: &str, config: &ClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(token).context("invalid admin token")?;
            value.set_sensitive(true);
            headers.insert(ADMIN_TOKEN_HEADER, value);
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.append(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build admin API client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder, url: &str) -> Result<Response, AdminError> {
        req.timeout(self.timeout)
            .send()
            .await
            .map_err(|source| AdminError::from_reqwest(url, source))
    }

    async fn body(rsp: Response, url: &str) -> Result<Vec<u8>, AdminError> {
        rsp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| AdminError::from_reqwest(url, source))
    }

    /// Builds the error for a response that is not otherwise handled.
    async fn unexpected(rsp: Response, url: &str) -> AdminError {
        let status = rsp.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return AdminError::Unavailable(url.to_string());
        }
        let body = match Self::body(rsp, url).await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(error) => return error,
        };
        AdminError::Status {
            url: url.to_string(),
            status,
            body,
        }
    }
}

#[async_trait::async_trait]
impl AdminApi for AdminClient {
    fn target(&self) -> &str {
        &self.base_url
    }

    async fn root(&self) -> Result<RootInfo, AdminError> {
        let url = self.url("/");
        let rsp = self.send(self.http.get(&url), &url).await?;
        if rsp.status() != StatusCode::OK {
            return Err(Self::unexpected(rsp, &url).await);
        }
        let body = Self::body(rsp, &url).await?;
        serde_json::from_slice(&body).map_err(|source| AdminError::Decode { url, source })
    }

    async fn status(&self) -> Result<Status, AdminError> {
        let url = self.url("/status");
        let rsp = self.send(self.http.get(&url), &url).await?;
        match rsp.status() {
            StatusCode::OK => {
                let body = Self::body(rsp, &url).await?;
                let StatusBody { configuration_hash } = serde_json::from_slice(&body)
                    .map_err(|source| AdminError::Decode { url, source })?;
                Ok(Status::Ready {
                    configuration_hash: configuration_hash.filter(|h| !h.is_empty()),
                })
            }
            StatusCode::SERVICE_UNAVAILABLE => Ok(Status::NotReady),
            _ => Err(Self::unexpected(rsp, &url).await),
        }
    }

    async fn workspace_exists(&self, workspace: &str) -> Result<bool, AdminError> {
        let url = self.url(&format!("/{workspace}/workspaces/{workspace}"));
        let rsp = self.send(self.http.get(&url), &url).await?;
        match rsp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::unexpected(rsp, &url).await),
        }
    }

    async fn create_workspace(&self, workspace: &str) -> Result<(), AdminError> {
        let url = self.url("/workspaces");
        let req = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "name": workspace }));
        let rsp = self.send(req, &url).await?;
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            let body = Self::body(rsp, &url).await?;
            return Err(AdminError::Conflict {
                url,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Err(Self::unexpected(rsp, &url).await)
    }

    async fn applied_config(&self) -> Result<Option<Config>, AdminError> {
        let url = self.url("/config");
        let rsp = self.send(self.http.get(&url), &url).await?;
        if rsp.status() != StatusCode::OK {
            return Err(Self::unexpected(rsp, &url).await);
        }
        let body = Self::body(rsp, &url).await?;
        // Data planes without applied configuration respond with a version stub.
        Ok(serde_json::from_slice(&body).ok())
    }

    async fn post_config(&self, body: &[u8]) -> Result<(), AdminError> {
        let url = self.url("/config?check_hash=1");
        let req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        let rsp = self.send(req, &url).await?;
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_client_error() {
            let body = Self::body(rsp, &url).await?;
            return Err(AdminError::Rejected(ConfigError::parse(&body)));
        }
        Err(Self::unexpected(rsp, &url).await)
    }
}

#[async_trait::async_trait]
impl EntityValidator for AdminClient {
    async fn validate_route(&self, route: &Route) -> anyhow::Result<Verdict> {
        let url = self.url("/schemas/routes/validate");
        let rsp = self.send(self.http.post(&url).json(route), &url).await?;
        match rsp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(Verdict::Valid),
            StatusCode::BAD_REQUEST => {
                let body = Self::body(rsp, &url).await?;
                let message = serde_json::from_slice::<MessageBody>(&body)
                    .map(|b| b.message)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
                Ok(Verdict::Invalid(message))
            }
            _ => Err(Self::unexpected(rsp, &url).await.into()),
        }
    }
}

// === impl AdminError ===

impl AdminError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout(url.to_string());
        }
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// Transient failures may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Status { status, .. } => status.is_server_error(),
            Self::Conflict { .. } | Self::Rejected(_) | Self::Decode { .. } => false,
        }
    }

    /// Indicates that the entity being created already exists.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Status { body, .. } => body.contains("already exists"),
            Self::Rejected(error) => error.message.contains("already exists"),
            _ => false,
        }
    }
}

// === impl ConfigError ===

impl ConfigError {
    /// Parses a rejection body, keeping unstructured bodies as the message.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| Self {
            message: String::from_utf8_lossy(body).into_owned(),
            ..Default::default()
        })
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for entity in &self.flattened_errors {
            write!(
                f,
                "; {} {}:",
                entity.entity_type.as_deref().unwrap_or("entity"),
                entity.entity_name.as_deref().unwrap_or("<unnamed>"),
            )?;
            for error in &entity.errors {
                match &error.field {
                    Some(field) => write!(f, " {field}: {}", error.message)?,
                    None => write!(f, " {}", error.message)?,
                }
            }
        }
        Ok(())
    }
}

// === impl RootInfo ===

impl RootInfo {
    pub fn is_dbless(&self) -> bool {
        self.configuration.database == "off"
    }

    pub fn supports_expressions(&self) -> bool {
        self.configuration.router_flavor == "expressions"
    }
}
