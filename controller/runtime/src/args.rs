use crate::{
    admission::Admission,
    core::{duration::GoDuration, EntityValidator, FeatureFlags, FeatureGates},
    index::Index,
    k8s::{
        gateway::{Gateway, HttpRoute},
        watcher, Namespace,
    },
    sync::{
        AdminApi, AdminClient, Backoff, ClientConfig, RootInfo, SyncMetrics, Syncer,
        WorkspaceManager,
    },
};
use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "gateway-sync",
    about = "Binds Gateway API HTTPRoutes to Gateways and syncs them to data planes"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_sync=info,warn",
        env = "GATEWAY_SYNC_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Admin API base URLs of the data planes to configure.
    #[clap(
        long = "admin-url",
        default_value = "http://localhost:8001",
        value_delimiter = ','
    )]
    admin_urls: Vec<String>,

    #[clap(long, env = "GATEWAY_SYNC_CONTROLLER_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Reads the admin API token from a file. Takes precedence over `--admin-token`.
    #[clap(long)]
    admin_token_file: Option<PathBuf>,

    /// Headers added to every admin API request, formatted as `key:value`.
    #[clap(long = "admin-header")]
    admin_headers: Vec<AdminHeader>,

    /// The data plane workspace to configure. Workspaces are not managed when empty.
    #[clap(long, default_value = "")]
    workspace: String,

    #[clap(long, default_value = "3s")]
    sync_period: GoDuration,

    /// The timeout applied to every admin API request.
    #[clap(long, default_value = "30s")]
    request_timeout: GoDuration,

    /// The number of attempts made to reach each data plane at startup.
    #[clap(long, default_value = "60")]
    init_retries: u32,

    #[clap(long, default_value = "1s")]
    init_retry_delay: GoDuration,

    /// The number of times a transient admin API failure is retried within a sync.
    #[clap(long, default_value = "5")]
    sync_retries: u32,

    #[clap(long, default_value = "1s")]
    sync_backoff_base: GoDuration,

    #[clap(long, default_value = "30s")]
    sync_backoff_max: GoDuration,

    /// Pushes configuration even when the data plane already has it.
    #[clap(long)]
    force_sync: bool,

    /// Feature gates, formatted as `Key=bool,...`.
    #[clap(long, default_value = "")]
    feature_gates: FeatureGates,

    /// When set, only Gateways of this class are considered.
    #[clap(long)]
    gateway_class_name: Option<String>,
}

#[derive(Clone, Debug)]
struct AdminHeader(String, String);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            admission_controller_disabled,
            admin_urls,
            admin_token,
            admin_token_file,
            admin_headers,
            workspace,
            sync_period,
            request_timeout,
            init_retries,
            init_retry_delay,
            sync_retries,
            sync_backoff_base,
            sync_backoff_max,
            force_sync,
            feature_gates,
            gateway_class_name,
        } = self;

        let sync_period = Duration::from(sync_period);
        ensure!(!sync_period.is_zero(), "--sync-period must be positive");
        if admin_urls.is_empty() {
            bail!("at least one --admin-url must be configured");
        }

        let token = match admin_token_file {
            Some(path) => {
                let token = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Some(token.trim().to_string())
            }
            None => admin_token,
        };
        let client_config = ClientConfig {
            token,
            headers: admin_headers
                .into_iter()
                .map(|AdminHeader(name, value)| (name, value))
                .collect(),
            timeout: request_timeout.into(),
        };
        let admins = admin_urls
            .iter()
            .map(|url| AdminClient::new(url, &client_config))
            .collect::<Result<Vec<_>>>()?;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let sync_metrics = SyncMetrics::register(prom.sub_registry_with_prefix("sync"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Expression routes are only used when every data plane routes with expressions.
        let mut expressions_router = true;
        for api in &admins {
            let root = discover(api, init_retries, init_retry_delay.into()).await?;
            info!(
                admin_url = %api.target(),
                version = %root.version,
                database = %root.configuration.database,
                router_flavor = %root.configuration.router_flavor,
                dbless = root.is_dbless(),
                "Discovered data plane"
            );
            expressions_router &= root.supports_expressions();
        }
        let features = FeatureFlags::new(&feature_gates, expressions_router);
        info!(?features, "Configured features");

        let index = Index::shared(features, gateway_class_name);

        // Spawn resource watches.

        let gateways = runtime.watch_all::<Gateway>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), gateways).instrument(info_span!("gateways")),
        );

        let routes = runtime.watch_all::<HttpRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), routes)
                .instrument(info_span!("httproutes.gateway.networking.k8s.io")),
        );

        let namespaces = runtime.watch_all::<Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        // The admission webhook validates routes against the first data plane.
        let validator: Arc<dyn EntityValidator> = Arc::new(admins[0].clone());

        // Spawn one syncer per data plane so that pushes to each target are serialized.
        // Syncers stay idle until every watch has delivered its initial listing.
        let backoff = Backoff {
            base: sync_backoff_base.into(),
            max: sync_backoff_max.into(),
            retries: sync_retries,
        };
        let cancel = CancellationToken::new();
        let mut syncers = Vec::with_capacity(admins.len());
        for api in admins {
            let admin_url = api.target().to_string();
            let mut syncer = Syncer::new(api, backoff, sync_metrics.clone()).with_force(force_sync);
            if !workspace.is_empty() {
                syncer = syncer.with_workspace(WorkspaceManager::new(workspace.clone()));
            }
            let config_rx = index.read().config_rx();
            syncers.push(tokio::spawn(
                syncer
                    .run(config_rx, sync_period, cancel.child_token())
                    .instrument(info_span!("sync", %admin_url)),
            ));
        }

        // Stop the syncers on shutdown, holding the shutdown open until in-flight syncs abort.
        let drain = runtime.shutdown_handle();
        tokio::spawn(async move {
            let release = drain.signaled().await;
            cancel.cancel();
            release
                .release_after(async move {
                    for syncer in syncers {
                        if let Err(error) = syncer.await {
                            tracing::warn!(%error, "Syncer task failed");
                        }
                    }
                })
                .await;
        });

        let runtime =
            runtime.spawn_server(move || Admission::new(index.clone(), validator.clone()));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Polls the data plane's root endpoint until it responds.
async fn discover(api: &AdminClient, attempts: u32, delay: Duration) -> Result<RootInfo> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match api.root().await {
            Ok(root) => return Ok(root),
            Err(error) if attempt < attempts => {
                info!(admin_url = %api.target(), %error, attempt, "Waiting for data plane");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!(
                        "data plane {} unreachable after {attempts} attempt(s)",
                        api.target()
                    )
                })
            }
        }
    }
}

impl std::str::FromStr for AdminHeader {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .split_once(':')
            .with_context(|| format!("header {s:?} must be formatted as key:value"))?;
        let name = name.trim();
        ensure!(!name.is_empty(), "header {s:?} has an empty name");
        Ok(Self(name.to_string(), value.trim().to_string()))
    }
}
