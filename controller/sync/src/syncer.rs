use crate::{
    backoff::Backoff,
    client::{AdminApi, AdminError, Status},
    fingerprint::{Fingerprint, EMPTY_CONFIGURATION_HASH},
    metrics::SyncMetrics,
    workspace::WorkspaceManager,
};
use gateway_sync_controller_core::dataplane::Config;
use std::{future::Future, time::Duration};
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The configuration was pushed and accepted.
    Converged,

    /// The data plane already has the desired configuration.
    SkippedNoChange,

    /// The data plane reported that it is not ready; the next tick tries again.
    SkippedNotReady,

    Failed,
}

/// Summarizes one sync cycle.
#[derive(Debug)]
pub struct SyncResult {
    pub outcome: SyncOutcome,
    pub fingerprint: Option<Fingerprint>,
    pub error: Option<SyncError>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to serialize configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Admin {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: AdminError,
    },

    #[error("sync cancelled")]
    Cancelled,
}

/// Converges a single data plane onto the desired configuration.
///
/// A syncer exclusively owns its target: all pushes to a data plane go through one syncer, one
/// at a time.
pub struct Syncer<A> {
    api: A,
    workspace: Option<WorkspaceManager>,
    backoff: Backoff,

    /// Pushes even when the data plane appears to have the desired configuration.
    force: bool,

    /// Updated only after the data plane has accepted a push.
    last_pushed: Option<Fingerprint>,

    metrics: SyncMetrics,
}

// === impl SyncOutcome ===

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::SkippedNoChange => "skipped-no-change",
            Self::SkippedNotReady => "skipped-not-ready",
            Self::Failed => "failed",
        }
    }
}

// === impl SyncResult ===

impl SyncResult {
    fn new(outcome: SyncOutcome, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            outcome,
            fingerprint,
            error: None,
        }
    }

    fn failed(fingerprint: Option<Fingerprint>, error: SyncError) -> Self {
        Self {
            outcome: SyncOutcome::Failed,
            fingerprint,
            error: Some(error),
        }
    }
}

// === impl Syncer ===

impl<A: AdminApi> Syncer<A> {
    pub fn new(api: A, backoff: Backoff, metrics: SyncMetrics) -> Self {
        Self {
            api,
            workspace: None,
            backoff,
            force: false,
            last_pushed: None,
            metrics,
        }
    }

    pub fn with_workspace(mut self, workspace: WorkspaceManager) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Syncs the latest desired configuration whenever it changes and on every tick of `period`.
    ///
    /// Changes published while a sync is in flight are coalesced: the next cycle only sees the
    /// latest value. Nothing is synced until a configuration has been published.
    pub async fn run(
        mut self,
        mut config_rx: watch::Receiver<Option<Config>>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Configuration publisher dropped");
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }

            let Some(config) = config_rx.borrow_and_update().clone() else {
                tracing::debug!("Waiting for the initial configuration");
                continue;
            };
            let result = self.sync(&config, &cancel).await;
            match (result.outcome, &result.error) {
                (SyncOutcome::Converged, _) => tracing::info!(
                    fingerprint = ?result.fingerprint,
                    services = config.services.len(),
                    "Configuration applied"
                ),
                (SyncOutcome::SkippedNoChange, _) => {
                    tracing::trace!(fingerprint = ?result.fingerprint, "Configuration unchanged")
                }
                (SyncOutcome::SkippedNotReady, _) => {
                    tracing::info!("Data plane is not ready; skipping sync")
                }
                (SyncOutcome::Failed, Some(SyncError::Cancelled)) => break,
                (SyncOutcome::Failed, Some(error)) => {
                    tracing::warn!(%error, "Failed to sync configuration")
                }
                (SyncOutcome::Failed, None) => tracing::warn!("Failed to sync configuration"),
            }
        }
        tracing::debug!("Stopped");
    }

    /// Runs one sync cycle.
    pub async fn sync(&mut self, config: &Config, cancel: &CancellationToken) -> SyncResult {
        let target = self.api.target().to_string();
        self.metrics.attempt(&target);
        let result = self.cycle(config, cancel).await;
        self.metrics.outcome(&target, result.outcome);
        result
    }

    async fn cycle(&mut self, config: &Config, cancel: &CancellationToken) -> SyncResult {
        let status = match retry(&self.backoff, cancel, "status", || self.api.status()).await {
            Ok(status) => status,
            Err(error) => return SyncResult::failed(None, error),
        };
        let reported = match status {
            Status::NotReady => return SyncResult::new(SyncOutcome::SkippedNotReady, None),
            Status::Ready { configuration_hash } => configuration_hash,
        };

        let (payload, fingerprint) = match Fingerprint::encode(config) {
            Ok(encoded) => encoded,
            Err(error) => return SyncResult::failed(None, error.into()),
        };

        if !self.force
            && self
                .is_applied(config, &fingerprint, reported.as_deref(), cancel)
                .await
        {
            return SyncResult::new(SyncOutcome::SkippedNoChange, Some(fingerprint));
        }

        if let Some(workspace) = &self.workspace {
            let ensured = retry(&self.backoff, cancel, "workspace", || {
                workspace.ensure(&self.api)
            })
            .await;
            if let Err(error) = ensured {
                return SyncResult::failed(Some(fingerprint), error);
            }
        }

        let pushed = retry(&self.backoff, cancel, "push", || {
            self.api.post_config(&payload)
        })
        .await;
        if !matches!(pushed, Err(SyncError::Cancelled)) {
            self.metrics.push(self.api.target(), pushed.is_ok());
        }
        if let Err(error) = pushed {
            return SyncResult::failed(Some(fingerprint), error);
        }

        self.last_pushed = Some(fingerprint.clone());
        SyncResult::new(SyncOutcome::Converged, Some(fingerprint))
    }

    /// Determines whether the data plane already runs the desired configuration.
    ///
    /// A hash reported by the data plane wins when it matches. Otherwise the last confirmed
    /// push is authoritative, unless the data plane reports that it has nothing applied. With
    /// neither available, e.g. after a restart, the applied configuration is read back.
    async fn is_applied(
        &self,
        config: &Config,
        fingerprint: &Fingerprint,
        reported: Option<&str>,
        cancel: &CancellationToken,
    ) -> bool {
        match (reported, &self.last_pushed) {
            (Some(EMPTY_CONFIGURATION_HASH), _) => false,
            (Some(hash), _) if hash == fingerprint.as_str() => true,
            (_, Some(last)) => last == fingerprint,
            (Some(_), None) => false,
            (None, None) => {
                match retry(&self.backoff, cancel, "read config", || {
                    self.api.applied_config()
                })
                .await
                {
                    Ok(Some(mut applied)) => {
                        applied.canonicalize();
                        let mut desired = config.clone();
                        desired.canonicalize();
                        applied == desired
                    }
                    Ok(None) => false,
                    Err(error) => {
                        tracing::debug!(%error, "Unable to read the applied configuration");
                        false
                    }
                }
            }
        }
    }
}

/// Runs `op`, retrying transient failures per `backoff`. Cancellation is observed while the
/// operation is in flight and while waiting to retry.
async fn retry<T, F, Fut>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    operation: &'static str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdminError>>,
{
    let mut retries = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = op() => result,
        };
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_transient() || retries >= backoff.retries {
            return Err(SyncError::Admin {
                operation,
                attempts: retries + 1,
                source: error,
            });
        }

        let delay = backoff.delay(retries);
        retries += 1;
        tracing::warn!(%error, operation, retry = retries, ?delay, "Transient admin API failure");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
