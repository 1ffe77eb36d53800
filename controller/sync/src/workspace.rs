use crate::client::{AdminApi, AdminError};
use tokio::sync::OnceCell;

/// Ensures a workspace exists on a data plane before configuration is pushed into it.
///
/// Once the workspace is known to exist it is never looked up again. Creation races with other
/// controllers are tolerated: a conflict on create means the workspace exists.
#[derive(Debug)]
pub struct WorkspaceManager {
    name: String,
    ensured: OnceCell<()>,
}

impl WorkspaceManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensured: OnceCell::new(),
        }
    }

    pub async fn ensure<A>(&self, api: &A) -> Result<(), AdminError>
    where
        A: AdminApi + ?Sized,
    {
        self.ensured
            .get_or_try_init(|| async {
                if api.workspace_exists(&self.name).await? {
                    tracing::debug!(workspace = %self.name, "Workspace exists");
                    return Ok(());
                }
                match api.create_workspace(&self.name).await {
                    Ok(()) => tracing::info!(workspace = %self.name, "Created workspace"),
                    Err(error) if error.is_conflict() => {
                        tracing::debug!(
                            workspace = %self.name,
                            %error,
                            "Workspace created concurrently"
                        );
                    }
                    Err(error) => return Err(error),
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}
