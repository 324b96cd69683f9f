//! Backend adapter contract
//!
//! Scheduler and storage backends expose the same three operations so the
//! reconciliation engine can diff and converge them uniformly.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{ApplyOutcome, BackendKind, BackendState, DesiredState};

/// Observed state of many projects on one backend.
///
/// Projects whose state could not be read are kept apart in `errors` so
/// the engine can drop them from the pass without losing the rest.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub states: BTreeMap<String, BackendState>,
    pub errors: BTreeMap<String, ConnectorError>,
}

impl Snapshot {
    pub fn get(&self, project: &str) -> Option<&BackendState> {
        self.states.get(project)
    }
}

/// A backend holding part of the actual provisioning state.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Target identifiers (mount points, or the scheduler as a singleton).
    fn list_targets(&self) -> Vec<String>;

    /// Observed state for one project.
    async fn current_assignment(&self, project: &str) -> ConnectorResult<BackendState>;

    /// Observed state for a set of projects.
    ///
    /// The default queries each project in turn. Fatal errors abort the
    /// snapshot; anything else is recorded against the project.
    async fn snapshot(&self, projects: &[String]) -> ConnectorResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        for project in projects {
            match self.current_assignment(project).await {
                Ok(state) => {
                    snapshot.states.insert(project.clone(), state);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        backend = %self.kind(),
                        project = %project,
                        error = %e,
                        error_code = e.error_code(),
                        "Failed to read backend state"
                    );
                    snapshot.errors.insert(project.clone(), e);
                }
            }
        }
        Ok(snapshot)
    }

    /// Converge one project to the desired state.
    ///
    /// Idempotent: a project that already matches returns
    /// [`ApplyOutcome::Unchanged`].
    async fn apply(&self, project: &str, desired: &DesiredState) -> ConnectorResult<ApplyOutcome>;
}
