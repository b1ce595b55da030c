use observability::metrics::METRICS;
use observability::metrics_names::OP_PROVISION;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::ProvisioningError;
use crate::registration::RegistrationResult;
use crate::workflow::{KeyProvisioningWorkflow, Stage};

/// What the user sees of the provisioning process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UiState {
    #[default]
    Idle,
    Loading(Stage),
    Success { session_id: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    StageStarted(Stage),
    Completed(RegistrationResult),
    Failed(String),
}

impl UiState {
    pub fn apply(self, event: ProvisioningEvent) -> UiState {
        match event {
            ProvisioningEvent::StageStarted(stage) => UiState::Loading(stage),
            ProvisioningEvent::Completed(result) => UiState::Success {
                session_id: result.session_id,
            },
            ProvisioningEvent::Failed(message) => UiState::Failed { message },
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, UiState::Loading(_))
    }

    /// Status line for the state.
    pub fn message(&self) -> String {
        match self {
            UiState::Idle => String::new(),
            UiState::Loading(stage) => stage.message().to_string(),
            UiState::Success { session_id } => {
                format!("Registration successful. Session ID: {session_id}")
            }
            UiState::Failed { message } => format!("Error: {message}"),
        }
    }
}

/// Runs the workflow on behalf of a UI and is the single place where run
/// failures are handled.
///
/// At most one run is in flight at a time.
#[derive(Debug)]
pub struct ProvisioningController {
    workflow: Arc<KeyProvisioningWorkflow>,
    state: watch::Sender<UiState>,
    busy: AtomicBool,
}

/// Clears the busy flag when a run ends, including when it is cancelled.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    state: &'a watch::Sender<UiState>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        // a run dropped mid-flight leaves no stale loading state behind
        self.state.send_if_modified(|state| {
            if state.is_loading() {
                *state = UiState::Idle;
                true
            } else {
                false
            }
        });
        self.busy.store(false, Ordering::Release);
    }
}

impl ProvisioningController {
    pub fn new(workflow: Arc<KeyProvisioningWorkflow>) -> Self {
        let (state, _) = watch::channel(UiState::Idle);
        Self {
            workflow,
            state,
            busy: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> UiState {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts a provisioning run unless one is already in flight, in which
    /// case [`ProvisioningError::InProgress`] is returned and the state is
    /// left untouched.
    pub async fn trigger(&self) -> Result<RegistrationResult, ProvisioningError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Ignoring provisioning request: a run is already in progress");
            let err = ProvisioningError::InProgress;
            if let Err(e) = METRICS.increment_error_counter(OP_PROVISION, err.metric_tag()) {
                tracing::warn!("Failed to increment error counter: {e}");
            }
            return Err(err);
        }
        let _busy = BusyGuard {
            busy: &self.busy,
            state: &self.state,
        };

        let sink = |stage: Stage| self.dispatch(ProvisioningEvent::StageStarted(stage));
        match self.workflow.run(&sink).await {
            Ok(result) => {
                self.dispatch(ProvisioningEvent::Completed(result.clone()));
                Ok(result)
            }
            Err(e) => {
                tracing::error!("Key provisioning failed: {e}");
                if let Err(metric_err) =
                    METRICS.increment_error_counter(OP_PROVISION, e.metric_tag())
                {
                    tracing::warn!("Failed to increment error counter: {metric_err}");
                }
                self.dispatch(ProvisioningEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn dispatch(&self, event: ProvisioningEvent) {
        self.state.send_modify(|state| {
            *state = std::mem::take(state).apply(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn registered(session_id: &str) -> ProvisioningEvent {
        ProvisioningEvent::Completed(RegistrationResult {
            session_id: session_id.to_string(),
        })
    }

    #[rstest]
    #[case(UiState::Idle, ProvisioningEvent::StageStarted(Stage::LoadingEngine), UiState::Loading(Stage::LoadingEngine))]
    #[case(
        UiState::Loading(Stage::LoadingEngine),
        ProvisioningEvent::StageStarted(Stage::GeneratingKeys),
        UiState::Loading(Stage::GeneratingKeys)
    )]
    #[case(
        UiState::Loading(Stage::Registering),
        registered("abc123"),
        UiState::Success { session_id: "abc123".to_string() }
    )]
    #[case(
        UiState::Loading(Stage::Registering),
        ProvisioningEvent::Failed("Registration failed (500): server error".to_string()),
        UiState::Failed { message: "Registration failed (500): server error".to_string() }
    )]
    #[case(
        UiState::Failed { message: "old".to_string() },
        ProvisioningEvent::StageStarted(Stage::LoadingEngine),
        UiState::Loading(Stage::LoadingEngine)
    )]
    fn test_transitions(
        #[case] from: UiState,
        #[case] event: ProvisioningEvent,
        #[case] to: UiState,
    ) {
        assert_eq!(from.apply(event), to);
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(UiState::Idle.message(), "");
        assert_eq!(
            UiState::Loading(Stage::SerializingKey).message(),
            "Serializing public key..."
        );
        assert_eq!(
            UiState::Success {
                session_id: "abc123".to_string()
            }
            .message(),
            "Registration successful. Session ID: abc123"
        );
        assert_eq!(
            UiState::Failed {
                message: "boom".to_string()
            }
            .message(),
            "Error: boom"
        );
    }
}
