//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

/// One-way sink for events about a database
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        subject: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: String,
    );
}

/// Production publisher wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller_name.to_string(),
                instance,
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        subject: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: String,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), subject.clone());
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(message),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Well-known event reason strings
pub mod reasons {
    /// Spec rejected by validation or a dormant record
    pub const INVALID: &str = "Invalid";
    /// Sub-resources converged
    pub const SUCCESSFUL: &str = "Successful";
    /// A sub-resource or collaborator could not be created
    pub const FAILED_TO_CREATE: &str = "Failed";
    /// Pausing refused by the doNotPause lock
    pub const PAUSE_REFUSED: &str = "PauseRefused";
    /// Database paused and archived
    pub const PAUSED: &str = "Paused";
    /// Dormant record flagged for resume
    pub const RESUMING: &str = "Resuming";
    /// Halting failed
    pub const FAILED_TO_PAUSE: &str = "FailedToPause";
    /// Termination work failed
    pub const FAILED_TO_DELETE: &str = "FailedToDelete";
}

/// Well-known event action strings
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
