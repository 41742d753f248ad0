use crate::orchestrator::Orchestrator;
use crate::twilio_types::CallStatus;

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    /// Map the carrier's `Direction` field (`inbound`, `outbound-api`, `outbound-dial`)
    pub fn from_twilio(direction: &str) -> Self {
        if direction.starts_with("outbound") {
            CallDirection::Outbound
        } else {
            CallDirection::Inbound
        }
    }
}

/// A request to originate one outbound call.  Consumed once by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchRequest {
    pub to: String,
    pub message: Option<String>,
    /// Overrides the configured originating number
    pub from: Option<String>,
}

impl DispatchRequest {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What the carrier handed back for an originated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    pub call_sid: String,
    pub to: String,
    pub status: CallStatus,
    pub scheduled_for: Option<OffsetDateTime>,
}

/// Result of one request within a batch
#[derive(Debug)]
pub enum DispatchOutcome {
    Initiated(CallHandle),
    Failed {
        to: String,
        reason: String,
    },
    /// The row had no destination number, so nothing was dialed
    Skipped {
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            DispatchOutcome::Initiated(_) => "initiated",
            DispatchOutcome::Failed { .. } => "failed",
            DispatchOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn call_sid(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Initiated(handle) => Some(&handle.call_sid),
            _ => None,
        }
    }
}

/// One row of the call status log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub timestamp: OffsetDateTime,
    pub call_sid: String,
    pub call_status: CallStatus,
    pub to_number: String,
}

pub struct AppState {
    pub orchestrator: Orchestrator,
}
