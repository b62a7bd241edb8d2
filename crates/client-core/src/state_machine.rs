use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Phase of the background sync loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No background activity.
    #[default]
    Stopped,
    /// A `/sync` request is in flight.
    Polling,
    /// A response is being delivered to listeners; the resume token has not moved yet.
    Dispatching,
    /// Waiting after a recoverable failure before polling again.
    Backoff,
}

/// Input driving the sync loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Start,
    ResponseReceived,
    DispatchComplete,
    RequestFailed,
    BackoffElapsed,
    Stop,
}

impl SyncTrigger {
    fn action(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ResponseReceived => "response_received",
            Self::DispatchComplete => "dispatch_complete",
            Self::RequestFailed => "request_failed",
            Self::BackoffElapsed => "backoff_elapsed",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStateMachine {
    phase: SyncPhase,
}

impl SyncStateMachine {
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != SyncPhase::Stopped
    }

    /// Apply one trigger and return the new phase.
    pub fn apply(&mut self, trigger: SyncTrigger) -> Result<SyncPhase, ClientError> {
        use SyncPhase::*;

        let next = match (self.phase, trigger) {
            (Stopped, SyncTrigger::Start) => Polling,
            (Polling, SyncTrigger::ResponseReceived) => Dispatching,
            (Dispatching, SyncTrigger::DispatchComplete) => Polling,
            (Polling, SyncTrigger::RequestFailed) => Backoff,
            (Backoff, SyncTrigger::BackoffElapsed) => Polling,
            (_, SyncTrigger::Stop) => Stopped,
            (current, trigger) => return Err(ClientError::invalid_state(current, trigger.action())),
        };

        self.phase = next;
        Ok(next)
    }
}
