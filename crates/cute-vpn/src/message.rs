//! Message types between the owning (UI) thread and session workers.

use crate::manager::{GatewayOutcome, SessionError};
use crate::neighbor::NeighborRecord;
use std::fmt;
use std::net::Ipv4Addr;

/// Lifecycle requests dispatched from the UI thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Establish the tunnel and start the engine
    Start,
    /// Stop the engine
    Stop,
    /// Switch to a gateway picked from the neighbor list
    SwitchGateway(NeighborRecord),
}

impl Request {
    /// Short operation name, used for worker thread names
    pub fn name(&self) -> &'static str {
        match self {
            Request::Start => "start",
            Request::Stop => "stop",
            Request::SwitchGateway(_) => "switch-gateway",
        }
    }
}

/// Outcomes reported back to the UI thread, one per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Session is now active
    Started,
    /// Session could not start and is idle
    StartFailed {
        message: String,
        /// Caller must re-request VPN permission before retrying
        permission_required: bool,
    },
    /// Session is now idle
    Stopped,
    /// Gateway switched and saved
    GatewayUpdated(Ipv4Addr),
    /// Gateway switch requested without a running session
    NotRunning,
    /// Any other failed operation; session state is unchanged
    Failed(String),
}

impl Outcome {
    pub(crate) fn from_start(result: Result<(), SessionError>) -> Self {
        match result {
            Ok(()) => Outcome::Started,
            // Start was refused without touching the running session
            Err(e @ SessionError::InvalidState { .. }) => Outcome::Failed(e.to_string()),
            Err(e) => Outcome::StartFailed {
                permission_required: e.is_permission_required(),
                message: e.to_string(),
            },
        }
    }

    pub(crate) fn from_stop(result: Result<(), SessionError>) -> Self {
        match result {
            Ok(()) => Outcome::Stopped,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    pub(crate) fn from_switch(result: Result<GatewayOutcome, SessionError>) -> Self {
        match result {
            Ok(GatewayOutcome::Updated(addr)) => Outcome::GatewayUpdated(addr),
            Ok(GatewayOutcome::NotRunning) => Outcome::NotRunning,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Started => write!(f, "VPN started"),
            Outcome::StartFailed { message, .. } => write!(f, "VPN failed to start: {}", message),
            Outcome::Stopped => write!(f, "VPN stopped"),
            Outcome::GatewayUpdated(addr) => write!(f, "Gateway updated to {}", addr),
            Outcome::NotRunning => write!(f, "VPN is not running"),
            Outcome::Failed(message) => write!(f, "Operation failed: {}", message),
        }
    }
}
