use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the device link and the protocol layered on it.
///
/// Transport failures carry only a message; every cause collapses the session
/// to `Idle` the same way.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device selection cancelled")]
    DiscoveryCancelled,

    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("service {0} not found on device")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("a session is already active")]
    AlreadyActive,

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("malformed settings document: {0}")]
    Protocol(String),

    #[error("time service error: {0}")]
    ExternalService(String),
}

impl LinkError {
    /// True for failures that end the session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Transport(_) | Self::ReadFailed(_)
        )
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalService(err.to_string())
    }
}

#[cfg(feature = "ble")]
impl From<btleplug::Error> for LinkError {
    fn from(err: btleplug::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
