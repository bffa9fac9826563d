use crate::domain::document::SettingsDocument;
use std::fmt;

/// Connection lifecycle of the single device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Discovering,
    Connecting,
    Ready,
    /// Transient: the transport dropped. Always followed by `Idle`.
    Lost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Lost => "lost",
        };
        f.write_str(label)
    }
}

/// Which step of the time cascade produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTier {
    Primary,
    LocalFallbackAdjusted,
    LocalFallbackRaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    pub epoch_seconds: i64,
    pub source: SourceTier,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    DeviceConnected(String),
    SettingsChanged {
        document: SettingsDocument,
        changed: Vec<String>,
    },
    TimeSynced(TimeSample),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
