//! BLE Transport Seams
//!
//! The protocol core talks to the radio only through these traits. The
//! btleplug backend lives in [`super::scanner`] and [`super::connection`].

use crate::domain::error::LinkError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// What discovery is looking for.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    /// Advertised name prefix, matched case-insensitively
    pub name_prefix: String,
    /// Service UUID the device must expose
    pub service: Uuid,
}

impl DiscoveryFilter {
    pub fn matches_name(&self, name: &str) -> bool {
        name.len() >= self.name_prefix.len()
            && name.is_char_boundary(self.name_prefix.len())
            && name[..self.name_prefix.len()].eq_ignore_ascii_case(&self.name_prefix)
    }
}

/// A discovered advertiser, before the user has picked one.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub id: String,
    pub rssi: Option<i16>,
}

/// Picks one of several matching advertisers. `None` cancels discovery.
pub trait DeviceChooser: Send + Sync {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize>;
}

/// Takes the first advertiser found.
pub struct FirstMatch;

impl DeviceChooser for FirstMatch {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// One-shot discovery. No internal retry.
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, LinkError>;
}

/// The underlying transport connection of a discovered device.
#[async_trait]
pub trait BleDevice: Send + Sync {
    /// Negotiate the connection.
    async fn connect(&self) -> Result<(), LinkError>;

    /// Resolve the data characteristic inside `service`.
    async fn open_channel(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn DataLink>, LinkError>;

    /// Yields once per disconnect of this device; ends when the transport is gone.
    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>, LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// The single read/write/notify data slot.
#[async_trait]
pub trait DataLink: Send + Sync {
    async fn write(&self, payload: &[u8]) -> Result<(), LinkError>;

    async fn read(&self) -> Result<Vec<u8>, LinkError>;

    /// Enable notifications and stream their payloads.
    async fn notifications(&self) -> Result<BoxStream<'static, Vec<u8>>, LinkError>;
}

/// Opaque reference to the discovered device.
#[derive(Clone)]
pub struct DeviceHandle {
    name: String,
    device: Arc<dyn BleDevice>,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, device: Arc<dyn BleDevice>) -> Self {
        Self {
            name: name.into(),
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<dyn BleDevice> {
        &self.device
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
