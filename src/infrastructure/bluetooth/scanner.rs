//! BLE Scanner Module
//!
//! One-shot discovery of a Mochi device through btleplug.

use crate::domain::error::LinkError;
use crate::infrastructure::bluetooth::connection::BtleDevice;
use crate::infrastructure::bluetooth::transport::{
    Candidate, DeviceChooser, DeviceHandle, DeviceLocator, DiscoveryFilter,
};
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Discovers devices on the first local adapter.
pub struct BtleLocator {
    chooser: Arc<dyn DeviceChooser>,
    scan_window: Duration,
    connect_timeout: Duration,
}

impl BtleLocator {
    pub fn new(
        chooser: Arc<dyn DeviceChooser>,
        scan_window: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            chooser,
            scan_window,
            connect_timeout,
        }
    }

    async fn adapter() -> Result<Adapter, LinkError> {
        let manager = Manager::new()
            .await
            .map_err(|e| LinkError::DiscoveryFailed(format!("Bluetooth unavailable: {e}")))?;
        manager
            .adapters()
            .await
            .map_err(|e| LinkError::DiscoveryFailed(format!("Bluetooth unavailable: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::DiscoveryFailed("No Bluetooth adapter found".to_string()))
    }

    /// Scan for the configured window and collect every matching advertiser.
    async fn scan(
        &self,
        adapter: &Adapter,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<(Candidate, Peripheral)>, LinkError> {
        info!(
            "Starting BLE scan for service {} (prefix {:?}, {} ms)",
            filter.service,
            filter.name_prefix,
            self.scan_window.as_millis()
        );

        adapter
            .start_scan(ScanFilter {
                services: vec![filter.service],
            })
            .await
            .map_err(|e| LinkError::DiscoveryFailed(format!("Scan failed: {e}")))?;
        tokio::time::sleep(self.scan_window).await;
        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let mut found = Vec::new();
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| LinkError::DiscoveryFailed(e.to_string()))?;

        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if !filter.matches_name(&name) {
                debug!("Ignoring advertiser {:?}", name);
                continue;
            }
            // Some stacks do not honour the service filter; check it here too.
            if !props.services.is_empty() && !props.services.contains(&filter.service) {
                debug!("Ignoring {:?}: service not advertised", name);
                continue;
            }

            let candidate = Candidate {
                name,
                id: peripheral.id().to_string(),
                rssi: props.rssi,
            };
            info!("Found {} ({})", candidate.name, candidate.id);
            found.push((candidate, peripheral));
        }

        Ok(found)
    }
}

#[async_trait]
impl DeviceLocator for BtleLocator {
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, LinkError> {
        let adapter = Self::adapter().await?;
        let mut found = self.scan(&adapter, filter).await?;

        if found.is_empty() {
            return Err(LinkError::DiscoveryFailed(format!(
                "No device advertising {} with name prefix {:?}",
                filter.service, filter.name_prefix
            )));
        }

        let candidates: Vec<Candidate> = found.iter().map(|(c, _)| c.clone()).collect();
        let index = self
            .chooser
            .choose(&candidates)
            .filter(|i| *i < found.len())
            .ok_or(LinkError::DiscoveryCancelled)?;

        let (candidate, peripheral) = found.swap_remove(index);
        info!("Selected device {}", candidate.name);

        let device = BtleDevice::new(peripheral, adapter, self.connect_timeout);
        Ok(DeviceHandle::new(candidate.name, Arc::new(device)))
    }
}
