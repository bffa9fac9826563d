//! BLE Connection Module
//!
//! Handles device connection, GATT lookup and the data characteristic.

use crate::domain::error::LinkError;
use crate::infrastructure::bluetooth::transport::{BleDevice, DataLink};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A discovered peripheral and the adapter that saw it.
pub struct BtleDevice {
    peripheral: Peripheral,
    adapter: Adapter,
    connect_timeout: Duration,
}

impl BtleDevice {
    pub fn new(peripheral: Peripheral, adapter: Adapter, connect_timeout: Duration) -> Self {
        Self {
            peripheral,
            adapter,
            connect_timeout,
        }
    }
}

#[async_trait]
impl BleDevice for BtleDevice {
    async fn connect(&self) -> Result<(), LinkError> {
        info!("Connecting to {}", self.peripheral.id());

        // BlueZ can block forever on Connect when the device wanders off.
        tokio::time::timeout(self.connect_timeout, self.peripheral.connect())
            .await
            .map_err(|_| LinkError::Transport("connect timed out".to_string()))??;

        tokio::time::timeout(self.connect_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| LinkError::Transport("service discovery timed out".to_string()))??;

        info!("Connected and services discovered");
        Ok(())
    }

    async fn open_channel(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn DataLink>, LinkError> {
        let services = self.peripheral.services();
        let gatt_service = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(LinkError::ServiceNotFound(service))?;
        info!("Found Mochi service");

        let data_char = gatt_service
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(characteristic))?;
        info!(
            "Found data characteristic, properties: {:?}",
            data_char.properties
        );

        Ok(Arc::new(BtleLink {
            peripheral: self.peripheral.clone(),
            characteristic: data_char,
        }))
    }

    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>, LinkError> {
        let id = self.peripheral.id();
        let events = self.adapter.events().await?;
        let disconnects = events.filter_map(move |event| {
            let hit = matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id);
            async move { hit.then_some(()) }
        });
        Ok(disconnects.boxed())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Disconnecting from {}", self.peripheral.id());
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// The data characteristic of a connected peripheral.
pub struct BtleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl DataLink for BtleLink {
    async fn write(&self, payload: &[u8]) -> Result<(), LinkError> {
        self.peripheral
            .write(&self.characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, LinkError> {
        self.peripheral
            .read(&self.characteristic)
            .await
            .map_err(|e| LinkError::ReadFailed(e.to_string()))
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Vec<u8>>, LinkError> {
        self.peripheral.subscribe(&self.characteristic).await?;
        debug!("Subscribed to {}", self.characteristic.uuid);

        let uuid = self.characteristic.uuid;
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(move |n| async move {
                if n.uuid == uuid {
                    Some(n.value)
                } else {
                    warn!("Notification from unexpected characteristic {}", n.uuid);
                    None
                }
            })
            .boxed())
    }
}
