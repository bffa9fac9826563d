//! Session lifecycle.
//!
//! ```text
//! Idle --connect()--> Discovering --chosen--> Connecting --negotiated--> Ready
//! Ready --disconnect()--> Idle
//! Ready --transport lost--> Lost --> Idle
//! ```
//!
//! Everything a session owns (device, channel, settings mirror, background
//! tasks) lives in one [`Session`] value that is created on `Ready` and
//! dropped when the session ends. A loss detected in the background collapses
//! the channel immediately; the empty shell is reaped on the next call.

use crate::application::settings_sync::SettingsSync;
use crate::application::time_sync::TimeSync;
use crate::domain::document::SettingsDocument;
use crate::domain::error::LinkError;
use crate::domain::models::{
    AppEvent, ConnectionState, MessageSeverity, StatusMessage, TimeSample,
};
use crate::domain::settings::AppSettings;
use crate::domain::time::parse_zone;
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame, DeviceAction};
use crate::infrastructure::bluetooth::transport::{BleDevice, DataLink};
use crate::infrastructure::bluetooth::{CommandChannel, DeviceHandle, DeviceLocator, DiscoveryFilter};
use crate::infrastructure::preferences::{PreferenceStore, TIMEZONE_PREFERENCE};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub filter: DiscoveryFilter,
    pub data_char: Uuid,
    pub stabilization_delay: Duration,
    pub settle_delay: Duration,
    pub default_timezone: String,
}

impl SessionConfig {
    pub fn from_settings(settings: &AppSettings) -> anyhow::Result<Self> {
        Ok(Self {
            filter: DiscoveryFilter {
                name_prefix: settings.ble.name_prefix.clone(),
                service: protocol::parse_uuid(&settings.ble.service_uuid)?,
            },
            data_char: protocol::parse_uuid(&settings.ble.data_char_uuid)?,
            stabilization_delay: settings.timing.stabilization_delay(),
            settle_delay: settings.timing.settle_delay(),
            default_timezone: settings.time_sync.default_timezone.clone(),
        })
    }
}

struct Session {
    device: DeviceHandle,
    channel: CommandChannel,
    settings: SettingsSync,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SessionManager {
    config: SessionConfig,
    locator: Arc<dyn DeviceLocator>,
    time_sync: TimeSync,
    preferences: Arc<dyn PreferenceStore>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<AppEvent>,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        locator: Arc<dyn DeviceLocator>,
        time_sync: TimeSync,
        preferences: Arc<dyn PreferenceStore>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            locator,
            time_sync,
            preferences,
            state: Arc::new(state),
            events,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.live_session().map(|s| s.device.name())
    }

    /// Discover, connect and bootstrap a session.
    ///
    /// Discovery may prompt the user, so this must run in response to a
    /// direct user action. On any failure before `Ready` the manager is back
    /// in `Idle` with nothing left over.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        self.reap();
        if self.session.is_some() || self.state() != ConnectionState::Idle {
            return Err(LinkError::AlreadyActive);
        }

        self.set_state(ConnectionState::Discovering);
        let handle = match self.locator.discover(&self.config.filter).await {
            Ok(handle) => handle,
            Err(e) => {
                self.abort_connect(&e);
                return Err(e);
            }
        };

        self.set_state(ConnectionState::Connecting);
        let (link, disconnects) = match self.negotiate(handle.device().as_ref()).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if let Err(close_err) = handle.device().disconnect().await {
                    debug!("Cleanup disconnect failed: {}", close_err);
                }
                self.abort_connect(&e);
                return Err(e);
            }
        };

        let channel = CommandChannel::new(link, self.state.clone(), self.events.clone());
        let watcher = spawn_loss_watcher(handle.device().clone(), channel.clone(), disconnects);
        self.session = Some(Session {
            device: handle.clone(),
            channel,
            settings: SettingsSync::new(self.config.settle_delay, self.events.clone()),
            tasks: vec![watcher],
        });

        self.set_state(ConnectionState::Ready);
        info!("Connected to {}", handle.name());
        let _ = self
            .events
            .send(AppEvent::DeviceConnected(handle.name().to_string()));
        self.notify(format!("Connected: {}", handle.name()), MessageSeverity::Success);

        if let Err(e) = self.bootstrap().await {
            warn!("Session bootstrap failed: {}", e);
            self.reap();
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate(
        &self,
        device: &dyn BleDevice,
    ) -> Result<(Arc<dyn DataLink>, BoxStream<'static, ()>), LinkError> {
        // Subscribe first so a drop during negotiation is not missed.
        let disconnects = device.disconnect_events().await?;
        device.connect().await?;
        let link = device
            .open_channel(self.config.filter.service, self.config.data_char)
            .await?;
        Ok((link, disconnects))
    }

    /// Pull, subscribe, settle, then set the clock. Strictly in this order:
    /// the device drops traffic issued right after negotiation.
    async fn bootstrap(&mut self) -> Result<(), LinkError> {
        let (channel, settings) = self.live_parts().ok_or(LinkError::NotConnected)?;

        match settings.pull(&channel).await {
            Ok(_) => {}
            Err(LinkError::Protocol(e)) => warn!("Initial settings unusable: {}", e),
            Err(e) => return Err(e),
        }

        let mut pushes = channel.subscribe().await?;
        let mirror = settings.clone();
        let consumer = tokio::spawn(async move {
            while let Some(text) = pushes.recv().await {
                mirror.apply_notification(&text);
            }
        });
        if let Some(session) = self.session.as_mut() {
            session.tasks.push(consumer);
        }

        tokio::time::sleep(self.config.stabilization_delay).await;

        let zone = self.resolve_timezone(Some(&settings));
        let sample = self.time_sync.run(&channel, &zone).await?;
        let _ = self.events.send(AppEvent::TimeSynced(sample));
        Ok(())
    }

    /// End the session. No-op when idle.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("Disconnect requested while idle");
            return;
        };
        if !session.channel.is_open() {
            // Already lost; the loss watcher releases the device.
            debug!("Disconnect requested after loss, dropping session");
            return;
        }

        session.channel.close();
        for task in session.tasks {
            task.abort();
        }
        if let Err(e) = session.device.device().disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        if self.state() != ConnectionState::Idle {
            self.set_state(ConnectionState::Idle);
        }

        info!("Disconnected from device");
        self.notify("Disconnected from device".to_string(), MessageSeverity::Info);
    }

    /// Drop a session whose channel collapsed in the background.
    pub fn reap(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|s| !s.channel.is_open())
        {
            debug!("Reaping lost session");
            self.session = None;
        }
    }

    pub async fn send(&mut self, frame: &CommandFrame) -> Result<(), LinkError> {
        let (channel, _) = self.live_parts().ok_or(LinkError::NotConnected)?;
        let result = channel.send(frame).await;
        if matches!(&result, Err(e) if e.is_transport()) {
            self.reap();
        }
        result
    }

    pub async fn send_action(&mut self, action: DeviceAction) -> Result<(), LinkError> {
        self.send(&CommandFrame::from(action)).await
    }

    /// Explicit re-read of the device document.
    pub async fn pull_settings(&mut self) -> Result<SettingsDocument, LinkError> {
        let (channel, settings) = self.live_parts().ok_or(LinkError::NotConnected)?;
        let result = settings.pull(&channel).await;
        self.reap();
        result
    }

    pub fn settings_snapshot(&self) -> Option<SettingsDocument> {
        self.live_session().and_then(|s| s.settings.snapshot())
    }

    /// Remember `zone` and, when connected, push it to the device and resync
    /// the clock. Returns the sample sent, if any.
    pub async fn save_timezone(&mut self, zone: &str) -> Result<Option<TimeSample>, LinkError> {
        if parse_zone(zone).is_none() {
            warn!("{:?} is not a known IANA timezone", zone);
            self.notify(
                format!("Unknown timezone {zone}, saving anyway"),
                MessageSeverity::Warning,
            );
        }
        if let Err(e) = self.preferences.set(TIMEZONE_PREFERENCE, zone) {
            warn!("Failed to persist timezone: {:#}", e);
        }

        let Some((channel, settings)) = self.live_parts() else {
            info!("Timezone {} saved, will apply on next connection", zone);
            return Ok(None);
        };

        let mut doc = settings.snapshot().unwrap_or_default();
        doc.set_timezone(zone);

        let result: Result<TimeSample, LinkError> = async {
            settings.push(&channel, &doc).await?;
            self.time_sync.run(&channel, zone).await
        }
        .await;

        match result {
            Ok(sample) => {
                let _ = self.events.send(AppEvent::TimeSynced(sample));
                Ok(Some(sample))
            }
            Err(e) => {
                self.reap();
                Err(e)
            }
        }
    }

    /// Set the device clock now.
    pub async fn sync_time(&mut self) -> Result<TimeSample, LinkError> {
        let (channel, settings) = self.live_parts().ok_or(LinkError::NotConnected)?;
        let zone = self.resolve_timezone(Some(&settings));
        match self.time_sync.run(&channel, &zone).await {
            Ok(sample) => {
                let _ = self.events.send(AppEvent::TimeSynced(sample));
                Ok(sample)
            }
            Err(e) => {
                self.reap();
                Err(e)
            }
        }
    }

    /// Zones offered to the user, or just the default if the service is down.
    pub async fn available_zones(&self) -> Vec<String> {
        match self.time_sync.available_zones().await {
            Ok(zones) if !zones.is_empty() => zones,
            Ok(_) => vec![self.config.default_timezone.clone()],
            Err(e) => {
                warn!("Could not list timezones: {}", e);
                vec![self.config.default_timezone.clone()]
            }
        }
    }

    /// Mirror first, then the saved preference, then the configured default.
    pub fn current_timezone(&self) -> String {
        let settings = self.live_session().map(|s| &s.settings);
        self.resolve_timezone(settings)
    }

    fn resolve_timezone(&self, settings: Option<&SettingsSync>) -> String {
        settings
            .and_then(SettingsSync::timezone)
            .or_else(|| self.preferences.get(TIMEZONE_PREFERENCE))
            .unwrap_or_else(|| self.config.default_timezone.clone())
    }

    fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.channel.is_open())
    }

    fn live_parts(&mut self) -> Option<(CommandChannel, SettingsSync)> {
        self.reap();
        self.session
            .as_ref()
            .map(|s| (s.channel.clone(), s.settings.clone()))
    }

    fn abort_connect(&self, err: &LinkError) {
        match err {
            LinkError::DiscoveryCancelled => {
                info!("Device selection cancelled");
                self.notify("Search cancelled".to_string(), MessageSeverity::Info);
            }
            other => {
                warn!("Connection failed: {}", other);
                self.notify(format!("Connection failed: {other}"), MessageSeverity::Error);
            }
        }
        self.set_state(ConnectionState::Idle);
    }

    fn set_state(&self, state: ConnectionState) {
        info!("Connection state: {}", state);
        self.state.send_replace(state);
        let _ = self.events.send(AppEvent::ConnectionStatus(state));
    }

    fn notify(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .events
            .send(AppEvent::LogMessage(StatusMessage { message, severity }));
    }
}

/// Collapse the channel when the device drops, and release the device once
/// the channel is gone for any reason.
fn spawn_loss_watcher(
    device: Arc<dyn BleDevice>,
    channel: CommandChannel,
    mut disconnects: BoxStream<'static, ()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = disconnects.next() => channel.collapse("device disconnected"),
            _ = channel.lost() => {}
        }
        if let Err(e) = device.disconnect().await {
            debug!("Post-loss disconnect failed: {}", e);
        }
    })
}
