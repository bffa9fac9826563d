//! In-memory doubles for the radio and the time service.

use crate::application::time_sync::Clock;
use crate::domain::error::LinkError;
use crate::domain::time::RemoteTime;
use crate::infrastructure::bluetooth::transport::{BleDevice, DataLink};
use crate::infrastructure::bluetooth::{DeviceHandle, DeviceLocator, DiscoveryFilter};
use crate::infrastructure::time_api::TimeSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(String),
    Read,
    Subscribe,
}

struct LinkState {
    device_doc: String,
    accept_settings: bool,
    fail_writes: bool,
    fail_reads: bool,
    write_attempts: usize,
    ops: Vec<(Op, Instant)>,
    push_tx: Option<UnboundedSender<Vec<u8>>>,
}

/// Fake data characteristic. Reads return the device document; a
/// `set_json:` write replaces it unless disabled.
pub struct MockLink {
    state: Mutex<LinkState>,
}

impl MockLink {
    pub fn new(device_doc: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LinkState {
                device_doc: device_doc.to_string(),
                accept_settings: true,
                fail_writes: false,
                fail_reads: false,
                write_attempts: 0,
                ops: Vec::new(),
                push_tx: None,
            }),
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.iter().map(|(op, _)| op.clone()).collect()
    }

    pub fn writes(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }

    fn instants(&self, wanted: fn(&Op) -> bool) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|(op, _)| wanted(op))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn write_instants(&self) -> Vec<Instant> {
        self.instants(|op| matches!(op, Op::Write(_)))
    }

    pub fn read_instants(&self) -> Vec<Instant> {
        self.instants(|op| matches!(op, Op::Read))
    }

    pub fn subscribe_instants(&self) -> Vec<Instant> {
        self.instants(|op| matches!(op, Op::Subscribe))
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn accept_settings(&self, accept: bool) {
        self.state.lock().unwrap().accept_settings = accept;
    }

    pub fn set_device_document(&self, doc: &str) {
        self.state.lock().unwrap().device_doc = doc.to_string();
    }

    /// Deliver a notification on the most recent subscription.
    pub fn push(&self, text: &str) {
        if let Some(tx) = &self.state.lock().unwrap().push_tx {
            let _ = tx.unbounded_send(text.as_bytes().to_vec());
        }
    }
}

#[async_trait]
impl DataLink for MockLink {
    async fn write(&self, payload: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        state.write_attempts += 1;
        if state.fail_writes {
            return Err(LinkError::Transport("mock write failure".into()));
        }

        let text = String::from_utf8_lossy(payload).into_owned();
        if let Some(doc) = text.strip_prefix("set_json:") {
            if state.accept_settings {
                state.device_doc = doc.to_string();
            }
        }
        state.ops.push((Op::Write(text), Instant::now()));
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(LinkError::ReadFailed("mock read failure".into()));
        }
        state.ops.push((Op::Read, Instant::now()));
        Ok(state.device_doc.clone().into_bytes())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Vec<u8>>, LinkError> {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock().unwrap();
        state.push_tx = Some(tx);
        state.ops.push((Op::Subscribe, Instant::now()));
        Ok(rx.boxed())
    }
}

pub struct MockDevice {
    link: Arc<MockLink>,
    has_service: bool,
    has_characteristic: bool,
    disconnect_tx: Mutex<Option<UnboundedSender<()>>>,
    disconnect_calls: AtomicUsize,
}

impl MockDevice {
    pub fn new(link: Arc<MockLink>) -> Self {
        Self {
            link,
            has_service: true,
            has_characteristic: true,
            disconnect_tx: Mutex::new(None),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_service(mut self) -> Self {
        self.has_service = false;
        self
    }

    pub fn without_characteristic(mut self) -> Self {
        self.has_characteristic = false;
        self
    }

    pub fn link(&self) -> Arc<MockLink> {
        self.link.clone()
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.disconnect_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(());
        }
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleDevice for MockDevice {
    async fn connect(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn open_channel(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn DataLink>, LinkError> {
        if !self.has_service {
            return Err(LinkError::ServiceNotFound(service));
        }
        if !self.has_characteristic {
            return Err(LinkError::CharacteristicNotFound(characteristic));
        }
        Ok(self.link.clone())
    }

    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>, LinkError> {
        let (tx, rx) = unbounded();
        *self.disconnect_tx.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Discovery {
    Found(Arc<MockDevice>),
    Cancelled,
    NothingFound,
}

pub struct MockLocator {
    outcome: Discovery,
    calls: AtomicUsize,
}

impl MockLocator {
    fn with(outcome: Discovery) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn finding(device: Arc<MockDevice>) -> Arc<Self> {
        Self::with(Discovery::Found(device))
    }

    pub fn cancelled() -> Arc<Self> {
        Self::with(Discovery::Cancelled)
    }

    pub fn nothing_found() -> Arc<Self> {
        Self::with(Discovery::NothingFound)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLocator for MockLocator {
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, LinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Discovery::Found(device) => Ok(DeviceHandle::new(
                format!("{}TEST01", filter.name_prefix),
                device.clone(),
            )),
            Discovery::Cancelled => Err(LinkError::DiscoveryCancelled),
            Discovery::NothingFound => Err(LinkError::DiscoveryFailed(
                "no matching device".into(),
            )),
        }
    }
}

pub struct MockTimeSource {
    reply: Option<RemoteTime>,
    requested: Mutex<Vec<String>>,
}

impl MockTimeSource {
    pub fn answering(reply: RemoteTime) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn requested_zones(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn current_time(&self, zone: &str) -> Result<RemoteTime, LinkError> {
        self.requested.lock().unwrap().push(zone.to_string());
        self.reply
            .clone()
            .ok_or_else(|| LinkError::ExternalService("mock time service offline".into()))
    }

    async fn available_zones(&self) -> Result<Vec<String>, LinkError> {
        Err(LinkError::ExternalService("mock time service offline".into()))
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
