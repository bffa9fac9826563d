//! Command Channel
//!
//! Wraps the data characteristic of the current session. Any transport
//! failure seen here collapses the session: the link is dropped, the state
//! goes `Lost` then `Idle`, and every later call answers `NotConnected`
//! without touching the radio.

use crate::domain::error::LinkError;
use crate::domain::models::{AppEvent, ConnectionState, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame};
use crate::infrastructure::bluetooth::transport::DataLink;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiving half of the push subscription.
///
/// Capacity is one frame: a push that arrives while the previous one is still
/// unread is dropped.
pub struct PushStream {
    rx: mpsc::Receiver<String>,
}

impl PushStream {
    /// Next push frame, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

struct Inner {
    link: Mutex<Option<Arc<dyn DataLink>>>,
    subscriber: Mutex<Option<mpsc::Sender<String>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    lost: Notify,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<AppEvent>,
}

#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl CommandChannel {
    pub fn new(
        link: Arc<dyn DataLink>,
        state: Arc<watch::Sender<ConnectionState>>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                link: Mutex::new(Some(link)),
                subscriber: Mutex::new(None),
                pump: Mutex::new(None),
                lost: Notify::new(),
                state,
                events,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    fn current_link(&self) -> Result<Arc<dyn DataLink>, LinkError> {
        lock(&self.inner.link)
            .clone()
            .ok_or(LinkError::NotConnected)
    }

    /// Write one frame.
    pub async fn send(&self, frame: &CommandFrame) -> Result<(), LinkError> {
        let link = self.current_link()?;
        let text = frame.encode();
        debug!("[BLE SEND] -> {}", text);

        if let Err(e) = link.write(text.as_bytes()).await {
            warn!("Write failed: {}", e);
            self.collapse(&format!("write failed: {e}"));
            return Err(LinkError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Read the characteristic once.
    ///
    /// The device answers asynchronously and never acks, so callers wait the
    /// settle delay after the write this read depends on.
    pub async fn read_once(&self) -> Result<String, LinkError> {
        let link = self.current_link()?;

        let bytes = match link.read().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Read failed: {}", e);
                self.collapse(&format!("read failed: {e}"));
                return Err(LinkError::ReadFailed(e.to_string()));
            }
        };
        let text = protocol::decode_frame(&bytes)?;
        debug!("[BLE READ] <- {}", text);
        Ok(text)
    }

    /// Register the single push subscriber, replacing any previous one.
    pub async fn subscribe(&self) -> Result<PushStream, LinkError> {
        let link = self.current_link()?;

        let mut notifications = match link.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Enabling notifications failed: {}", e);
                self.collapse(&format!("subscribe failed: {e}"));
                return Err(LinkError::Transport(e.to_string()));
            }
        };

        let (tx, rx) = mpsc::channel(1);
        if lock(&self.inner.subscriber).replace(tx).is_some() {
            warn!("Replacing existing push subscriber");
        }

        let inner = Arc::downgrade(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(bytes) = notifications.next().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let text = match protocol::decode_frame(&bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping push frame: {}", e);
                        continue;
                    }
                };
                debug!("[BLE PUSH] <- {}", text);

                let sender = lock(&inner.subscriber).clone();
                match sender {
                    Some(tx) => {
                        if tx.try_send(text).is_err() {
                            debug!("Push frame dropped, subscriber busy or gone");
                        }
                    }
                    None => break,
                }
            }
            debug!("Push pump finished");
        });

        if let Some(old) = lock(&self.inner.pump).replace(pump) {
            old.abort();
        }

        Ok(PushStream { rx })
    }

    /// Resolves once this channel has collapsed.
    pub async fn lost(&self) {
        self.inner.lost.notified().await
    }

    /// Transport-level loss. Idempotent; only the first call reports.
    pub fn collapse(&self, reason: &str) {
        if !self.release() {
            return;
        }
        warn!("Connection lost: {}", reason);
        self.inner.lost.notify_one();

        self.publish(ConnectionState::Lost);
        let _ = self.inner.events.send(AppEvent::LogMessage(StatusMessage {
            message: format!("Connection lost: {reason}"),
            severity: MessageSeverity::Error,
        }));
        self.publish(ConnectionState::Idle);
    }

    /// Orderly shutdown requested by the user.
    pub fn close(&self) {
        if self.release() {
            info!("Channel closed");
            self.inner.lost.notify_one();
            self.publish(ConnectionState::Idle);
        }
    }

    /// Drop the link, the subscriber and the pump. True if the link was still held.
    fn release(&self) -> bool {
        let held = lock(&self.inner.link).take().is_some();
        lock(&self.inner.subscriber).take();
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        held
    }

    fn publish(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
        let _ = self.inner.events.send(AppEvent::ConnectionStatus(state));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;
    use std::time::Duration;

    fn channel_with(link: Arc<MockLink>) -> (CommandChannel, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Ready);
        let (events, _rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::new(link, Arc::new(state_tx), events);
        (channel, state_rx)
    }

    #[tokio::test]
    async fn sends_one_frame_per_operation() {
        let link = MockLink::new("{}");
        let (channel, _) = channel_with(link.clone());

        channel.send(&CommandFrame::SetTime(1_710_081_000)).await.unwrap();
        channel.send(&CommandFrame::Raw("FEED".into())).await.unwrap();

        assert_eq!(link.writes(), vec!["unix:1710081000", "FEED"]);
    }

    #[tokio::test]
    async fn send_after_close_never_touches_transport() {
        let link = MockLink::new("{}");
        let (channel, state) = channel_with(link.clone());

        channel.close();
        let err = channel.send(&CommandFrame::GetSettings).await.unwrap_err();

        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(link.write_attempts(), 0);
        assert_eq!(*state.borrow(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn write_failure_collapses_to_idle() {
        let link = MockLink::new("{}");
        link.fail_writes(true);
        let (channel, state) = channel_with(link.clone());

        let err = channel.send(&CommandFrame::GetSettings).await.unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        assert!(!channel.is_open());
        assert_eq!(*state.borrow(), ConnectionState::Idle);

        let err = channel.send(&CommandFrame::GetSettings).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(link.write_attempts(), 1);
    }

    #[tokio::test]
    async fn read_failure_collapses_to_idle() {
        let link = MockLink::new("{}");
        link.fail_reads(true);
        let (channel, state) = channel_with(link);

        let err = channel.read_once().await.unwrap_err();
        assert!(matches!(err, LinkError::ReadFailed(_)));
        assert_eq!(*state.borrow(), ConnectionState::Idle);
        assert!(matches!(
            channel.read_once().await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn read_returns_device_text() {
        let link = MockLink::new(r#"{"timezone":"Asia/Tokyo"}"#);
        let (channel, _) = channel_with(link);
        channel.send(&CommandFrame::GetSettings).await.unwrap();
        assert_eq!(
            channel.read_once().await.unwrap(),
            r#"{"timezone":"Asia/Tokyo"}"#
        );
    }

    #[tokio::test]
    async fn push_frames_reach_the_single_subscriber() {
        let link = MockLink::new("{}");
        let (channel, _) = channel_with(link.clone());
        let mut pushes = channel.subscribe().await.unwrap();

        link.push(r#"{"timezone":"UTC"}"#);
        assert_eq!(pushes.recv().await.unwrap(), r#"{"timezone":"UTC"}"#);
    }

    #[tokio::test]
    async fn at_most_one_push_in_flight() {
        let link = MockLink::new("{}");
        let (channel, _) = channel_with(link.clone());
        let mut pushes = channel.subscribe().await.unwrap();

        link.push("first");
        link.push("second");
        link.push("third");
        // Let the pump drain the transport without the subscriber reading.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pushes.recv().await.unwrap(), "first");
        channel.close();
        assert_eq!(pushes.recv().await, None);
    }

    #[tokio::test]
    async fn new_subscriber_replaces_old_one() {
        let link = MockLink::new("{}");
        let (channel, _) = channel_with(link.clone());
        let mut old = channel.subscribe().await.unwrap();
        let mut new = channel.subscribe().await.unwrap();

        link.push("hello");
        assert_eq!(new.recv().await.unwrap(), "hello");
        assert_eq!(old.recv().await, None);
    }

    #[tokio::test]
    async fn collapse_reports_once() {
        let link = MockLink::new("{}");
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Ready);
        let (events, mut rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::new(link, Arc::new(state_tx), events);

        channel.collapse("gone");
        channel.collapse("gone again");
        channel.close();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::ConnectionStatus(s) = event {
                states.push(s);
            }
        }
        assert_eq!(states, vec![ConnectionState::Lost, ConnectionState::Idle]);
    }
}
