//! Settings document mirror.
//!
//! The device owns the document. The client keeps one cached copy that is
//! replaced wholesale by every successful pull, every push notification and
//! every outgoing push; fields are never merged. Pulls and notifications are
//! not ordered against each other, so whichever is applied last wins. The wire
//! protocol carries no version to do better.

use crate::domain::document::SettingsDocument;
use crate::domain::error::LinkError;
use crate::domain::models::AppEvent;
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use crate::infrastructure::bluetooth::CommandChannel;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Pull,
    Notification,
    LocalPush,
}

#[derive(Clone)]
pub struct SettingsSync {
    mirror: Arc<Mutex<Option<SettingsDocument>>>,
    settle_delay: Duration,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl SettingsSync {
    pub fn new(settle_delay: Duration, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            mirror: Arc::new(Mutex::new(None)),
            settle_delay,
            events,
        }
    }

    /// Ask the device for its document and mirror it.
    ///
    /// A malformed reply is logged and reported as `Protocol`; the previous
    /// mirror stays in place and the session is unaffected.
    pub async fn pull(&self, channel: &CommandChannel) -> Result<SettingsDocument, LinkError> {
        channel.send(&CommandFrame::GetSettings).await?;
        tokio::time::sleep(self.settle_delay).await;
        let text = channel.read_once().await?;

        match SettingsDocument::parse(&text) {
            Ok(doc) => {
                self.apply(doc.clone(), Origin::Pull);
                Ok(doc)
            }
            Err(e) => {
                warn!("Ignoring settings reply {:?}: {}", text, e);
                Err(e)
            }
        }
    }

    /// Send `doc` to the device. No read-back; the mirror takes `doc` as is.
    pub async fn push(
        &self,
        channel: &CommandChannel,
        doc: &SettingsDocument,
    ) -> Result<(), LinkError> {
        channel
            .send(&CommandFrame::SetSettings(doc.to_json()))
            .await?;
        self.apply(doc.clone(), Origin::LocalPush);
        Ok(())
    }

    /// Mirror an unsolicited frame from the device.
    pub fn apply_notification(&self, text: &str) {
        match SettingsDocument::parse(text) {
            Ok(doc) => self.apply(doc, Origin::Notification),
            Err(e) => warn!("Ignoring push frame {:?}: {}", text, e),
        }
    }

    pub fn snapshot(&self) -> Option<SettingsDocument> {
        lock(&self.mirror).clone()
    }

    pub fn timezone(&self) -> Option<String> {
        self.snapshot()
            .and_then(|doc| doc.timezone().map(str::to_string))
    }

    fn apply(&self, doc: SettingsDocument, origin: Origin) {
        let previous = lock(&self.mirror).replace(doc.clone());

        let changed = doc.changed_keys(previous.as_ref());
        if changed.is_empty() {
            debug!("Settings unchanged ({:?})", origin);
            return;
        }

        info!("Settings updated from {:?}: {}", origin, changed.join(", "));
        let _ = self.events.send(AppEvent::SettingsChanged {
            document: doc,
            changed,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
