//! Device clock synchronization.
//!
//! One run computes one [`TimeSample`] through a bounded cascade and sends
//! exactly one `unix:<epoch>` frame:
//!
//! 1. the time service, asked for the target zone;
//! 2. the host clock re-expressed in the target zone, with the same DST
//!    offset rule as the service sample;
//! 3. the raw host epoch, off by the zone's UTC offset.
//!
//! Nothing retries. A new sync happens on reconnect or when settings are saved.

use crate::domain::error::LinkError;
use crate::domain::models::{SourceTier, TimeSample};
use crate::domain::time::{parse_zone, reinterpret_in_zone};
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use crate::infrastructure::bluetooth::CommandChannel;
use crate::infrastructure::time_api::TimeSource;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct TimeSync {
    source: Arc<dyn TimeSource>,
    clock: Arc<dyn Clock>,
    dst_offset_secs: i64,
}

impl TimeSync {
    pub fn new(source: Arc<dyn TimeSource>, clock: Arc<dyn Clock>, dst_offset_secs: i64) -> Self {
        Self {
            source,
            clock,
            dst_offset_secs,
        }
    }

    /// Compute the device epoch for `zone`. Never fails; the tier says how
    /// much to trust it.
    pub async fn sample(&self, zone: &str) -> TimeSample {
        match self.primary(zone).await {
            Ok(epoch_seconds) => {
                return TimeSample {
                    epoch_seconds,
                    source: SourceTier::Primary,
                }
            }
            Err(e) => warn!("Time service unavailable for {}: {}", zone, e),
        }

        let now = self.clock.now();
        match parse_zone(zone) {
            Some(tz) => TimeSample {
                epoch_seconds: reinterpret_in_zone(now, tz, self.dst_offset_secs),
                source: SourceTier::LocalFallbackAdjusted,
            },
            None => {
                warn!(
                    "Unknown timezone {:?}, sending host epoch uncorrected",
                    zone
                );
                TimeSample {
                    epoch_seconds: now.timestamp(),
                    source: SourceTier::LocalFallbackRaw,
                }
            }
        }
    }

    async fn primary(&self, zone: &str) -> Result<i64, LinkError> {
        let remote = self.source.current_time(zone).await?;
        remote.to_epoch(self.dst_offset_secs).ok_or_else(|| {
            LinkError::ExternalService(format!("implausible time fields {remote:?}"))
        })
    }

    /// Sample once and set the device clock.
    pub async fn run(&self, channel: &CommandChannel, zone: &str) -> Result<TimeSample, LinkError> {
        let sample = self.sample(zone).await;
        channel
            .send(&CommandFrame::SetTime(sample.epoch_seconds))
            .await?;
        info!(
            "Device clock set to {} for {} ({:?})",
            sample.epoch_seconds, zone, sample.source
        );
        Ok(sample)
    }

    pub async fn available_zones(&self) -> Result<Vec<String>, LinkError> {
        self.source.available_zones().await
    }
}
