//! Time service client (timeapi.io shape).

use crate::domain::error::LinkError;
use crate::domain::time::RemoteTime;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Current wall-clock fields in `zone`.
    async fn current_time(&self, zone: &str) -> Result<RemoteTime, LinkError>;

    /// IANA zones the service knows about.
    async fn available_zones(&self) -> Result<Vec<String>, LinkError>;
}

pub struct TimeApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl TimeApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mochi-link/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TimeSource for TimeApiClient {
    async fn current_time(&self, zone: &str) -> Result<RemoteTime, LinkError> {
        let url = format!("{}/api/Time/current/zone", self.base_url);
        debug!("GET {} timeZone={}", url, zone);

        let time = self
            .client
            .get(&url)
            .query(&[("timeZone", zone)])
            .send()
            .await?
            .error_for_status()?
            .json::<RemoteTime>()
            .await?;
        Ok(time)
    }

    async fn available_zones(&self) -> Result<Vec<String>, LinkError> {
        let url = format!("{}/api/TimeZone/AvailableTimeZones", self.base_url);
        debug!("GET {}", url);

        let zones = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<String>>()
            .await?;
        Ok(zones)
    }
}
