use anyhow::Context;
use clap::Parser;
use mochi_link::application::session::{SessionConfig, SessionManager};
use mochi_link::application::time_sync::{SystemClock, TimeSync};
use mochi_link::domain::settings::{app_config_dir, SettingsService};
use mochi_link::infrastructure::bluetooth::DeviceLocator;
use mochi_link::infrastructure::logging::init_logger;
use mochi_link::infrastructure::preferences::JsonPreferenceStore;
use mochi_link::infrastructure::time_api::TimeApiClient;
use mochi_link::presentation::console::ConsoleApp;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mochi-link", version, about = "BLE companion for Mochi devices")]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the advertised name prefix to search for
    #[arg(long)]
    name_prefix: Option<String>,

    /// Override the log level, e.g. `debug` or `mochi_link=trace`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings_service = match &args.config {
        Some(path) => SettingsService::open(path.clone()),
        None => SettingsService::new()?,
    };
    let prefix_saved = args
        .name_prefix
        .as_deref()
        .map(|prefix| settings_service.set_name_prefix(prefix));
    if let Some(level) = args.log_level {
        settings_service.get_mut().log_settings.level = level;
    }

    let base_dir = match settings_service.path().parent() {
        Some(dir) => dir.to_path_buf(),
        None => app_config_dir()?,
    };
    let _logging_guard = init_logger(&settings_service.get().log_settings, &base_dir)
        .map_err(|e| eprintln!("Failed to initialize logging: {e:#}"))
        .ok();

    info!("Starting Mochi Link");
    info!("Settings file: {}", settings_service.path().display());
    if let Some(Err(e)) = prefix_saved {
        warn!("Failed to save name prefix: {:#}", e);
    }

    let settings = settings_service.get();
    let locator = build_locator(settings)?;
    let time_source = TimeApiClient::new(
        &settings.time_sync.api_base_url,
        Duration::from_millis(settings.time_sync.request_timeout_ms),
    )
    .context("Failed to create time service client")?;
    let time_sync = TimeSync::new(
        Arc::new(time_source),
        Arc::new(SystemClock),
        settings.time_sync.dst_offset_secs,
    );
    let preferences = Arc::new(JsonPreferenceStore::open(base_dir.join("preferences.json")));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let manager = SessionManager::new(
        SessionConfig::from_settings(settings)?,
        locator,
        time_sync,
        preferences,
        events_tx,
    );

    ConsoleApp::new(manager, events_rx).run().await?;
    info!("Shutting down");
    Ok(())
}

#[cfg(feature = "ble")]
fn build_locator(
    settings: &mochi_link::domain::settings::AppSettings,
) -> anyhow::Result<Arc<dyn DeviceLocator>> {
    use mochi_link::infrastructure::bluetooth::scanner::BtleLocator;
    use mochi_link::infrastructure::bluetooth::transport::FirstMatch;

    Ok(Arc::new(BtleLocator::new(
        Arc::new(FirstMatch),
        Duration::from_millis(settings.ble.scan_window_ms),
        Duration::from_millis(settings.ble.connect_timeout_ms),
    )))
}

#[cfg(not(feature = "ble"))]
fn build_locator(
    _settings: &mochi_link::domain::settings::AppSettings,
) -> anyhow::Result<Arc<dyn DeviceLocator>> {
    anyhow::bail!("Built without the `ble` feature; no Bluetooth backend available")
}
