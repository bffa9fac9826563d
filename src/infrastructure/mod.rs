pub mod bluetooth;
pub mod logging;
pub mod preferences;
pub mod time_api;
