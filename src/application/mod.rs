pub mod session;
pub mod settings_sync;
pub mod time_sync;
