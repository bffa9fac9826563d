//! Bluetooth Module
//!
//! Provides the BLE link to the Mochi companion device.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    CommandChannel                        │
//! │   (text frames, read-after-write, push subscription)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │  DataLink
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - BLE     │  │ - GATT     │  │ - UUIDs  │
//! │ discovery │  │   lookup   │  │ - Frames │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs and the text command vocabulary
//! - [`transport`] - traits the rest of the crate talks to
//! - `scanner` - btleplug discovery (feature `ble`)
//! - `connection` - btleplug connection and data link (feature `ble`)
//! - [`channel`] - command channel over the data link

pub mod channel;
#[cfg(feature = "ble")]
pub mod connection;
pub mod protocol;
#[cfg(feature = "ble")]
pub mod scanner;
pub mod transport;

pub use channel::{CommandChannel, PushStream};
pub use transport::{DeviceHandle, DeviceLocator, DiscoveryFilter};
