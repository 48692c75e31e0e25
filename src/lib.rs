//! Rust library for controlling Denon and Marantz AV receivers
//!
//! This library bridges a smart-home hub to a receiver's network control
//! protocol. It supports:
//!
//! - Discovery via SSDP multicast, or statically configured addresses
//! - A persistent telnet-style command/status channel with an HTTP
//!   request/response fallback
//! - Power, volume, mute and input control per zone
//! - Tuner band, frequency and preset handling
//! - Input rename/hide management
//! - Remote-control key passthrough
//! - Flicker-free state: locally-set values are held until the device
//!   confirms them
//!
//! # Quick Start
//!
//! ```no_run
//! use denon_avr::{AvrBridge, BridgeConfig, Intent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bridge = AvrBridge::new(BridgeConfig::default());
//!     bridge.start().await;
//!
//!     // Wait for the first discovery window to close
//!     tokio::time::sleep(tokio::time::Duration::from_secs(12)).await;
//!
//!     for id in bridge.device_ids() {
//!         if let Some(state) = bridge.device_state(&id) {
//!             println!("Found {} at {}", state.info.friendly_name, state.address);
//!         }
//!         bridge.set(&id, Intent::Power { zone: 1, on: true }).await?;
//!         bridge
//!             .set(
//!                 &id,
//!                 Intent::SelectInput {
//!                     zone: 1,
//!                     key: "BLU-RAY".to_string(),
//!                 },
//!             )
//!             .await?;
//!     }
//!
//!     // Watch for state changes
//!     let mut updates = bridge.subscribe_updates();
//!     while let Ok(id) = updates.recv().await {
//!         println!("Device updated: {}", id);
//!         break;
//!     }
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Discovery**: SSDP scan plus HTTP descriptor-bundle fetch
//! - **Transport**: persistent line channel with request/response fallback
//! - **Telegram**: line demultiplexing and telegram decoding
//! - **State**: normalization into a canonical per-zone/per-input model
//! - **Command**: intent-to-telegram encoding
//! - **Reconcile**: local override cache hiding device echo latency

mod client;
mod command;
mod discovery;
mod error;
mod hash;
mod reconcile;
mod state;
mod subscription;
mod telegram;
mod transport;
mod types;

// Public exports
pub use client::{AvrBridge, BridgeConfig};
pub use command::{Intent, RemoteKey};
pub use error::{AvrError, Result};
pub use hash::stable_id;
pub use subscription::UpdateReceiver;
pub use telegram::{db_to_steps, steps_to_db};
pub use transport::TransportConfig;
pub use types::{
    Band, DeviceId, DeviceInfo, DeviceState, Input, InputType, Preset, PresetSlot, TransportMode,
    TunerStatus, VolumeDisplay, Zone, ZoneId,
};
