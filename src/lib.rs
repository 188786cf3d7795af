//! launchbridge - BLE launch monitor to simulator bridge
//!
//! Connects a Bluetooth Low Energy golf launch monitor to a simulator over
//! newline-delimited JSON TCP: device discovery and pairing, the encrypted
//! cloud-token handshake, live shot-telemetry decoding, and a heartbeat
//! supervisor that recovers from silent notification loss.

pub mod auth;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod device;
pub mod sink;

// Re-export commonly used types
pub use auth::{AuthClient, TokenProvider};
pub use cipher::WireCipher;
pub use codec::ShotRecord;
pub use config::BridgeConfig;
pub use device::{DeviceSession, SessionError, SessionEvent, SessionState};
pub use sink::GsproSink;
