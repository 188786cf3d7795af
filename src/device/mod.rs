//! BLE device session: discovery, link, state machine, heartbeat.

pub mod heartbeat;
pub mod link;
pub mod session;
pub mod types;

pub use link::{BtleplugConnector, DeviceConnector, GattLink};
pub use session::DeviceSession;
pub use types::{DeviceEvent, SessionError, SessionEvent, SessionState};
