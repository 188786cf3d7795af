//! Session types: states, errors, events, handshake frames and metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::cipher::WireCipher;
use crate::codec;

/// Arm command payload (encrypted before writing).
pub const ARM_COMMAND: [u8; 7] = [1, 13, 0, 1, 0, 0, 0];

/// Disarm command payload (encrypted before writing).
pub const DISARM_COMMAND: [u8; 7] = [1, 13, 0, 0, 0, 0, 0];

/// Best-effort disconnect notice written before tearing down the link.
pub const DISCONNECT_COMMAND: [u8; 7] = [0, 0, 0, 0, 0, 0, 0];

/// Lifecycle of the one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device; connect requests start here
    #[default]
    Idle,
    /// Scanning for a device matching the name filters
    Discovering,
    /// GATT connect in progress
    Connecting,
    /// Primary service resolved, characteristics bound
    ServiceBound,
    /// All three notify characteristics subscribed
    Subscribed,
    /// Auth request written, waiting for the write-response round trip
    Authenticating,
    /// Configuration accepted; live telemetry expected, heartbeats running
    Armed,
    /// Unrecoverable fault; disconnect to return to Idle
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Discovering => write!(f, "Discovering"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::ServiceBound => write!(f, "Service Bound"),
            SessionState::Subscribed => write!(f, "Subscribed"),
            SessionState::Authenticating => write!(f, "Authenticating"),
            SessionState::Armed => write!(f, "Armed"),
            SessionState::Error => write!(f, "Error"),
        }
    }
}

/// Errors surfaced by session operations.
///
/// Mid-session faults (decrypt, parse, heartbeat writes) never appear here;
/// they are logged, counted and dropped so the session keeps running.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bluetooth adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// No matching device was found during the scan window
    #[error("No launch monitor found: {0}")]
    Discovery(String),

    /// GATT connect or primary-service resolution failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// One or more notification subscriptions failed
    #[error("Failed to subscribe to notifications: {0}")]
    Subscription(String),

    /// Device or cloud rejected the auth handshake
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A characteristic write failed
    #[error("Write failed: {0}")]
    Write(String),

    /// Operation requires a connected device
    #[error("No device connected")]
    NotConnected,
}

/// Decrypted device event, classified by its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A shot was taken
    ShotTaken,
    /// The monitor is processing a shot
    ShotProcessing,
    /// Monitor ready for the next shot
    Ready,
    /// Battery level report (percentage)
    Battery(u8),
    /// Alarm reset to armed baseline
    AlarmReset,
    /// Device disarmed itself
    Disarmed,
    /// Unclassified event kind; logged and otherwise ignored
    Unknown(u8),
}

impl DeviceEvent {
    /// Classify a decrypted events-characteristic frame.
    ///
    /// Returns `None` for an empty frame. Unknown kinds never fail; they
    /// surface as [`DeviceEvent::Unknown`] so callers stay in state.
    pub fn classify(frame: &[u8]) -> Option<Self> {
        let kind = *frame.first()?;
        let detail = frame.get(1).copied().unwrap_or(0);

        Some(match kind {
            0 => DeviceEvent::ShotTaken,
            1 => DeviceEvent::ShotProcessing,
            2 => DeviceEvent::Ready,
            3 => DeviceEvent::Battery(detail),
            5 if detail == 0 => DeviceEvent::AlarmReset,
            5 if detail == 1 => DeviceEvent::Disarmed,
            other => DeviceEvent::Unknown(other),
        })
    }
}

/// Events emitted on the session's outbound channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State machine transition
    StateChanged(SessionState),
    /// Classified device event
    Device(DeviceEvent),
    /// A decoded shot was forwarded downstream
    Shot(crate::codec::ShotRecord),
    /// A non-fatal fault was dropped (also counted in metrics)
    Fault(String),
}

/// What a write-response notification asks the session to do.
///
/// Write-response frames arrive in the clear: `[status, sub_status,
/// payload...]`. Status 2 is the device requesting initial parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Exchange the little-endian user id for a session token
    RequestToken { user_id: u32 },
    /// Handshake refused; `token_expired` when sub-status is 1
    Rejected { token_expired: bool },
    /// Not a handshake frame; nothing to do
    Ignore,
}

impl HandshakeAction {
    /// Parse a raw write-response frame.
    pub fn parse(frame: &[u8]) -> Self {
        if frame.len() < 2 {
            return HandshakeAction::Ignore;
        }

        let status = frame[0];
        let sub_status = frame[1];

        if status != 2 {
            return HandshakeAction::Ignore;
        }

        // Needs sub-status 0 and at least 4 payload bytes for the user id.
        if sub_status != 0 || frame.len() < 6 {
            return HandshakeAction::Rejected {
                token_expired: sub_status == 1,
            };
        }

        let user_id = codec::bytes_to_int32(&frame[2..6], true) as u32;
        HandshakeAction::RequestToken { user_id }
    }
}

/// Build the unencrypted authentication-request frame:
/// `int32le(1) ++ encryption_type ++ 32-byte key`.
pub fn auth_request_frame(cipher: &WireCipher) -> Vec<u8> {
    let mut frame = Vec::with_capacity(38);
    frame.extend_from_slice(&codec::int32_to_bytes(1, true));
    frame.extend_from_slice(&WireCipher::encryption_type_bytes());
    frame.extend_from_slice(cipher.key_bytes());
    frame
}

/// Build the plaintext configuration frame for a session token:
/// `[1,2,0,0] ++ air_pressure(0.0) ++ temperature(15.0) ++ token_u64_le ++
/// [0,0]`. Fails when the token is not numeric.
pub fn configuration_frame(token: &str) -> Result<Vec<u8>, SessionError> {
    let token_value: u64 = token
        .parse()
        .map_err(|_| SessionError::Auth(format!("non-numeric session token: {token:?}")))?;

    let mut frame = Vec::with_capacity(18);
    frame.extend_from_slice(&[1, 2, 0, 0]);
    frame.extend_from_slice(&codec::air_pressure_bytes(0.0));
    frame.extend_from_slice(&codec::temperature_bytes(15.0));
    frame.extend_from_slice(&codec::u64_to_bytes(token_value));
    frame.extend_from_slice(&[0, 0]);
    Ok(frame)
}

/// Counters for faults the session drops on purpose.
///
/// Every silently-handled error bumps one of these so tests and operators
/// can observe what the logs alone would hide.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub decrypt_failures: AtomicU64,
    pub parse_failures: AtomicU64,
    pub write_failures: AtomicU64,
    pub heartbeat_misses: AtomicU64,
    pub auth_failures: AtomicU64,
    pub sink_failures: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_events() {
        assert_eq!(DeviceEvent::classify(&[0]), Some(DeviceEvent::ShotTaken));
        assert_eq!(DeviceEvent::classify(&[2, 9]), Some(DeviceEvent::Ready));
        assert_eq!(DeviceEvent::classify(&[3, 87]), Some(DeviceEvent::Battery(87)));
        assert_eq!(DeviceEvent::classify(&[5, 0]), Some(DeviceEvent::AlarmReset));
        assert_eq!(DeviceEvent::classify(&[5, 1]), Some(DeviceEvent::Disarmed));
        assert_eq!(DeviceEvent::classify(&[9]), Some(DeviceEvent::Unknown(9)));
        assert_eq!(DeviceEvent::classify(&[]), None);
    }

    #[test]
    fn auth_request_frame_layout() {
        let frame = auth_request_frame(&WireCipher::new());
        assert_eq!(frame.len(), 38);
        assert_eq!(&frame[..4], &[1, 0, 0, 0]);
        assert_eq!(&frame[4..6], &[0, 1]);
        assert_eq!(&frame[6..], WireCipher::new().key_bytes());
    }

    #[test]
    fn configuration_frame_layout() {
        let frame = configuration_frame("123456789").unwrap();
        assert_eq!(frame.len(), 18);
        assert_eq!(&frame[..4], &[1, 2, 0, 0]);
        // air_pressure_bytes(0.0) and temperature_bytes(15.0) fixtures
        assert_eq!(&frame[4..6], &[0x7D, 0xC8]);
        assert_eq!(&frame[6..8], &[0xDC, 0x05]);
        assert_eq!(&frame[8..16], &123456789u64.to_le_bytes());
        assert_eq!(&frame[16..], &[0, 0]);
    }

    #[test]
    fn non_numeric_token_is_an_auth_error() {
        assert!(configuration_frame("not-a-token").is_err());
    }
}
