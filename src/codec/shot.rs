//! Shot telemetry decoding.
//!
//! A measurement notification decrypts to a 20+ byte frame of six 16-bit
//! little-endian fields. The decoded record uses the simulator's exact JSON
//! field names, so every serde rename here is load-bearing.

use serde::{Deserialize, Serialize};

/// Device identifier reported to the simulator.
pub const DEVICE_ID: &str = "GSPro LM 1.1";

/// Unit system for ball/club speeds.
pub const UNITS: &str = "Yards";

/// Simulator API version tag.
pub const API_VERSION: &str = "1";

/// Raw-to-mph speed multiplier (device reports tenths of m/s).
const SPEED_MULTIPLIER: f64 = 2.2375;

/// One decoded shot, consumed immediately by the downstream sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    #[serde(rename = "Units")]
    pub units: String,
    #[serde(rename = "ShotNumber")]
    pub shot_number: u32,
    #[serde(rename = "APIversion")]
    pub api_version: String,
    #[serde(rename = "BallData")]
    pub ball_data: BallData,
    #[serde(rename = "ClubData")]
    pub club_data: ClubData,
    #[serde(rename = "ShotDataOptions")]
    pub shot_data_options: ShotDataOptions,
}

/// Ball flight measurements in simulator units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallData {
    #[serde(rename = "Speed")]
    pub speed: f64,
    #[serde(rename = "SpinAxis")]
    pub spin_axis: f64,
    #[serde(rename = "TotalSpin")]
    pub total_spin: f64,
    #[serde(rename = "BackSpin")]
    pub back_spin: f64,
    #[serde(rename = "SideSpin")]
    pub side_spin: f64,
    #[serde(rename = "HLA")]
    pub hla: f64,
    #[serde(rename = "VLA")]
    pub vla: f64,
}

/// Club measurements (head speed only on this hardware).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubData {
    #[serde(rename = "Speed")]
    pub speed: f64,
}

/// Capability flags the simulator inspects per shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotDataOptions {
    #[serde(rename = "ContainsBallData")]
    pub contains_ball_data: bool,
    #[serde(rename = "ContainsClubData")]
    pub contains_club_data: bool,
    #[serde(rename = "LaunchMonitorIsReady")]
    pub launch_monitor_is_ready: bool,
    #[serde(rename = "LaunchMonitorBallDetected")]
    pub launch_monitor_ball_detected: bool,
    #[serde(rename = "IsHeartBeat")]
    pub is_heartbeat: bool,
}

/// Decode one decrypted measurement frame into a [`ShotRecord`].
///
/// Field layout (all 16-bit little-endian):
/// offset 0 club head speed, 2 ball speed, 4 HLA, 6 VLA, 8 spin axis
/// (all signed, tenths), 10 total spin (unsigned, rpm).
///
/// Returns `None` for frames shorter than 20 bytes; a bad frame is dropped,
/// never a session fault. The caller supplies the monotonic shot number.
pub fn parse_shot_frame(bytes: &[u8], shot_number: u32) -> Option<ShotRecord> {
    if bytes.len() < 20 {
        tracing::debug!(len = bytes.len(), "shot frame too short");
        return None;
    }

    let read_i16 = |offset: usize| i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f64;
    let read_u16 = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f64;

    let club_head_speed = round2(read_i16(0) / 10.0 * SPEED_MULTIPLIER);
    let ball_speed = round2(read_i16(2) / 10.0 * SPEED_MULTIPLIER);
    let hla = read_i16(4) / 10.0;
    let vla = read_i16(6) / 10.0;
    let spin_axis = read_i16(8) / 10.0;
    let total_spin = read_u16(10);

    let spin_axis_rad = spin_axis.to_radians();
    let back_spin = round1(total_spin * spin_axis_rad.cos());
    let side_spin = round1(total_spin * spin_axis_rad.sin());

    Some(ShotRecord {
        device_id: DEVICE_ID.to_string(),
        units: UNITS.to_string(),
        shot_number,
        api_version: API_VERSION.to_string(),
        ball_data: BallData {
            speed: ball_speed,
            spin_axis,
            total_spin,
            back_spin,
            side_spin,
            hla,
            vla,
        },
        club_data: ClubData {
            speed: club_head_speed,
        },
        shot_data_options: ShotDataOptions {
            contains_ball_data: true,
            contains_club_data: true,
            launch_monitor_is_ready: true,
            launch_monitor_ball_detected: true,
            is_heartbeat: false,
        },
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
