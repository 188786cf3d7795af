//! GATT link to the launch monitor.
//!
//! [`GattLink`] is the narrow seam the session state machine drives: write a
//! characteristic, (re)subscribe the three notify characteristics, stream
//! notifications, disconnect. [`BtleplugConnector`] produces links from a
//! live BLE scan; tests substitute their own connector.
//!
//! All UUIDs below are the device contract and must match the firmware
//! bit-for-bit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use crate::device::types::SessionError;

/// Primary service UUID advertised by the launch monitor.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xdaf9_b2a4_e4db_4be4_816d_298a_050f_25cd);

/// Auth-request characteristic (write)
pub const AUTH_REQUEST_UUID: Uuid = Uuid::from_u128(0xb1e9_ce5b_48c8_4a28_89dd_12ff_d779_f5e1);

/// Command characteristic (write)
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x1ea0_fa51_1649_4603_9c5f_59c9_4032_3471);

/// Configure characteristic (write)
pub const CONFIGURE_UUID: Uuid = Uuid::from_u128(0xdf59_90cf_47fb_4115_8fdd_4006_1d40_af84);

/// Events characteristic (notify)
pub const EVENTS_UUID: Uuid = Uuid::from_u128(0x02e5_25fd_7960_4ef0_bfb7_de0f_5145_18ff);

/// Heartbeat characteristic (write without response)
pub const HEARTBEAT_UUID: Uuid = Uuid::from_u128(0xef6a_028e_f78b_47a4_b56c_dda6_dae8_5cbf);

/// Measurement characteristic (notify)
pub const MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x7683_0bce_b9a7_4f69_aeaa_fd5b_9f6b_0965);

/// Write-response characteristic (notify)
pub const WRITE_RESPONSE_UUID: Uuid = Uuid::from_u128(0xcfbb_cb0d_7121_4bc2_bf54_8284_166d_61f0);

/// Advertised-name prefixes that identify a launch monitor.
pub const DEVICE_NAME_PREFIXES: [&str; 3] = ["MLM2-", "BlueZ ", "MLM2_BT_"];

/// The service's characteristic endpoints, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharKind {
    AuthRequest,
    Command,
    Configure,
    Events,
    Heartbeat,
    Measurement,
    WriteResponse,
}

impl CharKind {
    /// The characteristic UUID for this role.
    pub fn uuid(self) -> Uuid {
        match self {
            CharKind::AuthRequest => AUTH_REQUEST_UUID,
            CharKind::Command => COMMAND_UUID,
            CharKind::Configure => CONFIGURE_UUID,
            CharKind::Events => EVENTS_UUID,
            CharKind::Heartbeat => HEARTBEAT_UUID,
            CharKind::Measurement => MEASUREMENT_UUID,
            CharKind::WriteResponse => WRITE_RESPONSE_UUID,
        }
    }

    /// Reverse lookup for inbound notifications.
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if uuid == AUTH_REQUEST_UUID {
            Some(CharKind::AuthRequest)
        } else if uuid == COMMAND_UUID {
            Some(CharKind::Command)
        } else if uuid == CONFIGURE_UUID {
            Some(CharKind::Configure)
        } else if uuid == EVENTS_UUID {
            Some(CharKind::Events)
        } else if uuid == HEARTBEAT_UUID {
            Some(CharKind::Heartbeat)
        } else if uuid == MEASUREMENT_UUID {
            Some(CharKind::Measurement)
        } else if uuid == WRITE_RESPONSE_UUID {
            Some(CharKind::WriteResponse)
        } else {
            None
        }
    }
}

/// The three characteristics a live session listens on.
pub const NOTIFY_KINDS: [CharKind; 3] =
    [CharKind::Events, CharKind::WriteResponse, CharKind::Measurement];

/// One inbound notification, already classified by characteristic role.
#[derive(Debug, Clone)]
pub struct LinkNotification {
    pub kind: CharKind,
    pub value: Vec<u8>,
}

/// A bound GATT connection: device and primary service resolved together,
/// so the session never sees one without the other.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Advertised device name.
    fn device_name(&self) -> &str;

    /// Write a payload to one characteristic.
    async fn write(
        &self,
        kind: CharKind,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), SessionError>;

    /// Subscribe (or re-subscribe) the events, write-response and
    /// measurement characteristics. All three must succeed.
    async fn subscribe_notifications(&self) -> Result<(), SessionError>;

    /// Stream of inbound notifications for the subscribed characteristics.
    async fn notifications(&self) -> Result<BoxStream<'static, LinkNotification>, SessionError>;

    /// Tear down the GATT connection. Best-effort.
    async fn disconnect(&self) -> Result<(), SessionError>;
}

/// Produces a bound [`GattLink`] from a discovery scan.
///
/// Two phases so the session can report `Discovering` and `Connecting`
/// separately: `scan` chooses a device by advertised name, `connect` opens
/// the GATT link and resolves the primary service.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Scan until a matching device is chosen; returns its advertised name.
    async fn scan(&self, timeout: Duration) -> Result<String, SessionError>;

    /// Connect the device chosen by the last successful `scan`.
    async fn connect(&self) -> Result<Arc<dyn GattLink>, SessionError>;
}

/// [`GattLink`] over a btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    name: String,
    characteristics: HashMap<CharKind, Characteristic>,
}

impl BtleplugLink {
    /// Bind a connected peripheral: resolve the primary service and all
    /// seven characteristic endpoints.
    pub fn bind(peripheral: Peripheral, name: String) -> Result<Self, SessionError> {
        let mut characteristics = HashMap::new();

        for characteristic in peripheral.characteristics() {
            if characteristic.service_uuid != SERVICE_UUID {
                continue;
            }
            if let Some(kind) = CharKind::from_uuid(characteristic.uuid) {
                characteristics.insert(kind, characteristic);
            }
        }

        for kind in [
            CharKind::AuthRequest,
            CharKind::Command,
            CharKind::Configure,
            CharKind::Events,
            CharKind::Heartbeat,
            CharKind::Measurement,
            CharKind::WriteResponse,
        ] {
            if !characteristics.contains_key(&kind) {
                return Err(SessionError::Connection(format!(
                    "missing characteristic {:?} on primary service",
                    kind
                )));
            }
        }

        Ok(Self {
            peripheral,
            name,
            characteristics,
        })
    }

    fn characteristic(&self, kind: CharKind) -> &Characteristic {
        // bind() guarantees every kind is present
        &self.characteristics[&kind]
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn device_name(&self) -> &str {
        &self.name
    }

    async fn write(
        &self,
        kind: CharKind,
        payload: &[u8],
        with_response: bool,
    ) -> Result<(), SessionError> {
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(self.characteristic(kind), payload, write_type)
            .await
            .map_err(|e| SessionError::Write(e.to_string()))?;

        tracing::debug!(?kind, len = payload.len(), "characteristic written");
        Ok(())
    }

    async fn subscribe_notifications(&self) -> Result<(), SessionError> {
        for kind in NOTIFY_KINDS {
            self.peripheral
                .subscribe(self.characteristic(kind))
                .await
                .map_err(|e| SessionError::Subscription(format!("{kind:?}: {e}")))?;

            tracing::debug!(?kind, "subscribed to notifications");
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, LinkNotification>, SessionError> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| SessionError::Subscription(e.to_string()))?;

        Ok(stream
            .filter_map(|notification| async move {
                CharKind::from_uuid(notification.uuid).map(|kind| LinkNotification {
                    kind,
                    value: notification.value,
                })
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))
    }
}

/// Scans for a launch monitor and binds it into a [`BtleplugLink`].
pub struct BtleplugConnector {
    adapter: Adapter,
    chosen: tokio::sync::Mutex<Option<(Peripheral, String)>>,
}

impl BtleplugConnector {
    /// Initialize the first available BLE adapter.
    pub async fn new() -> Result<Self, SessionError> {
        let manager = Manager::new()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(SessionError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        Ok(Self {
            adapter,
            chosen: tokio::sync::Mutex::new(None),
        })
    }

    /// Whether an advertised name identifies a launch monitor.
    pub fn name_matches(name: &str) -> bool {
        DEVICE_NAME_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    }

    /// Run the scan loop until a matching device turns up.
    async fn scan_for_device(&self) -> Result<(Peripheral, String), SessionError> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| SessionError::Discovery(e.to_string()))?;

        self.adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await
            .map_err(|e| SessionError::Discovery(e.to_string()))?;

        tracing::info!("scanning for launch monitor");

        while let Some(event) = events.next().await {
            let CentralEvent::DeviceDiscovered(id) = event else {
                continue;
            };

            let peripherals = match self.adapter.peripherals().await {
                Ok(peripherals) => peripherals,
                Err(_) => continue,
            };

            for peripheral in peripherals {
                if peripheral.id() != id {
                    continue;
                }

                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = properties.local_name else {
                    continue;
                };

                if Self::name_matches(&name) {
                    tracing::info!(%name, "launch monitor discovered");
                    let _ = self.adapter.stop_scan().await;
                    return Ok((peripheral, name));
                }
            }
        }

        Err(SessionError::Discovery("scan stream ended".to_string()))
    }
}

#[async_trait]
impl DeviceConnector for BtleplugConnector {
    async fn scan(&self, timeout: Duration) -> Result<String, SessionError> {
        let (peripheral, name) = match tokio::time::timeout(timeout, self.scan_for_device()).await
        {
            Ok(result) => result?,
            Err(_) => {
                let _ = self.adapter.stop_scan().await;
                return Err(SessionError::Discovery(format!(
                    "no device found within {}s",
                    timeout.as_secs()
                )));
            }
        };

        *self.chosen.lock().await = Some((peripheral, name.clone()));
        Ok(name)
    }

    async fn connect(&self) -> Result<Arc<dyn GattLink>, SessionError> {
        let (peripheral, name) = self
            .chosen
            .lock()
            .await
            .take()
            .ok_or_else(|| SessionError::Connection("no device chosen by scan".to_string()))?;

        peripheral
            .connect()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        tracing::info!(%name, "device connected");

        peripheral
            .discover_services()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let link = BtleplugLink::bind(peripheral, name)?;
        tracing::info!("primary service bound");

        Ok(Arc::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_prefix_filter() {
        assert!(BtleplugConnector::name_matches("MLM2-1234"));
        assert!(BtleplugConnector::name_matches("BlueZ 5.66"));
        assert!(BtleplugConnector::name_matches("MLM2_BT_A1"));
        assert!(!BtleplugConnector::name_matches("Garmin R10"));
        assert!(!BtleplugConnector::name_matches("mlm2-lowercase"));
    }

    #[test]
    fn uuid_round_trip_by_kind() {
        for kind in [
            CharKind::AuthRequest,
            CharKind::Command,
            CharKind::Configure,
            CharKind::Events,
            CharKind::Heartbeat,
            CharKind::Measurement,
            CharKind::WriteResponse,
        ] {
            assert_eq!(CharKind::from_uuid(kind.uuid()), Some(kind));
        }
        assert_eq!(CharKind::from_uuid(SERVICE_UUID), None);
    }
}
