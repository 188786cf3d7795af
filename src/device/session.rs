//! The device session state machine.
//!
//! One session per process. The session drives discovery, connection,
//! subscription, the encrypted auth handshake and the armed telemetry loop,
//! dispatching decrypted notifications to the decoder and forwarding shots
//! to the downstream sink. Mid-session faults are dropped (logged and
//! counted), never propagated as state-machine panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use futures::stream::StreamExt;
use tokio::sync::Mutex;

use crate::auth::TokenProvider;
use crate::cipher::WireCipher;
use crate::codec;
use crate::config::BridgeConfig;
use crate::device::heartbeat::{self, HeartbeatState};
use crate::device::link::{CharKind, DeviceConnector, GattLink, LinkNotification};
use crate::device::types::{
    auth_request_frame, configuration_frame, DeviceEvent, HandshakeAction, SessionError,
    SessionEvent, SessionMetrics, SessionState, ARM_COMMAND, DISARM_COMMAND, DISCONNECT_COMMAND,
};

/// Delay before the duplicate configuration write. The device tolerates the
/// repeat; the second frame covers a silently-dropped first write.
const CONFIG_RESEND_DELAY: Duration = Duration::from_millis(200);

/// Mutable session state, serialized behind one mutex.
struct SessionInner {
    state: SessionState,
    /// Device and primary service, bound together (never one without the
    /// other).
    link: Option<Arc<dyn GattLink>>,
    /// Session token from the cloud handshake; empty until authenticated.
    token: String,
    /// Whether the three notify subscriptions are active.
    device_setup: bool,
    /// Last battery percentage reported on the events characteristic.
    battery_level: u8,
    heartbeat: HeartbeatState,
    /// Monotonic label for decoded shots.
    shot_number: u32,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            link: None,
            token: String::new(),
            device_setup: false,
            battery_level: 0,
            heartbeat: HeartbeatState::default(),
            shot_number: 0,
        }
    }
}

/// Everything the notification pump and delayed tasks share with the
/// session.
#[derive(Clone)]
struct TaskContext {
    inner: Arc<Mutex<SessionInner>>,
    cipher: Arc<WireCipher>,
    auth: Arc<dyn TokenProvider>,
    sink: Arc<dyn crate::sink::ShotSink>,
    metrics: Arc<SessionMetrics>,
    epoch: Arc<AtomicU64>,
    event_tx: Option<Sender<SessionEvent>>,
}

impl TaskContext {
    fn send_event(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// BLE session with one launch monitor.
pub struct DeviceSession {
    config: BridgeConfig,
    connector: Arc<dyn DeviceConnector>,
    cipher: Arc<WireCipher>,
    auth: Arc<dyn TokenProvider>,
    sink: Arc<dyn crate::sink::ShotSink>,
    metrics: Arc<SessionMetrics>,
    /// Session generation; bumped on disconnect so delayed tasks
    /// (heartbeat ticks, the config resend) self-cancel instead of acting
    /// on a torn-down session.
    epoch: Arc<AtomicU64>,
    inner: Arc<Mutex<SessionInner>>,
    event_tx: Option<Sender<SessionEvent>>,
}

impl DeviceSession {
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn DeviceConnector>,
        auth: Arc<dyn TokenProvider>,
        sink: Arc<dyn crate::sink::ShotSink>,
    ) -> Self {
        Self {
            config,
            connector,
            cipher: Arc::new(WireCipher::new()),
            auth,
            sink,
            metrics: Arc::new(SessionMetrics::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(Mutex::new(SessionInner::new())),
            event_tx: None,
        }
    }

    /// Get an event receiver for session events.
    pub fn event_receiver(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Fault counters for dropped errors.
    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    /// Current state-machine state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Last battery percentage reported by the device.
    pub async fn battery_level(&self) -> u8 {
        self.inner.lock().await.battery_level
    }

    /// Whether a device link is currently held.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.link.is_some()
    }

    /// Whether the heartbeat timer is running (armed session).
    pub async fn heartbeat_running(&self) -> bool {
        self.inner.lock().await.heartbeat.is_running()
    }

    /// Liveness mark of the heartbeat supervisor, seconds since epoch.
    pub async fn last_heartbeat_received(&self) -> i64 {
        self.inner.lock().await.heartbeat.last_received()
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            inner: self.inner.clone(),
            cipher: self.cipher.clone(),
            auth: self.auth.clone(),
            sink: self.sink.clone(),
            metrics: self.metrics.clone(),
            epoch: self.epoch.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    async fn set_state(&self, state: SessionState) {
        self.inner.lock().await.state = state;
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(SessionEvent::StateChanged(state));
        }
        tracing::info!(%state, "session state");
    }

    /// Run the connect sequence: discover, connect, subscribe, start the
    /// auth handshake.
    ///
    /// On success the session is `Authenticating`; it reaches `Armed` once
    /// the device's write-response round trip completes. Discovery,
    /// connection and subscription failures return the session to `Idle`;
    /// a failed auth write leaves it in `Error` (disconnect to recover).
    /// Connect errors never unwind.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.is_connected().await {
            return Err(SessionError::Connection(
                "a device session is already active".to_string(),
            ));
        }

        let task_epoch = self.epoch.load(Ordering::Relaxed);

        self.set_state(SessionState::Discovering).await;
        let timeout = Duration::from_secs(self.config.discovery_timeout_secs);
        let name = match self.connector.scan(timeout).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(error = %e, "device discovery failed");
                self.set_state(SessionState::Idle).await;
                return Err(e);
            }
        };

        tracing::info!(%name, "device chosen, connecting");
        self.set_state(SessionState::Connecting).await;
        let link = match self.connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(error = %e, "device connection failed");
                self.set_state(SessionState::Idle).await;
                return Err(e);
            }
        };

        self.inner.lock().await.link = Some(link.clone());
        self.set_state(SessionState::ServiceBound).await;

        if let Err(e) = link.subscribe_notifications().await {
            tracing::warn!(error = %e, "subscribe step failed");
            let mut inner = self.inner.lock().await;
            inner.link = None;
            inner.state = SessionState::Idle;
            drop(inner);
            let _ = link.disconnect().await;
            return Err(e);
        }

        // Start the pump before the auth write so the write-response
        // notification cannot be missed.
        let stream = match link.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "notification stream unavailable");
                let mut inner = self.inner.lock().await;
                inner.link = None;
                inner.state = SessionState::Idle;
                drop(inner);
                let _ = link.disconnect().await;
                return Err(e);
            }
        };
        let ctx = self.task_context();
        let pump_link = link.clone();
        tokio::spawn(async move {
            Self::pump_notifications(stream, ctx, pump_link, task_epoch).await;
        });

        self.inner.lock().await.device_setup = true;
        self.set_state(SessionState::Subscribed).await;

        let frame = auth_request_frame(&self.cipher);
        if let Err(e) = link.write(CharKind::AuthRequest, &frame, true).await {
            SessionMetrics::bump(&self.metrics.write_failures);
            tracing::warn!(error = %e, "auth request write failed");
            self.set_state(SessionState::Error).await;
            return Err(e);
        }

        self.set_state(SessionState::Authenticating).await;
        Ok(())
    }

    /// Arm the device for live shots. Requires a connected device; no
    /// state-machine transition results.
    pub async fn arm(&self) -> Result<(), SessionError> {
        self.write_command(&ARM_COMMAND).await?;
        tracing::info!("arm command sent");
        Ok(())
    }

    /// Disarm the device. Requires a connected device.
    pub async fn disarm(&self) -> Result<(), SessionError> {
        self.write_command(&DISARM_COMMAND).await?;
        tracing::info!("disarm command sent");
        Ok(())
    }

    async fn write_command(&self, payload: &[u8]) -> Result<(), SessionError> {
        let link = self
            .inner
            .lock()
            .await
            .link
            .clone()
            .ok_or(SessionError::NotConnected)?;

        let encrypted = self.cipher.encrypt(payload);
        link.write(CharKind::Command, &encrypted, true)
            .await
            .map_err(|e| {
                SessionMetrics::bump(&self.metrics.write_failures);
                tracing::warn!(error = %e, "command write failed");
                e
            })
    }

    /// Tear the session down from any state. Safe to call repeatedly; the
    /// local-state reset always runs even when the farewell write or GATT
    /// disconnect fails.
    pub async fn disconnect(&self) {
        // Stale delayed tasks observe the bumped epoch and no-op.
        self.epoch.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().await;
        inner.heartbeat.stop();

        if let Some(link) = inner.link.take() {
            let notice = self.cipher.encrypt(&DISCONNECT_COMMAND);
            if let Err(e) = link.write(CharKind::Command, &notice, true).await {
                tracing::debug!(error = %e, "disconnect notice write failed (tolerated)");
            }
            if let Err(e) = link.disconnect().await {
                tracing::debug!(error = %e, "GATT disconnect failed (tolerated)");
            }
        }

        inner.token.clear();
        inner.device_setup = false;
        inner.state = SessionState::Idle;
        drop(inner);

        if let Some(tx) = &self.event_tx {
            let _ = tx.send(SessionEvent::StateChanged(SessionState::Idle));
        }
        tracing::info!("session disconnected and state cleared");
    }

    /// Dispatch inbound notifications until the stream ends or the session
    /// generation changes.
    async fn pump_notifications(
        mut stream: futures::stream::BoxStream<'static, LinkNotification>,
        ctx: TaskContext,
        link: Arc<dyn GattLink>,
        task_epoch: u64,
    ) {
        while let Some(notification) = stream.next().await {
            if ctx.epoch.load(Ordering::Relaxed) != task_epoch {
                tracing::debug!("notification pump outlived its session, exiting");
                return;
            }

            match notification.kind {
                CharKind::WriteResponse => {
                    Self::handle_write_response(&ctx, &link, task_epoch, &notification.value)
                        .await;
                }
                CharKind::Events => Self::handle_device_event(&ctx, &notification.value).await,
                CharKind::Measurement => {
                    Self::handle_measurement(&ctx, &notification.value).await;
                }
                other => {
                    tracing::debug!(kind = ?other, "notification on unexpected characteristic");
                }
            }
        }

        tracing::debug!("notification stream ended");
    }

    /// Write-response frames arrive in the clear and drive the auth
    /// handshake: a status-2 frame carries the device's user id, which is
    /// exchanged for a session token and answered with the (twice-written)
    /// encrypted configuration frame.
    async fn handle_write_response(
        ctx: &TaskContext,
        link: &Arc<dyn GattLink>,
        task_epoch: u64,
        value: &[u8],
    ) {
        let user_id = match HandshakeAction::parse(value) {
            HandshakeAction::Ignore => return,
            HandshakeAction::Rejected { token_expired } => {
                SessionMetrics::bump(&ctx.metrics.auth_failures);
                if token_expired {
                    tracing::warn!("device reports session token expired");
                } else {
                    tracing::warn!("device rejected auth handshake");
                }
                ctx.send_event(SessionEvent::Fault("auth handshake rejected".to_string()));
                return;
            }
            HandshakeAction::RequestToken { user_id } => user_id,
        };

        tracing::info!(user_id, "device requested initial parameters");

        let Some(result) = ctx.auth.request_token(&user_id.to_string()).await else {
            SessionMetrics::bump(&ctx.metrics.auth_failures);
            ctx.send_event(SessionEvent::Fault("token request failed".to_string()));
            return;
        };

        if !result.success || result.user.token.is_empty() {
            SessionMetrics::bump(&ctx.metrics.auth_failures);
            tracing::warn!("token exchange did not yield a usable token");
            ctx.send_event(SessionEvent::Fault("token exchange unsuccessful".to_string()));
            return;
        }

        let frame = match configuration_frame(&result.user.token) {
            Ok(frame) => frame,
            Err(e) => {
                SessionMetrics::bump(&ctx.metrics.auth_failures);
                tracing::warn!(error = %e, "configuration frame build failed");
                return;
            }
        };
        let encrypted = ctx.cipher.encrypt(&frame);

        if let Err(e) = link.write(CharKind::Configure, &encrypted, true).await {
            SessionMetrics::bump(&ctx.metrics.write_failures);
            tracing::warn!(error = %e, "configuration write failed");
            return;
        }

        {
            let mut inner = ctx.inner.lock().await;
            inner.token = result.user.token.clone();
            inner.heartbeat.stop();
            inner.heartbeat = heartbeat::start(
                link.clone(),
                ctx.metrics.clone(),
                ctx.epoch.clone(),
                task_epoch,
            );
            inner.state = SessionState::Armed;
        }
        ctx.send_event(SessionEvent::StateChanged(SessionState::Armed));
        tracing::info!("configuration accepted, session armed");

        // Duplicate configuration write against a missed first frame;
        // epoch-guarded so it cannot touch a torn-down session.
        let resend_ctx = ctx.clone();
        let resend_link = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONFIG_RESEND_DELAY).await;
            if resend_ctx.epoch.load(Ordering::Relaxed) != task_epoch {
                return;
            }
            if let Err(e) = resend_link
                .write(CharKind::Configure, &encrypted, true)
                .await
            {
                SessionMetrics::bump(&resend_ctx.metrics.write_failures);
                tracing::warn!(error = %e, "configuration resend failed");
            } else {
                tracing::debug!("configuration resent");
            }
        });
    }

    /// Decrypt and classify an events-characteristic frame.
    async fn handle_device_event(ctx: &TaskContext, value: &[u8]) {
        if !ctx.inner.lock().await.device_setup {
            return;
        }

        let Some(plain) = ctx.cipher.decrypt(value) else {
            SessionMetrics::bump(&ctx.metrics.decrypt_failures);
            ctx.send_event(SessionEvent::Fault("event decrypt failed".to_string()));
            return;
        };

        let Some(event) = DeviceEvent::classify(&plain) else {
            return;
        };

        match event {
            DeviceEvent::Battery(level) => {
                ctx.inner.lock().await.battery_level = level;
                tracing::info!(level, "battery level report");
            }
            DeviceEvent::Unknown(kind) => {
                tracing::debug!(kind, "unknown device event");
            }
            other => tracing::debug!(event = ?other, "device event"),
        }

        ctx.send_event(SessionEvent::Device(event));
    }

    /// Decrypt a measurement frame, decode it, and forward the shot.
    async fn handle_measurement(ctx: &TaskContext, value: &[u8]) {
        if !ctx.inner.lock().await.device_setup {
            return;
        }

        let Some(plain) = ctx.cipher.decrypt(value) else {
            SessionMetrics::bump(&ctx.metrics.decrypt_failures);
            ctx.send_event(SessionEvent::Fault("measurement decrypt failed".to_string()));
            return;
        };

        tracing::debug!(frame = %codec::bytes_to_hex(&plain), "measurement frame");

        let next_shot = ctx.inner.lock().await.shot_number + 1;
        let Some(record) = codec::parse_shot_frame(&plain, next_shot) else {
            SessionMetrics::bump(&ctx.metrics.parse_failures);
            ctx.send_event(SessionEvent::Fault("shot frame parse failed".to_string()));
            return;
        };
        ctx.inner.lock().await.shot_number = next_shot;

        if ctx.sink.send_shot(&record).await {
            tracing::info!(shot = record.shot_number, "shot forwarded downstream");
        } else {
            SessionMetrics::bump(&ctx.metrics.sink_failures);
            tracing::warn!(shot = record.shot_number, "downstream sink refused the shot");
        }

        ctx.send_event(SessionEvent::Shot(record));
    }
}
