//! launchbridge - BLE launch monitor to simulator bridge
//!
//! Main entry point: wires the cipher, auth client, simulator sink and
//! device session together, connects, arms, and runs until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use launchbridge::auth::AuthClient;
use launchbridge::cipher::WireCipher;
use launchbridge::config::BridgeConfig;
use launchbridge::device::{BtleplugConnector, DeviceSession, SessionEvent};
use launchbridge::sink::GsproSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting launchbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::load_or_default();

    let cipher = WireCipher::new();
    let auth = Arc::new(match &config.auth_base_url {
        Some(base) => AuthClient::with_base_url(&cipher, base.clone()),
        None => AuthClient::new(&cipher),
    });

    let sink = Arc::new(GsproSink::new());
    if let Err(e) = sink.connect(&config.sink_host, config.sink_port).await {
        // The session can still run; shots will be reported as refused
        // until the simulator comes up and the process is restarted.
        tracing::warn!(error = %e, "simulator not reachable");
    }

    let connector = Arc::new(BtleplugConnector::new().await?);

    let mut session = DeviceSession::new(config, connector, auth, sink.clone());
    let events = session.event_receiver();

    // Event drain: log transitions and shots as they happen.
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                SessionEvent::StateChanged(state) => tracing::info!(%state, "state changed"),
                SessionEvent::Device(device_event) => {
                    tracing::info!(event = ?device_event, "device event")
                }
                SessionEvent::Shot(shot) => {
                    tracing::info!(number = shot.shot_number, speed = shot.ball_data.speed, "shot")
                }
                SessionEvent::Fault(detail) => tracing::warn!(detail, "dropped fault"),
            }
        }
    });

    session.connect().await?;
    if let Err(e) = session.arm().await {
        tracing::warn!(error = %e, "arm failed, device stays idle");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    session.disconnect().await;
    sink.disconnect().await;

    Ok(())
}
