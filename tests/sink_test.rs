//! Simulator sink tests over a loopback TCP listener.

use launchbridge::codec::parse_shot_frame;
use launchbridge::sink::{GsproSink, ShotSink};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

async fn loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn test_shot_arrives_as_one_json_line() {
    let (listener, port) = loopback().await;

    let sink = GsproSink::new();
    sink.connect("127.0.0.1", port).await.unwrap();
    assert!(sink.is_connected().await);

    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    let shot = parse_shot_frame(&[0u8; 20], 5).unwrap();
    assert!(sink.send_shot(&shot).await);

    let line = lines.next_line().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();

    assert_eq!(value["DeviceID"], "GSPro LM 1.1");
    assert_eq!(value["ShotNumber"], 5);
    assert_eq!(value["ShotDataOptions"]["IsHeartBeat"], false);
}

#[tokio::test]
async fn test_send_without_connection_reports_refusal() {
    let sink = GsproSink::new();
    let shot = parse_shot_frame(&[0u8; 20], 1).unwrap();

    assert!(!sink.send_shot(&shot).await);
    assert!(!sink.is_connected().await);
}

#[tokio::test]
async fn test_connect_refused_is_an_error() {
    // Bind-then-drop guarantees nothing listens on the port.
    let (listener, port) = loopback().await;
    drop(listener);

    let sink = GsproSink::new();
    assert!(sink.connect("127.0.0.1", port).await.is_err());
    assert!(!sink.is_connected().await);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (listener, port) = loopback().await;

    let sink = GsproSink::new();
    sink.connect("127.0.0.1", port).await.unwrap();
    let _accepted = listener.accept().await.unwrap();

    sink.disconnect().await;
    sink.disconnect().await;
    assert!(!sink.is_connected().await);
}

#[tokio::test]
async fn test_write_failure_drops_the_connection() {
    let (listener, port) = loopback().await;

    let sink = GsproSink::new();
    sink.connect("127.0.0.1", port).await.unwrap();

    // Close the simulator side, then keep writing until the local socket
    // notices the reset.
    let (stream, _) = listener.accept().await.unwrap();
    drop(stream);

    let shot = parse_shot_frame(&[0u8; 20], 1).unwrap();
    for _ in 0..50 {
        if !sink.send_shot(&shot).await {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert!(!sink.is_connected().await);
}
