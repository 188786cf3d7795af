//! Tests for the auth handshake frames and write-response parsing.

use launchbridge::cipher::WireCipher;
use launchbridge::device::types::{
    auth_request_frame, configuration_frame, HandshakeAction, ARM_COMMAND, DISARM_COMMAND,
};

#[test]
fn test_write_response_requests_token() {
    // Status 2, sub-status 0, user id 0x04030201 little-endian.
    let action = HandshakeAction::parse(&[2, 0, 1, 2, 3, 4]);
    assert_eq!(action, HandshakeAction::RequestToken { user_id: 67305985 });
}

#[test]
fn test_write_response_expired_token() {
    let action = HandshakeAction::parse(&[2, 1]);
    assert_eq!(
        action,
        HandshakeAction::Rejected {
            token_expired: true
        }
    );
}

#[test]
fn test_write_response_rejected_without_payload() {
    // Status 2 with sub-status 0 but no user id bytes cannot proceed.
    let action = HandshakeAction::parse(&[2, 0]);
    assert_eq!(
        action,
        HandshakeAction::Rejected {
            token_expired: false
        }
    );
}

#[test]
fn test_write_response_other_statuses_ignored() {
    assert_eq!(HandshakeAction::parse(&[0, 0]), HandshakeAction::Ignore);
    assert_eq!(
        HandshakeAction::parse(&[1, 0, 1, 2, 3, 4]),
        HandshakeAction::Ignore
    );
    assert_eq!(HandshakeAction::parse(&[2]), HandshakeAction::Ignore);
    assert_eq!(HandshakeAction::parse(&[]), HandshakeAction::Ignore);
}

#[test]
fn test_auth_request_frame_carries_the_wire_key() {
    let cipher = WireCipher::new();
    let frame = auth_request_frame(&cipher);

    assert_eq!(frame.len(), 38);
    assert_eq!(&frame[..4], &[1, 0, 0, 0]);
    assert_eq!(&frame[4..6], WireCipher::encryption_type_bytes());
    assert_eq!(&frame[6..], cipher.key_bytes().as_slice());
}

#[test]
fn test_configuration_frame_for_numeric_token() {
    let frame = configuration_frame("9007199254740993").unwrap();

    assert_eq!(frame.len(), 18);
    assert_eq!(&frame[..4], &[1, 2, 0, 0]);
    assert_eq!(&frame[8..16], &9007199254740993u64.to_le_bytes());
    assert_eq!(&frame[16..], &[0, 0]);
}

#[test]
fn test_configuration_frame_rejects_non_numeric_token() {
    assert!(configuration_frame("").is_err());
    assert!(configuration_frame("abc123").is_err());
    assert!(configuration_frame("-1").is_err());
}

#[test]
fn test_command_payloads() {
    assert_eq!(ARM_COMMAND, [1, 13, 0, 1, 0, 0, 0]);
    assert_eq!(DISARM_COMMAND, [1, 13, 0, 0, 0, 0, 0]);

    // Commands always encrypt to one padded block.
    let encrypted = WireCipher::new().encrypt(&ARM_COMMAND);
    assert_eq!(encrypted.len(), 16);
}
