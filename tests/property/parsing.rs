//! Property-based tests for the wire codec.
//!
//! Uses proptest to verify:
//! 1. `parse_client_frame` never panics, whatever text arrives.
//! 2. Every `ServerMessage` survives encode → JSON parse unchanged, and its
//!    encoding always carries a string `type` tag.
//! 3. Any well-formed object routes to `Join`/`Relay`/`Unknown` purely by
//!    its tag.

use matchpoint_proto::{ClientFrame, RelayKind, Role, ServerMessage, encode, parse_client_frame};
use proptest::prelude::*;

// --- Strategies for protocol types ---

/// Strategy for generating either role.
fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Primary), Just(Role::Secondary)]
}

/// Strategy for generating room codes of the valid length.
fn arb_code() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{6}"
}

/// Strategy for generating arbitrary `ServerMessage` values.
fn arb_server_message() -> impl Strategy<Value = ServerMessage> {
    prop_oneof![
        Just(ServerMessage::Connected),
        (arb_code(), arb_role())
            .prop_map(|(code, role)| ServerMessage::RoomCreated { code, role }),
        (arb_code(), arb_role())
            .prop_map(|(code, role)| ServerMessage::RoomJoined { code, role }),
        Just(ServerMessage::PeerJoined),
        Just(ServerMessage::PeerLeft),
        ".{0,256}".prop_map(|message| ServerMessage::Error { message }),
    ]
}

// --- Property tests ---

proptest! {
    /// Arbitrary input text never panics the parser; it either yields a
    /// frame or a malformed-message error.
    #[test]
    fn parse_never_panics(input in ".{0,512}") {
        let _ = parse_client_frame(&input);
    }

    /// Arbitrary byte soup interpreted as text never panics the parser
    /// either (exercises invalid JSON far from any valid frame).
    #[test]
    fn parse_handles_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let text = String::from_utf8_lossy(&bytes);
        let _ = parse_client_frame(&text);
    }

    /// Every server message survives encode → JSON parse unchanged.
    #[test]
    fn server_message_round_trip(msg in arb_server_message()) {
        let text = encode(&msg).expect("encode should succeed");
        let back: ServerMessage =
            serde_json::from_str(&text).expect("encoded frame should parse back");
        prop_assert_eq!(msg, back);
    }

    /// Every encoded server message is a JSON object with a string `type`.
    #[test]
    fn server_message_always_carries_a_type_tag(msg in arb_server_message()) {
        let text = encode(&msg).expect("encode should succeed");
        let value: serde_json::Value =
            serde_json::from_str(&text).expect("encoded frame should be valid JSON");
        prop_assert!(value.get("type").and_then(serde_json::Value::as_str).is_some());
    }

    /// A well-formed object routes purely by its tag: `join` to `Join`,
    /// the relay set to `Relay`, everything else to `Unknown`.
    #[test]
    fn tags_route_to_the_right_frame(tag in "[a-z0-9-]{1,24}", code in arb_code()) {
        let text = serde_json::json!({ "type": tag.as_str(), "code": code.as_str() }).to_string();
        let frame = parse_client_frame(&text).expect("well-formed object should parse");

        let expected = match tag.as_str() {
            "join" => ClientFrame::Join { code },
            "rtc-offer" => ClientFrame::Relay(RelayKind::RtcOffer),
            "rtc-answer" => ClientFrame::Relay(RelayKind::RtcAnswer),
            "rtc-ice" => ClientFrame::Relay(RelayKind::RtcIce),
            "keypoints" => ClientFrame::Relay(RelayKind::Keypoints),
            "hit" => ClientFrame::Relay(RelayKind::Hit),
            "game-state" => ClientFrame::Relay(RelayKind::GameState),
            other => ClientFrame::Unknown(other.to_string()),
        };
        prop_assert_eq!(frame, expected);
    }

    /// A relay kind's tag always parses back to the same kind.
    #[test]
    fn relay_tags_are_stable(kind in prop_oneof![
        Just(RelayKind::RtcOffer),
        Just(RelayKind::RtcAnswer),
        Just(RelayKind::RtcIce),
        Just(RelayKind::Keypoints),
        Just(RelayKind::Hit),
        Just(RelayKind::GameState),
    ]) {
        let text = serde_json::json!({ "type": kind.as_str() }).to_string();
        prop_assert_eq!(
            parse_client_frame(&text).expect("relay frame should parse"),
            ClientFrame::Relay(kind)
        );
    }
}
