//! Signaling wire protocol for the Matchpoint relay server.
//!
//! Every frame is a single JSON text message carrying a `type` tag. The
//! server only ever inspects the tag (plus `code` on `join`); relay-class
//! frames are forwarded to the opponent verbatim, so their remaining fields
//! stay opaque to the server.

use serde::{Deserialize, Serialize};

/// Room codes are exactly this many characters, charset unrestricted.
pub const ROOM_CODE_LEN: usize = 6;

/// The role a connection holds within a room.
///
/// The primary occupant is authoritative for room survival: the room is
/// destroyed when the primary departs with nobody left to promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

/// Message tags the server forwards to the opponent without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    /// WebRTC SDP offer.
    RtcOffer,
    /// WebRTC SDP answer.
    RtcAnswer,
    /// WebRTC ICE candidate.
    RtcIce,
    /// Pose keypoints frame.
    Keypoints,
    /// Hit event.
    Hit,
    /// Game state snapshot.
    GameState,
}

impl RelayKind {
    /// The wire `type` tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RtcOffer => "rtc-offer",
            Self::RtcAnswer => "rtc-answer",
            Self::RtcIce => "rtc-ice",
            Self::Keypoints => "keypoints",
            Self::Hit => "hit",
            Self::GameState => "game-state",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "rtc-offer" => Some(Self::RtcOffer),
            "rtc-answer" => Some(Self::RtcAnswer),
            "rtc-ice" => Some(Self::RtcIce),
            "keypoints" => Some(Self::Keypoints),
            "hit" => Some(Self::Hit),
            "game-state" => Some(Self::GameState),
            _ => None,
        }
    }
}

/// A parsed client frame, reduced to what the relay engine needs.
///
/// Relay-class frames keep only their kind; the engine forwards the original
/// text, never a re-serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Request to claim or join the room with the given code.
    Join {
        /// Room code, opaque to the server beyond its length.
        code: String,
    },
    /// A frame to forward to the room opponent.
    Relay(RelayKind),
    /// A well-formed frame whose `type` tag is not part of the protocol.
    ///
    /// Not a parse error: the engine answers these with a routed `error`
    /// message rather than dropping the frame in the transport layer.
    Unknown(String),
}

/// Structural parse failures, handled in the transport layer before the
/// relay engine sees the frame.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame was not a JSON object with the required fields.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Parses a client text frame into a [`ClientFrame`].
///
/// A frame must be a JSON object with a string `type` field; `join` frames
/// additionally require a string `code` field. Anything else is
/// [`ParseError::Malformed`]. Unrecognized tags are *not* an error here —
/// they parse to [`ClientFrame::Unknown`] so the engine can respond.
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] on structural failure.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let Some(tag) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err(ParseError::Malformed(
            "missing string `type` field".to_string(),
        ));
    };

    if tag == "join" {
        let Some(code) = value.get("code").and_then(serde_json::Value::as_str) else {
            return Err(ParseError::Malformed(
                "join requires a string `code` field".to_string(),
            ));
        };
        return Ok(ClientFrame::Join {
            code: code.to_string(),
        });
    }

    match RelayKind::from_tag(tag) {
        Some(kind) => Ok(ClientFrame::Relay(kind)),
        None => Ok(ClientFrame::Unknown(tag.to_string())),
    }
}

/// Messages the server originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once when the WebSocket connection is established.
    Connected,
    /// The join created a new room; the sender is its primary.
    RoomCreated {
        /// The claimed room code.
        code: String,
        /// Always [`Role::Primary`]; echoed for client bookkeeping.
        role: Role,
    },
    /// The join filled the secondary slot of an existing room.
    RoomJoined {
        /// The joined room code.
        code: String,
        /// Always [`Role::Secondary`]; echoed for client bookkeeping.
        role: Role,
    },
    /// The room is now full; sent to both occupants.
    PeerJoined,
    /// The other occupant departed; sent to the remaining occupant.
    PeerLeft,
    /// A request failed; the sender's room state is unchanged.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// Encodes a [`ServerMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns the serializer's error text; does not occur for these types in
/// practice.
pub fn encode(msg: &ServerMessage) -> Result<String, String> {
    serde_json::to_string(msg).map_err(|e| format!("server message encode error: {e}"))
}
