//! Wire messages for the signaling relay
//!
//! Tagged JSON, camelCase fields, matching what the relay forwards
//! between room members. Descriptions and candidates are carried as
//! opaque blobs; the relay never inspects them.

use crate::engine::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → RELAY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join a room scope.
    #[serde(rename_all = "camelCase")]
    Enter { room_id: String },

    /// Depart a room scope.
    #[serde(rename_all = "camelCase")]
    Leave { room_id: String },

    /// Session description for one participant.
    Offer {
        to: String,
        description: SessionDescription,
    },

    Answer {
        to: String,
        description: SessionDescription,
    },

    /// Trickled network candidate for one participant.
    IceCandidate { to: String, candidate: IceCandidate },
}

// ============================================================================
// RELAY → CLIENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A participant joined the room.
    #[serde(rename_all = "camelCase")]
    Join { remote_id: String },

    /// A participant left the room.
    #[serde(rename_all = "camelCase")]
    Leave { remote_id: String },

    Offer {
        from: String,
        description: SessionDescription,
    },

    Answer {
        from: String,
        description: SessionDescription,
    },

    IceCandidate { from: String, candidate: IceCandidate },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SdpKind;

    #[test]
    fn test_enter_wire_shape() {
        let msg = ClientMessage::Enter {
            room_id: "room-7".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"enter","roomId":"room-7"}"#
        );
    }

    #[test]
    fn test_offer_wire_shape() {
        let msg = ClientMessage::Offer {
            to: "peer-1".to_string(),
            description: SessionDescription {
                kind: SdpKind::Offer,
                sdp: "v=0".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"offer","to":"peer-1","description":{"type":"offer","sdp":"v=0"}}"#
        );
    }

    #[test]
    fn test_candidate_round_trip() {
        let json = r#"{"type":"iceCandidate","from":"peer-2","candidate":{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();

        match &msg {
            ServerMessage::IceCandidate { from, candidate } => {
                assert_eq!(from, "peer-2");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        assert_eq!(serde_json::to_string(&msg).unwrap(), json);
    }

    #[test]
    fn test_join_parses() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"join","remoteId":"peer-9"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Join {
                remote_id: "peer-9".to_string()
            }
        );
    }
}
