//! Signaling-Protokoll (JSON ueber WebSocket)
//!
//! Definiert alle Steuerungsnachrichten die zwischen Client und
//! Signaling-Relay ausgetauscht werden.
//!
//! ## Design
//! - Flache JSON-Objekte mit `type`-Diskriminator
//! - Feldnamen in camelCase (Relay-Konvention)
//! - Unbekannte Typen werden als `Unknown` dekodiert statt abzubrechen

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ICE-Kandidat
// ---------------------------------------------------------------------------

/// Konnektivitaets-Kandidat (wird 1:1 zwischen Transport und Relay gereicht)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: SignalingMessage
// ---------------------------------------------------------------------------

/// Alle Signaling-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    // Raum-Lebenszyklus
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: String, is_initiator: bool },
    #[serde(rename_all = "camelCase")]
    RoomReady { is_initiator: bool },
    PeerDisconnected,
    PeerLeft,
    LeftRoom,

    // Transport-Aushandlung
    WebrtcOffer { sdp: String },
    WebrtcAnswer { sdp: String },
    IceCandidate { candidate: IceCandidate },

    // Schluessel-Austausch
    #[serde(rename_all = "camelCase")]
    KeyExchange {
        /// Oeffentlicher X25519-Schluessel (Base64)
        public_key: String,
        session_id: String,
        /// Handshake-Runde des Absenders, steigt mit jedem Neustart im Raum.
        /// Fehlt sie, gilt 0.
        #[serde(default)]
        round: u32,
    },
    #[serde(rename_all = "camelCase")]
    KeyExchangeComplete {
        session_id: String,
        /// Runde des Schluessels mit dem abgeleitet wurde
        #[serde(default)]
        round: u32,
    },

    // Fehler
    Error { error: String },

    /// Vom Relay gesendeter, hier unbekannter Typ
    #[serde(other)]
    Unknown,
}

impl SignalingMessage {
    /// Kurzname des Nachrichtentyps fuer Logging
    pub fn typ(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomReady { .. } => "room_ready",
            Self::PeerDisconnected => "peer_disconnected",
            Self::PeerLeft => "peer_left",
            Self::LeftRoom => "left_room",
            Self::WebrtcOffer { .. } => "webrtc_offer",
            Self::WebrtcAnswer { .. } => "webrtc_answer",
            Self::IceCandidate { .. } => "ice_candidate",
            Self::KeyExchange { .. } => "key_exchange",
            Self::KeyExchangeComplete { .. } => "key_exchange_complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_feldnamen() {
        let msg = SignalingMessage::JoinRoom {
            room_id: "raum-1".into(),
            device_id: Some("geraet".into()),
        };
        let wert: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            wert,
            json!({"type": "join_room", "roomId": "raum-1", "deviceId": "geraet"})
        );
    }

    #[test]
    fn join_room_ohne_device_id() {
        let msg = SignalingMessage::JoinRoom {
            room_id: "r".into(),
            device_id: None,
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("deviceId"));
    }

    #[test]
    fn leave_room_ist_leeres_objekt() {
        let json = SignalingMessage::LeaveRoom.to_json().unwrap();
        assert_eq!(json, r#"{"type":"leave_room"}"#);
    }

    #[test]
    fn room_ready_vom_relay() {
        let msg = SignalingMessage::from_json(r#"{"type":"room_ready","isInitiator":true}"#)
            .unwrap();
        assert_eq!(msg, SignalingMessage::RoomReady { is_initiator: true });
    }

    #[test]
    fn ice_candidate_vom_relay() {
        let msg = SignalingMessage::from_json(
            r#"{"type":"ice_candidate","candidate":{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 5000 typ host","sdpMLineIndex":0,"sdpMid":"0"}}"#,
        )
        .unwrap();
        match msg {
            SignalingMessage::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_m_line_index, Some(0));
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
            }
            other => panic!("Erwartet IceCandidate, erhalten: {other:?}"),
        }
    }

    #[test]
    fn key_exchange_feldnamen() {
        let msg = SignalingMessage::KeyExchange {
            public_key: "AAAA".into(),
            session_id: "abc".into(),
            round: 2,
        };
        let wert: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(wert["publicKey"], "AAAA");
        assert_eq!(wert["sessionId"], "abc");
        assert_eq!(wert["round"], 2);
    }

    #[test]
    fn key_exchange_ohne_runde_gilt_als_null() {
        let msg = SignalingMessage::from_json(
            r#"{"type":"key_exchange","publicKey":"AAAA","sessionId":"abc"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::KeyExchange {
                public_key: "AAAA".into(),
                session_id: "abc".into(),
                round: 0,
            }
        );
        let msg =
            SignalingMessage::from_json(r#"{"type":"key_exchange_complete","sessionId":"abc","round":3}"#)
                .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::KeyExchangeComplete {
                session_id: "abc".into(),
                round: 3,
            }
        );
    }

    #[test]
    fn unbekannter_typ_wird_toleriert() {
        let msg = SignalingMessage::from_json(r#"{"type":"server_stats","load":3}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Unknown);
        assert_eq!(msg.typ(), "unknown");
    }

    #[test]
    fn fehler_nachricht() {
        let msg = SignalingMessage::from_json(r#"{"type":"error","error":"Raum voll"}"#).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Error {
                error: "Raum voll".into()
            }
        );
    }
}
