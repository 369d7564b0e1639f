//! tandem-protocol – Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichten die zwischen Client, Relay und
//! Gegenseite ausgetauscht werden:
//! - Signaling-Nachrichten (JSON ueber WebSocket)
//! - Verschluesselter Umschlag fuer den Datenkanal
//! - Klartext-Payloads (Text, Standort, Sprache, Steuerung)
//! - Aufbewahrungs-Richtlinie

pub mod envelope;
pub mod payload;
pub mod retention;
pub mod signaling;

pub use envelope::{Envelope, PROTOCOL_VERSION, TAG_LAENGE};
pub use payload::{LocationPayload, Payload, VoicePayload};
pub use retention::RetentionPolicy;
pub use signaling::{IceCandidate, SignalingMessage};
