//! Verschluesselter Nachrichten-Umschlag fuer den Datenkanal
//!
//! Jede Anwendungsnachricht wird nach dem Handshake als JSON-Objekt ueber den
//! binaeren Datenkanal geschickt:
//!
//! ```text
//! { "v": 1, "c": <zaehler>, "ct": "<base64 ciphertext>", "t": "<base64 auth-tag>" }
//! ```
//!
//! Die Nonce wird aus dem Zaehler abgeleitet und nie uebertragen. Die
//! Versionspruefung passiert beim Entschluesseln, daher sind alle Felder ausser
//! `v` beim Parsen optional: ein Umschlag einer fremden Version laesst sich
//! lesen und danach sauber ablehnen.

use serde::{Deserialize, Serialize};
use tandem_core::TandemError;

/// Einzige aktuell unterstuetzte Umschlag-Version
pub const PROTOCOL_VERSION: u8 = 1;

/// Laenge des AES-GCM Auth-Tags in Bytes
pub const TAG_LAENGE: usize = 16;

/// Versionierter, authentifiziert verschluesselter Umschlag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protokollversion
    pub v: u8,
    /// Sende-Zaehler des Absenders zum Zeitpunkt der Verschluesselung
    #[serde(default)]
    pub c: u64,
    /// Ciphertext (Base64, ohne Tag)
    #[serde(default)]
    pub ct: String,
    /// Auth-Tag (Base64, 16 Bytes)
    #[serde(default)]
    pub t: String,
}

impl Envelope {
    /// Prueft ob die Version dieses Umschlags unterstuetzt wird
    pub fn version_unterstuetzt(&self) -> bool {
        self.v == PROTOCOL_VERSION
    }

    /// Serialisiert den Umschlag fuer den Datenkanal
    pub fn to_bytes(&self) -> Result<Vec<u8>, TandemError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Liest einen Umschlag aus einem Datenkanal-Frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TandemError> {
        serde_json::from_slice(bytes)
            .map_err(|e| TandemError::UngueltigeNachricht(format!("Umschlag nicht lesbar: {e}")))
    }
}
