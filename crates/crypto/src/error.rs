//! Fehlertypen fuer das Kryptografie-Subsystem
//!
//! Die Anzeige-Texte sind fuer Logs gedacht. In der Oberflaeche erscheint
//! nie ein kryptografisches Detail, nur ein generisches Sicherheits-Signal.

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    // --- Schluessel-Austausch ---
    #[error("Ungueltiger Peer-Schluessel: {laenge} Bytes statt 32")]
    InvalidPeerKey { laenge: usize },

    #[error("Handshake nicht gestartet: kein lokales Schluesselpaar")]
    HandshakeNotStarted,

    #[error("Key-Agreement fehlgeschlagen (nicht beitragender Peer-Schluessel)")]
    KeyAgreement,

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    // --- Umschlag ---
    #[error("Kein Session-Schluessel vorhanden")]
    SessionKeyNotFound,

    #[error("Umschlag-Version {version} nicht unterstuetzt")]
    UnsupportedEnvelopeVersion { version: u8 },

    #[error("Authentifizierung fehlgeschlagen")]
    AuthenticationFailed,

    #[error("Ungueltiger Umschlag: {0}")]
    UngueltigerUmschlag(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    // --- Schluessel-Speicher ---
    #[error("Schluessel-Speicher: {0}")]
    Schluesselspeicher(String),
}

impl CryptoError {
    /// Ob der Fehler nur den aktuellen Handshake betrifft
    pub fn ist_handshake_fehler(&self) -> bool {
        matches!(
            self,
            Self::InvalidPeerKey { .. }
                | Self::HandshakeNotStarted
                | Self::KeyAgreement
                | Self::KeyDerivation(_)
        )
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
