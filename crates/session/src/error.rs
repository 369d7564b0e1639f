//! Fehlertypen fuer die Session-Orchestrierung

use tandem_core::{SessionId, TandemError};
use tandem_crypto::CryptoError;
use tandem_signaling::SignalingError;
use thiserror::Error;

/// Fehler der Session-Schicht
#[derive(Debug, Error)]
pub enum SessionError {
    /// Kein Peer-Transport verfuegbar (noch nicht verbunden oder Aufbau fehlgeschlagen)
    #[error("Transport nicht verfuegbar: {0}")]
    TransportUnavailable(String),

    /// Signaling-Socket ist nicht verbunden
    #[error("Signaling nicht erreichbar")]
    SignalingUnreachable,

    /// Handshake noch nicht abgeschlossen
    #[error("Verschluesselung nicht bereit")]
    VerschluesselungNichtBereit,

    #[error("Ungueltiger Zustand: {0}")]
    UngueltigerZustand(String),

    #[error("Session nicht gefunden: {0}")]
    SessionNichtGefunden(SessionId),

    #[error("Krypto-Fehler: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Signaling-Fehler: {0}")]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Core(#[from] TandemError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// Orchestrator-Task laeuft nicht mehr
    #[error("Orchestrator beendet")]
    Beendet,
}

impl SessionError {
    pub fn zustand(msg: impl Into<String>) -> Self {
        Self::UngueltigerZustand(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }
}

/// Result-Typ der Session-Schicht
pub type SessionResult<T> = Result<T, SessionError>;
