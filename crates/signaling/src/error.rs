//! Fehlertypen fuer Signaling und Raum-Verzeichnis

use thiserror::Error;

/// Fehlertyp fuer Signaling-Bruecke und REST-Aufrufe
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Relay oder API nicht erreichbar (transient, Zustand bleibt erhalten)
    #[error("Nicht erreichbar: {0}")]
    Unreachable(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltige Antwort, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Raum oder Code existiert nicht (einziger Grund eine Session zu schliessen)
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Unerwarteter HTTP-Status
    #[error("HTTP-Status {status}: {text}")]
    HttpStatus { status: u16, text: String },

    #[error("HTTP-Fehler: {0}")]
    Http(reqwest::Error),

    #[error("URL ungueltig: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Senden an den Verbindungs-Task fehlgeschlagen (Channel geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Ob der Fehler voruebergehend ist und keinen Zustand aendern darf
    pub fn ist_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_)
                | Self::VerbindungGetrennt
                | Self::Http(_)
                | Self::WebSocket(_)
                | Self::SendFehler
        ) || matches!(self, Self::HttpStatus { status, .. } if *status >= 500)
    }

    /// Ob der Server das Objekt ausdruecklich nicht kennt
    pub fn ist_nicht_gefunden(&self) -> bool {
        matches!(self, Self::NichtGefunden(_))
    }
}

impl From<reqwest::Error> for SignalingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unreachable(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

/// Result-Typ fuer Signaling und Raum-Verzeichnis
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transiente_fehler() {
        assert!(SignalingError::Unreachable("dns".into()).ist_transient());
        assert!(SignalingError::HttpStatus {
            status: 503,
            text: String::new()
        }
        .ist_transient());
        assert!(!SignalingError::NichtGefunden("raum".into()).ist_transient());
        assert!(!SignalingError::HttpStatus {
            status: 400,
            text: String::new()
        }
        .ist_transient());
    }

    #[test]
    fn nur_nicht_gefunden_ist_endgueltig() {
        assert!(SignalingError::NichtGefunden("x".into()).ist_nicht_gefunden());
        assert!(!SignalingError::Unreachable("x".into()).ist_nicht_gefunden());
    }
}
