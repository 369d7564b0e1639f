//! Fehlertypen fuer Tandem
//!
//! Gemeinsamer Fehler-Enum fuer Eingabe- und Protokollfehler. Die Crates
//! weiter oben definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Tandem
pub type Result<T> = std::result::Result<T, TandemError>;

/// Gemeinsame Fehler im Tandem-System
#[derive(Debug, Error)]
pub enum TandemError {
    // --- Eingaben ---
    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Protokollversion nicht unterstuetzt: erwartet={erwartet}, erhalten={erhalten}")]
    ProtokollVersion { erwartet: u8, erhalten: u8 },

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl TandemError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}
