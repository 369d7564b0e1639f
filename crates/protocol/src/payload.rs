//! Anwendungs-Payloads im Klartext eines Umschlags
//!
//! Ueber denselben Umschlag laufen vier Arten von Inhalt:
//! - Chat-Text (rohe UTF-8 Bytes)
//! - Standort (`{"lat":..,"lon":..}`)
//! - Sprachnachricht (`{"voice":"<base64>","durationMs":..}`)
//! - Steuernachricht zur Synchronisation der Aufbewahrung
//!   (`{"control":"retention_sync","policy":{..}}`)
//!
//! Beim Dekodieren werden zuerst die strukturierten Formen probiert, erst
//! danach gilt der Inhalt als Chat-Text. Ein Objekt mit `control`-Feld ist
//! immer eine Steuernachricht; ist sie unbekannt oder kaputt, ist das ein
//! Fehler und nie Chat-Text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tandem_core::TandemError;

use crate::retention::RetentionPolicy;

/// Geteilter Standort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub lat: f64,
    pub lon: f64,
    /// Genauigkeit in Metern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl LocationPayload {
    /// Prueft den Wertebereich der Koordinaten
    pub fn ist_gueltig(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Aufgenommene Sprachnachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePayload {
    /// Audio-Daten (Base64)
    pub voice: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl VoicePayload {
    /// Erstellt eine Sprachnachricht aus rohen Audio-Bytes
    pub fn aus_audio(audio: &[u8], duration_ms: u64, mime_type: Option<String>) -> Self {
        Self {
            voice: BASE64.encode(audio),
            duration_ms,
            mime_type,
        }
    }

    /// Dekodiert die Audio-Daten
    pub fn audio_bytes(&self) -> Result<Vec<u8>, TandemError> {
        BASE64
            .decode(&self.voice)
            .map_err(|e| TandemError::UngueltigeNachricht(format!("Audio nicht dekodierbar: {e}")))
    }
}

/// Interne Steuernachrichten zwischen den Peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
enum Steuernachricht {
    RetentionSync { policy: RetentionPolicy },
}

const STEUER_FELD: &str = "control";

/// Strukturierte Formen, in Dekodier-Reihenfolge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Strukturiert {
    Steuerung(Steuernachricht),
    Sprache(VoicePayload),
    Standort(LocationPayload),
}

/// Dekodierter Inhalt eines Umschlags
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Location(LocationPayload),
    Voice(VoicePayload),
    /// Steuernachricht, erscheint nie im Chat-Verlauf
    RetentionSync(RetentionPolicy),
}

impl Payload {
    /// Ob dies eine interne Steuernachricht ist
    pub fn ist_steuerung(&self) -> bool {
        matches!(self, Self::RetentionSync(_))
    }

    /// Klartext-Bytes fuer die Verschluesselung
    pub fn kodieren(&self) -> Result<Vec<u8>, TandemError> {
        let strukturiert = match self {
            Self::Text(text) => return Ok(text.as_bytes().to_vec()),
            Self::Location(standort) => Strukturiert::Standort(standort.clone()),
            Self::Voice(sprache) => Strukturiert::Sprache(sprache.clone()),
            Self::RetentionSync(policy) => {
                Strukturiert::Steuerung(Steuernachricht::RetentionSync { policy: *policy })
            }
        };
        Ok(serde_json::to_vec(&strukturiert)?)
    }

    /// Klassifiziert entschluesselte Bytes
    pub fn dekodieren(bytes: &[u8]) -> Result<Self, TandemError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| TandemError::UngueltigeNachricht("Payload ist kein UTF-8".into()))?;

        if text.trim_start().starts_with('{') {
            if let Ok(serde_json::Value::Object(objekt)) = serde_json::from_str(text) {
                if objekt.contains_key(STEUER_FELD) {
                    return Self::steuerung_dekodieren(objekt);
                }
            }
            match serde_json::from_str::<Strukturiert>(text) {
                Ok(Strukturiert::Steuerung(Steuernachricht::RetentionSync { policy })) => {
                    return Ok(Self::RetentionSync(policy));
                }
                Ok(Strukturiert::Sprache(sprache)) => return Ok(Self::Voice(sprache)),
                Ok(Strukturiert::Standort(standort)) if standort.ist_gueltig() => {
                    return Ok(Self::Location(standort));
                }
                // Ungueltige Koordinaten oder beliebiges JSON: als Text behandeln
                _ => {}
            }
        }

        Ok(Self::Text(text.to_string()))
    }

    fn steuerung_dekodieren(
        objekt: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, TandemError> {
        let art = objekt
            .get(STEUER_FELD)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value(serde_json::Value::Object(objekt)) {
            Ok(Steuernachricht::RetentionSync { policy }) => Ok(Self::RetentionSync(policy)),
            Err(e) => Err(TandemError::UngueltigeNachricht(format!(
                "Steuernachricht '{art}' nicht lesbar: {e}"
            ))),
        }
    }
}
