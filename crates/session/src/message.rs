//! Chat-Nachrichten einer Session und ihre Persistenz

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tandem_core::SessionId;
use tandem_protocol::{LocationPayload, Payload, VoicePayload};
use uuid::Uuid;

use crate::error::SessionResult;

/// Wer eine Nachricht erzeugt hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Absender {
    Ich,
    Peer,
    /// Lokale Ereignisse (Peer verbunden, Verbindung verloren, ...)
    System,
}

/// Inhalt einer Nachricht im Verlauf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Inhalt {
    Text(String),
    Location(LocationPayload),
    Voice(VoicePayload),
    System(String),
}

impl Inhalt {
    /// Inhalt aus einem entschluesselten Payload; Steuernachrichten gehoeren
    /// nicht in den Verlauf
    pub fn aus_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Text(text) => Some(Self::Text(text)),
            Payload::Location(standort) => Some(Self::Location(standort)),
            Payload::Voice(sprache) => Some(Self::Voice(sprache)),
            Payload::RetentionSync(_) => None,
        }
    }

    /// Payload fuer den Versand; Systemereignisse verlassen das Geraet nie
    pub fn als_payload(&self) -> Option<Payload> {
        match self {
            Self::Text(text) => Some(Payload::Text(text.clone())),
            Self::Location(standort) => Some(Payload::Location(standort.clone())),
            Self::Voice(sprache) => Some(Payload::Voice(sprache.clone())),
            Self::System(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub absender: Absender,
    pub inhalt: Inhalt,
    pub zeitstempel: DateTime<Utc>,
    /// `None`: laeuft nie ab
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    pub fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|ablauf| ablauf <= jetzt)
    }
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

/// Persistenz fuer den Verlauf einer Session
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn laden(&self, session_id: SessionId) -> SessionResult<Vec<StoredMessage>>;

    /// Ersetzt den gesamten gespeicherten Verlauf
    async fn ersetzen(
        &self,
        session_id: SessionId,
        nachrichten: &[StoredMessage],
    ) -> SessionResult<()>;

    /// Entfernen ist idempotent
    async fn loeschen(&self, session_id: SessionId) -> SessionResult<()>;
}

/// Eine JSON-Datei pro Session unter `base_dir/<uuid>.json`
#[derive(Debug, Clone)]
pub struct DiskMessageStore {
    base_dir: PathBuf,
}

impl DiskMessageStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn pfad(&self, session_id: SessionId) -> PathBuf {
        self.base_dir.join(format!("{}.json", session_id.inner()))
    }
}

#[async_trait]
impl MessageStore for DiskMessageStore {
    async fn laden(&self, session_id: SessionId) -> SessionResult<Vec<StoredMessage>> {
        let pfad = self.pfad(session_id);
        match tokio::fs::read(&pfad).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ersetzen(
        &self,
        session_id: SessionId,
        nachrichten: &[StoredMessage],
    ) -> SessionResult<()> {
        if nachrichten.is_empty() {
            return self.loeschen(session_id).await;
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let pfad = self.pfad(session_id);
        let tmp = pfad.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(nachrichten)?).await?;
        tokio::fs::rename(&tmp, &pfad).await?;
        tracing::debug!(
            pfad = %pfad.display(),
            anzahl = nachrichten.len(),
            "Verlauf gespeichert"
        );
        Ok(())
    }

    async fn loeschen(&self, session_id: SessionId) -> SessionResult<()> {
        let pfad = self.pfad(session_id);
        match tokio::fs::remove_file(&pfad).await {
            Ok(()) => {
                tracing::debug!(pfad = %pfad.display(), "Verlauf geloescht");
                Ok(())
            }
            // Bereits geloescht
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Verlauf im Arbeitsspeicher
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    verlaeufe: DashMap<SessionId, Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ob fuer die Session etwas gespeichert ist
    pub fn enthaelt(&self, session_id: SessionId) -> bool {
        self.verlaeufe.contains_key(&session_id)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn laden(&self, session_id: SessionId) -> SessionResult<Vec<StoredMessage>> {
        Ok(self
            .verlaeufe
            .get(&session_id)
            .map(|v| v.value().clone())
            .unwrap_or_default())
    }

    async fn ersetzen(
        &self,
        session_id: SessionId,
        nachrichten: &[StoredMessage],
    ) -> SessionResult<()> {
        if nachrichten.is_empty() {
            self.verlaeufe.remove(&session_id);
        } else {
            self.verlaeufe.insert(session_id, nachrichten.to_vec());
        }
        Ok(())
    }

    async fn loeschen(&self, session_id: SessionId) -> SessionResult<()> {
        self.verlaeufe.remove(&session_id);
        Ok(())
    }
}
