//! Lokaler Session-Datensatz und seine Persistenz
//!
//! Eine Session ist der lokale Gespraechs-Datensatz. Sie ueberlebt
//! App-Neustarts, die Raum-Mitgliedschaft dagegen nicht.
//!
//! ## Zustaende
//! ```text
//! Pending --Code angenommen--> Accepted --Raum weg/geloescht--> Closed
//!    |
//!    +--Code abgelaufen--> Expired
//! ```
//!
//! `room_id` wird nur zusammen mit dem Verlassen von `Accepted` geleert,
//! deshalb sind Status und Raum nur ueber Methoden aenderbar.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tandem_core::{DeviceId, JoinCode, Role, RoomId, SessionId};
use tandem_protocol::RetentionPolicy;

use crate::error::SessionResult;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Accepted,
    Closed,
    Expired,
}

impl SessionStatus {
    /// Ob die Session noch benutzbar ist
    pub fn ist_offen(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub label: Option<String>,
    pub join_code: JoinCode,
    room_id: Option<RoomId>,
    status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub device_id: DeviceId,
    /// Einmal festgelegt, danach stabil ueber Reconnects
    pub role: Option<Role>,
    pub encryption_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub sort_order: i64,
}

impl Session {
    /// Neue, noch nicht angenommene Session
    pub fn neu(label: Option<String>, join_code: JoinCode, retention: RetentionPolicy) -> Self {
        let jetzt = Utc::now();
        Self {
            id: SessionId::new(),
            label,
            join_code,
            room_id: None,
            status: SessionStatus::Pending,
            created_at: jetzt,
            accepted_at: None,
            closed_at: None,
            last_activity_at: jetzt,
            device_id: DeviceId::new(),
            role: None,
            encryption_completed_at: None,
            retention,
            pinned: false,
            sort_order: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    /// Pending -> Accepted mit zugeordnetem Raum
    ///
    /// Gibt `false` zurueck wenn die Session nicht (mehr) offen ist.
    pub fn annehmen(&mut self, room_id: RoomId) -> bool {
        match self.status {
            SessionStatus::Pending => {
                let jetzt = Utc::now();
                self.status = SessionStatus::Accepted;
                self.room_id = Some(room_id);
                self.accepted_at = Some(jetzt);
                self.last_activity_at = jetzt;
                true
            }
            SessionStatus::Accepted => self.room_id.as_ref() == Some(&room_id),
            SessionStatus::Closed | SessionStatus::Expired => false,
        }
    }

    /// Raum existiert nicht mehr
    pub fn schliessen(&mut self) {
        self.status = SessionStatus::Closed;
        self.room_id = None;
        self.closed_at = Some(Utc::now());
    }

    /// Code lief ab bevor er angenommen wurde
    pub fn ablaufen(&mut self) {
        self.status = SessionStatus::Expired;
        self.room_id = None;
        self.closed_at = Some(Utc::now());
    }

    pub fn aktivitaet(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Persistenz fuer Session-Datensaetze
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn alle_laden(&self) -> SessionResult<Vec<Session>>;

    /// Legt an oder ersetzt
    async fn speichern(&self, session: &Session) -> SessionResult<()>;

    /// Entfernen ist idempotent
    async fn loeschen(&self, id: SessionId) -> SessionResult<()>;
}

/// Alle Sessions in einer JSON-Datei
///
/// Schreibt erst in eine temporaere Datei und benennt dann um, damit ein
/// Absturz keine halbe Datei hinterlaesst.
#[derive(Debug)]
pub struct JsonSessionStore {
    pfad: PathBuf,
    sperre: tokio::sync::Mutex<()>,
}

impl JsonSessionStore {
    pub fn new(pfad: impl Into<PathBuf>) -> Self {
        Self {
            pfad: pfad.into(),
            sperre: tokio::sync::Mutex::new(()),
        }
    }

    async fn lesen(&self) -> SessionResult<HashMap<SessionId, Session>> {
        match tokio::fs::read(&self.pfad).await {
            Ok(bytes) => {
                let sessions: Vec<Session> = serde_json::from_slice(&bytes)?;
                Ok(sessions.into_iter().map(|s| (s.id, s)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn schreiben(&self, sessions: HashMap<SessionId, Session>) -> SessionResult<()> {
        if let Some(parent) = self.pfad.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut liste: Vec<Session> = sessions.into_values().collect();
        liste.sort_by_key(|s| s.created_at);
        let bytes = serde_json::to_vec_pretty(&liste)?;

        let tmp = self.pfad.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.pfad).await?;
        tracing::debug!(pfad = %self.pfad.display(), anzahl = liste.len(), "Sessions gespeichert");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn alle_laden(&self) -> SessionResult<Vec<Session>> {
        let _guard = self.sperre.lock().await;
        let mut liste: Vec<Session> = self.lesen().await?.into_values().collect();
        liste.sort_by_key(|s| s.created_at);
        Ok(liste)
    }

    async fn speichern(&self, session: &Session) -> SessionResult<()> {
        let _guard = self.sperre.lock().await;
        let mut sessions = self.lesen().await?;
        sessions.insert(session.id, session.clone());
        self.schreiben(sessions).await
    }

    async fn loeschen(&self, id: SessionId) -> SessionResult<()> {
        let _guard = self.sperre.lock().await;
        let mut sessions = self.lesen().await?;
        if sessions.remove(&id).is_some() {
            self.schreiben(sessions).await?;
        }
        Ok(())
    }
}

/// Sessions im Arbeitsspeicher
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn alle_laden(&self) -> SessionResult<Vec<Session>> {
        let mut liste: Vec<Session> = self.sessions.iter().map(|e| e.value().clone()).collect();
        liste.sort_by_key(|s| s.created_at);
        Ok(liste)
    }

    async fn speichern(&self, session: &Session) -> SessionResult<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn loeschen(&self, id: SessionId) -> SessionResult<()> {
        self.sessions.remove(&id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
