//! Befehle an den Orchestrator und der klonbare Handle dafuer

use tandem_core::{SessionId, TandemError};
use tandem_protocol::{LocationPayload, RetentionPolicy, VoicePayload};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::Antwort;
use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::message::{Inhalt, StoredMessage};
use crate::model::Session;

pub(super) enum Befehl {
    SessionErstellen {
        label: Option<String>,
        ttl_sekunden: Option<u64>,
        antwort: Antwort<Session>,
    },
    CodeAnnehmen {
        code: String,
        label: Option<String>,
        antwort: Antwort<Session>,
    },
    StatusPruefen {
        session_id: SessionId,
        antwort: Antwort<Session>,
    },
    SessionLoeschen {
        session_id: SessionId,
        antwort: Antwort<()>,
    },
    SessionAnheften {
        session_id: SessionId,
        angeheftet: bool,
        antwort: Antwort<Session>,
    },
    Sessions {
        antwort: oneshot::Sender<Vec<Session>>,
    },
    RaumBeitreten {
        session_id: SessionId,
        antwort: Antwort<()>,
    },
    RaumVerlassen {
        antwort: Antwort<()>,
    },
    Senden {
        inhalt: Inhalt,
        antwort: Antwort<StoredMessage>,
    },
    AufbewahrungAendern {
        session_id: SessionId,
        policy: RetentionPolicy,
        antwort: Antwort<()>,
    },
    Nachrichten {
        session_id: SessionId,
        antwort: oneshot::Sender<Vec<StoredMessage>>,
    },
    OberflaecheAktiv(bool),
    Vordergrund,
    Hintergrund,
    Zustand {
        antwort: oneshot::Sender<VerbindungsZustand>,
    },
    Beenden,
}

/// Zugriff auf einen laufenden Orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    befehle: mpsc::Sender<Befehl>,
    events: broadcast::Sender<SessionEvent>,
}

impl OrchestratorHandle {
    pub(super) fn neu(
        befehle: mpsc::Sender<Befehl>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { befehle, events }
    }

    /// Neuer Empfaenger fuer alle folgenden Ereignisse
    pub fn abonnieren(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn schicken(&self, befehl: Befehl) -> SessionResult<()> {
        self.befehle
            .send(befehl)
            .await
            .map_err(|_| SessionError::Beendet)
    }

    async fn anfrage<T>(&self, befehl: impl FnOnce(Antwort<T>) -> Befehl) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.schicken(befehl(tx)).await?;
        rx.await.map_err(|_| SessionError::Beendet)?
    }

    async fn abfrage<T>(
        &self,
        befehl: impl FnOnce(oneshot::Sender<T>) -> Befehl,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.schicken(befehl(tx)).await?;
        rx.await.map_err(|_| SessionError::Beendet)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Neue Session mit zufaelligem Code; `ttl_sekunden` ueberschreibt die
    /// konfigurierte Raum-Lebensdauer
    pub async fn session_erstellen(
        &self,
        label: Option<String>,
        ttl_sekunden: Option<u64>,
    ) -> SessionResult<Session> {
        self.anfrage(|antwort| Befehl::SessionErstellen {
            label,
            ttl_sekunden,
            antwort,
        })
        .await
    }

    /// Nimmt einen Code der Gegenseite an
    pub async fn code_annehmen(&self, code: &str, label: Option<String>) -> SessionResult<Session> {
        let code = code.to_string();
        self.anfrage(|antwort| Befehl::CodeAnnehmen {
            code,
            label,
            antwort,
        })
        .await
    }

    /// Fragt beim Raum-Verzeichnis nach und aktualisiert den Status
    pub async fn status_pruefen(&self, session_id: SessionId) -> SessionResult<Session> {
        self.anfrage(|antwort| Befehl::StatusPruefen {
            session_id,
            antwort,
        })
        .await
    }

    pub async fn session_loeschen(&self, session_id: SessionId) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::SessionLoeschen {
            session_id,
            antwort,
        })
        .await
    }

    pub async fn session_anheften(
        &self,
        session_id: SessionId,
        angeheftet: bool,
    ) -> SessionResult<Session> {
        self.anfrage(|antwort| Befehl::SessionAnheften {
            session_id,
            angeheftet,
            antwort,
        })
        .await
    }

    /// Angeheftete zuerst, dann nach Sortierung und letzter Aktivitaet
    pub async fn sessions(&self) -> SessionResult<Vec<Session>> {
        self.abfrage(|antwort| Befehl::Sessions { antwort }).await
    }

    // -----------------------------------------------------------------------
    // Raum
    // -----------------------------------------------------------------------

    pub async fn raum_beitreten(&self, session_id: SessionId) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::RaumBeitreten {
            session_id,
            antwort,
        })
        .await
    }

    pub async fn raum_verlassen(&self) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::RaumVerlassen { antwort })
            .await
    }

    pub async fn zustand(&self) -> SessionResult<VerbindungsZustand> {
        self.abfrage(|antwort| Befehl::Zustand { antwort }).await
    }

    // -----------------------------------------------------------------------
    // Nachrichten
    // -----------------------------------------------------------------------

    pub async fn text_senden(&self, text: impl Into<String>) -> SessionResult<StoredMessage> {
        self.senden(Inhalt::Text(text.into())).await
    }

    pub async fn standort_senden(&self, standort: LocationPayload) -> SessionResult<StoredMessage> {
        if !standort.ist_gueltig() {
            return Err(TandemError::UngueltigeEingabe("Koordinaten ausserhalb des Bereichs".into()).into());
        }
        self.senden(Inhalt::Location(standort)).await
    }

    pub async fn sprache_senden(&self, sprache: VoicePayload) -> SessionResult<StoredMessage> {
        self.senden(Inhalt::Voice(sprache)).await
    }

    async fn senden(&self, inhalt: Inhalt) -> SessionResult<StoredMessage> {
        self.anfrage(|antwort| Befehl::Senden { inhalt, antwort })
            .await
    }

    pub async fn nachrichten(&self, session_id: SessionId) -> SessionResult<Vec<StoredMessage>> {
        self.abfrage(|antwort| Befehl::Nachrichten {
            session_id,
            antwort,
        })
        .await
    }

    /// Aendert die Aufbewahrung lokal und synchronisiert sie zum Peer
    pub async fn aufbewahrung_aendern(
        &self,
        session_id: SessionId,
        policy: RetentionPolicy,
    ) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::AufbewahrungAendern {
            session_id,
            policy,
            antwort,
        })
        .await
    }

    // -----------------------------------------------------------------------
    // App-Lebenszyklus
    // -----------------------------------------------------------------------

    /// Ob die Gespraechs-Ansicht sichtbar ist; solange nicht, wird
    /// `room_ready` zurueckgehalten
    pub async fn oberflaeche_aktiv(&self, aktiv: bool) -> SessionResult<()> {
        self.schicken(Befehl::OberflaecheAktiv(aktiv)).await
    }

    /// App im Vordergrund: Aufraeumen und ggf. automatischer Wiederbeitritt
    pub async fn vordergrund(&self) -> SessionResult<()> {
        self.schicken(Befehl::Vordergrund).await
    }

    pub async fn hintergrund(&self) -> SessionResult<()> {
        self.schicken(Befehl::Hintergrund).await
    }

    /// Verlaesst einen aktiven Raum und beendet den Task
    pub async fn beenden(&self) -> SessionResult<()> {
        self.schicken(Befehl::Beenden).await
    }
}
