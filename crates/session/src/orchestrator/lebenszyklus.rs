//! Session-Lebenszyklus ueber das Raum-Verzeichnis und Aufbewahrung

use std::sync::Arc;

use tandem_core::{JoinCode, RoomId, SessionId};
use tandem_crypto::CryptoSessionId;
use tandem_protocol::{Payload, RetentionPolicy};
use tandem_signaling::{PendingStatus, SignalingError, SignalingResult};

use super::{signaling_fehler, Antwort, Intern, Orchestrator, StatusErgebnis};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::model::{Session, SessionStatus};

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Erstellen / Annehmen
    // -----------------------------------------------------------------------

    pub(super) fn session_erstellen(
        &mut self,
        label: Option<String>,
        ttl_sekunden: Option<u64>,
        antwort: Antwort<Session>,
    ) {
        let session = Session::neu(label, JoinCode::zufaellig(), self.config.standard_aufbewahrung);
        let ttl = ttl_sekunden.unwrap_or(self.config.raum_ttl_sekunden);
        let raeume = Arc::clone(&self.abh.raeume);
        let push_token = self.abh.push_token.clone();

        self.intern_spawn(async move {
            let ergebnis = raeume
                .create_room(&session.join_code, ttl, &session.device_id, push_token.as_deref())
                .await;
            Intern::SessionAngelegt {
                session,
                ergebnis,
                antwort,
            }
        });
    }

    pub(super) async fn session_angelegt(
        &mut self,
        session: Session,
        ergebnis: SignalingResult<()>,
        antwort: Antwort<Session>,
    ) {
        let ergebnis = match ergebnis {
            Ok(()) => self.session_uebernehmen(session).await,
            Err(e) => {
                tracing::warn!(fehler = %e, "Raum konnte nicht angelegt werden");
                Err(signaling_fehler(e))
            }
        };
        let _ = antwort.send(ergebnis);
    }

    pub(super) fn code_annehmen(&mut self, code: &str, label: Option<String>, antwort: Antwort<Session>) {
        let join_code = match JoinCode::parse(code) {
            Ok(join_code) => join_code,
            Err(e) => {
                let _ = antwort.send(Err(e.into()));
                return;
            }
        };
        let session = Session::neu(label, join_code, self.config.standard_aufbewahrung);
        let raeume = Arc::clone(&self.abh.raeume);
        let push_token = self.abh.push_token.clone();

        self.intern_spawn(async move {
            let ergebnis = raeume
                .accept_join_code(&session.join_code, &session.device_id, push_token.as_deref())
                .await;
            Intern::CodeAngenommen {
                session,
                ergebnis,
                antwort,
            }
        });
    }

    pub(super) async fn code_angenommen(
        &mut self,
        mut session: Session,
        ergebnis: SignalingResult<RoomId>,
        antwort: Antwort<Session>,
    ) {
        let ergebnis = match ergebnis {
            Ok(room_id) => {
                tracing::info!(room_id = %room_id, "Join-Code angenommen");
                session.annehmen(room_id);
                self.session_uebernehmen(session).await
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Join-Code nicht angenommen");
                Err(signaling_fehler(e))
            }
        };
        let _ = antwort.send(ergebnis);
    }

    /// Neue Session in Cache, Store und Verlauf aufnehmen
    async fn session_uebernehmen(&mut self, session: Session) -> SessionResult<Session> {
        self.retention
            .session_laden(session.id, session.retention)
            .await?;
        self.session_sichern(session.clone()).await?;
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub(super) fn status_pruefen(&mut self, session_id: SessionId, antwort: Antwort<Session>) {
        let Some(session) = self.sessions.get(&session_id) else {
            let _ = antwort.send(Err(SessionError::SessionNichtGefunden(session_id)));
            return;
        };
        let raeume = Arc::clone(&self.abh.raeume);

        match (session.status(), session.room_id().cloned()) {
            (SessionStatus::Pending, _) => {
                let join_code = session.join_code.clone();
                let device_id = session.device_id;
                self.intern_spawn(async move {
                    let ergebnis = raeume.check_pending(&join_code, &device_id).await;
                    Intern::StatusErmittelt {
                        session_id,
                        ergebnis: StatusErgebnis::Ausstehend(ergebnis),
                        antwort,
                    }
                });
            }
            (SessionStatus::Accepted, Some(room_id)) => {
                self.intern_spawn(async move {
                    let ergebnis = raeume.get_room(&room_id).await;
                    Intern::StatusErmittelt {
                        session_id,
                        ergebnis: StatusErgebnis::Raum(ergebnis),
                        antwort,
                    }
                });
            }
            // Geschlossene Sessions aendern sich nicht mehr
            _ => {
                let _ = antwort.send(Ok(session.clone()));
            }
        }
    }

    pub(super) async fn status_ermittelt(
        &mut self,
        session_id: SessionId,
        ergebnis: StatusErgebnis,
        antwort: Antwort<Session>,
    ) {
        let _ = antwort.send(self.status_anwenden(session_id, ergebnis).await);
    }

    async fn status_anwenden(
        &mut self,
        session_id: SessionId,
        ergebnis: StatusErgebnis,
    ) -> SessionResult<Session> {
        let mut session = self
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNichtGefunden(session_id))?;

        let vorher = session.status();
        match ergebnis {
            StatusErgebnis::Ausstehend(Ok(PendingStatus::Accepted(room_id))) => {
                session.annehmen(room_id);
            }
            StatusErgebnis::Ausstehend(Ok(PendingStatus::StillPending)) => {}
            StatusErgebnis::Ausstehend(Ok(PendingStatus::Expired)) => session.ablaufen(),
            StatusErgebnis::Ausstehend(Err(e)) if e.ist_nicht_gefunden() => session.ablaufen(),
            StatusErgebnis::Raum(Ok(_)) => {}
            StatusErgebnis::Raum(Err(e)) if e.ist_nicht_gefunden() => {
                if self.raum.as_ref().is_some_and(|r| r.session_id == session_id) {
                    self.raum_verlassen().await?;
                }
                session.schliessen();
            }
            // Netzwerkprobleme lassen den Status unveraendert
            StatusErgebnis::Ausstehend(Err(e)) | StatusErgebnis::Raum(Err(e)) => {
                return Err(status_fehler(e));
            }
        }

        if session.status() != vorher {
            tracing::info!(
                session = %session_id,
                von = ?vorher,
                nach = ?session.status(),
                "Session-Status geaendert"
            );
            self.session_sichern(session.clone()).await?;
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Verwaltung
    // -----------------------------------------------------------------------

    pub(super) async fn session_loeschen(&mut self, session_id: SessionId) -> SessionResult<()> {
        let session = self
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNichtGefunden(session_id))?;

        if self.raum.as_ref().is_some_and(|r| r.session_id == session_id) {
            self.raum_verlassen().await?;
        }
        if self.rejoin_ziel == Some(session_id) {
            self.rejoin_ziel = None;
        }

        if let Some(room_id) = session.room_id().cloned() {
            self.key_exchange
                .verwerfen(&CryptoSessionId::aus_raum(&room_id));
            let raeume = Arc::clone(&self.abh.raeume);
            tokio::spawn(async move {
                if let Err(e) = raeume.delete_room(&room_id).await {
                    tracing::debug!(room_id = %room_id, fehler = %e, "Raum nicht serverseitig geloescht");
                }
            });
        }

        self.retention.session_entfernen(session_id).await?;
        self.abh.sessions.loeschen(session_id).await?;
        self.sessions.remove(&session_id);
        tracing::info!(session = %session_id, "Session geloescht");
        self.emit(SessionEvent::SessionEntfernt(session_id));
        Ok(())
    }

    pub(super) async fn session_anheften(
        &mut self,
        session_id: SessionId,
        angeheftet: bool,
    ) -> SessionResult<Session> {
        let mut session = self
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNichtGefunden(session_id))?;
        if session.pinned != angeheftet {
            session.pinned = angeheftet;
            // Neu Angeheftete landen hinter den bisherigen
            session.sort_order = if angeheftet {
                self.sessions
                    .values()
                    .filter(|s| s.pinned)
                    .map(|s| s.sort_order + 1)
                    .max()
                    .unwrap_or(0)
            } else {
                0
            };
            self.session_sichern(session.clone()).await?;
        }
        Ok(session)
    }

    pub(super) fn sessions_sortiert(&self) -> Vec<Session> {
        let mut liste: Vec<Session> = self.sessions.values().cloned().collect();
        liste.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(a.sort_order.cmp(&b.sort_order))
                .then(b.last_activity_at.cmp(&a.last_activity_at))
        });
        liste
    }

    // -----------------------------------------------------------------------
    // Aufbewahrung
    // -----------------------------------------------------------------------

    /// Lokale Aenderung; bei bestehender Verbindung bekommt der Peer sie mit
    pub(super) async fn aufbewahrung_aendern(
        &mut self,
        session_id: SessionId,
        policy: RetentionPolicy,
    ) -> SessionResult<()> {
        if !self.aufbewahrung_anwenden(session_id, policy).await? {
            return Ok(());
        }

        let verbunden = self
            .raum
            .as_ref()
            .is_some_and(|r| r.session_id == session_id && r.peer_verbunden);
        if verbunden {
            if let Err(e) = self
                .verschluesselt_senden(&Payload::RetentionSync(policy))
                .await
            {
                tracing::warn!(fehler = %e, "Aufbewahrung nicht an Peer gesendet");
            }
        }
        Ok(())
    }

    /// Setzt die Richtlinie ohne Rueckmeldung an den Peer
    ///
    /// Gibt `false` zurueck wenn die Richtlinie schon galt.
    pub(super) async fn aufbewahrung_anwenden(
        &mut self,
        session_id: SessionId,
        policy: RetentionPolicy,
    ) -> SessionResult<bool> {
        if !self.sessions.contains_key(&session_id) {
            return Err(SessionError::SessionNichtGefunden(session_id));
        }
        self.session_aendern(session_id, |s| s.retention = policy)
            .await;
        let geaendert = self.retention.policy_aendern(session_id, policy).await?;
        if geaendert {
            self.emit(SessionEvent::AufbewahrungGeaendert { session_id, policy });
            self.system_ereignis(session_id, &format!("Aufbewahrung: {policy}"))
                .await;
        }
        Ok(geaendert)
    }
}

/// Transiente Fehler gelten als "nicht erreichbar"
fn status_fehler(e: SignalingError) -> SessionError {
    if e.ist_transient() {
        SessionError::SignalingUnreachable
    } else {
        SessionError::Signaling(e)
    }
}
