//! Verbindungs-Orchestrierung
//!
//! Ein einzelner Task besitzt den gesamten Zustand und verarbeitet vier
//! Eingaenge nacheinander:
//!
//! ```text
//!   OrchestratorHandle --Befehl--+
//!   SignalingBridge --BridgeEvent-+--> Orchestrator::ausfuehren --> SessionEvent (broadcast)
//!   Transport --TransportEvent----+
//!   spawn/spawn_blocking --Intern-+
//! ```
//!
//! Aufwaendige Arbeit (Schluessel erzeugen/ableiten, REST, Statistiken) laeuft
//! ausserhalb und kommt als `Intern` zurueck. Raum-bezogene Ergebnisse tragen
//! eine Generation; Ergebnisse einer alten Generation werden verworfen.
//! Verlassen, Peer-Verlust und Re-Keying erhoehen die Generation.

mod handle;
mod lebenszyklus;
mod raum;
mod verbindung;

pub use handle::OrchestratorHandle;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tandem_core::{Role, RoomId, SessionId};
use tandem_crypto::{
    CryptoResult, CryptoSessionId, KeyExchange, LocalKeypair, SecretBytes, SecureKeyStore,
    SessionCipher,
};
use tandem_observability::TandemMetrics;
use tandem_protocol::{IceCandidate, RetentionPolicy, SignalingMessage};
use tandem_signaling::{
    BridgeEvent, PendingStatus, RoomDirectory, RoomInfo, SignalingBridge, SignalingError,
    SignalingResult,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::encryption::EncryptionState;
use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::handshake::{HandshakeState, PeerAngebot};
use crate::message::{Absender, Inhalt, MessageStore};
use crate::model::{Session, SessionStore};
use crate::retention::RetentionEngine;
use crate::slot::PendingSlot;
use crate::transport::{CandidatePair, TransportAdapter, TransportEvent, TransportFactory};

use handle::Befehl;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Verzoegerung bevor der Initiator das Offer erzeugt
pub const OFFER_VERZOEGERUNG: Duration = Duration::from_millis(300);
/// Wartezeit auf `left_room` bevor das Signaling neu verbunden wird
pub const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);
pub const PFAD_VERZOEGERUNG: Duration = Duration::from_millis(500);
pub const PFAD_WIEDERHOLUNG: Duration = Duration::from_millis(1500);
pub const AUFRAEUM_INTERVALL: Duration = Duration::from_secs(60);
/// Standard-Lebensdauer eines Raums beim Erstellen
pub const RAUM_TTL_SEKUNDEN: u64 = 24 * 60 * 60;
pub const KANDIDATEN_PUFFER: usize = 32;

const KANAL_GROESSE: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub offer_verzoegerung: Duration,
    pub leave_timeout: Duration,
    pub pfad_verzoegerung: Duration,
    pub pfad_wiederholung: Duration,
    pub aufraeum_intervall: Duration,
    pub raum_ttl_sekunden: u64,
    pub standard_aufbewahrung: RetentionPolicy,
    /// Maximal gepufferte Remote-Kandidaten vor der Remote-Beschreibung
    pub kandidaten_puffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            offer_verzoegerung: OFFER_VERZOEGERUNG,
            leave_timeout: LEAVE_TIMEOUT,
            pfad_verzoegerung: PFAD_VERZOEGERUNG,
            pfad_wiederholung: PFAD_WIEDERHOLUNG,
            aufraeum_intervall: AUFRAEUM_INTERVALL,
            raum_ttl_sekunden: RAUM_TTL_SEKUNDEN,
            standard_aufbewahrung: RetentionPolicy::default(),
            kandidaten_puffer: KANDIDATEN_PUFFER,
        }
    }
}

/// Alle Kollaborateure, von der App hineingereicht
pub struct OrchestratorAbhaengigkeiten {
    pub signaling: Arc<dyn SignalingBridge>,
    pub raeume: Arc<dyn RoomDirectory>,
    pub schluessel: Arc<dyn SecureKeyStore>,
    pub transport: Arc<dyn TransportFactory>,
    pub sessions: Arc<dyn SessionStore>,
    pub nachrichten: Arc<dyn MessageStore>,
    pub metriken: Option<TandemMetrics>,
    /// Wird beim Erstellen/Annehmen an das Raum-Verzeichnis gereicht
    pub push_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Interne Eingaben
// ---------------------------------------------------------------------------

type Antwort<T> = oneshot::Sender<SessionResult<T>>;

enum StatusErgebnis {
    Ausstehend(SignalingResult<PendingStatus>),
    Raum(SignalingResult<RoomInfo>),
}

enum Intern {
    SchluesselErzeugt {
        generation: u64,
        keypair: LocalKeypair,
    },
    SchluesselAbgeleitet {
        generation: u64,
        ergebnis: CryptoResult<SecretBytes>,
    },
    Transport {
        generation: u64,
        ereignis: TransportEvent,
    },
    OfferFaellig {
        generation: u64,
    },
    PfadPruefen {
        generation: u64,
        versuch: u8,
    },
    PfadErmittelt {
        generation: u64,
        versuch: u8,
        paar: Option<CandidatePair>,
    },
    LeaveTimeout {
        nummer: u64,
    },
    SessionAngelegt {
        session: Session,
        ergebnis: SignalingResult<()>,
        antwort: Antwort<Session>,
    },
    CodeAngenommen {
        session: Session,
        ergebnis: SignalingResult<RoomId>,
        antwort: Antwort<Session>,
    },
    StatusErmittelt {
        session_id: SessionId,
        ergebnis: StatusErgebnis,
        antwort: Antwort<Session>,
    },
}

// ---------------------------------------------------------------------------
// Aktiver Raum
// ---------------------------------------------------------------------------

/// Alles was nur waehrend einer Raum-Mitgliedschaft existiert
struct ActiveRoom {
    generation: u64,
    session_id: SessionId,
    room_id: RoomId,
    crypto_session: CryptoSessionId,
    beigetreten: bool,
    /// Zaehlt die Handshakes in diesem Raum, die Gegenseite sieht sie als `round`
    runde: u32,
    handshake: Option<HandshakeState>,
    verschluesselung: Option<EncryptionState>,
    /// Peer-Schluessel der vor dem eigenen Schluesselpaar ankam
    peer_schluessel: PendingSlot<PeerAngebot>,
    transport: Option<Arc<dyn TransportAdapter>>,
    remote_beschreibung: bool,
    kandidaten: VecDeque<IceCandidate>,
    einmal_verbunden: bool,
    peer_verbunden: bool,
}

impl ActiveRoom {
    fn neu(generation: u64, session_id: SessionId, room_id: RoomId) -> Self {
        Self {
            generation,
            session_id,
            crypto_session: CryptoSessionId::aus_raum(&room_id),
            room_id,
            beigetreten: false,
            runde: 0,
            handshake: None,
            verschluesselung: None,
            peer_schluessel: PendingSlot::new(),
            transport: None,
            remote_beschreibung: false,
            kandidaten: VecDeque::new(),
            einmal_verbunden: false,
            peer_verbunden: false,
        }
    }

    fn ist_verschluesselt(&self) -> bool {
        self.verschluesselung
            .as_ref()
            .is_some_and(EncryptionState::ist_bereit)
    }

    fn rolle(&self) -> Option<Role> {
        self.verschluesselung.as_ref().map(EncryptionState::rolle)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: OrchestratorConfig,
    abh: OrchestratorAbhaengigkeiten,
    key_exchange: KeyExchange,
    cipher: SessionCipher,
    retention: RetentionEngine,

    events: broadcast::Sender<SessionEvent>,
    befehle: mpsc::Receiver<Befehl>,
    bridge: mpsc::Receiver<BridgeEvent>,
    intern_tx: mpsc::Sender<Intern>,
    intern_rx: mpsc::Receiver<Intern>,

    zustand: VerbindungsZustand,
    sessions: HashMap<SessionId, Session>,
    raum: Option<ActiveRoom>,
    generation: u64,

    signaling_verbunden: bool,
    oberflaeche_aktiv: bool,
    im_vordergrund: bool,
    /// `isInitiator` eines `room_ready` bei inaktiver Oberflaeche
    room_ready: PendingSlot<bool>,
    rejoin_ziel: Option<SessionId>,
    rejoin_unterdrueckt: bool,
    leave_ausstehend: Option<u64>,
    leave_zaehler: u64,
}

impl Orchestrator {
    /// Baut den Orchestrator; `bridge_events` ist der Empfaenger der
    /// Ereignisse von `abh.signaling`
    pub fn neu(
        config: OrchestratorConfig,
        abh: OrchestratorAbhaengigkeiten,
        bridge_events: mpsc::Receiver<BridgeEvent>,
    ) -> (Self, OrchestratorHandle) {
        let (befehle_tx, befehle_rx) = mpsc::channel(KANAL_GROESSE);
        let (intern_tx, intern_rx) = mpsc::channel(KANAL_GROESSE);
        let (events, _) = broadcast::channel(KANAL_GROESSE);

        let orchestrator = Self {
            key_exchange: KeyExchange::new(Arc::clone(&abh.schluessel)),
            cipher: SessionCipher::new(Arc::clone(&abh.schluessel)),
            retention: RetentionEngine::new(Arc::clone(&abh.nachrichten)),
            config,
            abh,
            events: events.clone(),
            befehle: befehle_rx,
            bridge: bridge_events,
            intern_tx,
            intern_rx,
            zustand: VerbindungsZustand::Disconnected,
            sessions: HashMap::new(),
            raum: None,
            generation: 0,
            signaling_verbunden: false,
            oberflaeche_aktiv: true,
            im_vordergrund: true,
            room_ready: PendingSlot::new(),
            rejoin_ziel: None,
            rejoin_unterdrueckt: false,
            leave_ausstehend: None,
            leave_zaehler: 0,
        };
        (orchestrator, OrchestratorHandle::neu(befehle_tx, events))
    }

    /// Haupt-Schleife; endet mit `beenden()` oder wenn alle Handles weg sind
    pub async fn ausfuehren(mut self) {
        if let Err(e) = self.initialisieren().await {
            tracing::error!(fehler = %e, "Gespeicherte Sessions konnten nicht geladen werden");
        }

        let mut aufraeumen = tokio::time::interval(self.config.aufraeum_intervall);
        aufraeumen.tick().await;

        loop {
            tokio::select! {
                befehl = self.befehle.recv() => match befehl {
                    Some(Befehl::Beenden) | None => break,
                    Some(befehl) => self.befehl_verarbeiten(befehl).await,
                },
                Some(ereignis) = self.bridge.recv() => self.bridge_ereignis(ereignis).await,
                Some(intern) = self.intern_rx.recv() => self.intern_verarbeiten(intern).await,
                _ = aufraeumen.tick() => self.aufraeumen().await,
            }
        }

        self.herunterfahren().await;
    }

    async fn initialisieren(&mut self) -> SessionResult<()> {
        for session in self.abh.sessions.alle_laden().await? {
            self.retention
                .session_laden(session.id, session.retention)
                .await?;
            self.sessions.insert(session.id, session);
        }
        self.signaling_verbunden = self.abh.signaling.ist_verbunden();
        if self.signaling_verbunden {
            self.zustand_setzen(VerbindungsZustand::SignalingConnected);
        }
        tracing::info!(sessions = self.sessions.len(), "Orchestrator gestartet");
        Ok(())
    }

    async fn herunterfahren(&mut self) {
        if self.raum.is_some() {
            self.signal(SignalingMessage::LeaveRoom).await;
            self.raum_lokal_abbauen().await;
        }
        tracing::info!("Orchestrator beendet");
    }

    // -----------------------------------------------------------------------
    // Verteilung
    // -----------------------------------------------------------------------

    async fn befehl_verarbeiten(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::SessionErstellen {
                label,
                ttl_sekunden,
                antwort,
            } => self.session_erstellen(label, ttl_sekunden, antwort),
            Befehl::CodeAnnehmen {
                code,
                label,
                antwort,
            } => self.code_annehmen(&code, label, antwort),
            Befehl::StatusPruefen {
                session_id,
                antwort,
            } => self.status_pruefen(session_id, antwort),
            Befehl::SessionLoeschen {
                session_id,
                antwort,
            } => {
                let _ = antwort.send(self.session_loeschen(session_id).await);
            }
            Befehl::SessionAnheften {
                session_id,
                angeheftet,
                antwort,
            } => {
                let _ = antwort.send(self.session_anheften(session_id, angeheftet).await);
            }
            Befehl::Sessions { antwort } => {
                let _ = antwort.send(self.sessions_sortiert());
            }
            Befehl::RaumBeitreten {
                session_id,
                antwort,
            } => {
                // Ein bewusster Beitritt hebt eine alte Unterdrueckung auf
                self.rejoin_unterdrueckt = false;
                let _ = antwort.send(self.raum_beitreten(session_id).await);
            }
            Befehl::RaumVerlassen { antwort } => {
                let _ = antwort.send(self.raum_verlassen().await);
            }
            Befehl::Senden { inhalt, antwort } => {
                let _ = antwort.send(self.nachricht_senden(inhalt).await);
            }
            Befehl::AufbewahrungAendern {
                session_id,
                policy,
                antwort,
            } => {
                let _ = antwort.send(self.aufbewahrung_aendern(session_id, policy).await);
            }
            Befehl::Nachrichten {
                session_id,
                antwort,
            } => {
                let _ = antwort.send(self.retention.nachrichten(session_id));
            }
            Befehl::OberflaecheAktiv(aktiv) => self.oberflaeche_setzen(aktiv).await,
            Befehl::Vordergrund => {
                self.im_vordergrund = true;
                self.aufraeumen().await;
                self.automatisch_beitreten().await;
            }
            Befehl::Hintergrund => self.im_vordergrund = false,
            Befehl::Zustand { antwort } => {
                let _ = antwort.send(self.zustand);
            }
            // Wird in der Schleife behandelt
            Befehl::Beenden => {}
        }
    }

    async fn intern_verarbeiten(&mut self, intern: Intern) {
        match intern {
            Intern::SchluesselErzeugt {
                generation,
                keypair,
            } => self.schluessel_erzeugt(generation, keypair).await,
            Intern::SchluesselAbgeleitet {
                generation,
                ergebnis,
            } => self.schluessel_abgeleitet(generation, ergebnis).await,
            Intern::Transport {
                generation,
                ereignis,
            } => self.transport_ereignis(generation, ereignis).await,
            Intern::OfferFaellig { generation } => self.offer_faellig(generation).await,
            Intern::PfadPruefen {
                generation,
                versuch,
            } => self.pfad_pruefen(generation, versuch),
            Intern::PfadErmittelt {
                generation,
                versuch,
                paar,
            } => self.pfad_ermittelt(generation, versuch, paar),
            Intern::LeaveTimeout { nummer } => self.leave_timeout(nummer).await,
            Intern::SessionAngelegt {
                session,
                ergebnis,
                antwort,
            } => self.session_angelegt(session, ergebnis, antwort).await,
            Intern::CodeAngenommen {
                session,
                ergebnis,
                antwort,
            } => self.code_angenommen(session, ergebnis, antwort).await,
            Intern::StatusErmittelt {
                session_id,
                ergebnis,
                antwort,
            } => self.status_ermittelt(session_id, ergebnis, antwort).await,
        }
    }

    // -----------------------------------------------------------------------
    // Hilfen
    // -----------------------------------------------------------------------

    fn emit(&self, ereignis: SessionEvent) {
        // Ohne Abonnenten ist das kein Fehler
        let _ = self.events.send(ereignis);
    }

    fn zustand_setzen(&mut self, neu: VerbindungsZustand) {
        if self.zustand == neu {
            return;
        }
        tracing::info!(von = ?self.zustand, nach = ?neu, "Verbindungszustand");
        self.zustand = neu;
        self.emit(SessionEvent::ZustandGeaendert(neu));
    }

    fn metriken(&self) -> Option<&TandemMetrics> {
        self.abh.metriken.as_ref()
    }

    /// Sendet ans Relay; `false` wenn das nicht ging
    async fn signal(&self, nachricht: SignalingMessage) -> bool {
        let typ = nachricht.typ();
        match self.abh.signaling.senden(nachricht).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(typ, fehler = %e, "Signaling-Nachricht nicht gesendet");
                false
            }
        }
    }

    fn naechste_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn ist_aktuell(&self, generation: u64) -> bool {
        self.raum
            .as_ref()
            .is_some_and(|raum| raum.generation == generation)
    }

    /// Schickt eine interne Eingabe nach Ablauf der Verzoegerung
    fn intern_nach(&self, verzoegerung: Duration, intern: Intern) {
        let tx = self.intern_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(verzoegerung).await;
            let _ = tx.send(intern).await;
        });
    }

    /// Fuehrt Arbeit ausserhalb des Tasks aus und liefert das Ergebnis zurueck
    fn intern_spawn<F>(&self, arbeit: F)
    where
        F: Future<Output = Intern> + Send + 'static,
    {
        let tx = self.intern_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(arbeit.await).await;
        });
    }

    /// Aktualisiert Cache und Store und meldet die Aenderung
    async fn session_sichern(&mut self, session: Session) -> SessionResult<()> {
        self.sessions.insert(session.id, session.clone());
        self.emit(SessionEvent::SessionAktualisiert(session.clone()));
        self.abh.sessions.speichern(&session).await
    }

    /// Aendert eine Session im Cache und sichert sie; Fehler werden geloggt
    async fn session_aendern(&mut self, session_id: SessionId, aenderung: impl FnOnce(&mut Session)) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        aenderung(session);
        let kopie = session.clone();
        if let Err(e) = self.session_sichern(kopie).await {
            tracing::error!(session = %session_id, fehler = %e, "Session nicht gespeichert");
        }
    }

    /// Haengt ein lokales Systemereignis an den Verlauf
    async fn system_ereignis(&mut self, session_id: SessionId, text: &str) {
        match self
            .retention
            .hinzufuegen(session_id, Absender::System, Inhalt::System(text.into()), Utc::now())
            .await
        {
            Ok(nachricht) => self.emit(SessionEvent::SystemEreignis(nachricht)),
            Err(e) => tracing::warn!(fehler = %e, "Systemereignis nicht gespeichert"),
        }
    }

    async fn aufraeumen(&mut self) {
        match self.retention.aufraeumen(Utc::now()).await {
            Ok(entfernt) => {
                for (session_id, anzahl) in entfernt {
                    self.emit(SessionEvent::NachrichtenEntfernt { session_id, anzahl });
                }
            }
            Err(e) => tracing::warn!(fehler = %e, "Aufraeumen fehlgeschlagen"),
        }
    }
}

/// Relay nicht erreichbar wird zum eigenen Fehlerfall, der Rest bleibt Signaling
fn signaling_fehler(e: SignalingError) -> SessionError {
    match e {
        SignalingError::Unreachable(_) | SignalingError::VerbindungGetrennt => {
            SessionError::SignalingUnreachable
        }
        andere => SessionError::Signaling(andere),
    }
}
