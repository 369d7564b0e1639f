//! Szenario-Tests fuer den Orchestrator
//!
//! Zwei Orchestratoren laufen gegen ein gemeinsames Test-Relay, ein
//! gemeinsames Raum-Verzeichnis und ein Test-Netz das Transporte paarweise
//! verbindet.

mod lebenszyklus_tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_core::SessionId;
use tandem_crypto::{CryptoSessionId, KeySlot, MemoryKeyStore, SecureKeyStore};
use tandem_observability::TandemMetrics;
use tandem_protocol::{IceCandidate, SignalingMessage};
use tandem_signaling::{
    BridgeEvent, MemoryRoomDirectory, SignalingBridge, SignalingError, SignalingResult,
};
use tokio::sync::{broadcast, mpsc};

use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::message::MemoryMessageStore;
use crate::model::{MemorySessionStore, Session};
use crate::orchestrator::{
    Orchestrator, OrchestratorAbhaengigkeiten, OrchestratorConfig, OrchestratorHandle,
};
use crate::transport::{
    CandidatePair, KandidatInfo, KandidatTyp, Konnektivitaet, TransportAdapter, TransportEvent,
    TransportFactory,
};

const WARTEZEIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Test-Relay
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RelayZustand {
    clients: Vec<mpsc::Sender<BridgeEvent>>,
    raeume: HashMap<String, Vec<usize>>,
    neu_verbunden: HashMap<usize, usize>,
}

/// Verhaelt sich wie das Signaling-Relay: wer zuerst im Raum ist, ist Initiator
#[derive(Default)]
pub(crate) struct TestRelay {
    zustand: Mutex<RelayZustand>,
    leave_ignorieren: AtomicBool,
}

impl TestRelay {
    fn anmelden(&self, events: mpsc::Sender<BridgeEvent>) -> usize {
        let mut zustand = self.zustand.lock();
        zustand.clients.push(events);
        zustand.clients.len() - 1
    }

    /// Das Relay bestaetigt `leave_room` nicht mehr
    pub(crate) fn leave_ignorieren(&self) {
        self.leave_ignorieren.store(true, Ordering::SeqCst);
    }

    pub(crate) fn neu_verbunden(&self, client: usize) -> usize {
        self.zustand
            .lock()
            .neu_verbunden
            .get(&client)
            .copied()
            .unwrap_or(0)
    }

    fn an(zustand: &RelayZustand, client: usize, nachricht: SignalingMessage) {
        let _ = zustand.clients[client].try_send(BridgeEvent::Nachricht(nachricht));
    }

    fn raum_von(zustand: &RelayZustand, client: usize) -> Option<String> {
        zustand
            .raeume
            .iter()
            .find(|(_, mitglieder)| mitglieder.contains(&client))
            .map(|(raum, _)| raum.clone())
    }

    fn austreten(zustand: &mut RelayZustand, client: usize, nachricht: SignalingMessage) {
        let Some(raum) = Self::raum_von(zustand, client) else {
            return;
        };
        let mitglieder = zustand.raeume.entry(raum).or_default();
        mitglieder.retain(|c| *c != client);
        let uebrige = mitglieder.clone();
        for andere in uebrige {
            Self::an(zustand, andere, nachricht.clone());
        }
    }

    fn empfangen(&self, client: usize, nachricht: SignalingMessage) {
        let mut zustand = self.zustand.lock();
        match nachricht {
            SignalingMessage::JoinRoom { room_id, .. } => {
                Self::austreten(&mut zustand, client, SignalingMessage::PeerLeft);
                let mitglieder = zustand.raeume.entry(room_id.clone()).or_default();
                mitglieder.push(client);
                let mitglieder = mitglieder.clone();
                Self::an(
                    &zustand,
                    client,
                    SignalingMessage::RoomJoined {
                        room_id,
                        is_initiator: mitglieder[0] == client,
                    },
                );
                if mitglieder.len() == 2 {
                    for (i, c) in mitglieder.iter().enumerate() {
                        Self::an(
                            &zustand,
                            *c,
                            SignalingMessage::RoomReady {
                                is_initiator: i == 0,
                            },
                        );
                    }
                }
            }
            SignalingMessage::LeaveRoom => {
                if self.leave_ignorieren.load(Ordering::SeqCst) {
                    return;
                }
                Self::austreten(&mut zustand, client, SignalingMessage::PeerLeft);
                Self::an(&zustand, client, SignalingMessage::LeftRoom);
            }
            andere => {
                let Some(raum) = Self::raum_von(&zustand, client) else {
                    return;
                };
                let peers: Vec<usize> = zustand.raeume[&raum]
                    .iter()
                    .copied()
                    .filter(|c| *c != client)
                    .collect();
                for peer in peers {
                    Self::an(&zustand, peer, andere.clone());
                }
            }
        }
    }

    fn getrennt(&self, client: usize) {
        let mut zustand = self.zustand.lock();
        *zustand.neu_verbunden.entry(client).or_default() += 1;
        Self::austreten(&mut zustand, client, SignalingMessage::PeerDisconnected);
    }
}

pub(crate) struct TestBridge {
    client: usize,
    relay: Arc<TestRelay>,
    events: mpsc::Sender<BridgeEvent>,
    verbunden: AtomicBool,
}

impl TestBridge {
    fn neu(relay: Arc<TestRelay>, verbunden: bool) -> (Arc<Self>, mpsc::Receiver<BridgeEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let client = relay.anmelden(tx.clone());
        let bridge = Arc::new(Self {
            client,
            relay,
            events: tx,
            verbunden: AtomicBool::new(verbunden),
        });
        (bridge, rx)
    }
}

#[async_trait]
impl SignalingBridge for TestBridge {
    async fn senden(&self, nachricht: SignalingMessage) -> SignalingResult<()> {
        if !self.verbunden.load(Ordering::SeqCst) {
            return Err(SignalingError::Unreachable("Test-Relay getrennt".into()));
        }
        self.relay.empfangen(self.client, nachricht);
        Ok(())
    }

    fn ist_verbunden(&self) -> bool {
        self.verbunden.load(Ordering::SeqCst)
    }

    async fn neu_verbinden(&self) -> SignalingResult<()> {
        self.relay.getrennt(self.client);
        let _ = self.events.send(BridgeEvent::Getrennt).await;
        let _ = self.events.send(BridgeEvent::Verbunden).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test-Netz
// ---------------------------------------------------------------------------

/// Verbindet Transporte ueber ihre Offer/Answer-Kennung
#[derive(Default)]
pub(crate) struct TestNetz {
    naechste_id: AtomicUsize,
    transporte: Mutex<Vec<Arc<TestTransport>>>,
}

impl TestNetz {
    fn transport(&self, id: usize) -> Option<Arc<TestTransport>> {
        self.transporte.lock().iter().find(|t| t.id == id).cloned()
    }

    fn offen(&self, besitzer: &str) -> Option<Arc<TestTransport>> {
        self.transporte
            .lock()
            .iter()
            .rev()
            .find(|t| t.besitzer == besitzer && !t.geschlossen.load(Ordering::SeqCst))
            .cloned()
    }

    /// Alle offenen Verbindungen brechen ab
    pub(crate) fn trennen(&self) {
        for transport in self.transporte.lock().iter() {
            if !transport.geschlossen.load(Ordering::SeqCst) {
                transport.melden(TransportEvent::Konnektivitaet(Konnektivitaet::Getrennt));
            }
        }
    }

    /// Stellt einen rohen Frame am offenen Transport von `besitzer` zu
    pub(crate) fn frame_einschleusen(&self, besitzer: &str, frame: Vec<u8>) {
        if let Some(transport) = self.offen(besitzer) {
            transport.melden(TransportEvent::Frame(frame));
        }
    }

    /// Zuletzt von `besitzer` gesendeter Frame
    pub(crate) fn letzter_frame(&self, besitzer: &str) -> Option<Vec<u8>> {
        self.offen(besitzer)
            .and_then(|t| t.gesendet.lock().last().cloned())
    }
}

pub(crate) struct TestTransport {
    id: usize,
    besitzer: String,
    netz: Arc<TestNetz>,
    events: mpsc::Sender<TransportEvent>,
    peer: Mutex<Option<usize>>,
    gesendet: Mutex<Vec<Vec<u8>>>,
    geschlossen: AtomicBool,
}

impl TestTransport {
    fn melden(&self, ereignis: TransportEvent) {
        let _ = self.events.try_send(ereignis);
    }

    fn kandidat_melden(&self) {
        self.melden(TransportEvent::LokalerKandidat(IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 192.168.1.{} 50000 typ host", self.id, self.id),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".into()),
        }));
    }

    fn kennung(sdp: &str, praefix: &str) -> SessionResult<usize> {
        sdp.strip_prefix(praefix)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| SessionError::transport(format!("Unbekannte Beschreibung: {sdp}")))
    }

    fn kandidat(adresse: [u8; 4]) -> KandidatInfo {
        KandidatInfo {
            typ: KandidatTyp::Host,
            adresse: adresse.into(),
            port: 50000,
            relay: None,
        }
    }
}

#[async_trait]
impl TransportAdapter for TestTransport {
    async fn create_offer(&self) -> SessionResult<String> {
        self.kandidat_melden();
        Ok(format!("offer:{}", self.id))
    }

    async fn accept_offer(&self, sdp: &str) -> SessionResult<String> {
        let initiator = Self::kennung(sdp, "offer:")?;
        let gegenstelle = self
            .netz
            .transport(initiator)
            .ok_or_else(|| SessionError::transport("Initiator unbekannt"))?;
        *self.peer.lock() = Some(initiator);
        *gegenstelle.peer.lock() = Some(self.id);
        self.kandidat_melden();
        Ok(format!("answer:{}", self.id))
    }

    async fn accept_answer(&self, sdp: &str) -> SessionResult<()> {
        let responder = Self::kennung(sdp, "answer:")?;
        let gegenstelle = self
            .netz
            .transport(responder)
            .ok_or_else(|| SessionError::transport("Responder unbekannt"))?;
        self.melden(TransportEvent::Konnektivitaet(Konnektivitaet::Verbunden));
        gegenstelle.melden(TransportEvent::Konnektivitaet(Konnektivitaet::Verbunden));
        Ok(())
    }

    async fn add_remote_candidate(&self, _candidate: &IceCandidate) -> SessionResult<()> {
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> SessionResult<()> {
        if self.geschlossen.load(Ordering::SeqCst) {
            return Err(SessionError::transport("Transport geschlossen"));
        }
        let peer = (*self.peer.lock())
            .and_then(|id| self.netz.transport(id))
            .ok_or_else(|| SessionError::transport("Kein Peer"))?;
        self.gesendet.lock().push(frame.to_vec());
        peer.melden(TransportEvent::Frame(frame.to_vec()));
        Ok(())
    }

    async fn selected_candidate_pair(&self) -> SessionResult<Option<CandidatePair>> {
        Ok(Some(CandidatePair {
            lokal: Self::kandidat([192, 168, 1, 10]),
            remote: Self::kandidat([192, 168, 1, 20]),
        }))
    }

    async fn close(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }
}

struct TestTransportFactory {
    besitzer: String,
    netz: Arc<TestNetz>,
}

impl TransportFactory for TestTransportFactory {
    fn erstellen(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<Arc<dyn TransportAdapter>> {
        let transport = Arc::new(TestTransport {
            id: self.netz.naechste_id.fetch_add(1, Ordering::SeqCst) + 1,
            besitzer: self.besitzer.clone(),
            netz: Arc::clone(&self.netz),
            events,
            peer: Mutex::new(None),
            gesendet: Mutex::new(Vec::new()),
            geschlossen: AtomicBool::new(false),
        });
        self.netz.transporte.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

pub(crate) fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        offer_verzoegerung: Duration::from_millis(10),
        leave_timeout: Duration::from_millis(50),
        pfad_verzoegerung: Duration::from_millis(10),
        pfad_wiederholung: Duration::from_millis(20),
        ..OrchestratorConfig::default()
    }
}

/// Gemeinsame Umgebung beider Geraete
pub(crate) struct TestUmgebung {
    pub relay: Arc<TestRelay>,
    pub raeume: Arc<MemoryRoomDirectory>,
    pub netz: Arc<TestNetz>,
}

impl TestUmgebung {
    pub(crate) fn neu() -> Self {
        Self {
            relay: Arc::new(TestRelay::default()),
            raeume: Arc::new(MemoryRoomDirectory::neu()),
            netz: Arc::new(TestNetz::default()),
        }
    }

    pub(crate) fn client(&self, besitzer: &str) -> TestClient {
        self.client_mit(besitzer, true)
    }

    pub(crate) fn client_mit(&self, besitzer: &str, signaling_verbunden: bool) -> TestClient {
        let (bridge, bridge_events) = TestBridge::neu(Arc::clone(&self.relay), signaling_verbunden);
        let schluessel = Arc::new(MemoryKeyStore::new());
        let nachrichten = Arc::new(MemoryMessageStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let metriken = TandemMetrics::neu().expect("Metriken");

        let abh = OrchestratorAbhaengigkeiten {
            signaling: bridge.clone(),
            raeume: self.raeume.clone(),
            schluessel: schluessel.clone(),
            transport: Arc::new(TestTransportFactory {
                besitzer: besitzer.to_string(),
                netz: Arc::clone(&self.netz),
            }),
            sessions: sessions.clone(),
            nachrichten: nachrichten.clone(),
            metriken: Some(metriken.clone()),
            push_token: None,
        };
        let (orchestrator, handle) = Orchestrator::neu(test_config(), abh, bridge_events);
        tokio::spawn(orchestrator.ausfuehren());

        TestClient {
            handle,
            schluessel,
            nachrichten,
            sessions,
            metriken,
            bridge,
        }
    }

    /// A erstellt, B nimmt an, A erfaehrt davon; beide treten bei
    pub(crate) async fn verbundenes_paar(&self) -> (TestClient, Session, TestClient, Session) {
        let a = self.client("a");
        let b = self.client("b");
        let (session_a, session_b) = self.gekoppelte_sessions(&a, &b).await;

        a.handle.raum_beitreten(session_a.id).await.expect("A beitreten");
        a.zustand_abwarten(VerbindungsZustand::RoomJoined).await;
        b.handle.raum_beitreten(session_b.id).await.expect("B beitreten");

        a.zustand_abwarten(VerbindungsZustand::PeerConnected).await;
        b.zustand_abwarten(VerbindungsZustand::PeerConnected).await;
        (a, session_a, b, session_b)
    }

    pub(crate) async fn gekoppelte_sessions(
        &self,
        a: &TestClient,
        b: &TestClient,
    ) -> (Session, Session) {
        let session_a = a
            .handle
            .session_erstellen(Some("Tandem".into()), None)
            .await
            .expect("Session erstellen");
        let session_b = b
            .handle
            .code_annehmen(session_a.join_code.as_str(), None)
            .await
            .expect("Code annehmen");
        let session_a = a
            .handle
            .status_pruefen(session_a.id)
            .await
            .expect("Status pruefen");
        (session_a, session_b)
    }
}

pub(crate) struct TestClient {
    pub handle: OrchestratorHandle,
    pub schluessel: Arc<MemoryKeyStore>,
    pub nachrichten: Arc<MemoryMessageStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub metriken: TandemMetrics,
    pub bridge: Arc<TestBridge>,
}

impl TestClient {
    pub(crate) fn relay_nummer(&self) -> usize {
        self.bridge.client
    }

    /// Wartet bis der Orchestrator den Zustand erreicht
    pub(crate) async fn zustand_abwarten(&self, erwartet: VerbindungsZustand) {
        bis(|| async move { self.handle.zustand().await.ok() == Some(erwartet) }).await;
    }

    pub(crate) fn session_key(&self, session: &Session) -> Option<Vec<u8>> {
        let room_id = session.room_id()?;
        self.schluessel
            .abrufen(&CryptoSessionId::aus_raum(room_id), KeySlot::SessionKey)
            .map(|k| k.as_bytes().to_vec())
    }

    /// Spielt eine Nachricht ein als kaeme sie vom Relay
    pub(crate) async fn vom_relay(&self, nachricht: SignalingMessage) {
        self.bridge
            .events
            .send(BridgeEvent::Nachricht(nachricht))
            .await
            .expect("Bridge-Kanal offen");
    }

    pub(crate) async fn nachrichten_von(&self, session_id: SessionId) -> usize {
        self.handle
            .nachrichten(session_id)
            .await
            .map(|n| n.len())
            .unwrap_or(0)
    }
}

/// Pollt eine Bedingung bis zur Wartezeit
pub(crate) async fn bis<F, Fut>(mut bedingung: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let ergebnis = tokio::time::timeout(WARTEZEIT, async {
        while !bedingung().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ergebnis.is_ok(), "Bedingung nicht rechtzeitig erfuellt");
}

/// Zaehlt die bisher aufgelaufenen Ereignisse ohne zu warten
pub(crate) fn ereignisse_zaehlen<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut passt: F) -> usize
where
    F: FnMut(&SessionEvent) -> bool,
{
    let mut anzahl = 0;
    loop {
        match rx.try_recv() {
            Ok(ereignis) if passt(&ereignis) => anzahl += 1,
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return anzahl,
        }
    }
}

/// Frischer oeffentlicher Schluessel als Base64, wie ihn eine Gegenseite schickt
pub(crate) fn fremder_schluessel() -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    BASE64.encode(tandem_crypto::generate_keypair().public_key())
}

/// Wartet auf das erste passende Ereignis
pub(crate) async fn ereignis_abwarten<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut passt: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let ergebnis = tokio::time::timeout(WARTEZEIT, async {
        loop {
            match rx.recv().await {
                Ok(ereignis) if passt(&ereignis) => return ereignis,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Ereignis-Kanal geschlossen"),
            }
        }
    })
    .await;
    ergebnis.expect("Ereignis nicht rechtzeitig empfangen")
}
