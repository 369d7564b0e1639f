//! Schnittstelle zum Peer-Transport (WebRTC-Datenkanal o.ae.)
//!
//! Die Orchestrierung kennt nur diese Traits. Die eigentliche ICE/DTLS
//! Implementierung wird von der einbettenden App hineingereicht.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tandem_protocol::IceCandidate;
use tokio::sync::mpsc;

use crate::error::SessionResult;

/// Konnektivitaet des Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Konnektivitaet {
    Neu,
    Verbindend,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
    Geschlossen,
}

/// Ereignisse die ein Transport von sich aus meldet
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Lokal gesammelter Kandidat, geht ueber das Relay an den Peer
    LokalerKandidat(IceCandidate),
    Konnektivitaet(Konnektivitaet),
    /// Empfangener Datenkanal-Frame
    Frame(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KandidatTyp {
    Host,
    /// Server-reflexiv (per STUN ermittelte oeffentliche Adresse)
    Srflx,
    /// Peer-reflexiv
    Prflx,
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KandidatInfo {
    pub typ: KandidatTyp,
    pub adresse: IpAddr,
    pub port: u16,
    /// Bei Relay-Kandidaten: Name/URL des TURN-Servers
    pub relay: Option<String>,
}

/// Vom Transport ausgewaehltes Kandidaten-Paar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
    pub lokal: KandidatInfo,
    pub remote: KandidatInfo,
}

/// Ein Peer-Transport
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Initiator: Offer erzeugen (SDP)
    async fn create_offer(&self) -> SessionResult<String>;

    /// Responder: Offer anwenden und Answer erzeugen
    async fn accept_offer(&self, sdp: &str) -> SessionResult<String>;

    /// Initiator: Answer anwenden
    async fn accept_answer(&self, sdp: &str) -> SessionResult<()>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> SessionResult<()>;

    /// Sendet einen Frame ueber den Datenkanal
    async fn send(&self, frame: &[u8]) -> SessionResult<()>;

    /// `None` solange keine Statistik vorliegt
    async fn selected_candidate_pair(&self) -> SessionResult<Option<CandidatePair>>;

    async fn close(&self);
}

/// Erzeugt pro Verbindungsversuch einen frischen Transport
pub trait TransportFactory: Send + Sync {
    fn erstellen(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<Arc<dyn TransportAdapter>>;
}
