//! Ereignisse der Orchestrierung fuer die Oberflaeche
//!
//! Verteilt ueber einen `broadcast`-Kanal. Sicherheitsrelevante Fehler
//! tragen bewusst kein kryptographisches Detail.

use tandem_core::SessionId;
use tandem_protocol::RetentionPolicy;

use crate::message::StoredMessage;
use crate::model::Session;
use crate::path::ConnectionPath;

/// Zustand der Verbindungs-Orchestrierung
///
/// ```text
/// Disconnected -> SignalingConnected -> RoomJoined -> KeyExchangeInProgress
///   -> EncryptionReady -> TransportNegotiating -> PeerConnected
///
/// PeerConnected --Peer weg--> PeerLeft/EncryptionWiped --> RoomJoined
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Disconnected,
    SignalingConnected,
    RoomJoined,
    KeyExchangeInProgress,
    EncryptionReady,
    TransportNegotiating,
    PeerConnected,
    PeerLeft,
    EncryptionWiped,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ZustandGeaendert(VerbindungsZustand),
    SessionAktualisiert(Session),
    SessionEntfernt(SessionId),
    NachrichtEmpfangen(StoredMessage),
    NachrichtGesendet(StoredMessage),
    /// Lokales Systemereignis im Verlauf (verbunden, getrennt, ...)
    SystemEreignis(StoredMessage),
    PeerAnwesend(bool),
    VerbindungswegErmittelt(ConnectionPath),
    VerschluesselungBereit,
    /// Handshake fehlgeschlagen, kein Detail
    Sicherheitsfehler,
    /// Ein Umschlag liess sich nicht entschluesseln; weitere werden verarbeitet
    EntschluesselungFehlgeschlagen,
    AufbewahrungGeaendert {
        session_id: SessionId,
        policy: RetentionPolicy,
    },
    NachrichtenEntfernt {
        session_id: SessionId,
        anzahl: usize,
    },
    /// Fehler ohne eigenen Zustandswechsel (Relay-Fehler, Transport, fehlende Rolle)
    Fehler(String),
}
