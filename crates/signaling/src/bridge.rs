//! Signaling-Bruecke: Schnittstelle zum Relay
//!
//! Die Bruecke liefert Verbindungs- und Nachrichten-Ereignisse ueber einen
//! mpsc-Kanal an genau einen Konsumenten (den Orchestrator) und nimmt
//! ausgehende Steuerungsnachrichten entgegen.

use async_trait::async_trait;
use tandem_protocol::SignalingMessage;

use crate::error::SignalingResult;

/// Ereignisse der Signaling-Verbindung
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Socket ist (wieder) verbunden
    Verbunden,
    /// Socket ist getrennt
    Getrennt,
    /// Nachricht vom Relay
    Nachricht(SignalingMessage),
}

/// Verbindung zum Signaling-Relay
#[async_trait]
pub trait SignalingBridge: Send + Sync {
    /// Sendet eine Steuerungsnachricht an das Relay
    ///
    /// Schlaegt mit `Unreachable` fehl wenn der Socket nicht verbunden ist.
    async fn senden(&self, nachricht: SignalingMessage) -> SignalingResult<()>;

    /// Aktueller Verbindungszustand
    fn ist_verbunden(&self) -> bool;

    /// Trennt den Socket und baut ihn neu auf
    async fn neu_verbinden(&self) -> SignalingResult<()>;
}
