//! tandem-session – Verbindungs-Orchestrierung und lokaler Verlauf
//!
//! Dieses Crate implementiert:
//! - Orchestrator: Raum-Beitritt, Schluessel-Austausch, Transport-Aushandlung
//!   und verschluesselter Datenkanal als ein einzelner Task
//! - Session-Datensaetze samt JSON-Persistenz
//! - RetentionEngine: Aufbewahrung und Ablauf von Nachrichten
//! - Klassifizierung des Verbindungswegs
//!
//! # Beispiel
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_session::{
//!     DiskMessageStore, JsonSessionStore, Orchestrator, OrchestratorAbhaengigkeiten,
//!     OrchestratorConfig, TransportFactory,
//! };
//! use tandem_crypto::MemoryKeyStore;
//! use tandem_signaling::{MemoryRoomDirectory, SignalingBridge, BridgeEvent};
//! use tokio::sync::mpsc;
//!
//! async fn starten(
//!     signaling: Arc<dyn SignalingBridge>,
//!     bridge_events: mpsc::Receiver<BridgeEvent>,
//!     transport: Arc<dyn TransportFactory>,
//! ) {
//!     let abh = OrchestratorAbhaengigkeiten {
//!         signaling,
//!         raeume: Arc::new(MemoryRoomDirectory::neu()),
//!         schluessel: Arc::new(MemoryKeyStore::new()),
//!         transport,
//!         sessions: Arc::new(JsonSessionStore::new("data/sessions.json")),
//!         nachrichten: Arc::new(DiskMessageStore::new("data/nachrichten")),
//!         metriken: None,
//!         push_token: None,
//!     };
//!     let (orchestrator, handle) =
//!         Orchestrator::neu(OrchestratorConfig::default(), abh, bridge_events);
//!     tokio::spawn(orchestrator.ausfuehren());
//!
//!     let session = handle.session_erstellen(None, None).await.unwrap();
//!     println!("Code: {}", session.join_code.as_str());
//! }
//! ```

pub mod encryption;
pub mod error;
pub mod events;
pub mod handshake;
pub mod message;
pub mod model;
pub mod orchestrator;
pub mod path;
pub mod retention;
pub mod slot;
pub mod transport;

#[cfg(test)]
mod tests;

// Bequeme Re-Exporte
pub use error::{SessionError, SessionResult};
pub use events::{SessionEvent, VerbindungsZustand};
pub use message::{
    Absender, DiskMessageStore, Inhalt, MemoryMessageStore, MessageStore, StoredMessage,
};
pub use model::{JsonSessionStore, MemorySessionStore, Session, SessionStatus, SessionStore};
pub use orchestrator::{
    Orchestrator, OrchestratorAbhaengigkeiten, OrchestratorConfig, OrchestratorHandle,
};
pub use path::{klassifizieren, ConnectionPath};
pub use retention::RetentionEngine;
pub use transport::{
    CandidatePair, KandidatInfo, KandidatTyp, Konnektivitaet, TransportAdapter, TransportEvent,
    TransportFactory,
};
