//! tandem-client – Laufzeit fuer die einbettende App
//!
//! Baut aus der Konfiguration alle Kollaborateure des Orchestrators und
//! startet ihn. Den Peer-Transport (WebRTC o.ae.) und den Schluessel-Speicher
//! des Geraets reicht die App hinein.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use config::ClientConfig;
use tandem_crypto::SecureKeyStore;
use tandem_observability::{logging_initialisieren, TandemMetrics};
use tandem_session::{
    DiskMessageStore, JsonSessionStore, Orchestrator, OrchestratorAbhaengigkeiten,
    OrchestratorHandle, TransportFactory,
};
use tandem_signaling::{HttpRoomDirectory, WebSocketBridge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Puffer zwischen WebSocket-Task und Orchestrator
const BRIDGE_KANAL: usize = 256;

/// Haelt den laufenden Client zusammen
pub struct Client {
    pub config: ClientConfig,
    handle: OrchestratorHandle,
    metriken: TandemMetrics,
    aufgabe: JoinHandle<()>,
}

impl Client {
    /// Startet Signaling, Raum-Verzeichnis, Speicher und Orchestrator
    ///
    /// Muss innerhalb einer Tokio-Laufzeit aufgerufen werden.
    pub async fn starten(
        config: ClientConfig,
        transport: Arc<dyn TransportFactory>,
        schluessel: Arc<dyn SecureKeyStore>,
    ) -> Result<Self> {
        logging_initialisieren(&config.logging.level, &config.logging.format);

        let orchestrator_config = config.orchestrator_config()?;
        let basis = config.api_basis()?;
        let raeume = HttpRoomDirectory::neu(
            &basis,
            Duration::from_secs(config.api.timeout_sekunden.max(1)),
        )?;
        let metriken = TandemMetrics::neu()?;

        let (bridge_tx, bridge_rx) = mpsc::channel(BRIDGE_KANAL);
        let signaling = WebSocketBridge::starten(config.websocket_config(), bridge_tx);

        tracing::info!(
            relay = %config.signaling.url,
            api = %basis,
            sessions = %config.speicher.sessions_datei.display(),
            aufbewahrung = %orchestrator_config.standard_aufbewahrung,
            "Client startet"
        );

        let abh = OrchestratorAbhaengigkeiten {
            signaling: Arc::new(signaling),
            raeume: Arc::new(raeume),
            schluessel,
            transport,
            sessions: Arc::new(JsonSessionStore::new(&config.speicher.sessions_datei)),
            nachrichten: Arc::new(DiskMessageStore::new(
                &config.speicher.nachrichten_verzeichnis,
            )),
            metriken: Some(metriken.clone()),
            push_token: config.api.push_token.clone(),
        };
        let (orchestrator, handle) = Orchestrator::neu(orchestrator_config, abh, bridge_rx);
        let aufgabe = tokio::spawn(orchestrator.ausfuehren());

        Ok(Self {
            config,
            handle,
            metriken,
            aufgabe,
        })
    }

    /// Zugriff fuer die Oberflaeche; klonbar
    pub fn handle(&self) -> &OrchestratorHandle {
        &self.handle
    }

    /// Metriken im Prometheus-Textformat
    pub fn metriken_text(&self) -> Result<String> {
        self.metriken.metriken_text()
    }

    /// Verlaesst einen aktiven Raum und wartet auf das Ende des Orchestrators
    pub async fn beenden(self) -> Result<()> {
        self.handle.beenden().await?;
        self.aufgabe.await?;
        tracing::info!("Client beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_crypto::MemoryKeyStore;
    use tandem_session::{SessionError, SessionResult, TransportAdapter, TransportEvent};

    struct KeinTransport;

    impl TransportFactory for KeinTransport {
        fn erstellen(
            &self,
            _events: mpsc::Sender<TransportEvent>,
        ) -> SessionResult<Arc<dyn TransportAdapter>> {
            Err(SessionError::transport("kein Transport im Test"))
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> ClientConfig {
        let mut config = ClientConfig::default();
        // Port 9 ist geschlossen: beide Endpunkte sind unerreichbar
        config.signaling.url = "ws://127.0.0.1:9/ws".into();
        config.signaling.reconnect_min_ms = 50;
        config.api.basis_url = "http://127.0.0.1:9/api".into();
        config.api.timeout_sekunden = 2;
        config.speicher.sessions_datei = dir.path().join("sessions.json");
        config.speicher.nachrichten_verzeichnis = dir.path().join("nachrichten");
        config
    }

    #[tokio::test]
    async fn client_startet_ohne_netz() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::starten(
            test_config(&dir),
            Arc::new(KeinTransport),
            Arc::new(MemoryKeyStore::new()),
        )
        .await
        .unwrap();

        assert!(client.handle().sessions().await.unwrap().is_empty());
        let err = client.handle().session_erstellen(None, None).await.unwrap_err();
        assert!(matches!(err, SessionError::SignalingUnreachable));

        let text = client.metriken_text().unwrap();
        assert!(text.contains("tandem_peer_connected"));
        client.beenden().await.unwrap();
    }

    #[tokio::test]
    async fn ungueltige_api_url_ist_fehler() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.api.basis_url = "kein url".into();
        let ergebnis = Client::starten(
            config,
            Arc::new(KeinTransport),
            Arc::new(MemoryKeyStore::new()),
        )
        .await;
        assert!(ergebnis.is_err());
    }
}
