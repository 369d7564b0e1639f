//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Client ohne Konfigurationsdatei
//! lauffaehig ist.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_protocol::RetentionPolicy;
use tandem_session::OrchestratorConfig;
use tandem_signaling::WebSocketConfig;

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Verbindung zum Signaling-Relay
    pub signaling: SignalingEinstellungen,
    /// Raum-REST-API
    pub api: ApiEinstellungen,
    /// Zeitverhalten der Verbindungs-Orchestrierung
    pub verbindung: VerbindungEinstellungen,
    /// Standard-Aufbewahrung neuer Sessions
    pub aufbewahrung: AufbewahrungEinstellungen,
    /// Ablageorte fuer Sessions und Verlauf
    pub speicher: SpeicherEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Signaling-Relay (WebSocket)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// `ws://` oder `wss://`
    pub url: String,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub keepalive_sekunden: u64,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            url: "wss://relay.tandem.local/ws".into(),
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
            keepalive_sekunden: 25,
        }
    }
}

/// Raum-REST-API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEinstellungen {
    pub basis_url: String,
    pub timeout_sekunden: u64,
    /// Wird beim Erstellen und Annehmen mitgeschickt
    pub push_token: Option<String>,
}

impl Default for ApiEinstellungen {
    fn default() -> Self {
        Self {
            basis_url: "https://relay.tandem.local/api".into(),
            timeout_sekunden: 10,
            push_token: None,
        }
    }
}

/// Zeitverhalten der Orchestrierung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungEinstellungen {
    /// Verzoegerung bevor der Initiator das Offer erzeugt
    pub offer_verzoegerung_ms: u64,
    /// Wartezeit auf die Bestaetigung von `leave_room`
    pub leave_timeout_ms: u64,
    pub pfad_verzoegerung_ms: u64,
    pub pfad_wiederholung_ms: u64,
    /// Lebensdauer neu erstellter Raeume
    pub raum_ttl_sekunden: u64,
    pub kandidaten_puffer: usize,
}

impl Default for VerbindungEinstellungen {
    fn default() -> Self {
        let standard = OrchestratorConfig::default();
        Self {
            offer_verzoegerung_ms: dauer_ms(standard.offer_verzoegerung),
            leave_timeout_ms: dauer_ms(standard.leave_timeout),
            pfad_verzoegerung_ms: dauer_ms(standard.pfad_verzoegerung),
            pfad_wiederholung_ms: dauer_ms(standard.pfad_wiederholung),
            raum_ttl_sekunden: standard.raum_ttl_sekunden,
            kandidaten_puffer: standard.kandidaten_puffer,
        }
    }
}

/// Standard-Aufbewahrung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AufbewahrungEinstellungen {
    /// "never_store", "ttl" oder "forever"
    pub modus: String,
    /// Nur fuer `modus = "ttl"`
    pub ttl_sekunden: u64,
    /// Abstand zwischen zwei Aufraeum-Laeufen
    pub aufraeum_intervall_sekunden: u64,
}

impl Default for AufbewahrungEinstellungen {
    fn default() -> Self {
        Self {
            modus: "ttl".into(),
            ttl_sekunden: 24 * 60 * 60,
            aufraeum_intervall_sekunden: 60,
        }
    }
}

impl AufbewahrungEinstellungen {
    pub fn policy(&self) -> anyhow::Result<RetentionPolicy> {
        match self.modus.as_str() {
            "never_store" => Ok(RetentionPolicy::NeverStore),
            "ttl" if self.ttl_sekunden > 0 => Ok(RetentionPolicy::Ttl {
                seconds: self.ttl_sekunden,
            }),
            "ttl" => Err(anyhow::anyhow!("ttl_sekunden muss groesser als 0 sein")),
            "forever" => Ok(RetentionPolicy::Forever),
            anderer => Err(anyhow::anyhow!("Unbekannter Aufbewahrungs-Modus: {anderer}")),
        }
    }
}

/// Ablageorte
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeicherEinstellungen {
    /// JSON-Datei mit allen Sessions
    pub sessions_datei: PathBuf,
    /// Verzeichnis mit einer JSON-Datei pro Session
    pub nachrichten_verzeichnis: PathBuf,
}

impl Default for SpeicherEinstellungen {
    fn default() -> Self {
        Self {
            sessions_datei: PathBuf::from("data/sessions.json"),
            nachrichten_verzeichnis: PathBuf::from("data/nachrichten"),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Parameter fuer den Orchestrator
    pub fn orchestrator_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let v = &self.verbindung;
        Ok(OrchestratorConfig {
            offer_verzoegerung: Duration::from_millis(v.offer_verzoegerung_ms),
            leave_timeout: Duration::from_millis(v.leave_timeout_ms),
            pfad_verzoegerung: Duration::from_millis(v.pfad_verzoegerung_ms),
            pfad_wiederholung: Duration::from_millis(v.pfad_wiederholung_ms),
            aufraeum_intervall: Duration::from_secs(
                self.aufbewahrung.aufraeum_intervall_sekunden.max(1),
            ),
            raum_ttl_sekunden: v.raum_ttl_sekunden,
            standard_aufbewahrung: self.aufbewahrung.policy()?,
            kandidaten_puffer: v.kandidaten_puffer.max(1),
        })
    }

    /// Parameter fuer die WebSocket-Bruecke
    pub fn websocket_config(&self) -> WebSocketConfig {
        let s = &self.signaling;
        WebSocketConfig {
            url: s.url.clone(),
            reconnect_min: Duration::from_millis(s.reconnect_min_ms),
            reconnect_max: Duration::from_millis(s.reconnect_max_ms.max(s.reconnect_min_ms)),
            keepalive: Duration::from_secs(s.keepalive_sekunden.max(1)),
        }
    }

    pub fn api_basis(&self) -> anyhow::Result<url::Url> {
        url::Url::parse(&self.api.basis_url)
            .map_err(|e| anyhow::anyhow!("Ungueltige API-URL '{}': {e}", self.api.basis_url))
    }
}

fn dauer_ms(dauer: Duration) -> u64 {
    u64::try_from(dauer.as_millis()).unwrap_or(u64::MAX)
}
