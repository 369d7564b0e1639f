//! Prometheus-kompatible Metriken fuer Tandem
//!
//! Registrierte Metriken:
//! - `tandem_handshakes_total` – Counter: Handshakes (result=ok|fehler)
//! - `tandem_handshake_duration_seconds` – Histogram: Dauer bis Schluessel bereit
//! - `tandem_decrypt_failures_total` – Counter: Fehlgeschlagene Entschluesselungen
//! - `tandem_replays_dropped_total` – Counter: Verworfene Wiederholungen
//! - `tandem_messages_total` – Counter: Nachrichten (direction=in|out)
//! - `tandem_connection_paths_total` – Counter: Klassifizierte Verbindungswege (path)
//! - `tandem_peer_connected` – Gauge: 1 solange der Peer verbunden ist

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Alle Tandem-Prometheus-Metriken
#[derive(Clone)]
pub struct TandemMetrics {
    pub registry: Arc<Registry>,

    // Handshake
    pub handshakes_total: IntCounterVec,
    pub handshake_duration_seconds: Histogram,

    // Datenkanal
    pub decrypt_failures_total: IntCounter,
    pub replays_dropped_total: IntCounter,
    pub messages_total: IntCounterVec,

    // Verbindung
    pub connection_paths_total: IntCounterVec,
    pub peer_connected: IntGauge,
}

impl TandemMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Handshake ---
        let handshakes_total = IntCounterVec::new(
            Opts::new("tandem_handshakes_total", "Abgeschlossene Schluessel-Austausche"),
            &["result"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let handshake_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tandem_handshake_duration_seconds",
                "Dauer vom Raum-Beitritt bis zum bereiten Schluessel",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(handshake_duration_seconds.clone()))?;

        // --- Datenkanal ---
        let decrypt_failures_total = IntCounter::with_opts(Opts::new(
            "tandem_decrypt_failures_total",
            "Umschlaege die nicht entschluesselt werden konnten",
        ))?;
        registry.register(Box::new(decrypt_failures_total.clone()))?;

        let replays_dropped_total = IntCounter::with_opts(Opts::new(
            "tandem_replays_dropped_total",
            "Umschlaege mit bereits gesehenem Zaehler",
        ))?;
        registry.register(Box::new(replays_dropped_total.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new("tandem_messages_total", "Verschluesselte Nachrichten"),
            &["direction"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        // --- Verbindung ---
        let connection_paths_total = IntCounterVec::new(
            Opts::new(
                "tandem_connection_paths_total",
                "Klassifizierte Verbindungswege",
            ),
            &["path"],
        )?;
        registry.register(Box::new(connection_paths_total.clone()))?;

        let peer_connected = IntGauge::with_opts(Opts::new(
            "tandem_peer_connected",
            "1 solange eine Peer-Verbindung besteht",
        ))?;
        registry.register(Box::new(peer_connected.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            handshakes_total,
            handshake_duration_seconds,
            decrypt_failures_total,
            replays_dropped_total,
            messages_total,
            connection_paths_total,
            peer_connected,
        })
    }

    pub fn handshake_erfolgreich(&self, dauer: Duration) {
        self.handshakes_total.with_label_values(&["ok"]).inc();
        self.handshake_duration_seconds.observe(dauer.as_secs_f64());
    }

    pub fn handshake_fehlgeschlagen(&self) {
        self.handshakes_total.with_label_values(&["fehler"]).inc();
    }

    pub fn nachricht_gesendet(&self) {
        self.messages_total.with_label_values(&["out"]).inc();
    }

    pub fn nachricht_empfangen(&self) {
        self.messages_total.with_label_values(&["in"]).inc();
    }

    pub fn entschluesselung_fehlgeschlagen(&self) {
        self.decrypt_failures_total.inc();
    }

    pub fn replay_verworfen(&self) {
        self.replays_dropped_total.inc();
    }

    pub fn pfad_klassifiziert(&self, pfad: &str) {
        self.connection_paths_total.with_label_values(&[pfad]).inc();
    }

    pub fn peer_verbunden(&self, verbunden: bool) {
        self.peer_connected.set(i64::from(verbunden));
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn metriken_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
