//! WebSocket-Bruecke zum Signaling-Relay
//!
//! Ein Hintergrund-Task haelt die Verbindung:
//!
//! ```text
//! Verbinden --ok--> Verbunden --Fehler/Close--> Getrennt --Backoff--> Verbinden
//!                       |                                   ^
//!                       +------- neu_verbinden() -----------+ (ohne Backoff)
//! ```
//!
//! ## Keepalive
//! - Der Task sendet alle `keepalive` einen Ping
//! - Gelesen wird nur Text (JSON); Binaer-Frames werden als UTF-8 versucht
//!
//! ## Quittungen
//! `senden` kehrt erst zurueck wenn der Task die Nachricht geschrieben oder
//! verworfen hat. Eine zwischen Pruefung und Schreiben verlorene Verbindung
//! wird so zum Fehler beim Aufrufer. Der Task blockiert dafuer nie auf dem
//! Ereignis-Kanal, ohne Steuerbefehle weiter zu beantworten.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tandem_protocol::SignalingMessage;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::{BridgeEvent, SignalingBridge};
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter der WebSocket-Verbindung
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Relay-URL (`ws://` oder `wss://`)
    pub url: String,
    /// Erste Wartezeit nach einem Verbindungsfehler
    pub reconnect_min: Duration,
    /// Obergrenze fuer den exponentiellen Backoff
    pub reconnect_max: Duration,
    /// Ping-Intervall
    pub keepalive: Duration,
}

impl WebSocketConfig {
    pub fn neu(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            keepalive: Duration::from_secs(25),
        }
    }
}

// ---------------------------------------------------------------------------
// Steuerung des Verbindungs-Tasks
// ---------------------------------------------------------------------------

/// Eingegangene Relay-Nachrichten, die noch auf Platz im Ereignis-Kanal warten
const EINGANG_MAX: usize = 64;

#[derive(Debug)]
enum Steuerung {
    Senden {
        json: String,
        quittung: oneshot::Sender<SignalingResult<()>>,
    },
    NeuVerbinden,
}

/// Warum eine Verbindung beendet wurde
#[derive(Debug, PartialEq, Eq)]
enum Ende {
    Getrennt,
    NeuVerbinden,
    Beendet,
}

fn nicht_verbunden() -> SignalingError {
    SignalingError::Unreachable("Signaling-Socket nicht verbunden".into())
}

// ---------------------------------------------------------------------------
// WebSocketBridge
// ---------------------------------------------------------------------------

/// Signaling-Bruecke ueber tokio-tungstenite
pub struct WebSocketBridge {
    steuerung: mpsc::Sender<Steuerung>,
    verbunden: Arc<AtomicBool>,
}

impl WebSocketBridge {
    /// Startet den Verbindungs-Task
    ///
    /// Ereignisse gehen an `events`. Der Task endet wenn die Bruecke gedroppt
    /// oder der Ereignis-Empfaenger geschlossen wird.
    pub fn starten(config: WebSocketConfig, events: mpsc::Sender<BridgeEvent>) -> Self {
        let (steuerung_tx, steuerung_rx) = mpsc::channel(64);
        let verbunden = Arc::new(AtomicBool::new(false));

        tokio::spawn(verbindungs_schleife(
            config,
            steuerung_rx,
            events,
            Arc::clone(&verbunden),
        ));

        Self {
            steuerung: steuerung_tx,
            verbunden,
        }
    }
}

#[async_trait]
impl SignalingBridge for WebSocketBridge {
    async fn senden(&self, nachricht: SignalingMessage) -> SignalingResult<()> {
        if !self.ist_verbunden() {
            return Err(nicht_verbunden());
        }
        let json = nachricht.to_json()?;
        tracing::trace!(typ = nachricht.typ(), "Signaling-Nachricht senden");
        let (quittung, antwort) = oneshot::channel();
        self.steuerung
            .send(Steuerung::Senden { json, quittung })
            .await
            .map_err(|_| SignalingError::SendFehler)?;
        antwort.await.map_err(|_| SignalingError::SendFehler)?
    }

    fn ist_verbunden(&self) -> bool {
        self.verbunden.load(Ordering::SeqCst)
    }

    async fn neu_verbinden(&self) -> SignalingResult<()> {
        self.steuerung
            .send(Steuerung::NeuVerbinden)
            .await
            .map_err(|_| SignalingError::SendFehler)
    }
}

// ---------------------------------------------------------------------------
// Verbindungs-Task
// ---------------------------------------------------------------------------

async fn verbindungs_schleife(
    config: WebSocketConfig,
    mut steuerung: mpsc::Receiver<Steuerung>,
    events: mpsc::Sender<BridgeEvent>,
    verbunden: Arc<AtomicBool>,
) {
    let mut backoff = config.reconnect_min;

    loop {
        tracing::debug!(url = %config.url, "Verbinde zum Signaling-Relay");
        let ende = match connect_async(config.url.as_str()).await {
            Ok((stream, _antwort)) => {
                backoff = config.reconnect_min;
                verbunden.store(true, Ordering::SeqCst);
                tracing::info!(url = %config.url, "Signaling verbunden");
                if melden(BridgeEvent::Verbunden, &events, &mut steuerung).await == Ende::Beendet {
                    return;
                }

                let mut eingang = VecDeque::new();
                let mut ende =
                    verbindung_bedienen(stream, &config, &mut steuerung, &events, &mut eingang)
                        .await;

                verbunden.store(false, Ordering::SeqCst);
                tracing::info!(url = %config.url, "Signaling getrennt");
                // Bereits gelesene Nachrichten gehen vor dem Getrennt-Ereignis raus
                let rest = eingang
                    .into_iter()
                    .map(BridgeEvent::Nachricht)
                    .chain(std::iter::once(BridgeEvent::Getrennt));
                for ereignis in rest {
                    match melden(ereignis, &events, &mut steuerung).await {
                        Ende::Beendet => return,
                        Ende::NeuVerbinden => ende = Ende::NeuVerbinden,
                        Ende::Getrennt => {}
                    }
                }
                ende
            }
            Err(e) => {
                tracing::warn!(url = %config.url, fehler = %e, "Signaling-Verbindung fehlgeschlagen");
                Ende::Getrennt
            }
        };

        match ende {
            Ende::Beendet => return,
            Ende::NeuVerbinden => continue,
            Ende::Getrennt => {}
        }

        // Backoff, ein expliziter Reconnect verkuerzt die Wartezeit
        let schlaf = tokio::time::sleep(backoff);
        tokio::pin!(schlaf);
        loop {
            tokio::select! {
                _ = &mut schlaf => break,
                cmd = steuerung.recv() => match cmd {
                    Some(Steuerung::NeuVerbinden) => break,
                    Some(Steuerung::Senden { quittung, .. }) => {
                        tracing::debug!("Nachricht verworfen, Signaling nicht verbunden");
                        let _ = quittung.send(Err(nicht_verbunden()));
                    }
                    None => return,
                },
            }
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

/// Stellt ein Ereignis zu und beantwortet derweil Steuerbefehle
///
/// Sendungen werden abgewiesen, ein Reconnect-Wunsch wird gemerkt.
/// `Ende::Getrennt` heisst hier: zugestellt, nichts weiter angefordert.
async fn melden(
    ereignis: BridgeEvent,
    events: &mpsc::Sender<BridgeEvent>,
    steuerung: &mut mpsc::Receiver<Steuerung>,
) -> Ende {
    let mut neu_verbinden = false;
    loop {
        tokio::select! {
            platz = events.reserve() => {
                let Ok(platz) = platz else {
                    return Ende::Beendet;
                };
                platz.send(ereignis);
                return if neu_verbinden { Ende::NeuVerbinden } else { Ende::Getrennt };
            }
            cmd = steuerung.recv() => match cmd {
                Some(Steuerung::Senden { quittung, .. }) => {
                    let _ = quittung.send(Err(nicht_verbunden()));
                }
                Some(Steuerung::NeuVerbinden) => neu_verbinden = true,
                None => return Ende::Beendet,
            },
        }
    }
}

async fn verbindung_bedienen<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    config: &WebSocketConfig,
    steuerung: &mut mpsc::Receiver<Steuerung>,
    events: &mpsc::Sender<BridgeEvent>,
    eingang: &mut VecDeque<SignalingMessage>,
) -> Ende
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();
    let mut ping = tokio::time::interval(config.keepalive);
    ping.tick().await;

    loop {
        tokio::select! {
            cmd = steuerung.recv() => match cmd {
                Some(Steuerung::Senden { json, quittung }) => {
                    if let Err(e) = write.send(Message::Text(json)).await {
                        tracing::warn!(fehler = %e, "Senden an Relay fehlgeschlagen");
                        let _ = quittung.send(Err(SignalingError::Unreachable(format!(
                            "Senden an Relay fehlgeschlagen: {e}"
                        ))));
                        return Ende::Getrennt;
                    }
                    let _ = quittung.send(Ok(()));
                }
                Some(Steuerung::NeuVerbinden) => {
                    let _ = write.close().await;
                    return Ende::NeuVerbinden;
                }
                None => {
                    let _ = write.close().await;
                    return Ende::Beendet;
                }
            },

            platz = events.reserve(), if !eingang.is_empty() => match platz {
                Ok(platz) => {
                    if let Some(nachricht) = eingang.pop_front() {
                        platz.send(BridgeEvent::Nachricht(nachricht));
                    }
                }
                Err(_) => return Ende::Beendet,
            },

            frame = read.next(), if eingang.len() < EINGANG_MAX => match frame {
                Some(Ok(Message::Text(text))) => eingang.extend(nachricht_parsen(&text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => eingang.extend(nachricht_parsen(&text)),
                    Err(_) => tracing::debug!("Binaer-Frame ohne UTF-8 ignoriert"),
                },
                Some(Ok(Message::Close(_))) | None => return Ende::Getrennt,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(fehler = %e, "Lesefehler auf Signaling-Socket");
                    return Ende::Getrennt;
                }
            },

            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return Ende::Getrennt;
                }
            }
        }
    }
}

/// Parst eine Relay-Nachricht; unbekannte und kaputte werden ignoriert
fn nachricht_parsen(text: &str) -> Option<SignalingMessage> {
    match SignalingMessage::from_json(text) {
        Ok(SignalingMessage::Unknown) => {
            tracing::debug!(roh = %text, "Unbekannter Signaling-Typ ignoriert");
            None
        }
        Ok(nachricht) => {
            tracing::trace!(typ = nachricht.typ(), "Signaling-Nachricht empfangen");
            Some(nachricht)
        }
        Err(e) => {
            tracing::warn!(fehler = %e, "Ungueltige Signaling-Nachricht");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
