//! Raum-Mitgliedschaft und Schluessel-Austausch

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use tandem_core::{Role, SessionId};
use tandem_crypto::{
    derive_session_key, generate_keypair, peer_key_pruefen, CryptoError, CryptoResult,
    LocalKeypair, SecretBytes,
};
use tandem_protocol::SignalingMessage;
use tandem_signaling::BridgeEvent;

use super::{signaling_fehler, ActiveRoom, Intern, Orchestrator};
use crate::encryption::EncryptionState;
use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::handshake::{rolle_bestimmen, Einordnung, Fortschritt, HandshakeState, PeerAngebot};
use crate::model::SessionStatus;

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Signaling-Verbindung
    // -----------------------------------------------------------------------

    pub(super) async fn bridge_ereignis(&mut self, ereignis: BridgeEvent) {
        match ereignis {
            BridgeEvent::Verbunden => {
                self.signaling_verbunden = true;
                if self.raum.is_none() {
                    self.zustand_setzen(VerbindungsZustand::SignalingConnected);
                    self.automatisch_beitreten().await;
                }
            }
            BridgeEvent::Getrennt => {
                self.signaling_verbunden = false;
                // Mit dem Socket vergisst das Relay auch ein ausstehendes Leave
                self.leave_ausstehend = None;

                let aktiv = self
                    .raum
                    .as_ref()
                    .map(|raum| (raum.session_id, raum.peer_verbunden));
                match aktiv {
                    // Ein bestehender Datenkanal ueberlebt den Signaling-Ausfall
                    Some((_, true)) => {
                        tracing::info!("Signaling getrennt, Peer-Verbindung bleibt bestehen");
                    }
                    Some((session_id, false)) => {
                        self.rejoin_ziel = Some(session_id);
                        self.raum_lokal_abbauen().await;
                        self.zustand_setzen(VerbindungsZustand::Disconnected);
                    }
                    None => self.zustand_setzen(VerbindungsZustand::Disconnected),
                }
            }
            BridgeEvent::Nachricht(nachricht) => self.signaling_nachricht(nachricht).await,
        }
    }

    async fn signaling_nachricht(&mut self, nachricht: SignalingMessage) {
        tracing::debug!(typ = nachricht.typ(), "Signaling-Nachricht");
        match nachricht {
            SignalingMessage::RoomJoined {
                room_id,
                is_initiator,
            } => self.raum_beigetreten(&room_id, is_initiator).await,
            SignalingMessage::RoomReady { is_initiator } => self.raum_bereit(is_initiator).await,
            SignalingMessage::KeyExchange {
                public_key,
                session_id,
                round,
            } => {
                self.peer_schluessel_empfangen(&public_key, &session_id, round)
                    .await
            }
            SignalingMessage::KeyExchangeComplete { session_id, round } => {
                self.abschluss_empfangen(&session_id, round).await
            }
            SignalingMessage::WebrtcOffer { sdp } => self.offer_empfangen(&sdp).await,
            SignalingMessage::WebrtcAnswer { sdp } => self.answer_empfangen(&sdp).await,
            SignalingMessage::IceCandidate { candidate } => self.kandidat_empfangen(candidate).await,
            SignalingMessage::PeerDisconnected | SignalingMessage::PeerLeft => self.peer_weg().await,
            SignalingMessage::LeftRoom => {
                self.leave_ausstehend = None;
            }
            SignalingMessage::Error { error } => {
                tracing::warn!(fehler = %error, "Fehler vom Relay");
                self.emit(SessionEvent::Fehler(error));
            }
            SignalingMessage::JoinRoom { .. }
            | SignalingMessage::LeaveRoom
            | SignalingMessage::Unknown => {}
        }
    }

    // -----------------------------------------------------------------------
    // Beitreten / Verlassen
    // -----------------------------------------------------------------------

    pub(super) async fn raum_beitreten(&mut self, session_id: SessionId) -> SessionResult<()> {
        if !self.signaling_verbunden || !self.abh.signaling.ist_verbunden() {
            return Err(SessionError::SignalingUnreachable);
        }
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(SessionError::SessionNichtGefunden(session_id))?;
        if session.status() != SessionStatus::Accepted {
            return Err(SessionError::zustand(format!(
                "Session ist {:?}, Beitritt nicht moeglich",
                session.status()
            )));
        }
        let room_id = session
            .room_id()
            .cloned()
            .ok_or_else(|| SessionError::zustand("Session hat keinen Raum"))?;
        let device_id = session.device_id;

        // Ein alter Beitritt wird sauber beendet, das Relay sieht Leave vor Join
        if self.raum.is_some() {
            self.signal(SignalingMessage::LeaveRoom).await;
            self.raum_lokal_abbauen().await;
        }

        let generation = self.naechste_generation();
        self.raum = Some(ActiveRoom::neu(generation, session_id, room_id.clone()));
        self.rejoin_ziel = None;

        let join = SignalingMessage::JoinRoom {
            room_id: room_id.as_str().to_string(),
            device_id: Some(device_id.to_string()),
        };
        if let Err(e) = self.abh.signaling.senden(join).await {
            self.raum = None;
            return Err(signaling_fehler(e));
        }
        tracing::info!(session = %session_id, room_id = %room_id, "Raum-Beitritt angefragt");
        Ok(())
    }

    /// Bewusstes Verlassen durch den Benutzer
    pub(super) async fn raum_verlassen(&mut self) -> SessionResult<()> {
        let Some(raum) = &self.raum else {
            return Ok(());
        };
        tracing::info!(room_id = %raum.room_id, "Raum wird verlassen");

        // Nicht auf die Bestaetigung warten, lokal sofort aufraeumen
        self.signal(SignalingMessage::LeaveRoom).await;
        self.raum_lokal_abbauen().await;
        self.rejoin_ziel = None;
        self.rejoin_unterdrueckt = true;

        self.leave_zaehler += 1;
        let nummer = self.leave_zaehler;
        self.leave_ausstehend = Some(nummer);
        self.intern_nach(self.config.leave_timeout, Intern::LeaveTimeout { nummer });

        self.zustand_setzen(VerbindungsZustand::Left);
        Ok(())
    }

    pub(super) async fn leave_timeout(&mut self, nummer: u64) {
        if self.leave_ausstehend != Some(nummer) {
            return;
        }
        self.leave_ausstehend = None;
        tracing::warn!("Keine Bestaetigung fuer leave_room, Signaling wird neu verbunden");
        if let Err(e) = self.abh.signaling.neu_verbinden().await {
            tracing::warn!(fehler = %e, "Signaling-Neuverbindung fehlgeschlagen");
        }
    }

    /// Verwirft den aktiven Raum samt Schluesseln und Transport
    pub(super) async fn raum_lokal_abbauen(&mut self) {
        self.verschluesselung_verwerfen().await;
        self.raum = None;
        self.room_ready.verwerfen();
    }

    /// Wiederbeitritt nach einem Verbindungsverlust
    pub(super) async fn automatisch_beitreten(&mut self) {
        if !self.im_vordergrund || !self.signaling_verbunden {
            return;
        }
        if std::mem::take(&mut self.rejoin_unterdrueckt) {
            tracing::debug!("Automatischer Wiederbeitritt nach Verlassen unterdrueckt");
            self.rejoin_ziel = None;
            return;
        }
        let Some(session_id) = self.rejoin_ziel else {
            return;
        };
        tracing::info!(session = %session_id, "Automatischer Wiederbeitritt");
        if let Err(e) = self.raum_beitreten(session_id).await {
            tracing::warn!(session = %session_id, fehler = %e, "Wiederbeitritt fehlgeschlagen");
            // Nur eine geschlossene Session wird aufgegeben
            if !matches!(e, SessionError::UngueltigerZustand(_) | SessionError::SessionNichtGefunden(_)) {
                self.rejoin_ziel = Some(session_id);
            }
        }
    }

    pub(super) async fn oberflaeche_setzen(&mut self, aktiv: bool) {
        self.oberflaeche_aktiv = aktiv;
        if !aktiv {
            return;
        }
        if let Some(is_initiator) = self.room_ready.nehmen() {
            tracing::debug!("Zurueckgehaltenes room_ready wird verarbeitet");
            if let Some(rolle) = self.rolle_ermitteln(is_initiator).await {
                let gepuffert = self
                    .raum
                    .as_mut()
                    .and_then(|raum| raum.peer_schluessel.nehmen());
                self.handshake_starten(rolle, gepuffert).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Raum-Ereignisse
    // -----------------------------------------------------------------------

    async fn raum_beigetreten(&mut self, room_id: &str, is_initiator: bool) {
        let Some(raum) = self.raum.as_mut() else {
            tracing::debug!(room_id, "room_joined ohne aktiven Raum");
            return;
        };
        if raum.room_id.as_str() != room_id {
            tracing::warn!(room_id, erwartet = %raum.room_id, "room_joined fuer fremden Raum");
            return;
        }
        raum.beigetreten = true;
        self.zustand_setzen(VerbindungsZustand::RoomJoined);
        self.rolle_ermitteln(is_initiator).await;
    }

    /// Bestimmt die Rolle und haelt eine neue Relay-Zuweisung fest
    async fn rolle_ermitteln(&mut self, is_initiator: bool) -> Option<Role> {
        let session_id = self.raum.as_ref()?.session_id;
        let gespeichert = self.sessions.get(&session_id).and_then(|s| s.role);
        let relay = Role::aus_initiator_flag(is_initiator);

        let Some(rolle) = rolle_bestimmen(gespeichert, Some(relay)) else {
            tracing::error!(session = %session_id, "Keine Rolle bekannt, Handshake nicht gestartet");
            self.emit(SessionEvent::Fehler("Rolle unbekannt".into()));
            return None;
        };
        if gespeichert.is_none() {
            self.session_aendern(session_id, |s| s.role = Some(rolle)).await;
        } else if gespeichert != Some(relay) {
            tracing::debug!(?rolle, ?relay, "Gespeicherte Rolle hat Vorrang vor Relay");
        }
        Some(rolle)
    }

    async fn raum_bereit(&mut self, is_initiator: bool) {
        if self.raum.is_none() {
            tracing::debug!("room_ready ohne aktiven Raum");
            return;
        }
        if !self.oberflaeche_aktiv {
            tracing::debug!("Oberflaeche inaktiv, room_ready zurueckgehalten");
            self.room_ready.ablegen(is_initiator);
            return;
        }
        if let Some(rolle) = self.rolle_ermitteln(is_initiator).await {
            // Ein frisches room_ready macht frueher gepufferte Schluessel wertlos
            self.handshake_starten(rolle, None).await;
        }
    }

    async fn peer_weg(&mut self) {
        let Some(raum) = &self.raum else {
            return;
        };
        let session_id = raum.session_id;
        let war_verbunden = raum.peer_verbunden;
        tracing::info!(session = %session_id, "Peer hat den Raum verlassen");

        self.verschluesselung_verwerfen().await;
        self.room_ready.verwerfen();
        if war_verbunden {
            self.system_ereignis(session_id, "Peer hat den Raum verlassen").await;
        }
        self.zustand_setzen(VerbindungsZustand::PeerLeft);
        self.zustand_setzen(VerbindungsZustand::RoomJoined);
    }

    // -----------------------------------------------------------------------
    // Schluessel-Austausch
    // -----------------------------------------------------------------------

    /// Startet einen frischen Handshake; vorhandenes Material wird zuerst verworfen
    async fn handshake_starten(&mut self, rolle: Role, peer: Option<PeerAngebot>) {
        self.verschluesselung_verwerfen().await;
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        if let Some(angebot) = peer {
            raum.peer_schluessel.ablegen(angebot);
        }
        raum.runde += 1;
        raum.handshake = Some(HandshakeState::neu(rolle, raum.runde));
        raum.verschluesselung = Some(EncryptionState::neu(raum.crypto_session.clone(), rolle));
        let generation = raum.generation;
        tracing::info!(
            ?rolle,
            runde = raum.runde,
            room_id = %raum.room_id,
            "Schluessel-Austausch gestartet"
        );
        self.zustand_setzen(VerbindungsZustand::KeyExchangeInProgress);

        self.intern_spawn(async move {
            let keypair = tokio::task::spawn_blocking(generate_keypair).await;
            match keypair {
                Ok(keypair) => Intern::SchluesselErzeugt {
                    generation,
                    keypair,
                },
                Err(e) => Intern::SchluesselAbgeleitet {
                    generation,
                    ergebnis: Err(CryptoError::KeyDerivation(e.to_string())),
                },
            }
        });
    }

    pub(super) async fn schluessel_erzeugt(&mut self, generation: u64, keypair: LocalKeypair) {
        if !self.ist_aktuell(generation) {
            tracing::debug!(generation, "Veraltetes Schluesselpaar verworfen");
            return;
        }
        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        let crypto_session = raum.crypto_session.clone();
        let runde = raum.runde;
        let public = match self.key_exchange.install_keypair(&crypto_session, keypair) {
            Ok(public) => public,
            Err(e) => return self.handshake_fehlgeschlagen(e).await,
        };

        let gesendet = self
            .signal(SignalingMessage::KeyExchange {
                public_key: BASE64.encode(public),
                session_id: crypto_session.as_str().to_string(),
                round: runde,
            })
            .await;
        if !gesendet {
            return;
        }

        let gepuffert = self.raum.as_mut().and_then(|raum| {
            if let Some(handshake) = raum.handshake.as_mut() {
                handshake.schluessel_gesendet();
            }
            raum.peer_schluessel.nehmen()
        });
        if let Some(peer) = gepuffert {
            tracing::debug!("Gepufferter Peer-Schluessel wird verarbeitet");
            self.ableitung_starten(peer).await;
        }
    }

    async fn peer_schluessel_empfangen(
        &mut self,
        public_key: &str,
        session_id: &str,
        runde: u32,
    ) {
        let Some(raum) = self.raum.as_ref() else {
            tracing::debug!("key_exchange ohne aktiven Raum");
            return;
        };
        if raum.crypto_session.as_str() != session_id {
            tracing::warn!(session_id, "key_exchange fuer fremde Krypto-Session ignoriert");
            return;
        }

        let peer = match BASE64.decode(public_key) {
            Ok(bytes) => bytes,
            Err(_) => {
                return self
                    .handshake_fehlgeschlagen(CryptoError::InvalidPeerKey { laenge: 0 })
                    .await
            }
        };
        if let Err(e) = peer_key_pruefen(&peer) {
            return self.handshake_fehlgeschlagen(e).await;
        }

        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        let angebot = PeerAngebot {
            schluessel: peer,
            runde,
        };
        let lage = raum
            .handshake
            .as_ref()
            .map(|h| (h.rolle(), h.einordnen(&angebot), h.peer_runde()));
        let Some((rolle, einordnung, aktuell)) = lage else {
            return Self::angebot_puffern(raum, angebot);
        };

        match einordnung {
            Einordnung::Puffern => Self::angebot_puffern(raum, angebot),
            Einordnung::Duplikat => tracing::debug!("Doppelter Peer-Schluessel ignoriert"),
            Einordnung::Veraltet => {
                tracing::debug!(runde, ?aktuell, "Peer-Schluessel einer alten Runde ignoriert");
            }
            Einordnung::Ableiten => self.ableitung_starten(angebot).await,
            Einordnung::Neustart => {
                tracing::info!(runde, "Gegenseite hat neu gestartet, Re-Keying");
                self.handshake_starten(rolle, Some(angebot)).await;
            }
        }
    }

    /// Die hoechste Runde bleibt im Puffer
    fn angebot_puffern(raum: &mut ActiveRoom, angebot: PeerAngebot) {
        let aelter = raum
            .peer_schluessel
            .ansehen()
            .is_some_and(|vorhanden| vorhanden.runde > angebot.runde);
        if aelter {
            tracing::debug!(runde = angebot.runde, "Aelterer Peer-Schluessel nicht gepuffert");
            return;
        }
        tracing::debug!(runde = angebot.runde, "Peer-Schluessel gepuffert");
        raum.peer_schluessel.ablegen(angebot);
    }

    async fn ableitung_starten(&mut self, angebot: PeerAngebot) {
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        let crypto_session = raum.crypto_session.clone();
        let generation = raum.generation;
        let privat = match self.key_exchange.lokaler_privater_schluessel(&crypto_session) {
            Ok(privat) => privat,
            Err(e) => return self.handshake_fehlgeschlagen(e).await,
        };
        let peer = angebot.schluessel.clone();
        if let Some(handshake) = raum.handshake.as_mut() {
            handshake.ableitung_gestartet(angebot);
        }

        self.intern_spawn(async move {
            let ergebnis = tokio::task::spawn_blocking(move || {
                derive_session_key(&privat, &peer, &crypto_session)
            })
            .await
            .unwrap_or_else(|e| Err(CryptoError::KeyDerivation(e.to_string())));
            Intern::SchluesselAbgeleitet {
                generation,
                ergebnis,
            }
        });
    }

    pub(super) async fn schluessel_abgeleitet(
        &mut self,
        generation: u64,
        ergebnis: CryptoResult<SecretBytes>,
    ) {
        if !self.ist_aktuell(generation) {
            tracing::debug!(generation, "Veraltete Ableitung verworfen");
            return;
        }
        let schluessel = match ergebnis {
            Ok(schluessel) => schluessel,
            Err(e) => return self.handshake_fehlgeschlagen(e).await,
        };
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        let crypto_session = raum.crypto_session.clone();
        if let Err(e) = self
            .key_exchange
            .install_session_key(&crypto_session, schluessel)
        {
            return self.handshake_fehlgeschlagen(e).await;
        }

        let Some(handshake) = raum.handshake.as_mut() else {
            return;
        };
        let rolle = handshake.rolle();
        let peer_runde = handshake.peer_runde().unwrap_or_default();
        let fortschritt = handshake.abgeleitet();

        // Waehrend der Ableitung hat die Gegenseite neu gestartet
        if let Some(neu) = raum.peer_schluessel.nehmen() {
            let neustart = !handshake.ist_bekannter_schluessel(&neu.schluessel)
                && handshake.ist_neuere_runde(&neu);
            if neustart {
                tracing::info!(runde = neu.runde, "Peer-Schluessel waehrend Ableitung gewechselt");
                return self.handshake_starten(rolle, Some(neu)).await;
            }
            tracing::debug!(runde = neu.runde, "Gepufferter Peer-Schluessel veraltet");
        }

        match fortschritt {
            Fortschritt::AbschlussSenden => {
                // Bestaetigt die Runde des Initiators, mit dessen Schluessel abgeleitet wurde
                self.signal(SignalingMessage::KeyExchangeComplete {
                    session_id: crypto_session.as_str().to_string(),
                    round: peer_runde,
                })
                .await;
                self.verschluesselung_bereit().await;
            }
            Fortschritt::Bereit => self.verschluesselung_bereit().await,
            Fortschritt::Warten | Fortschritt::Veraltet => {
                tracing::debug!("Schluessel abgeleitet, warte auf Abschluss der Gegenseite")
            }
        }
    }

    async fn abschluss_empfangen(&mut self, session_id: &str, runde: u32) {
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        if raum.crypto_session.as_str() != session_id {
            tracing::warn!(session_id, "key_exchange_complete fuer fremde Krypto-Session");
            return;
        }
        let Some(handshake) = raum.handshake.as_mut() else {
            tracing::debug!("key_exchange_complete ohne laufenden Handshake");
            return;
        };
        match handshake.abschluss_empfangen(runde) {
            Fortschritt::Bereit => self.verschluesselung_bereit().await,
            Fortschritt::Veraltet => {
                tracing::debug!(
                    runde,
                    erwartet = handshake.runde(),
                    "key_exchange_complete einer anderen Runde ignoriert"
                );
            }
            Fortschritt::Warten | Fortschritt::AbschlussSenden => {}
        }
    }

    async fn verschluesselung_bereit(&mut self) {
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        let Some(state) = raum.verschluesselung.as_mut() else {
            return;
        };
        if state.ist_bereit() {
            return;
        }
        state.abschliessen();
        let rolle = state.rolle();
        let generation = raum.generation;
        let session_id = raum.session_id;
        let dauer = raum.handshake.as_ref().map(|h| h.gestartet().elapsed());

        if let (Some(metriken), Some(dauer)) = (self.metriken(), dauer) {
            metriken.handshake_erfolgreich(dauer);
        }
        tracing::info!(?rolle, session = %session_id, "Verschluesselung bereit");
        self.session_aendern(session_id, |s| s.encryption_completed_at = Some(Utc::now()))
            .await;
        self.zustand_setzen(VerbindungsZustand::EncryptionReady);
        self.emit(SessionEvent::VerschluesselungBereit);

        if rolle == Role::Initiator {
            self.intern_nach(self.config.offer_verzoegerung, Intern::OfferFaellig { generation });
        }
    }

    /// Bricht den Versuch ab; ohne Schluessel gibt es keinen Transport
    async fn handshake_fehlgeschlagen(&mut self, fehler: CryptoError) {
        tracing::warn!(fehler = %fehler, "Schluessel-Austausch fehlgeschlagen");
        let generation = self.naechste_generation();
        if let Some(raum) = self.raum.as_mut() {
            raum.generation = generation;
            raum.handshake = None;
            raum.verschluesselung = None;
            raum.peer_schluessel.verwerfen();
            self.key_exchange.verwerfen(&raum.crypto_session);
        }
        if let Some(metriken) = self.metriken() {
            metriken.handshake_fehlgeschlagen();
        }
        self.emit(SessionEvent::Sicherheitsfehler);
        self.zustand_setzen(VerbindungsZustand::RoomJoined);
    }

    /// Verwirft Handshake, Schluesselmaterial und Transport des aktiven Raums
    pub(super) async fn verschluesselung_verwerfen(&mut self) {
        let generation = self.naechste_generation();
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        raum.generation = generation;
        raum.handshake = None;
        raum.verschluesselung = None;
        raum.peer_schluessel.verwerfen();
        raum.remote_beschreibung = false;
        raum.kandidaten.clear();
        let transport = raum.transport.take();
        let war_verbunden = std::mem::replace(&mut raum.peer_verbunden, false);

        self.key_exchange.verwerfen(&raum.crypto_session);
        if let Some(transport) = transport {
            transport.close().await;
        }
        if war_verbunden {
            if let Some(metriken) = self.metriken() {
                metriken.peer_verbunden(false);
            }
            self.emit(SessionEvent::PeerAnwesend(false));
        }
    }
}
