//! Transport-Aushandlung und verschluesselter Datenkanal

use std::sync::Arc;

use chrono::Utc;
use tandem_core::SessionId;
use tandem_crypto::version_pruefen;
use tandem_protocol::{Envelope, IceCandidate, Payload, SignalingMessage};
use tokio::sync::mpsc;

use super::{Intern, Orchestrator};
use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::message::{Absender, Inhalt, StoredMessage};
use crate::path::klassifizieren;
use crate::transport::{CandidatePair, Konnektivitaet, TransportAdapter, TransportEvent};

const TRANSPORT_KANAL: usize = 64;

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Aushandlung
    // -----------------------------------------------------------------------

    /// Erzeugt den Transport des aktiven Raums; Ereignisse kommen mit der
    /// aktuellen Generation zurueck
    fn transport_erstellen(&mut self) -> SessionResult<Arc<dyn TransportAdapter>> {
        let raum = self
            .raum
            .as_mut()
            .ok_or_else(|| SessionError::transport("Kein aktiver Raum"))?;
        let generation = raum.generation;

        let (tx, mut rx) = mpsc::channel(TRANSPORT_KANAL);
        let transport = self.abh.transport.erstellen(tx)?;
        raum.transport = Some(Arc::clone(&transport));

        let intern = self.intern_tx.clone();
        tokio::spawn(async move {
            while let Some(ereignis) = rx.recv().await {
                if intern
                    .send(Intern::Transport {
                        generation,
                        ereignis,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(transport)
    }

    pub(super) async fn offer_faellig(&mut self, generation: u64) {
        if !self.ist_aktuell(generation) {
            return;
        }
        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        if !raum.ist_verschluesselt() || raum.transport.is_some() {
            return;
        }

        let transport = match self.transport_erstellen() {
            Ok(transport) => transport,
            Err(e) => return self.transport_fehlgeschlagen(e).await,
        };
        self.zustand_setzen(VerbindungsZustand::TransportNegotiating);
        match transport.create_offer().await {
            Ok(sdp) => {
                tracing::debug!("Offer erzeugt");
                self.signal(SignalingMessage::WebrtcOffer { sdp }).await;
            }
            Err(e) => self.transport_fehlgeschlagen(e).await,
        }
    }

    pub(super) async fn offer_empfangen(&mut self, sdp: &str) {
        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        // Ohne Schluessel kein Transport
        if !raum.ist_verschluesselt() {
            tracing::warn!("Offer vor abgeschlossener Verschluesselung verworfen");
            return;
        }
        if raum.rolle() == Some(tandem_core::Role::Initiator) {
            tracing::warn!("Offer an Initiator ignoriert");
            return;
        }

        // Der Responder erzeugt seinen Transport erst mit dem ersten Offer
        let transport = match raum.transport.clone() {
            Some(transport) => transport,
            None => match self.transport_erstellen() {
                Ok(transport) => transport,
                Err(e) => return self.transport_fehlgeschlagen(e).await,
            },
        };
        self.zustand_setzen(VerbindungsZustand::TransportNegotiating);

        let answer = match transport.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => return self.transport_fehlgeschlagen(e).await,
        };
        self.remote_beschreibung_gesetzt().await;
        self.signal(SignalingMessage::WebrtcAnswer { sdp: answer }).await;
    }

    pub(super) async fn answer_empfangen(&mut self, sdp: &str) {
        let Some(transport) = self.raum.as_ref().and_then(|raum| raum.transport.clone()) else {
            tracing::debug!("Answer ohne eigenen Transport ignoriert");
            return;
        };
        if let Err(e) = transport.accept_answer(sdp).await {
            return self.transport_fehlgeschlagen(e).await;
        }
        self.remote_beschreibung_gesetzt().await;
    }

    pub(super) async fn kandidat_empfangen(&mut self, kandidat: IceCandidate) {
        let grenze = self.config.kandidaten_puffer;
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        match (&raum.transport, raum.remote_beschreibung) {
            (Some(transport), true) => {
                let transport = Arc::clone(transport);
                if let Err(e) = transport.add_remote_candidate(&kandidat).await {
                    tracing::debug!(fehler = %e, "Remote-Kandidat abgelehnt");
                }
            }
            _ => {
                if raum.kandidaten.len() >= grenze {
                    raum.kandidaten.pop_front();
                    tracing::debug!("Kandidaten-Puffer voll, aeltester verworfen");
                }
                raum.kandidaten.push_back(kandidat);
            }
        }
    }

    /// Spielt gepufferte Kandidaten ein sobald die Remote-Beschreibung steht
    async fn remote_beschreibung_gesetzt(&mut self) {
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        raum.remote_beschreibung = true;
        let kandidaten: Vec<IceCandidate> = raum.kandidaten.drain(..).collect();
        let Some(transport) = raum.transport.clone() else {
            return;
        };
        if !kandidaten.is_empty() {
            tracing::debug!(anzahl = kandidaten.len(), "Gepufferte Kandidaten eingespielt");
        }
        for kandidat in &kandidaten {
            if let Err(e) = transport.add_remote_candidate(kandidat).await {
                tracing::debug!(fehler = %e, "Remote-Kandidat abgelehnt");
            }
        }
    }

    async fn transport_fehlgeschlagen(&mut self, fehler: SessionError) {
        tracing::warn!(fehler = %fehler, "Transport nicht verfuegbar");
        let transport = self.raum.as_mut().and_then(|raum| {
            raum.remote_beschreibung = false;
            raum.kandidaten.clear();
            raum.transport.take()
        });
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.emit(SessionEvent::Fehler(fehler.to_string()));
        if self.raum.as_ref().is_some_and(|raum| raum.ist_verschluesselt()) {
            self.zustand_setzen(VerbindungsZustand::EncryptionReady);
        }
    }

    // -----------------------------------------------------------------------
    // Transport-Ereignisse
    // -----------------------------------------------------------------------

    pub(super) async fn transport_ereignis(&mut self, generation: u64, ereignis: TransportEvent) {
        if !self.ist_aktuell(generation) {
            tracing::trace!(generation, "Ereignis eines alten Transports");
            return;
        }
        match ereignis {
            TransportEvent::LokalerKandidat(candidate) => {
                self.signal(SignalingMessage::IceCandidate { candidate }).await;
            }
            TransportEvent::Konnektivitaet(Konnektivitaet::Verbunden) => self.peer_verbunden().await,
            TransportEvent::Konnektivitaet(
                k @ (Konnektivitaet::Getrennt
                | Konnektivitaet::Fehlgeschlagen
                | Konnektivitaet::Geschlossen),
            ) => self.peer_verbindung_verloren(k).await,
            TransportEvent::Konnektivitaet(_) => {}
            TransportEvent::Frame(bytes) => self.frame_empfangen(&bytes).await,
        }
    }

    async fn peer_verbunden(&mut self) {
        let Some(raum) = self.raum.as_mut() else {
            return;
        };
        if raum.peer_verbunden {
            return;
        }
        raum.peer_verbunden = true;
        raum.einmal_verbunden = true;
        let session_id = raum.session_id;
        let room_id = raum.room_id.clone();
        let generation = raum.generation;

        tracing::info!(session = %session_id, "Peer verbunden");
        if let Some(metriken) = self.metriken() {
            metriken.peer_verbunden(true);
        }
        self.session_aendern(session_id, |s| {
            s.annehmen(room_id);
            s.aktivitaet();
        })
        .await;
        self.zustand_setzen(VerbindungsZustand::PeerConnected);
        self.emit(SessionEvent::PeerAnwesend(true));
        self.system_ereignis(session_id, "Peer verbunden").await;

        self.intern_nach(
            self.config.pfad_verzoegerung,
            Intern::PfadPruefen {
                generation,
                versuch: 0,
            },
        );
    }

    async fn peer_verbindung_verloren(&mut self, konnektivitaet: Konnektivitaet) {
        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        if !raum.einmal_verbunden {
            // Vor der ersten Verbindung kann sich ICE noch erholen
            if konnektivitaet != Konnektivitaet::Getrennt {
                self.transport_fehlgeschlagen(SessionError::transport(format!(
                    "Verbindungsaufbau: {konnektivitaet:?}"
                )))
                .await;
            }
            return;
        }
        if !raum.peer_verbunden {
            return;
        }
        let session_id = raum.session_id;

        tracing::warn!(session = %session_id, ?konnektivitaet, "Peer-Verbindung verloren");
        self.verschluesselung_verwerfen().await;
        self.rejoin_ziel = Some(session_id);
        self.zustand_setzen(VerbindungsZustand::EncryptionWiped);
        self.system_ereignis(session_id, "Verbindung zum Peer verloren").await;
        self.zustand_setzen(VerbindungsZustand::RoomJoined);
    }

    // -----------------------------------------------------------------------
    // Verbindungsweg
    // -----------------------------------------------------------------------

    pub(super) fn pfad_pruefen(&mut self, generation: u64, versuch: u8) {
        if !self.ist_aktuell(generation) {
            return;
        }
        let Some(transport) = self.raum.as_ref().and_then(|raum| raum.transport.clone()) else {
            return;
        };
        self.intern_spawn(async move {
            let paar = transport
                .selected_candidate_pair()
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!(fehler = %e, "Kandidaten-Statistik nicht verfuegbar");
                    None
                });
            Intern::PfadErmittelt {
                generation,
                versuch,
                paar,
            }
        });
    }

    pub(super) fn pfad_ermittelt(
        &mut self,
        generation: u64,
        versuch: u8,
        paar: Option<CandidatePair>,
    ) {
        if !self.ist_aktuell(generation) {
            return;
        }
        let pfad = klassifizieren(paar.as_ref());
        if !pfad.ist_bestimmt() && versuch == 0 {
            // Statistiken sind direkt nach dem Verbinden oft noch leer
            self.intern_nach(
                self.config.pfad_wiederholung,
                Intern::PfadPruefen {
                    generation,
                    versuch: 1,
                },
            );
            return;
        }
        tracing::info!(pfad = pfad.label(), "Verbindungsweg ermittelt");
        if let Some(metriken) = self.metriken() {
            metriken.pfad_klassifiziert(pfad.label());
        }
        self.emit(SessionEvent::VerbindungswegErmittelt(pfad));
    }

    // -----------------------------------------------------------------------
    // Datenkanal
    // -----------------------------------------------------------------------

    async fn frame_empfangen(&mut self, bytes: &[u8]) {
        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        // Vor dem Handshake wird nichts gelesen
        if !raum.ist_verschluesselt() {
            tracing::warn!("Frame ohne fertige Verschluesselung verworfen");
            return;
        }

        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(fehler = %e, "Umschlag nicht lesbar");
                return self.entschluesselung_fehlgeschlagen();
            }
        };
        if let Err(e) = version_pruefen(&envelope) {
            tracing::debug!(fehler = %e, "Umschlag abgelehnt");
            return self.entschluesselung_fehlgeschlagen();
        }

        let Some(raum) = self.raum.as_ref() else {
            return;
        };
        let Some(state) = raum.verschluesselung.as_ref() else {
            return;
        };
        if state.ist_wiederholung(envelope.c) {
            tracing::debug!(zaehler = envelope.c, "Wiederholter Umschlag verworfen");
            if let Some(metriken) = self.metriken() {
                metriken.replay_verworfen();
            }
            return;
        }
        let rolle = state.rolle();
        let session_id = raum.session_id;

        let klartext = match self
            .cipher
            .entschluesseln(&raum.crypto_session, &envelope, rolle)
        {
            Ok(klartext) => klartext,
            Err(e) => {
                tracing::debug!(fehler = %e, "Entschluesselung fehlgeschlagen");
                return self.entschluesselung_fehlgeschlagen();
            }
        };
        if let Some(state) = self
            .raum
            .as_mut()
            .and_then(|raum| raum.verschluesselung.as_mut())
        {
            state.empfang_bestaetigen(envelope.c);
        }
        if let Some(metriken) = self.metriken() {
            metriken.nachricht_empfangen();
        }

        match Payload::dekodieren(&klartext) {
            Ok(Payload::RetentionSync(policy)) => {
                if let Err(e) = self.aufbewahrung_anwenden(session_id, policy).await {
                    tracing::warn!(fehler = %e, "Aufbewahrung der Gegenseite nicht uebernommen");
                }
            }
            Ok(payload) => {
                if let Some(inhalt) = Inhalt::aus_payload(payload) {
                    self.nachricht_ablegen(session_id, inhalt).await;
                }
            }
            Err(e) => tracing::warn!(fehler = %e, "Payload nicht lesbar"),
        }
    }

    fn entschluesselung_fehlgeschlagen(&self) {
        if let Some(metriken) = self.metriken() {
            metriken.entschluesselung_fehlgeschlagen();
        }
        self.emit(SessionEvent::EntschluesselungFehlgeschlagen);
    }

    async fn nachricht_ablegen(&mut self, session_id: SessionId, inhalt: Inhalt) {
        match self
            .retention
            .hinzufuegen(session_id, Absender::Peer, inhalt, Utc::now())
            .await
        {
            Ok(nachricht) => {
                self.session_aendern(session_id, |s| s.aktivitaet()).await;
                self.emit(SessionEvent::NachrichtEmpfangen(nachricht));
            }
            Err(e) => tracing::error!(fehler = %e, "Empfangene Nachricht nicht gespeichert"),
        }
    }

    /// Verschluesselt und sendet ueber den Datenkanal
    pub(super) async fn verschluesselt_senden(
        &mut self,
        payload: &Payload,
    ) -> SessionResult<SessionId> {
        let raum = self
            .raum
            .as_mut()
            .ok_or_else(|| SessionError::transport("Kein aktiver Raum"))?;
        if !raum.peer_verbunden {
            return Err(SessionError::transport("Peer nicht verbunden"));
        }
        let transport = raum
            .transport
            .clone()
            .ok_or_else(|| SessionError::transport("Kein Transport"))?;
        let state = raum
            .verschluesselung
            .as_mut()
            .filter(|state| state.ist_bereit())
            .ok_or(SessionError::VerschluesselungNichtBereit)?;

        let zaehler = state.naechster_sende_zaehler()?;
        let rolle = state.rolle();
        let session_id = raum.session_id;
        let klartext = payload.kodieren()?;
        let envelope = self
            .cipher
            .verschluesseln(&raum.crypto_session, &klartext, zaehler, rolle)?;

        transport.send(&envelope.to_bytes()?).await?;
        if let Some(metriken) = self.metriken() {
            metriken.nachricht_gesendet();
        }
        Ok(session_id)
    }

    pub(super) async fn nachricht_senden(&mut self, inhalt: Inhalt) -> SessionResult<StoredMessage> {
        let payload = inhalt
            .als_payload()
            .ok_or_else(|| SessionError::zustand("Systemereignisse werden nicht gesendet"))?;
        let session_id = self.verschluesselt_senden(&payload).await?;

        let nachricht = self
            .retention
            .hinzufuegen(session_id, Absender::Ich, inhalt, Utc::now())
            .await?;
        self.session_aendern(session_id, |s| s.aktivitaet()).await;
        self.emit(SessionEvent::NachrichtGesendet(nachricht.clone()));
        Ok(nachricht)
    }
}
