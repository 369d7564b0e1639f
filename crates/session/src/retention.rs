//! Aufbewahrung des Nachrichten-Verlaufs
//!
//! Haelt den Verlauf jeder Session im Speicher und spiegelt ihn, je nach
//! Richtlinie, in den `MessageStore`.
//!
//! ## Regeln
//! - Ablauf wird immer aus dem urspruenglichen Zeitstempel berechnet, auch
//!   nach einem Richtlinienwechsel
//! - `NeverStore` loescht den persistierten Verlauf sofort; im Speicher bleibt
//!   er bis zum naechsten Aufraeumen
//! - Aufraeumen entfernt Abgelaufenes aus Speicher und Store

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tandem_core::SessionId;
use tandem_protocol::RetentionPolicy;
use uuid::Uuid;

use crate::error::SessionResult;
use crate::message::{Absender, Inhalt, MessageStore, StoredMessage};

#[derive(Debug, Default)]
struct Verlauf {
    policy: RetentionPolicy,
    nachrichten: Vec<StoredMessage>,
}

pub struct RetentionEngine {
    store: Arc<dyn MessageStore>,
    verlaeufe: HashMap<SessionId, Verlauf>,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            verlaeufe: HashMap::new(),
        }
    }

    /// Laedt den persistierten Verlauf einer Session (beim Start)
    pub async fn session_laden(
        &mut self,
        session_id: SessionId,
        policy: RetentionPolicy,
    ) -> SessionResult<()> {
        let jetzt = Utc::now();
        let mut nachrichten = if policy.persistiert() {
            self.store.laden(session_id).await?
        } else {
            // Reste eines frueheren Absturzes
            self.store.loeschen(session_id).await?;
            Vec::new()
        };

        let vorher = nachrichten.len();
        nachrichten.retain(|m| !m.ist_abgelaufen(jetzt));
        if nachrichten.len() != vorher {
            self.store.ersetzen(session_id, &nachrichten).await?;
        }

        tracing::debug!(
            session = %session_id,
            anzahl = nachrichten.len(),
            %policy,
            "Verlauf geladen"
        );
        self.verlaeufe
            .insert(session_id, Verlauf { policy, nachrichten });
        Ok(())
    }

    pub fn policy(&self, session_id: SessionId) -> RetentionPolicy {
        self.verlaeufe
            .get(&session_id)
            .map(|v| v.policy)
            .unwrap_or_default()
    }

    pub fn nachrichten(&self, session_id: SessionId) -> Vec<StoredMessage> {
        self.verlaeufe
            .get(&session_id)
            .map(|v| v.nachrichten.clone())
            .unwrap_or_default()
    }

    /// Haengt eine Nachricht an den Verlauf an
    pub async fn hinzufuegen(
        &mut self,
        session_id: SessionId,
        absender: Absender,
        inhalt: Inhalt,
        zeitstempel: DateTime<Utc>,
    ) -> SessionResult<StoredMessage> {
        let verlauf = self.verlaeufe.entry(session_id).or_default();
        let nachricht = StoredMessage {
            id: Uuid::new_v4(),
            session_id,
            absender,
            inhalt,
            zeitstempel,
            expires_at: verlauf.policy.ablauf_fuer(zeitstempel),
        };
        verlauf.nachrichten.push(nachricht.clone());

        if verlauf.policy.persistiert() {
            self.store.ersetzen(session_id, &verlauf.nachrichten).await?;
        }
        Ok(nachricht)
    }

    /// Wendet eine neue Richtlinie an
    ///
    /// Gibt `false` zurueck wenn sich nichts geaendert hat.
    pub async fn policy_aendern(
        &mut self,
        session_id: SessionId,
        policy: RetentionPolicy,
    ) -> SessionResult<bool> {
        let verlauf = self.verlaeufe.entry(session_id).or_default();
        if verlauf.policy == policy {
            return Ok(false);
        }
        verlauf.policy = policy;
        for nachricht in &mut verlauf.nachrichten {
            nachricht.expires_at = policy.ablauf_fuer(nachricht.zeitstempel);
        }

        if policy.persistiert() {
            let jetzt = Utc::now();
            let behalten: Vec<StoredMessage> = verlauf
                .nachrichten
                .iter()
                .filter(|m| !m.ist_abgelaufen(jetzt))
                .cloned()
                .collect();
            self.store.ersetzen(session_id, &behalten).await?;
        } else {
            self.store.loeschen(session_id).await?;
        }

        tracing::info!(session = %session_id, %policy, "Aufbewahrung geaendert");
        Ok(true)
    }

    /// Entfernt Abgelaufenes; liefert pro Session die Anzahl entfernter Nachrichten
    pub async fn aufraeumen(
        &mut self,
        jetzt: DateTime<Utc>,
    ) -> SessionResult<Vec<(SessionId, usize)>> {
        let mut entfernt = Vec::new();
        for (session_id, verlauf) in self.verlaeufe.iter_mut() {
            let vorher = verlauf.nachrichten.len();
            verlauf.nachrichten.retain(|m| !m.ist_abgelaufen(jetzt));
            let anzahl = vorher - verlauf.nachrichten.len();
            if anzahl == 0 {
                continue;
            }
            if verlauf.policy.persistiert() {
                self.store
                    .ersetzen(*session_id, &verlauf.nachrichten)
                    .await?;
            }
            entfernt.push((*session_id, anzahl));
        }

        if !entfernt.is_empty() {
            let summe: usize = entfernt.iter().map(|(_, n)| n).sum();
            tracing::debug!(anzahl = summe, "Abgelaufene Nachrichten entfernt");
        }
        Ok(entfernt)
    }

    /// Vergisst eine Session samt persistiertem Verlauf
    pub async fn session_entfernen(&mut self, session_id: SessionId) -> SessionResult<()> {
        self.verlaeufe.remove(&session_id);
        self.store.loeschen(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemoryMessageStore;
    use chrono::Duration;

    async fn engine_mit(
        policy: RetentionPolicy,
    ) -> (RetentionEngine, Arc<MemoryMessageStore>, SessionId) {
        let store = Arc::new(MemoryMessageStore::new());
        let mut engine = RetentionEngine::new(store.clone());
        let session = SessionId::new();
        engine.session_laden(session, policy).await.unwrap();
        (engine, store, session)
    }

    #[tokio::test]
    async fn ttl_persistiert_mit_ablauf() {
        let (mut engine, store, s) = engine_mit(RetentionPolicy::EIN_TAG).await;
        let ts = Utc::now();
        let m = engine
            .hinzufuegen(s, Absender::Ich, Inhalt::Text("hallo".into()), ts)
            .await
            .unwrap();
        assert_eq!(m.expires_at, Some(ts + Duration::hours(24)));
        assert_eq!(store.laden(s).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wechsel_zu_never_store_und_zurueck() {
        let (mut engine, store, s) = engine_mit(RetentionPolicy::EIN_TAG).await;
        let ts = Utc::now() - Duration::minutes(5);
        engine
            .hinzufuegen(s, Absender::Ich, Inhalt::Text("eins".into()), ts)
            .await
            .unwrap();
        engine
            .hinzufuegen(s, Absender::Peer, Inhalt::Text("zwei".into()), ts)
            .await
            .unwrap();
        assert!(store.enthaelt(s));

        // 24h -> NeverStore: Disk sofort leer, Speicher bleibt bis zum Aufraeumen
        assert!(engine
            .policy_aendern(s, RetentionPolicy::NeverStore)
            .await
            .unwrap());
        assert!(!store.enthaelt(s));
        assert_eq!(engine.nachrichten(s).len(), 2);

        // Vor dem Aufraeumen zurueck auf Speichern: Ablauf ab Original-Zeitstempel
        engine
            .policy_aendern(s, RetentionPolicy::EIN_TAG)
            .await
            .unwrap();
        let nachrichten = engine.nachrichten(s);
        assert_eq!(nachrichten.len(), 2);
        assert!(nachrichten
            .iter()
            .all(|m| m.expires_at == Some(ts + Duration::hours(24))));
        assert_eq!(store.laden(s).await.unwrap().len(), 2);

        assert!(engine.aufraeumen(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn never_store_verschwindet_beim_aufraeumen() {
        let (mut engine, store, s) = engine_mit(RetentionPolicy::EIN_TAG).await;
        engine
            .hinzufuegen(s, Absender::Ich, Inhalt::Text("weg".into()), Utc::now())
            .await
            .unwrap();
        engine
            .policy_aendern(s, RetentionPolicy::NeverStore)
            .await
            .unwrap();

        let entfernt = engine.aufraeumen(Utc::now()).await.unwrap();
        assert_eq!(entfernt, vec![(s, 1)]);
        assert!(engine.nachrichten(s).is_empty());
        assert!(!store.enthaelt(s));
    }

    #[tokio::test]
    async fn aufraeumen_schreibt_store_neu() {
        let (mut engine, store, s) = engine_mit(RetentionPolicy::EINE_STUNDE).await;
        let alt = Utc::now() - Duration::hours(2);
        engine
            .hinzufuegen(s, Absender::Peer, Inhalt::Text("alt".into()), alt)
            .await
            .unwrap();
        engine
            .hinzufuegen(s, Absender::Peer, Inhalt::Text("neu".into()), Utc::now())
            .await
            .unwrap();

        engine.aufraeumen(Utc::now()).await.unwrap();
        let gespeichert = store.laden(s).await.unwrap();
        assert_eq!(gespeichert.len(), 1);
        assert_eq!(gespeichert[0].inhalt, Inhalt::Text("neu".into()));
    }

    #[tokio::test]
    async fn laden_verwirft_abgelaufenes() {
        let store = Arc::new(MemoryMessageStore::new());
        let s = SessionId::new();
        let alt = Utc::now() - Duration::hours(2);
        let abgelaufen = StoredMessage {
            id: Uuid::new_v4(),
            session_id: s,
            absender: Absender::Peer,
            inhalt: Inhalt::Text("alt".into()),
            zeitstempel: alt,
            expires_at: RetentionPolicy::EINE_STUNDE.ablauf_fuer(alt),
        };
        store.ersetzen(s, &[abgelaufen]).await.unwrap();

        let mut engine = RetentionEngine::new(store.clone());
        engine
            .session_laden(s, RetentionPolicy::EINE_STUNDE)
            .await
            .unwrap();
        assert!(engine.nachrichten(s).is_empty());
        assert!(!store.enthaelt(s));
    }

    #[tokio::test]
    async fn gleiche_policy_ist_keine_aenderung() {
        let (mut engine, _store, s) = engine_mit(RetentionPolicy::Forever).await;
        assert!(!engine
            .policy_aendern(s, RetentionPolicy::Forever)
            .await
            .unwrap());
    }
}
