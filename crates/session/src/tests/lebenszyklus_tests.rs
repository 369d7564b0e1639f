//! Session-Lebenszyklus gegen das Raum-Verzeichnis

use tandem_core::JoinCode;
use tandem_protocol::RetentionPolicy;
use tandem_signaling::SignalingError;

use super::{ereignis_abwarten, TestUmgebung};
use crate::error::SessionError;
use crate::events::{SessionEvent, VerbindungsZustand};
use crate::model::{SessionStatus, SessionStore};

#[tokio::test]
async fn test_session_erstellen_und_annehmen() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let b = umgebung.client("b");

    let session_a = a
        .handle
        .session_erstellen(Some("Wanderung".into()), Some(600))
        .await
        .unwrap();
    assert_eq!(session_a.status(), SessionStatus::Pending);
    assert_eq!(session_a.label.as_deref(), Some("Wanderung"));
    assert_eq!(session_a.retention, RetentionPolicy::default());
    assert!(session_a.room_id().is_none());

    let session_b = b
        .handle
        .code_annehmen(session_a.join_code.as_str(), None)
        .await
        .unwrap();
    assert_eq!(session_b.status(), SessionStatus::Accepted);
    assert!(session_b.accepted_at.is_some());

    let session_a = a.handle.status_pruefen(session_a.id).await.unwrap();
    assert_eq!(session_a.status(), SessionStatus::Accepted);
    assert_eq!(session_a.room_id(), session_b.room_id());

    // Beide Datensaetze liegen im Store
    assert_eq!(a.sessions.alle_laden().await.unwrap().len(), 1);
    assert_eq!(b.sessions.alle_laden().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ungueltiger_code_abgelehnt() {
    let umgebung = TestUmgebung::neu();
    let b = umgebung.client("b");

    let err = b.handle.code_annehmen("12ab", None).await.unwrap_err();
    assert!(matches!(err, SessionError::Core(_)));

    // Gueltiges Format, aber unbekannt
    let err = b.handle.code_annehmen("999999", None).await.unwrap_err();
    assert!(matches!(err, SessionError::Signaling(SignalingError::NichtGefunden(_))));
    assert!(b.handle.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_verzeichnis_offline_beim_erstellen() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    umgebung.raeume.unerreichbar_setzen(true);

    let err = a.handle.session_erstellen(None, None).await.unwrap_err();
    assert!(matches!(err, SessionError::SignalingUnreachable));
    assert!(a.handle.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_bei_netzfehler_unveraendert() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let b = umgebung.client("b");
    let (session_a, _) = umgebung.gekoppelte_sessions(&a, &b).await;

    umgebung.raeume.unerreichbar_setzen(true);
    let err = a.handle.status_pruefen(session_a.id).await.unwrap_err();
    assert!(matches!(err, SessionError::SignalingUnreachable));

    let sessions = a.handle.sessions().await.unwrap();
    assert_eq!(sessions[0].status(), SessionStatus::Accepted);
}

#[tokio::test]
async fn test_entfernter_raum_schliesst_session() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let b = umgebung.client("b");
    let (session_a, _) = umgebung.gekoppelte_sessions(&a, &b).await;

    let room_id = session_a.room_id().cloned().expect("Raum");
    umgebung.raeume.raum_entfernen(&room_id);

    let session_a = a.handle.status_pruefen(session_a.id).await.unwrap();
    assert_eq!(session_a.status(), SessionStatus::Closed);
    assert!(session_a.room_id().is_none());
    assert!(session_a.closed_at.is_some());

    // Geschlossene Sessions koennen keinem Raum mehr beitreten
    let err = a.handle.raum_beitreten(session_a.id).await.unwrap_err();
    assert!(matches!(err, SessionError::UngueltigerZustand(_)));
}

#[tokio::test]
async fn test_abgelaufener_code_laesst_session_ablaufen() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let session_a = a.handle.session_erstellen(None, None).await.unwrap();

    umgebung.raeume.code_ablaufen_lassen(&session_a.join_code);
    let session_a = a.handle.status_pruefen(session_a.id).await.unwrap();
    assert_eq!(session_a.status(), SessionStatus::Expired);
}

#[tokio::test]
async fn test_ausstehender_code_bleibt_pending() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let session_a = a.handle.session_erstellen(None, None).await.unwrap();

    let session_a = a.handle.status_pruefen(session_a.id).await.unwrap();
    assert_eq!(session_a.status(), SessionStatus::Pending);
    assert!(JoinCode::parse(session_a.join_code.as_str()).is_ok());
}

#[tokio::test]
async fn test_session_loeschen_verlaesst_raum_und_vergisst_alles() {
    let umgebung = TestUmgebung::neu();
    let (a, session_a, b, _) = umgebung.verbundenes_paar().await;
    let mut events_a = a.handle.abonnieren();

    a.handle.text_senden("bis bald").await.unwrap();
    assert!(a.nachrichten.enthaelt(session_a.id));

    a.handle.session_loeschen(session_a.id).await.unwrap();
    ereignis_abwarten(&mut events_a, |e| {
        *e == SessionEvent::SessionEntfernt(session_a.id)
    })
    .await;

    assert_eq!(a.handle.zustand().await.unwrap(), VerbindungsZustand::Left);
    assert!(a.handle.sessions().await.unwrap().is_empty());
    assert!(a.sessions.alle_laden().await.unwrap().is_empty());
    assert!(!a.nachrichten.enthaelt(session_a.id));
    assert_eq!(a.schluessel.anzahl(), 0);
    b.zustand_abwarten(VerbindungsZustand::RoomJoined).await;

    let err = a.handle.session_loeschen(session_a.id).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNichtGefunden(_)));
}

#[tokio::test]
async fn test_angeheftete_sessions_zuerst() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");

    let erste = a.handle.session_erstellen(Some("erste".into()), None).await.unwrap();
    let zweite = a.handle.session_erstellen(Some("zweite".into()), None).await.unwrap();
    let dritte = a.handle.session_erstellen(Some("dritte".into()), None).await.unwrap();

    let angeheftet = a.handle.session_anheften(erste.id, true).await.unwrap();
    assert!(angeheftet.pinned);
    a.handle.session_anheften(dritte.id, true).await.unwrap();

    let reihenfolge: Vec<_> = a
        .handle
        .sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(reihenfolge, vec![erste.id, dritte.id, zweite.id]);

    let geloest = a.handle.session_anheften(erste.id, false).await.unwrap();
    assert!(!geloest.pinned);
    let sessions = a.handle.sessions().await.unwrap();
    assert_eq!(sessions[0].id, dritte.id);
}

#[tokio::test]
async fn test_aufbewahrung_lokal_ohne_peer() {
    let umgebung = TestUmgebung::neu();
    let a = umgebung.client("a");
    let session = a.handle.session_erstellen(None, None).await.unwrap();
    let mut events = a.handle.abonnieren();

    a.handle
        .aufbewahrung_aendern(session.id, RetentionPolicy::Forever)
        .await
        .unwrap();
    ereignis_abwarten(&mut events, |e| {
        *e == SessionEvent::AufbewahrungGeaendert {
            session_id: session.id,
            policy: RetentionPolicy::Forever,
        }
    })
    .await;

    let gespeichert = a.sessions.alle_laden().await.unwrap();
    assert_eq!(gespeichert[0].retention, RetentionPolicy::Forever);

    let err = a
        .handle
        .aufbewahrung_aendern(tandem_core::SessionId::new(), RetentionPolicy::Forever)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionNichtGefunden(_)));
}
