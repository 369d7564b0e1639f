//! Raum-Verzeichnis: REST-Aufrufe fuer den Raum-Lebenszyklus
//!
//! ```text
//! POST   {basis}/rooms                       Raum mit Join-Code anlegen
//! POST   {basis}/rooms/accept                Join-Code annehmen -> roomId
//! GET    {basis}/rooms/pending/{code}?clientId=..  Status eines Codes
//! GET    {basis}/rooms/{roomId}              Teilnehmer
//! DELETE {basis}/rooms/{roomId}              Raum loeschen
//! ```
//!
//! 404 wird als `NichtGefunden` gemeldet, alle Netzwerkfehler als
//! `Unreachable`. Nur Ersteres darf eine Session schliessen.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tandem_core::{DeviceId, JoinCode, RoomId};
use url::Url;

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Status eines ausstehenden Join-Codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStatus {
    Accepted(RoomId),
    StillPending,
    Expired,
}

/// Teilnehmer eines Raums
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// REST-Schnittstelle fuer den Raum-Lebenszyklus
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn create_room(
        &self,
        join_code: &JoinCode,
        ttl_seconds: u64,
        client_id: &DeviceId,
        push_token: Option<&str>,
    ) -> SignalingResult<()>;

    async fn accept_join_code(
        &self,
        join_code: &JoinCode,
        client_id: &DeviceId,
        push_token: Option<&str>,
    ) -> SignalingResult<RoomId>;

    async fn check_pending(
        &self,
        join_code: &JoinCode,
        client_id: &DeviceId,
    ) -> SignalingResult<PendingStatus>;

    async fn get_room(&self, room_id: &RoomId) -> SignalingResult<RoomInfo>;

    async fn delete_room(&self, room_id: &RoomId) -> SignalingResult<()>;
}

// ---------------------------------------------------------------------------
// Draht-Formate
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomBody<'a> {
    join_code: &'a str,
    ttl_seconds: u64,
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    push_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptBody<'a> {
    join_code: &'a str,
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    push_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptAntwort {
    room_id: RoomId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingAntwort {
    status: String,
    #[serde(default)]
    room_id: Option<RoomId>,
}

impl PendingAntwort {
    fn in_status(self) -> SignalingResult<PendingStatus> {
        match (self.status.as_str(), self.room_id) {
            ("accepted", Some(room_id)) => Ok(PendingStatus::Accepted(room_id)),
            ("accepted", None) => Err(SignalingError::protokoll(
                "Status accepted ohne roomId",
            )),
            ("pending", _) => Ok(PendingStatus::StillPending),
            ("expired", _) => Ok(PendingStatus::Expired),
            (anderer, _) => Err(SignalingError::protokoll(format!(
                "Unbekannter Pending-Status: {anderer}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP-Implementierung
// ---------------------------------------------------------------------------

/// Raum-Verzeichnis ueber HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpRoomDirectory {
    basis: Url,
    client: Client,
}

impl HttpRoomDirectory {
    pub fn neu(basis: &Url, timeout: std::time::Duration) -> SignalingResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(SignalingError::Http)?;

        if basis.cannot_be_a_base() {
            return Err(SignalingError::protokoll(format!(
                "API-URL ohne Pfad: {basis}"
            )));
        }

        Ok(Self {
            basis: basis.clone(),
            client,
        })
    }

    pub fn basis_url(&self) -> &Url {
        &self.basis
    }

    /// Haengt Segmente an den Basis-Pfad; jedes wird einzeln kodiert
    fn url(&self, segmente: &[&str]) -> SignalingResult<Url> {
        // url ueberspringt "." und ".." still, das wuerde den Endpunkt wechseln
        if let Some(segment) = segmente.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(SignalingError::protokoll(format!(
                "Ungueltiges Pfadsegment: {segment:?}"
            )));
        }
        let mut url = self.basis.clone();
        url.path_segments_mut()
            .map_err(|_| SignalingError::protokoll("API-URL ohne Pfad"))?
            .pop_if_empty()
            .extend(segmente);
        Ok(url)
    }

    /// Prueft den Status und liefert den Body als Text
    async fn pruefen(
        antwort: reqwest::Response,
        objekt: &str,
    ) -> SignalingResult<reqwest::Response> {
        let status = antwort.status();
        if status.is_success() {
            return Ok(antwort);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(SignalingError::NichtGefunden(objekt.to_string()));
        }
        Err(SignalingError::HttpStatus {
            status: status.as_u16(),
            text: antwort.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn create_room(
        &self,
        join_code: &JoinCode,
        ttl_seconds: u64,
        client_id: &DeviceId,
        push_token: Option<&str>,
    ) -> SignalingResult<()> {
        let body = CreateRoomBody {
            join_code: join_code.as_str(),
            ttl_seconds,
            client_id: client_id.to_string(),
            push_token,
        };
        let antwort = self.client.post(self.url(&["rooms"])?).json(&body).send().await?;
        Self::pruefen(antwort, "rooms").await?;
        tracing::debug!(ttl_seconds, "Raum angelegt");
        Ok(())
    }

    async fn accept_join_code(
        &self,
        join_code: &JoinCode,
        client_id: &DeviceId,
        push_token: Option<&str>,
    ) -> SignalingResult<RoomId> {
        let body = AcceptBody {
            join_code: join_code.as_str(),
            client_id: client_id.to_string(),
            push_token,
        };
        let antwort = self
            .client
            .post(self.url(&["rooms", "accept"])?)
            .json(&body)
            .send()
            .await?;
        let antwort: AcceptAntwort = Self::pruefen(antwort, "join_code").await?.json().await?;
        tracing::debug!(room_id = %antwort.room_id, "Join-Code angenommen");
        Ok(antwort.room_id)
    }

    async fn check_pending(
        &self,
        join_code: &JoinCode,
        client_id: &DeviceId,
    ) -> SignalingResult<PendingStatus> {
        let mut url = self.url(&["rooms", "pending", join_code.as_str()])?;
        url.query_pairs_mut()
            .append_pair("clientId", &client_id.to_string());

        let antwort = self.client.get(url).send().await?;
        let antwort: PendingAntwort = Self::pruefen(antwort, "join_code").await?.json().await?;
        antwort.in_status()
    }

    async fn get_room(&self, room_id: &RoomId) -> SignalingResult<RoomInfo> {
        let antwort = self
            .client
            .get(self.url(&["rooms", room_id.as_str()])?)
            .send()
            .await?;
        Ok(Self::pruefen(antwort, room_id.as_str()).await?.json().await?)
    }

    async fn delete_room(&self, room_id: &RoomId) -> SignalingResult<()> {
        let antwort = self
            .client
            .delete(self.url(&["rooms", room_id.as_str()])?)
            .send()
            .await?;
        match Self::pruefen(antwort, room_id.as_str()).await {
            // Bereits geloescht – kein Fehler
            Ok(_) | Err(SignalingError::NichtGefunden(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// In-Memory Implementierung (Tests, Offline-Betrieb)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct AusstehenderCode {
    ersteller: DeviceId,
    raum: Option<RoomId>,
    abgelaufen: bool,
}

/// Raum-Verzeichnis im Arbeitsspeicher
///
/// Verhaelt sich wie das Relay: ein Code wird beim Annehmen einem neuen Raum
/// zugeordnet, beide Geraete sind danach Teilnehmer.
#[derive(Debug, Default)]
pub struct MemoryRoomDirectory {
    codes: DashMap<String, AusstehenderCode>,
    raeume: DashMap<RoomId, Vec<String>>,
    unerreichbar: std::sync::atomic::AtomicBool,
}

impl MemoryRoomDirectory {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Simuliert einen Netzwerkausfall
    pub fn unerreichbar_setzen(&self, unerreichbar: bool) {
        self.unerreichbar
            .store(unerreichbar, std::sync::atomic::Ordering::SeqCst);
    }

    /// Laesst einen ausstehenden Code ablaufen
    pub fn code_ablaufen_lassen(&self, join_code: &JoinCode) {
        if let Some(mut code) = self.codes.get_mut(join_code.as_str()) {
            code.abgelaufen = true;
        }
    }

    /// Entfernt einen Raum serverseitig (z.B. durch Ablauf)
    pub fn raum_entfernen(&self, room_id: &RoomId) {
        self.raeume.remove(room_id);
    }

    fn erreichbar(&self) -> SignalingResult<()> {
        if self.unerreichbar.load(std::sync::atomic::Ordering::SeqCst) {
            Err(SignalingError::Unreachable("Raum-Verzeichnis offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RoomDirectory for MemoryRoomDirectory {
    async fn create_room(
        &self,
        join_code: &JoinCode,
        _ttl_seconds: u64,
        client_id: &DeviceId,
        _push_token: Option<&str>,
    ) -> SignalingResult<()> {
        self.erreichbar()?;
        self.codes.insert(
            join_code.as_str().to_string(),
            AusstehenderCode {
                ersteller: *client_id,
                raum: None,
                abgelaufen: false,
            },
        );
        Ok(())
    }

    async fn accept_join_code(
        &self,
        join_code: &JoinCode,
        client_id: &DeviceId,
        _push_token: Option<&str>,
    ) -> SignalingResult<RoomId> {
        self.erreichbar()?;
        let mut code = self
            .codes
            .get_mut(join_code.as_str())
            .filter(|c| !c.abgelaufen)
            .ok_or_else(|| SignalingError::NichtGefunden(join_code.as_str().to_string()))?;

        if let Some(raum) = &code.raum {
            return Ok(raum.clone());
        }
        let raum = RoomId::new(format!("raum-{}", join_code.as_str()));
        code.raum = Some(raum.clone());
        self.raeume.insert(
            raum.clone(),
            vec![code.ersteller.to_string(), client_id.to_string()],
        );
        Ok(raum)
    }

    async fn check_pending(
        &self,
        join_code: &JoinCode,
        _client_id: &DeviceId,
    ) -> SignalingResult<PendingStatus> {
        self.erreichbar()?;
        let code = self
            .codes
            .get(join_code.as_str())
            .ok_or_else(|| SignalingError::NichtGefunden(join_code.as_str().to_string()))?;
        Ok(match (&code.raum, code.abgelaufen) {
            (Some(raum), _) => PendingStatus::Accepted(raum.clone()),
            (None, true) => PendingStatus::Expired,
            (None, false) => PendingStatus::StillPending,
        })
    }

    async fn get_room(&self, room_id: &RoomId) -> SignalingResult<RoomInfo> {
        self.erreichbar()?;
        self.raeume
            .get(room_id)
            .map(|teilnehmer| RoomInfo {
                room_id: room_id.clone(),
                participants: teilnehmer.clone(),
            })
            .ok_or_else(|| SignalingError::NichtGefunden(room_id.as_str().to_string()))
    }

    async fn delete_room(&self, room_id: &RoomId) -> SignalingResult<()> {
        self.erreichbar()?;
        self.raeume.remove(room_id);
        self.codes.retain(|_, code| code.raum.as_ref() != Some(room_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> JoinCode {
        JoinCode::parse("123456").unwrap()
    }

    #[test]
    fn pending_antwort_auswerten() {
        let accepted = PendingAntwort {
            status: "accepted".into(),
            room_id: Some(RoomId::new("r1")),
        };
        assert_eq!(
            accepted.in_status().unwrap(),
            PendingStatus::Accepted(RoomId::new("r1"))
        );

        let pending = PendingAntwort {
            status: "pending".into(),
            room_id: None,
        };
        assert_eq!(pending.in_status().unwrap(), PendingStatus::StillPending);

        let kaputt = PendingAntwort {
            status: "accepted".into(),
            room_id: None,
        };
        assert!(kaputt.in_status().is_err());
    }

    fn verzeichnis(basis: &str) -> HttpRoomDirectory {
        let basis = Url::parse(basis).unwrap();
        HttpRoomDirectory::neu(&basis, std::time::Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn basis_url_mit_und_ohne_slash() {
        for basis in ["https://api.example.org/v1", "https://api.example.org/v1/"] {
            assert_eq!(
                verzeichnis(basis).url(&["rooms", "accept"]).unwrap().as_str(),
                "https://api.example.org/v1/rooms/accept"
            );
        }
        assert_eq!(
            verzeichnis("https://api.example.org").url(&["rooms"]).unwrap().as_str(),
            "https://api.example.org/rooms"
        );
    }

    #[test]
    fn raum_id_bleibt_ein_segment() {
        let dir = verzeichnis("https://api.example.org/v1/");
        let url = dir.url(&["rooms", "../admin/x?y#z"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.org/v1/rooms/..%2Fadmin%2Fx%3Fy%23z"
        );
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert!(url.query().is_none());

        for kaputt in ["..", ".", ""] {
            assert!(dir.url(&["rooms", kaputt]).is_err(), "{kaputt:?}");
        }
    }

    #[test]
    fn url_ohne_pfad_wird_abgelehnt() {
        let basis = Url::parse("mailto:relay@example.org").unwrap();
        assert!(HttpRoomDirectory::neu(&basis, std::time::Duration::from_secs(5)).is_err());
    }

    #[test]
    fn create_body_feldnamen() {
        let body = CreateRoomBody {
            join_code: "123456",
            ttl_seconds: 600,
            client_id: "geraet".into(),
            push_token: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["joinCode"], "123456");
        assert_eq!(json["ttlSeconds"], 600);
        assert!(json.get("pushToken").is_none());
    }

    #[tokio::test]
    async fn speicher_verzeichnis_lebenszyklus() {
        let dir = MemoryRoomDirectory::neu();
        let a = DeviceId::new();
        let b = DeviceId::new();

        dir.create_room(&code(), 600, &a, None).await.unwrap();
        assert_eq!(
            dir.check_pending(&code(), &a).await.unwrap(),
            PendingStatus::StillPending
        );

        let raum = dir.accept_join_code(&code(), &b, None).await.unwrap();
        assert_eq!(
            dir.check_pending(&code(), &a).await.unwrap(),
            PendingStatus::Accepted(raum.clone())
        );
        assert_eq!(dir.get_room(&raum).await.unwrap().participants.len(), 2);

        dir.delete_room(&raum).await.unwrap();
        assert!(dir.get_room(&raum).await.unwrap_err().ist_nicht_gefunden());
    }

    #[tokio::test]
    async fn offline_ist_transient() {
        let dir = MemoryRoomDirectory::neu();
        dir.unerreichbar_setzen(true);
        let err = dir.get_room(&RoomId::new("x")).await.unwrap_err();
        assert!(err.ist_transient());
    }

    #[tokio::test]
    async fn abgelaufener_code() {
        let dir = MemoryRoomDirectory::neu();
        let a = DeviceId::new();
        dir.create_room(&code(), 600, &a, None).await.unwrap();
        dir.code_ablaufen_lassen(&code());
        assert_eq!(
            dir.check_pending(&code(), &a).await.unwrap(),
            PendingStatus::Expired
        );
        assert!(dir
            .accept_join_code(&code(), &DeviceId::new(), None)
            .await
            .unwrap_err()
            .ist_nicht_gefunden());
    }
}
