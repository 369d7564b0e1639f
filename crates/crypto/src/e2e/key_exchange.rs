//! X25519 Diffie-Hellman Key Exchange
//!
//! Ablauf pro Raum:
//! 1. Beide Seiten erzeugen ein ephemeres Schluesselpaar, der private Teil
//!    landet im Schluessel-Speicher
//! 2. Der oeffentliche Teil geht ueber das Signaling an die Gegenseite
//! 3. Mit dem Peer-Schluessel wird das Shared Secret berechnet und per
//!    HKDF-SHA256 (Salt = Krypto-Session-ID) zum Session-Schluessel abgeleitet
//! 4. Der private Teil wird danach verworfen
//!
//! Erzeugen und Ableiten sind als reine Funktionen verfuegbar
//! (`generate_keypair`, `derive_session_key`), damit sie auf einem
//! Blocking-Worker laufen koennen. Das Ablegen im Speicher
//! (`install_keypair`, `install_session_key`) passiert danach im
//! besitzenden Kontext.

use std::sync::Arc;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::e2e::key_store::{KeySlot, SecureKeyStore};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{CryptoSessionId, SecretBytes};

/// Laenge von X25519-Schluesseln und des abgeleiteten Session-Schluessels
pub const SCHLUESSEL_LAENGE: usize = 32;

/// HKDF-Info fuer den Session-Schluessel (versioniert)
const SESSION_KEY_INFO: &[u8] = b"tandem-session-key-v1";

/// Frisch erzeugtes, noch nicht abgelegtes Schluesselpaar
#[derive(Debug)]
pub struct LocalKeypair {
    private: SecretBytes,
    public: [u8; SCHLUESSEL_LAENGE],
}

impl LocalKeypair {
    pub fn public_key(&self) -> [u8; SCHLUESSEL_LAENGE] {
        self.public
    }
}

/// Verweis auf einen abgelegten Session-Schluessel
///
/// Enthaelt nie das Schluesselmaterial selbst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedKeyHandle {
    pub session_id: CryptoSessionId,
}

/// Erzeugt ein ephemeres X25519-Schluesselpaar
pub fn generate_keypair() -> LocalKeypair {
    let mut priv_bytes = [0u8; SCHLUESSEL_LAENGE];
    OsRng.fill_bytes(&mut priv_bytes);
    let secret = StaticSecret::from(priv_bytes);
    let public = X25519PublicKey::from(&secret);
    priv_bytes.iter_mut().for_each(|b| *b = 0);

    LocalKeypair {
        private: SecretBytes::new(secret.to_bytes().to_vec()),
        public: public.to_bytes(),
    }
}

/// Prueft die Laenge eines Peer-Schluessels
pub fn peer_key_pruefen(peer_public: &[u8]) -> CryptoResult<[u8; SCHLUESSEL_LAENGE]> {
    <[u8; SCHLUESSEL_LAENGE]>::try_from(peer_public).map_err(|_| CryptoError::InvalidPeerKey {
        laenge: peer_public.len(),
    })
}

/// Berechnet Shared Secret und leitet den Session-Schluessel ab
pub fn derive_session_key(
    private: &SecretBytes,
    peer_public: &[u8],
    session_id: &CryptoSessionId,
) -> CryptoResult<SecretBytes> {
    let peer = peer_key_pruefen(peer_public)?;
    let private_arr = <[u8; SCHLUESSEL_LAENGE]>::try_from(private.as_bytes()).map_err(|_| {
        CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: private.len(),
        }
    })?;

    let secret = StaticSecret::from(private_arr);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(peer));

    // Kleine-Ordnung-Punkte ergeben ein Null-Secret
    if !shared.was_contributory() {
        return Err(CryptoError::KeyAgreement);
    }

    let key = hkdf_derive(
        shared.as_bytes(),
        session_id.as_str().as_bytes(),
        SESSION_KEY_INFO,
        SCHLUESSEL_LAENGE,
    )?;
    Ok(SecretBytes::new(key))
}

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------------
// KeyExchange
// ---------------------------------------------------------------------------

/// Key Exchange ueber einem Schluessel-Speicher
#[derive(Clone)]
pub struct KeyExchange {
    store: Arc<dyn SecureKeyStore>,
}

impl KeyExchange {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self { store }
    }

    /// Erzeugt ein Schluesselpaar, legt den privaten Teil ab und gibt den
    /// oeffentlichen zurueck
    pub fn start_exchange(
        &self,
        session_id: &CryptoSessionId,
    ) -> CryptoResult<[u8; SCHLUESSEL_LAENGE]> {
        self.install_keypair(session_id, generate_keypair())
    }

    /// Legt ein zuvor erzeugtes Schluesselpaar ab
    pub fn install_keypair(
        &self,
        session_id: &CryptoSessionId,
        keypair: LocalKeypair,
    ) -> CryptoResult<[u8; SCHLUESSEL_LAENGE]> {
        let public = keypair.public;
        self.store
            .ablegen(session_id, KeySlot::EphemeralPrivate, keypair.private)?;
        tracing::debug!(session = %session_id, "Ephemeres Schluesselpaar abgelegt");
        Ok(public)
    }

    /// Liest den privaten Teil fuer eine Ableitung ausserhalb des Speichers
    pub fn lokaler_privater_schluessel(
        &self,
        session_id: &CryptoSessionId,
    ) -> CryptoResult<SecretBytes> {
        self.store
            .abrufen(session_id, KeySlot::EphemeralPrivate)
            .ok_or(CryptoError::HandshakeNotStarted)
    }

    /// Leitet den Session-Schluessel aus dem Peer-Schluessel ab und legt ihn ab
    pub fn derive_shared_key(
        &self,
        peer_public: &[u8],
        session_id: &CryptoSessionId,
    ) -> CryptoResult<SharedKeyHandle> {
        peer_key_pruefen(peer_public)?;
        let private = self.lokaler_privater_schluessel(session_id)?;
        let key = derive_session_key(&private, peer_public, session_id)?;
        self.install_session_key(session_id, key)
    }

    /// Legt einen abgeleiteten Schluessel ab und verwirft den privaten Teil
    pub fn install_session_key(
        &self,
        session_id: &CryptoSessionId,
        key: SecretBytes,
    ) -> CryptoResult<SharedKeyHandle> {
        self.store.ablegen(session_id, KeySlot::SessionKey, key)?;
        self.store
            .slot_verwerfen(session_id, KeySlot::EphemeralPrivate);
        tracing::debug!(session = %session_id, "Session-Schluessel abgeleitet");
        Ok(SharedKeyHandle {
            session_id: session_id.clone(),
        })
    }

    /// Ob fuer die Session ein lokales Schluesselpaar existiert
    pub fn hat_schluesselpaar(&self, session_id: &CryptoSessionId) -> bool {
        self.store.enthaelt(session_id, KeySlot::EphemeralPrivate)
    }

    /// Ob fuer die Session ein Session-Schluessel existiert
    pub fn hat_session_key(&self, session_id: &CryptoSessionId) -> bool {
        self.store.enthaelt(session_id, KeySlot::SessionKey)
    }

    /// Verwirft alles Schluesselmaterial der Session
    pub fn verwerfen(&self, session_id: &CryptoSessionId) -> bool {
        let entfernt = self.store.entfernen(session_id);
        if entfernt {
            tracing::debug!(session = %session_id, "Schluesselmaterial verworfen");
        }
        entfernt
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e2e::key_store::MemoryKeyStore;
    use tandem_core::RoomId;

    fn session() -> CryptoSessionId {
        CryptoSessionId::aus_raum(&RoomId::new("raum-test"))
    }

    #[test]
    fn beide_seiten_leiten_gleichen_schluessel_ab() {
        let store_a = Arc::new(MemoryKeyStore::new());
        let store_b = Arc::new(MemoryKeyStore::new());
        let a = KeyExchange::new(store_a.clone());
        let b = KeyExchange::new(store_b.clone());
        let sid = session();

        let pub_a = a.start_exchange(&sid).unwrap();
        let pub_b = b.start_exchange(&sid).unwrap();

        a.derive_shared_key(&pub_b, &sid).unwrap();
        b.derive_shared_key(&pub_a, &sid).unwrap();

        let key_a = store_a.abrufen(&sid, KeySlot::SessionKey).unwrap();
        let key_b = store_b.abrufen(&sid, KeySlot::SessionKey).unwrap();
        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
        assert_eq!(key_a.len(), SCHLUESSEL_LAENGE);
    }

    #[test]
    fn privater_schluessel_wird_nach_ableitung_verworfen() {
        let ex = KeyExchange::new(Arc::new(MemoryKeyStore::new()));
        let sid = session();
        ex.start_exchange(&sid).unwrap();
        let peer = generate_keypair();

        ex.derive_shared_key(&peer.public_key(), &sid).unwrap();
        assert!(!ex.hat_schluesselpaar(&sid));
        assert!(ex.hat_session_key(&sid));
    }

    #[test]
    fn falsche_laenge_ist_invalid_peer_key() {
        let ex = KeyExchange::new(Arc::new(MemoryKeyStore::new()));
        let sid = session();
        ex.start_exchange(&sid).unwrap();
        let err = ex.derive_shared_key(&[1u8; 31], &sid).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPeerKey { laenge: 31 }));
    }

    #[test]
    fn ohne_schluesselpaar_handshake_not_started() {
        let ex = KeyExchange::new(Arc::new(MemoryKeyStore::new()));
        let peer = generate_keypair();
        let err = ex
            .derive_shared_key(&peer.public_key(), &session())
            .unwrap_err();
        assert!(matches!(err, CryptoError::HandshakeNotStarted));
    }

    #[test]
    fn null_schluessel_wird_abgelehnt() {
        let kp = generate_keypair();
        let err = derive_session_key(&kp.private, &[0u8; 32], &session()).unwrap_err();
        assert!(matches!(err, CryptoError::KeyAgreement));
    }

    #[test]
    fn andere_session_id_anderer_schluessel() {
        let a = generate_keypair();
        let b = generate_keypair();
        let sid1 = CryptoSessionId::aus_raum(&RoomId::new("eins"));
        let sid2 = CryptoSessionId::aus_raum(&RoomId::new("zwei"));

        let k1 = derive_session_key(&a.private, &b.public_key(), &sid1).unwrap();
        let k2 = derive_session_key(&a.private, &b.public_key(), &sid2).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn verwerfen_zweimal_ist_noop() {
        let ex = KeyExchange::new(Arc::new(MemoryKeyStore::new()));
        let sid = session();
        ex.start_exchange(&sid).unwrap();
        assert!(ex.verwerfen(&sid));
        assert!(!ex.verwerfen(&sid));
    }

    #[test]
    fn hkdf_derive_deterministisch() {
        let key1 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        let key2 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        assert_eq!(key1, key2);
        assert_ne!(key1, hkdf_derive(b"ikm", b"salt", b"info-2", 32).unwrap());
    }
}
