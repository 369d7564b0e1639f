//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tandem_core::RoomId;

/// Domain-Trenner fuer die Ableitung der Krypto-Session-ID
const RAUM_DOMAIN: &str = "tandem-room:";

/// Laenge der Krypto-Session-ID in Hex-Zeichen
const SESSION_ID_LAENGE: usize = 32;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Adresse des Schluesselmaterials eines Raums im Schluessel-Speicher
///
/// Beide Peers berechnen sie unabhaengig aus der gemeinsamen Raum-ID,
/// dafuer ist keine zusaetzliche Nachricht noetig.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CryptoSessionId(String);

impl CryptoSessionId {
    /// Leitet die ID deterministisch aus der Raum-ID ab
    pub fn aus_raum(raum: &RoomId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(RAUM_DOMAIN.as_bytes());
        hasher.update(raum.as_str().as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(SESSION_ID_LAENGE);
        for byte in digest.iter().take(SESSION_ID_LAENGE / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CryptoSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
