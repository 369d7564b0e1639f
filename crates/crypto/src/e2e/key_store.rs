//! Sicherer Schluessel-Speicher
//!
//! Haelt pro Krypto-Session genau einen Eintrag mit zwei Slots:
//! - den privaten Teil des ephemeren X25519-Schluesselpaars (bis zur Ableitung)
//! - den abgeleiteten Session-Schluessel
//!
//! Das Loeschen entfernt den ganzen Eintrag in einer Map-Operation und ist
//! idempotent. Re-Keying und Aufraeumen sehen so nie einen halb geloeschten
//! Zustand.

use dashmap::DashMap;

use crate::error::CryptoResult;
use crate::types::{CryptoSessionId, SecretBytes};

/// Slot innerhalb eines Schluessel-Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    /// Privater X25519-Schluessel, lebt nur bis zur Ableitung
    EphemeralPrivate,
    /// Abgeleiteter AES-256-GCM Schluessel
    SessionKey,
}

/// Schnittstelle zum Geraete-Schluesselspeicher
///
/// Die App bindet hier den Keychain/Keystore des Betriebssystems an.
pub trait SecureKeyStore: Send + Sync {
    /// Legt einen Schluessel in einem Slot ab (ersetzt einen vorhandenen)
    fn ablegen(&self, id: &CryptoSessionId, slot: KeySlot, schluessel: SecretBytes)
        -> CryptoResult<()>;

    /// Liest einen Schluessel (Kopie, wird beim Drop genullt)
    fn abrufen(&self, id: &CryptoSessionId, slot: KeySlot) -> Option<SecretBytes>;

    /// Verwirft einen einzelnen Slot
    fn slot_verwerfen(&self, id: &CryptoSessionId, slot: KeySlot);

    /// Entfernt den gesamten Eintrag; `true` wenn etwas entfernt wurde
    ///
    /// Ein zweiter Aufruf ist ein No-Op und nie ein Fehler.
    fn entfernen(&self, id: &CryptoSessionId) -> bool;

    /// Prueft ob ein Slot belegt ist
    fn enthaelt(&self, id: &CryptoSessionId, slot: KeySlot) -> bool {
        self.abrufen(id, slot).is_some()
    }
}

// ---------------------------------------------------------------------------
// In-Memory Implementierung
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct KeyEntry {
    private: Option<SecretBytes>,
    session: Option<SecretBytes>,
}

impl KeyEntry {
    fn slot_mut(&mut self, slot: KeySlot) -> &mut Option<SecretBytes> {
        match slot {
            KeySlot::EphemeralPrivate => &mut self.private,
            KeySlot::SessionKey => &mut self.session,
        }
    }

    fn slot(&self, slot: KeySlot) -> Option<&SecretBytes> {
        match slot {
            KeySlot::EphemeralPrivate => self.private.as_ref(),
            KeySlot::SessionKey => self.session.as_ref(),
        }
    }

    fn ist_leer(&self) -> bool {
        self.private.is_none() && self.session.is_none()
    }
}

/// Schluessel-Speicher im Arbeitsspeicher (Tests, Desktop ohne Keychain)
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    eintraege: DashMap<CryptoSessionId, KeyEntry>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anzahl der Sessions mit Schluesselmaterial
    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn ablegen(
        &self,
        id: &CryptoSessionId,
        slot: KeySlot,
        schluessel: SecretBytes,
    ) -> CryptoResult<()> {
        let mut eintrag = self.eintraege.entry(id.clone()).or_default();
        *eintrag.slot_mut(slot) = Some(schluessel);
        Ok(())
    }

    fn abrufen(&self, id: &CryptoSessionId, slot: KeySlot) -> Option<SecretBytes> {
        self.eintraege
            .get(id)
            .and_then(|eintrag| eintrag.slot(slot).cloned())
    }

    fn slot_verwerfen(&self, id: &CryptoSessionId, slot: KeySlot) {
        if let Some(mut eintrag) = self.eintraege.get_mut(id) {
            eintrag.slot_mut(slot).take();
        }
        self.eintraege.remove_if(id, |_, eintrag| eintrag.ist_leer());
    }

    fn entfernen(&self, id: &CryptoSessionId) -> bool {
        self.eintraege.remove(id).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
