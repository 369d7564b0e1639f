//! Session-Cipher: Ver-/Entschluesselung ueber den Schluessel-Speicher
//!
//! Der Schluessel wird pro Aufruf aus dem Speicher geladen und nach dem
//! Aufruf wieder verworfen (SecretBytes nullt beim Drop).

use std::sync::Arc;

use tandem_core::Role;
use tandem_protocol::Envelope;

use crate::e2e::decrypt::{decrypt, version_pruefen};
use crate::e2e::encrypt::encrypt;
use crate::e2e::key_store::{KeySlot, SecureKeyStore};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{CryptoSessionId, SecretBytes};

#[derive(Clone)]
pub struct SessionCipher {
    store: Arc<dyn SecureKeyStore>,
}

impl SessionCipher {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self { store }
    }

    fn schluessel(&self, session_id: &CryptoSessionId) -> CryptoResult<SecretBytes> {
        self.store
            .abrufen(session_id, KeySlot::SessionKey)
            .ok_or(CryptoError::SessionKeyNotFound)
    }

    /// Verschluesselt mit dem Session-Schluessel der Krypto-Session
    pub fn verschluesseln(
        &self,
        session_id: &CryptoSessionId,
        klartext: &[u8],
        zaehler: u64,
        eigene_rolle: Role,
    ) -> CryptoResult<Envelope> {
        let key = self.schluessel(session_id)?;
        encrypt(klartext, &key, zaehler, eigene_rolle)
    }

    /// Entschluesselt einen Umschlag der Gegenseite
    pub fn entschluesseln(
        &self,
        session_id: &CryptoSessionId,
        envelope: &Envelope,
        eigene_rolle: Role,
    ) -> CryptoResult<Vec<u8>> {
        version_pruefen(envelope)?;
        let key = self.schluessel(session_id)?;
        decrypt(envelope, &key, eigene_rolle.gegenseite())
    }
}
