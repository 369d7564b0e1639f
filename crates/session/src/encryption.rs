//! Zaehler-Buchhaltung eines verschluesselten Raums
//!
//! Genau ein `EncryptionState` pro beigetretenem Raum. Er entsteht mit dem
//! Start des Schluessel-Austauschs und wird beim Verlassen, bei Verlust des
//! Peers oder beim Re-Keying verworfen.

use tandem_core::Role;
use tandem_crypto::CryptoSessionId;

use crate::error::{SessionError, SessionResult};

#[derive(Debug)]
pub struct EncryptionState {
    crypto_session: CryptoSessionId,
    rolle: Role,
    send_counter: u64,
    /// Hoechster gesehener Peer-Zaehler + 1
    receive_counter: u64,
    handshake_complete: bool,
}

impl EncryptionState {
    pub fn neu(crypto_session: CryptoSessionId, rolle: Role) -> Self {
        Self {
            crypto_session,
            rolle,
            send_counter: 0,
            receive_counter: 0,
            handshake_complete: false,
        }
    }

    pub fn crypto_session(&self) -> &CryptoSessionId {
        &self.crypto_session
    }

    pub fn rolle(&self) -> Role {
        self.rolle
    }

    pub fn ist_bereit(&self) -> bool {
        self.handshake_complete
    }

    pub fn abschliessen(&mut self) {
        self.handshake_complete = true;
    }

    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    pub fn receive_counter(&self) -> u64 {
        self.receive_counter
    }

    /// Liefert den naechsten Sende-Zaehler und zaehlt weiter
    ///
    /// Ein erschoepfter Zaehler wird nie wiederverwendet.
    pub fn naechster_sende_zaehler(&mut self) -> SessionResult<u64> {
        let zaehler = self.send_counter;
        self.send_counter = zaehler
            .checked_add(1)
            .ok_or_else(|| SessionError::zustand("Sende-Zaehler erschoepft, Re-Keying noetig"))?;
        Ok(zaehler)
    }

    /// Ob ein Umschlag mit diesem Zaehler bereits gesehen wurde
    pub fn ist_wiederholung(&self, zaehler: u64) -> bool {
        zaehler < self.receive_counter
    }

    /// Hebt die Hochwassermarke; nur nach erfolgreicher Authentifizierung
    pub fn empfang_bestaetigen(&mut self, zaehler: u64) {
        self.receive_counter = self.receive_counter.max(zaehler.saturating_add(1));
    }
}
