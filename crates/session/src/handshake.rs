//! Zustand eines laufenden Schluessel-Austauschs
//!
//! ```text
//! Initiator                          Responder
//!   key_exchange(pub_i)  ------->
//!                        <-------    key_exchange(pub_r)
//!   ableiten                         ableiten
//!                        <-------    key_exchange_complete
//!   bereit                           bereit
//! ```
//!
//! Der Responder schliesst direkt nach seiner Ableitung ab. Der Initiator
//! braucht beides: eigene Ableitung und das `key_exchange_complete` der
//! Gegenseite, in beliebiger Reihenfolge.
//!
//! Jeder Neustart im Raum zaehlt die Runde hoch. Nach der Ableitung startet
//! nur ein Peer-Schluessel mit hoeherer Runde neu; ein Abschluss zaehlt nur
//! fuer die eigene Runde des Initiators.

use std::time::Instant;

use tandem_core::Role;

/// Welche Rolle gilt: die gespeicherte gewinnt immer gegen die des Relays
pub fn rolle_bestimmen(gespeichert: Option<Role>, relay: Option<Role>) -> Option<Role> {
    gespeichert.or(relay)
}

/// Was nach einem Schritt zu tun ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fortschritt {
    /// Weiter warten
    Warten,
    /// Responder: `key_exchange_complete` senden, dann bereit
    AbschlussSenden,
    /// Handshake fertig
    Bereit,
    /// Abschluss bestaetigt eine andere Runde und wird ignoriert
    Veraltet,
}

/// Oeffentlicher Schluessel der Gegenseite samt ihrer Handshake-Runde
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAngebot {
    pub schluessel: Vec<u8>,
    pub runde: u32,
}

/// Wie ein eingehender Peer-Schluessel behandelt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Einordnung {
    /// Eigenes Paar fehlt noch oder Ableitung laeuft
    Puffern,
    Duplikat,
    Ableiten,
    /// Gegenseite hat neu gestartet, eigener Handshake startet ebenfalls neu
    Neustart,
    /// Alte oder wiederholte Runde, wird verworfen
    Veraltet,
}

#[derive(Debug)]
pub struct HandshakeState {
    rolle: Role,
    /// Eigene Runde, geht mit `key_exchange` raus
    runde: u32,
    gestartet: Instant,
    /// Oeffentlicher Schluessel ist verschickt
    schluessel_gesendet: bool,
    /// Peer-Schluessel mit dem gerade abgeleitet wird oder wurde
    peer: Option<PeerAngebot>,
    ableitung_laeuft: bool,
    abgeleitet: bool,
    /// Initiator: Runde die das `key_exchange_complete` der Gegenseite bestaetigt
    abschluss_runde: Option<u32>,
}

impl HandshakeState {
    pub fn neu(rolle: Role, runde: u32) -> Self {
        Self {
            rolle,
            runde,
            gestartet: Instant::now(),
            schluessel_gesendet: false,
            peer: None,
            ableitung_laeuft: false,
            abgeleitet: false,
            abschluss_runde: None,
        }
    }

    pub fn rolle(&self) -> Role {
        self.rolle
    }

    pub fn runde(&self) -> u32 {
        self.runde
    }

    /// Runde des Peer-Schluessels der verwendet wird
    pub fn peer_runde(&self) -> Option<u32> {
        self.peer.as_ref().map(|p| p.runde)
    }

    pub fn gestartet(&self) -> Instant {
        self.gestartet
    }

    pub fn schluessel_gesendet(&mut self) {
        self.schluessel_gesendet = true;
    }

    /// Ob ein Peer-Schluessel jetzt verarbeitet werden kann
    pub fn bereit_fuer_peer_schluessel(&self) -> bool {
        self.schluessel_gesendet && !self.ableitung_laeuft && !self.abgeleitet
    }

    pub fn ableitung_gestartet(&mut self, angebot: PeerAngebot) {
        self.peer = Some(angebot);
        self.ableitung_laeuft = true;
    }

    pub fn ableitung_laeuft(&self) -> bool {
        self.ableitung_laeuft
    }

    pub fn ist_abgeleitet(&self) -> bool {
        self.abgeleitet
    }

    /// Ob dieser Schluessel der bereits verwendete ist (Duplikat)
    pub fn ist_bekannter_schluessel(&self, schluessel: &[u8]) -> bool {
        self.peer.as_ref().map(|p| p.schluessel.as_slice()) == Some(schluessel)
    }

    /// Nur eine hoehere Runde als die verwendete ersetzt einen Peer-Schluessel
    pub fn ist_neuere_runde(&self, angebot: &PeerAngebot) -> bool {
        self.peer_runde().map_or(true, |runde| angebot.runde > runde)
    }

    pub fn einordnen(&self, angebot: &PeerAngebot) -> Einordnung {
        if self.ist_bekannter_schluessel(&angebot.schluessel) {
            return Einordnung::Duplikat;
        }
        if self.bereit_fuer_peer_schluessel() {
            return Einordnung::Ableiten;
        }
        if !self.abgeleitet && !self.ableitung_laeuft {
            return Einordnung::Puffern;
        }
        if !self.ist_neuere_runde(angebot) {
            return Einordnung::Veraltet;
        }
        if self.abgeleitet {
            Einordnung::Neustart
        } else {
            Einordnung::Puffern
        }
    }

    pub fn abgeleitet(&mut self) -> Fortschritt {
        self.ableitung_laeuft = false;
        self.abgeleitet = true;
        match self.rolle {
            Role::Responder => Fortschritt::AbschlussSenden,
            Role::Initiator if self.abschluss_runde == Some(self.runde) => Fortschritt::Bereit,
            Role::Initiator => Fortschritt::Warten,
        }
    }

    /// `key_exchange_complete` der Gegenseite fuer die eigene Runde `runde`
    pub fn abschluss_empfangen(&mut self, runde: u32) -> Fortschritt {
        if self.rolle == Role::Responder {
            return Fortschritt::Warten;
        }
        if runde != self.runde {
            return Fortschritt::Veraltet;
        }
        self.abschluss_runde = Some(runde);
        if self.abgeleitet {
            Fortschritt::Bereit
        } else {
            Fortschritt::Warten
        }
    }
}
