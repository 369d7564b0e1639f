//! E2E Verschluesselung (End-to-End)
//!
//! Peer <-> Peer Verschluesselung. Das Relay sieht nur oeffentliche
//! Schluessel und kann den Inhalt des Datenkanals nicht entschluesseln.
//!
//! ## Ablauf
//! 1. Bei Raum-Bereitschaft: X25519 Key Exchange ueber das Signaling
//! 2. HKDF-SHA256 leitet den Session-Schluessel ab (Salt = Krypto-Session-ID)
//! 3. Jede Nachricht wird mit AES-256-GCM verschluesselt, die Nonce kommt aus
//!    Absender-Rolle und Zaehler
//! 4. Beim Verlassen oder Verbindungsabbruch wird alles Material verworfen

pub mod cipher;
pub mod decrypt;
pub mod encrypt;
pub mod key_exchange;
pub mod key_store;

pub use cipher::SessionCipher;
pub use decrypt::{decrypt, version_pruefen};
pub use encrypt::{encrypt, nonce_ableiten};
pub use key_exchange::{
    derive_session_key, generate_keypair, hkdf_derive, peer_key_pruefen, KeyExchange, LocalKeypair,
    SharedKeyHandle, SCHLUESSEL_LAENGE,
};
pub use key_store::{KeySlot, MemoryKeyStore, SecureKeyStore};
