//! # tandem-crypto
//!
//! Ende-zu-Ende Verschluesselung fuer Tandem.
//!
//! ## Module
//! - `e2e` - Key Exchange, Umschlag-Verschluesselung, Schluessel-Speicher
//! - `types` - Gemeinsame Typen (SecretBytes, CryptoSessionId)
//! - `error` - Fehlertypen

pub mod e2e;
pub mod error;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use types::{CryptoSessionId, SecretBytes};

pub use e2e::{
    decrypt, derive_session_key, encrypt, generate_keypair, hkdf_derive, peer_key_pruefen,
    version_pruefen, KeyExchange, KeySlot, LocalKeypair, MemoryKeyStore, SecureKeyStore,
    SessionCipher, SharedKeyHandle, SCHLUESSEL_LAENGE,
};
