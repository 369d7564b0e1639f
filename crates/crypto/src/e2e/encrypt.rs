//! Umschlag-Verschluesselung
//!
//! Verschluesselt einen Klartext mit dem Session-Schluessel (AES-256-GCM).
//!
//! ## Nonce-Aufbau
//! ```text
//! [richtung(4)] [zaehler(8, big-endian)]
//! ```
//! Die Richtung kommt aus der Rolle des Absenders. Beide Peers zaehlen ab 0,
//! die Praefixe halten ihre Nonce-Raeume trotzdem getrennt.
//!
//! ## AAD (Authenticated Additional Data)
//! ```text
//! [version(1)] [zaehler(8)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tandem_core::Role;
use tandem_protocol::{Envelope, PROTOCOL_VERSION, TAG_LAENGE};

use crate::e2e::key_exchange::SCHLUESSEL_LAENGE;
use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretBytes;

/// Laenge der AES-GCM Nonce
pub const NONCE_LAENGE: usize = 12;

/// Nonce-Praefix pro Absender-Rolle
pub(crate) fn richtungs_praefix(absender: Role) -> [u8; 4] {
    match absender {
        Role::Initiator => *b"INIT",
        Role::Responder => *b"RESP",
    }
}

/// Leitet die Nonce aus Absender-Rolle und Zaehler ab
pub fn nonce_ableiten(absender: Role, zaehler: u64) -> [u8; NONCE_LAENGE] {
    let mut nonce = [0u8; NONCE_LAENGE];
    nonce[..4].copy_from_slice(&richtungs_praefix(absender));
    nonce[4..].copy_from_slice(&zaehler.to_be_bytes());
    nonce
}

/// Baut die AAD aus Version und Zaehler
pub fn aad_bilden(version: u8, zaehler: u64) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[0] = version;
    aad[1..].copy_from_slice(&zaehler.to_be_bytes());
    aad
}

pub(crate) fn cipher_aus_schluessel(key: &SecretBytes) -> CryptoResult<Aes256Gcm> {
    if key.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: key.len(),
        });
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())))
}

/// Verschluesselt einen Klartext zu einem Umschlag
///
/// # Parameter
/// - `plaintext`: kodierter Payload
/// - `key`: Session-Schluessel (32 Bytes)
/// - `counter`: aktueller Sende-Zaehler, darf pro Schluessel nie wiederkehren
/// - `sender`: eigene Rolle
pub fn encrypt(
    plaintext: &[u8],
    key: &SecretBytes,
    counter: u64,
    sender: Role,
) -> CryptoResult<Envelope> {
    let cipher = cipher_aus_schluessel(key)?;
    let nonce = nonce_ableiten(sender, counter);
    let aad = aad_bilden(PROTOCOL_VERSION, counter);

    let mut ciphertext = cipher
        .encrypt(
            AesNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    // aes-gcm haengt den Tag an, im Umschlag steht er separat
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LAENGE);

    Ok(Envelope {
        v: PROTOCOL_VERSION,
        c: counter,
        ct: BASE64.encode(&ciphertext),
        t: BASE64.encode(&tag),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretBytes {
        SecretBytes::new(vec![0x42; 32])
    }

    #[test]
    fn umschlag_felder() {
        let env = encrypt(b"Hallo", &key(), 5, Role::Initiator).unwrap();
        assert_eq!(env.v, PROTOCOL_VERSION);
        assert_eq!(env.c, 5);
        assert_eq!(BASE64.decode(&env.t).unwrap().len(), TAG_LAENGE);
        assert_eq!(BASE64.decode(&env.ct).unwrap().len(), 5);
    }

    #[test]
    fn nonce_aufbau() {
        let nonce = nonce_ableiten(Role::Responder, 0x0102);
        assert_eq!(&nonce[..4], b"RESP");
        assert_eq!(&nonce[4..], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn rollen_haben_getrennte_nonces() {
        assert_ne!(
            nonce_ableiten(Role::Initiator, 0),
            nonce_ableiten(Role::Responder, 0)
        );
        let a = encrypt(b"gleich", &key(), 0, Role::Initiator).unwrap();
        let b = encrypt(b"gleich", &key(), 0, Role::Responder).unwrap();
        assert_ne!(a.ct, b.ct);
    }

    #[test]
    fn falsche_schluessel_laenge() {
        let err = encrypt(b"x", &SecretBytes::new(vec![1; 16]), 0, Role::Initiator).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::UngueltigeSchluesselLaenge {
                erwartet: 32,
                erhalten: 16
            }
        ));
    }

    #[test]
    fn leerer_klartext() {
        let env = encrypt(b"", &key(), 1, Role::Initiator).unwrap();
        assert!(env.ct.is_empty());
    }
}
