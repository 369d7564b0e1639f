//! Umschlag-Entschluesselung
//!
//! Die Versionspruefung kommt vor jeder anderen Arbeit. Danach werden
//! Base64-Felder und Tag-Laenge geprueft, erst dann wird entschluesselt.

use aes_gcm::{
    aead::{Aead, Payload},
    Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tandem_core::Role;
use tandem_protocol::{Envelope, TAG_LAENGE};

use crate::e2e::encrypt::{aad_bilden, cipher_aus_schluessel, nonce_ableiten};
use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretBytes;

/// Prueft nur die Version eines Umschlags
pub fn version_pruefen(envelope: &Envelope) -> CryptoResult<()> {
    if envelope.version_unterstuetzt() {
        Ok(())
    } else {
        Err(CryptoError::UnsupportedEnvelopeVersion {
            version: envelope.v,
        })
    }
}

/// Entschluesselt einen Umschlag
///
/// `sender` ist die Rolle der Gegenseite (bestimmt das Nonce-Praefix).
pub fn decrypt(envelope: &Envelope, key: &SecretBytes, sender: Role) -> CryptoResult<Vec<u8>> {
    version_pruefen(envelope)?;

    let mut daten = BASE64.decode(&envelope.ct)?;
    let tag = BASE64.decode(&envelope.t)?;
    if tag.len() != TAG_LAENGE {
        return Err(CryptoError::UngueltigerUmschlag(format!(
            "Tag hat {} Bytes statt {TAG_LAENGE}",
            tag.len()
        )));
    }
    daten.extend_from_slice(&tag);

    let cipher = cipher_aus_schluessel(key)?;
    let nonce = nonce_ableiten(sender, envelope.c);
    let aad = aad_bilden(envelope.v, envelope.c);

    cipher
        .decrypt(
            AesNonce::from_slice(&nonce),
            Payload {
                msg: &daten,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
