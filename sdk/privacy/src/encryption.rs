//! Note Encryption
//!
//! Encrypts note plaintexts to the recipient's diversified address and lets
//! the sender recover what they sent with their outgoing viewing key.
//!
//! ```text
//! Sender:
//! 1. epk = [esk] g_d
//! 2. shared = [esk] pk_d
//! 3. K = KDF(shared, epk)
//! 4. enc_ciphertext = ChaCha20-Poly1305(K, 0, note plaintext)
//! 5. ock = PRF_ock(ovk, cv, cmu, epk)
//! 6. out_ciphertext = ChaCha20-Poly1305(ock, 0, pk_d || esk)
//!
//! Recipient:
//!    shared = [ivk] epk = [ivk·esk] g_d = [esk] pk_d
//! ```
//!
//! Every key is used for exactly one message, so a zero nonce is safe.

use std::fmt;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr};
use ark_ff::Zero;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::commitment::{ExtractedNoteCommitment, ValueCommitment};
use crate::error::{Error, Result};
use crate::group;
use crate::keys::{IncomingViewingKey, OutgoingViewingKey};
use crate::note::{NOTE_PLAINTEXT_SIZE, NotePlaintext, ShieldedNote};

const KDF_PERSONALIZATION: &str = "MeshCrypt 2024 note KDF v1";
const OCK_PERSONALIZATION: &str = "MeshCrypt 2024 outgoing cipher key v1";

pub const AEAD_TAG_SIZE: usize = 16;
pub const ENC_CIPHERTEXT_SIZE: usize = NOTE_PLAINTEXT_SIZE + AEAD_TAG_SIZE;
/// `pk_d || esk`
pub const OUT_PLAINTEXT_SIZE: usize = 32 + 32;
pub const OUT_CIPHERTEXT_SIZE: usize = OUT_PLAINTEXT_SIZE + AEAD_TAG_SIZE;

/// The public parts of an output needed for decryption
pub trait ShieldedOutput {
    fn ephemeral_key(&self) -> &[u8; 32];
    fn cmu(&self) -> &ExtractedNoteCommitment;
    fn enc_ciphertext(&self) -> &[u8];
    fn out_ciphertext(&self) -> &[u8];
}

/// Ephemeral secret `esk`, fresh per output
#[derive(Clone)]
pub struct EphemeralSecretKey(pub(crate) Fr);

impl EphemeralSecretKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let esk = group::random_scalar(rng);
            if !esk.is_zero() {
                return Self(esk);
            }
        }
    }
}

impl Drop for EphemeralSecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EphemeralSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralSecretKey(..)")
    }
}

/// Ciphertexts produced for one output
#[derive(Clone, PartialEq, Eq)]
pub struct NoteCiphertext {
    pub epk: [u8; 32],
    pub cmu: ExtractedNoteCommitment,
    pub enc_ciphertext: [u8; ENC_CIPHERTEXT_SIZE],
    pub out_ciphertext: [u8; OUT_CIPHERTEXT_SIZE],
}

impl fmt::Debug for NoteCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteCiphertext")
            .field("epk", &hex::encode(self.epk))
            .field("cmu", &self.cmu)
            .finish_non_exhaustive()
    }
}

impl ShieldedOutput for NoteCiphertext {
    fn ephemeral_key(&self) -> &[u8; 32] {
        &self.epk
    }

    fn cmu(&self) -> &ExtractedNoteCommitment {
        &self.cmu
    }

    fn enc_ciphertext(&self) -> &[u8] {
        &self.enc_ciphertext
    }

    fn out_ciphertext(&self) -> &[u8] {
        &self.out_ciphertext
    }
}

/// Symmetric key for the note ciphertext
fn kdf(shared: &EdwardsAffine, epk: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_PERSONALIZATION);
    hasher.update(&group::encode_point(shared));
    hasher.update(epk);
    *hasher.finalize().as_bytes()
}

/// Symmetric key for the outgoing ciphertext
fn prf_ock(
    ovk: &OutgoingViewingKey,
    cv: &ValueCommitment,
    cmu: &ExtractedNoteCommitment,
    epk: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(OCK_PERSONALIZATION);
    hasher.update(&ovk.0);
    hasher.update(&cv.to_bytes());
    hasher.update(cmu.as_bytes());
    hasher.update(epk);
    *hasher.finalize().as_bytes()
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
        .map_err(|_| Error::Encryption)
}

fn open(key: &[u8; 32], ciphertext: &[u8]) -> Option<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(&[0u8; 12]), ciphertext)
        .ok()
}

/// Encrypt `note` to its recipient and to the sender's `ovk`
pub fn encrypt_note(
    note: &ShieldedNote,
    esk: &EphemeralSecretKey,
    ovk: &OutgoingViewingKey,
    cv: &ValueCommitment,
) -> Result<NoteCiphertext> {
    let g_d = note
        .recipient
        .g_d()
        .ok_or_else(|| Error::InvalidRecipientAddress("invalid diversifier".into()))?;
    let epk = group::encode_projective(&(g_d * esk.0));
    let shared = (*note.recipient.pk_d() * esk.0).into_affine();
    let cmu = note.commitment();

    let mut key = kdf(&shared, &epk);
    let enc = seal(&key, &note.to_plaintext());
    key.zeroize();

    let mut out_plaintext = [0u8; OUT_PLAINTEXT_SIZE];
    out_plaintext[..32].copy_from_slice(&group::encode_point(note.recipient.pk_d()));
    out_plaintext[32..].copy_from_slice(&group::encode_scalar(&esk.0));
    let mut ock = prf_ock(ovk, cv, &cmu, &epk);
    let out = seal(&ock, &out_plaintext);
    ock.zeroize();
    out_plaintext.zeroize();

    Ok(NoteCiphertext {
        epk,
        cmu,
        enc_ciphertext: enc?.try_into().map_err(|_| Error::Encryption)?,
        out_ciphertext: out?.try_into().map_err(|_| Error::Encryption)?,
    })
}

/// Recover a note paid to any address of `ivk`
///
/// Returns `None` when the output is not ours or is malformed in any way.
pub fn try_decrypt<O: ShieldedOutput + ?Sized>(
    output: &O,
    ivk: &IncomingViewingKey,
) -> Option<ShieldedNote> {
    if output.enc_ciphertext().len() != ENC_CIPHERTEXT_SIZE {
        return None;
    }
    let epk_bytes = output.ephemeral_key();
    let epk = group::decode_nonzero_point(epk_bytes)?;
    let shared = (epk * *ivk.scalar()).into_affine();

    let mut key = kdf(&shared, epk_bytes);
    let plaintext = open(&key, output.enc_ciphertext());
    key.zeroize();

    let parsed = NotePlaintext::parse(&plaintext?)?;
    let g_d = parsed.diversifier.g_d()?;
    let pk_d = (g_d * *ivk.scalar()).into_affine();
    let note = parsed.into_note(pk_d)?;

    (note.commitment() == *output.cmu()).then_some(note)
}

/// Recover a sent note with the sender's outgoing viewing key
///
/// `cv` is the value commitment published alongside the output.
pub fn try_output_recovery<O: ShieldedOutput + ?Sized>(
    output: &O,
    ovk: &OutgoingViewingKey,
    cv: &ValueCommitment,
) -> Option<ShieldedNote> {
    if output.out_ciphertext().len() != OUT_CIPHERTEXT_SIZE
        || output.enc_ciphertext().len() != ENC_CIPHERTEXT_SIZE
    {
        return None;
    }
    let epk_bytes = output.ephemeral_key();

    let mut ock = prf_ock(ovk, cv, output.cmu(), epk_bytes);
    let out_plaintext = open(&ock, output.out_ciphertext());
    ock.zeroize();
    let out_plaintext = out_plaintext?;

    let pk_d = group::decode_nonzero_point(out_plaintext[..32].try_into().ok()?)?;
    let esk = EphemeralSecretKey(group::decode_scalar(out_plaintext[32..].try_into().ok()?)?);

    let shared = (pk_d * esk.0).into_affine();
    let mut key = kdf(&shared, epk_bytes);
    let plaintext = open(&key, output.enc_ciphertext());
    key.zeroize();

    let parsed = NotePlaintext::parse(&plaintext?)?;
    let g_d = parsed.diversifier.g_d()?;
    if group::encode_projective(&(g_d * esk.0)) != *epk_bytes {
        return None;
    }
    let note = parsed.into_note(pk_d)?;

    (note.commitment() == *output.cmu()).then_some(note)
}

/// Whether `epk` decodes to a usable point
pub(crate) fn is_valid_epk(epk: &[u8; 32]) -> bool {
    group::decode_point(epk).is_some_and(|p| !p.into_group().is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::ValueCommitTrapdoor;
    use crate::keys::{SpendingKey, ViewingKey};
    use crate::note::{Memo, NoteValue};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn keys(seed: u8) -> ViewingKey {
        SpendingKey::from_bytes([seed; 32])
            .unwrap()
            .viewing_key()
            .unwrap()
    }

    type Fixture = (ViewingKey, ViewingKey, ShieldedNote, ValueCommitment, NoteCiphertext);

    fn encrypted(rng: &mut StdRng) -> Fixture {
        let sender = keys(1);
        let recipient = keys(2);
        let memo = Memo::new(b"thanks".to_vec()).unwrap();
        let note = ShieldedNote::new(recipient.address(3), NoteValue::new(4200), Some(memo), rng);
        let cv = ValueCommitment::derive(note.value, &ValueCommitTrapdoor::random(rng));
        let esk = EphemeralSecretKey::random(rng);
        let ct = encrypt_note(&note, &esk, sender.ovk(), &cv).unwrap();
        (sender, recipient, note, cv, ct)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let mut rng = StdRng::seed_from_u64(41);
        let (_, recipient, note, _, ct) = encrypted(&mut rng);

        assert_eq!(ct.enc_ciphertext.len(), 612);
        assert_eq!(ct.out_ciphertext.len(), 80);

        let decrypted = try_decrypt(&ct, recipient.ivk()).unwrap();
        assert_eq!(decrypted, note);
        assert_eq!(decrypted.rho, note.rho, "rho travels in the plaintext");
    }

    #[test]
    fn test_decrypt_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(42);
        let (_, recipient, _, _, ct) = encrypted(&mut rng);

        let first = try_decrypt(&ct, recipient.ivk());
        let second = try_decrypt(&ct, recipient.ivk());
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut rng = StdRng::seed_from_u64(43);
        let (sender, _, _, _, ct) = encrypted(&mut rng);
        assert!(try_decrypt(&ct, sender.ivk()).is_none());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut rng = StdRng::seed_from_u64(44);
        let (_, recipient, _, _, mut ct) = encrypted(&mut rng);

        ct.enc_ciphertext[100] ^= 0x01;
        assert!(try_decrypt(&ct, recipient.ivk()).is_none());
    }

    #[test]
    fn test_commitment_mismatch_fails() {
        let mut rng = StdRng::seed_from_u64(45);
        let (_, recipient, _, _, mut ct) = encrypted(&mut rng);

        ct.cmu = ExtractedNoteCommitment::from_bytes(&[7u8; 32]).unwrap();
        assert!(try_decrypt(&ct, recipient.ivk()).is_none());
    }

    #[test]
    fn test_output_recovery() {
        let mut rng = StdRng::seed_from_u64(46);
        let (sender, recipient, note, cv, ct) = encrypted(&mut rng);

        let recovered = try_output_recovery(&ct, sender.ovk(), &cv).unwrap();
        assert_eq!(recovered, note);

        // Wrong ovk or cv: nothing
        assert!(try_output_recovery(&ct, recipient.ovk(), &cv).is_none());
        let other_cv = ValueCommitment::derive(note.value, &ValueCommitTrapdoor::random(&mut rng));
        assert!(try_output_recovery(&ct, sender.ovk(), &other_cv).is_none());
    }

    #[test]
    fn test_epk_validation() {
        let mut rng = StdRng::seed_from_u64(47);
        let (_, _, _, _, ct) = encrypted(&mut rng);
        assert!(is_valid_epk(&ct.epk));
        assert!(!is_valid_epk(&group::encode_projective(
            &ark_ed_on_bls12_381::EdwardsProjective::zero()
        )));
    }
}
