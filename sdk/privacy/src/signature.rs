//! Re-randomizable Schnorr Signatures over Jubjub
//!
//! RedJubjub-style signatures with two parameterizations:
//!
//! - [`SpendAuth`]: basepoint `G_spend`, keys `ask` / `ak`. Signing keys can be
//!   re-randomized (`rsk = ask + alpha`, `rk = ak + [alpha] G_spend`) so that a
//!   spend does not reveal which `ak` authorized it.
//! - [`Binding`]: basepoint `R` (the value commitment randomness base), keys
//!   `bsk = sum(rcv_in) - sum(rcv_out)` / `bvk`.
//!
//! ```text
//! sign(sk, m):   r = H*(T || m), R = [r] B, c = H*(R || vk || m), s = r + c·sk
//! verify(vk, m): [s] B == R + [c] vk
//! ```

use std::fmt;
use std::marker::PhantomData;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, EdwardsProjective, Fr};
use ark_ff::Zero;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::group::{self, generators};

const NONCE_PERSONALIZATION: &str = "MeshCrypt 2024 RedJubjub nonce v1";
const CHALLENGE_PERSONALIZATION: &str = "MeshCrypt 2024 RedJubjub challenge v1";

/// Signature size in bytes (`R || s`)
pub const SIGNATURE_SIZE: usize = 64;

/// Selects the basepoint of a signature scheme instance
pub trait SigType: Copy + fmt::Debug + Send + Sync + 'static {
    fn basepoint() -> EdwardsAffine;
}

/// Spend authorization signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendAuth;

/// Binding signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding;

impl SigType for SpendAuth {
    fn basepoint() -> EdwardsAffine {
        generators().spend_auth
    }
}

impl SigType for Binding {
    fn basepoint() -> EdwardsAffine {
        generators().value_randomness
    }
}

/// Spend authorization re-randomizer `alpha`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Randomizer(pub(crate) Fr);

impl Randomizer {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(group::random_scalar(rng))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_scalar(&self.0)
    }
}

impl fmt::Debug for Randomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Randomizer(..)")
    }
}

/// Signing key, wiped on drop
pub struct SigningKey<T: SigType> {
    sk: Fr,
    _marker: PhantomData<T>,
}

impl<T: SigType> SigningKey<T> {
    pub(crate) fn from_scalar(sk: Fr) -> Self {
        Self {
            sk,
            _marker: PhantomData,
        }
    }

    pub fn verification_key(&self) -> VerificationKey<T> {
        VerificationKey::from_point((T::basepoint() * self.sk).into_affine())
    }

    pub fn sign<R: RngCore + CryptoRng>(&self, rng: &mut R, msg: &[u8]) -> Signature<T> {
        let vk = self.verification_key().to_bytes();

        let mut t = [0u8; 80];
        rng.fill_bytes(&mut t);
        let nonce = group::hash_to_scalar(NONCE_PERSONALIZATION, &[&t[..], msg]);
        t.zeroize();

        let r_bytes = group::encode_projective(&(T::basepoint() * nonce));
        let c = challenge(&r_bytes, &vk, msg);
        let s = nonce + c * self.sk;

        Signature {
            r_bytes,
            s_bytes: group::encode_scalar(&s),
            _marker: PhantomData,
        }
    }
}

impl SigningKey<SpendAuth> {
    /// `rsk = ask + alpha`
    pub fn randomize(&self, alpha: &Randomizer) -> Self {
        Self::from_scalar(self.sk + alpha.0)
    }
}

impl<T: SigType> Drop for SigningKey<T> {
    fn drop(&mut self) {
        self.sk.zeroize();
    }
}

impl<T: SigType> fmt::Debug for SigningKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Verification key
pub struct VerificationKey<T: SigType> {
    point: EdwardsAffine,
    _marker: PhantomData<T>,
}

impl<T: SigType> VerificationKey<T> {
    pub(crate) fn from_point(point: EdwardsAffine) -> Self {
        Self {
            point,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_projective(point: &EdwardsProjective) -> Self {
        Self::from_point(point.into_affine())
    }

    /// Parse, rejecting points outside the prime-order subgroup
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_point(bytes).map(Self::from_point)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_point(&self.point)
    }

    pub(crate) fn point(&self) -> &EdwardsAffine {
        &self.point
    }

    pub fn verify(&self, msg: &[u8], sig: &Signature<T>) -> Result<()> {
        let r = group::decode_point(&sig.r_bytes).ok_or(Error::InvalidSignature)?;
        let s = group::decode_scalar(&sig.s_bytes).ok_or(Error::InvalidSignature)?;
        let c = challenge(&sig.r_bytes, &self.to_bytes(), msg);

        let lhs = T::basepoint() * s;
        let rhs = r.into_group() + self.point * c;
        if (lhs - rhs).is_zero() {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}

impl VerificationKey<SpendAuth> {
    /// `rk = ak + [alpha] G_spend`
    pub fn randomize(&self, alpha: &Randomizer) -> Self {
        Self::from_projective(&(self.point.into_group() + SpendAuth::basepoint() * alpha.0))
    }
}

impl<T: SigType> Clone for VerificationKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SigType> Copy for VerificationKey<T> {}

impl<T: SigType> PartialEq for VerificationKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.point == other.point
    }
}

impl<T: SigType> Eq for VerificationKey<T> {}

impl<T: SigType> fmt::Debug for VerificationKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationKey({})", hex::encode(self.to_bytes()))
    }
}

/// A 64-byte signature `R || s`
pub struct Signature<T: SigType> {
    r_bytes: [u8; 32],
    s_bytes: [u8; 32],
    _marker: PhantomData<T>,
}

impl<T: SigType> Signature<T> {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&bytes[..32]);
        s_bytes.copy_from_slice(&bytes[32..]);
        Self {
            r_bytes,
            s_bytes,
            _marker: PhantomData,
        }
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..32].copy_from_slice(&self.r_bytes);
        out[32..].copy_from_slice(&self.s_bytes);
        out
    }
}

impl<T: SigType> Clone for Signature<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SigType> Copy for Signature<T> {}

impl<T: SigType> PartialEq for Signature<T> {
    fn eq(&self, other: &Self) -> bool {
        self.r_bytes == other.r_bytes && self.s_bytes == other.s_bytes
    }
}

impl<T: SigType> Eq for Signature<T> {}

impl<T: SigType> fmt::Debug for Signature<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_bytes()))
    }
}

fn challenge(r_bytes: &[u8; 32], vk: &[u8; 32], msg: &[u8]) -> Fr {
    group::hash_to_scalar(CHALLENGE_PERSONALIZATION, &[&r_bytes[..], &vk[..], msg])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_sign_verify() {
        let mut rng = StdRng::seed_from_u64(31);
        let sk = SigningKey::<Binding>::from_scalar(group::random_scalar(&mut rng));
        let vk = sk.verification_key();

        let sig = sk.sign(&mut rng, b"sighash");
        vk.verify(b"sighash", &sig).unwrap();
        assert!(vk.verify(b"other", &sig).is_err());

        let restored = Signature::<Binding>::from_bytes(&sig.to_bytes());
        vk.verify(b"sighash", &restored).unwrap();
    }

    #[test]
    fn test_wrong_key_rejected() {
        let mut rng = StdRng::seed_from_u64(32);
        let sk = SigningKey::<SpendAuth>::from_scalar(group::random_scalar(&mut rng));
        let other = SigningKey::<SpendAuth>::from_scalar(group::random_scalar(&mut rng));

        let sig = sk.sign(&mut rng, b"msg");
        assert!(other.verification_key().verify(b"msg", &sig).is_err());
    }

    #[test]
    fn test_randomized_keys_agree() {
        let mut rng = StdRng::seed_from_u64(33);
        let ask = SigningKey::<SpendAuth>::from_scalar(group::random_scalar(&mut rng));
        let ak = ask.verification_key();
        let alpha = Randomizer::random(&mut rng);

        let rsk = ask.randomize(&alpha);
        let rk = ak.randomize(&alpha);
        assert_eq!(rsk.verification_key(), rk);
        assert_ne!(rk, ak);

        let sig = rsk.sign(&mut rng, b"spend");
        rk.verify(b"spend", &sig).unwrap();
        assert!(ak.verify(b"spend", &sig).is_err());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut rng = StdRng::seed_from_u64(34);
        let sk = SigningKey::<Binding>::from_scalar(group::random_scalar(&mut rng));
        let sig = sk.sign(&mut rng, b"msg");

        let mut bytes = sig.to_bytes();
        bytes[40] ^= 1;
        let tampered = Signature::<Binding>::from_bytes(&bytes);
        assert!(sk.verification_key().verify(b"msg", &tampered).is_err());
    }
}
