//! Stealth Addresses
//!
//! One-time addresses for transparent chains, derived by ECDH on Jubjub:
//!
//! ```text
//! Sender:    e random, E = [e] G, S = [e] P
//!            stealth = [H(S)] G + P
//! Recipient: S = [p] E, check stealth == [H(S)] G + P
//!            stealth_priv = H(S) + p   (mod r)
//! ```
//!
//! Only the recipient can link a stealth address to its long-term key, and
//! only the recipient can spend from it.

use std::fmt;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr};
use ark_ff::Zero;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::group;

const SHARED_SECRET_PERSONALIZATION: &str = "MeshCrypt 2024 stealth shared secret v1";

fn base() -> EdwardsAffine {
    EdwardsAffine::generator()
}

/// Stealth public key `P = [p] G`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StealthPublicKey(EdwardsAffine);

impl StealthPublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_nonzero_point(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_point(&self.0)
    }
}

impl fmt::Debug for StealthPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthPublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// Stealth private scalar, wiped on drop
#[derive(Clone, PartialEq, Eq)]
pub struct StealthSecretKey(Fr);

impl StealthSecretKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let s = group::random_scalar(rng);
            if !s.is_zero() {
                return Self(s);
            }
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_scalar(bytes)
            .filter(|s| !s.is_zero())
            .map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_scalar(&self.0)
    }

    pub fn public_key(&self) -> StealthPublicKey {
        StealthPublicKey((base() * self.0).into_affine())
    }
}

impl Drop for StealthSecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for StealthSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StealthSecretKey(..)")
    }
}

/// Long-term recipient keypair
#[derive(Debug, Clone)]
pub struct StealthKeypair {
    pub private: StealthSecretKey,
    pub public: StealthPublicKey,
}

impl StealthKeypair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private = StealthSecretKey::random(rng);
        let public = private.public_key();
        Self { private, public }
    }
}

/// Sender-side result of deriving a one-time address
#[derive(Debug, Clone)]
pub struct StealthPayment {
    pub stealth_address: StealthPublicKey,
    pub ephemeral_private: StealthSecretKey,
    pub ephemeral_public: StealthPublicKey,
    /// Compressed `S`
    pub shared_secret: [u8; 32],
}

impl StealthPayment {
    /// Derive a one-time address paying `recipient`
    pub fn generate<R: RngCore + CryptoRng>(recipient: &StealthPublicKey, rng: &mut R) -> Self {
        let ephemeral_private = StealthSecretKey::random(rng);
        let ephemeral_public = ephemeral_private.public_key();

        let shared = (recipient.0 * ephemeral_private.0).into_affine();
        let stealth = base() * tweak(&shared) + recipient.0;

        Self {
            stealth_address: StealthPublicKey(stealth.into_affine()),
            ephemeral_private,
            ephemeral_public,
            shared_secret: group::encode_point(&shared),
        }
    }
}

/// Recipient-side scan result
#[derive(Debug, Clone)]
pub struct StealthScan {
    pub belongs_to_recipient: bool,
    /// Spending key of the stealth address, present only on a match
    pub stealth_private: Option<StealthSecretKey>,
}

/// Check whether `stealth_address` was derived for `recipient_public`
pub fn scan(
    ephemeral_public: &StealthPublicKey,
    stealth_address: &StealthPublicKey,
    recipient_private: &StealthSecretKey,
    recipient_public: &StealthPublicKey,
) -> StealthScan {
    let shared = (ephemeral_public.0 * recipient_private.0).into_affine();
    let h = tweak(&shared);
    let expected = (base() * h + recipient_public.0).into_affine();

    if expected == stealth_address.0 {
        StealthScan {
            belongs_to_recipient: true,
            stealth_private: Some(StealthSecretKey(h + recipient_private.0)),
        }
    } else {
        StealthScan {
            belongs_to_recipient: false,
            stealth_private: None,
        }
    }
}

/// `H(S)` reduced into the scalar field
fn tweak(shared: &EdwardsAffine) -> Fr {
    group::hash_to_scalar(SHARED_SECRET_PERSONALIZATION, &[&group::encode_point(shared)[..]])
}
