//! Nullifiers
//!
//! Implements nullifier derivation for double-spend prevention.
//!
//! ```text
//! Nullifier = PRF_nk(rho)
//! ```
//!
//! `rho` travels inside the note plaintext, so every party that can open a
//! note and holds `nk` reconstructs the same nullifier. Once a nullifier is
//! published, the corresponding note cannot be spent again, and the nullifier
//! itself reveals nothing about which commitment it spends.

use std::fmt;

use ark_ec::AffineRepr;
use ark_ed_on_bls12_381::EdwardsAffine;
use ark_ff::Zero;
use serde::{Deserialize, Serialize};

use crate::group;
use crate::note::Rho;

const NULLIFIER_PERSONALIZATION: &str = "MeshCrypt 2024 nullifier PRF v1";

/// A nullifier (32 bytes) - unique tag for a spent note
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    /// A pure function of `(nk, rho)`
    pub fn derive(nk: &NullifierKey, rho: &Rho) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(NULLIFIER_PERSONALIZATION);
        hasher.update(&nk.to_bytes());
        hasher.update(rho.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", hex::encode(self.0))
    }
}

/// Nullifier deriving key `nk = [nsk] G_nf`
///
/// Part of the viewing key: it lets a viewer recognise spends of its notes
/// but does not authorize spending.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NullifierKey(EdwardsAffine);

impl NullifierKey {
    pub(crate) fn from_point(point: EdwardsAffine) -> Self {
        Self(point)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_point(bytes)
            .filter(|p| !p.into_group().is_zero())
            .map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_point(&self.0)
    }

    pub fn point(&self) -> &EdwardsAffine {
        &self.0
    }
}

impl fmt::Debug for NullifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullifierKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::collections::HashSet;

    fn nk(seed: u8) -> NullifierKey {
        *SpendingKey::from_bytes([seed; 32])
            .unwrap()
            .viewing_key()
            .unwrap()
            .nk()
    }

    #[test]
    fn test_nullifier_deterministic() {
        let key = nk(1);
        let rho = Rho([2u8; 32]);

        let n1 = Nullifier::derive(&key, &rho);
        let n2 = Nullifier::derive(&key, &rho);

        assert_eq!(n1, n2, "same inputs should produce same nullifier");
    }

    #[test]
    fn test_nullifier_requires_key() {
        let rho = Rho([3u8; 32]);

        let n1 = Nullifier::derive(&nk(1), &rho);
        let n2 = Nullifier::derive(&nk(2), &rho);

        assert_ne!(n1, n2, "different keys should produce different nullifiers");
    }

    #[test]
    fn test_no_collisions_in_random_trials() {
        let key = nk(7);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut seen = HashSet::with_capacity(100_000);

        for _ in 0..100_000 {
            let mut rho = [0u8; 32];
            rng.fill_bytes(&mut rho);
            assert!(seen.insert(Nullifier::derive(&key, &Rho(rho))));
        }
    }

    #[test]
    fn test_nullifier_key_encoding() {
        let key = nk(4);
        assert_eq!(NullifierKey::from_bytes(&key.to_bytes()), Some(key));
        assert_eq!(NullifierKey::from_bytes(&[0u8; 32]), None);
    }
}
