//! Note and Value Commitments
//!
//! Both commitments are Pedersen-style commitments over Jubjub:
//!
//! ```text
//! NoteCommit(d, pk_d, v, rcm) = [v] G_v + [H(d || pk_d)] G_addr + [rcm] G_rcm
//! cmu                         = u-coordinate of NoteCommit (the tree leaf)
//!
//! ValueCommit(v, rcv)         = [v] V + [rcv] R
//! ```
//!
//! Value commitments are additively homomorphic under true group addition:
//!
//! ```text
//! ValueCommit(a, r1) + ValueCommit(b, r2) = ValueCommit(a + b, r1 + r2)
//! ```
//!
//! which is what the binding signature of a transaction relies on.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use ark_ec::CurveGroup;
use ark_ed_on_bls12_381::{EdwardsAffine, EdwardsProjective, Fq, Fr};
use ark_ff::Zero;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::{Address, Diversifier};
use crate::group::{self, generators};
use crate::note::NoteValue;

const NOTE_RECIPIENT_PERSONALIZATION: &str = "MeshCrypt 2024 note recipient v1";

/// Extracted note commitment `cmu` (32 bytes, canonical base field element)
///
/// This is what gets appended to the commitment tree and published in
/// output descriptions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractedNoteCommitment(pub(crate) [u8; 32]);

impl ExtractedNoteCommitment {
    /// Parse, rejecting encodings that are not canonical field elements
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_base(bytes).map(|_| Self(*bytes))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Field element view (Merkle leaf)
    pub fn to_field(&self) -> Fq {
        group::decode_base(&self.0).unwrap_or_default()
    }

    fn from_point(point: &EdwardsAffine) -> Self {
        Self(group::encode_base(&point.x))
    }
}

impl AsRef<[u8]> for ExtractedNoteCommitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ExtractedNoteCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtractedNoteCommitment({})", hex::encode(self.0))
    }
}

/// Commitment trapdoor `rcm`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NoteCommitTrapdoor(pub(crate) Fr);

impl NoteCommitTrapdoor {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(group::random_scalar(rng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_scalar(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_scalar(&self.0)
    }
}

impl fmt::Debug for NoteCommitTrapdoor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoteCommitTrapdoor(..)")
    }
}

impl Serialize for NoteCommitTrapdoor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NoteCommitTrapdoor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: [u8; 32] = Deserialize::deserialize(deserializer)?;
        Self::from_bytes(&bytes).ok_or_else(|| serde::de::Error::custom("non-canonical rcm"))
    }
}

/// `commit`: the note commitment of `(d, pk_d, v, rcm)`
///
/// Returns `None` if `d` has no diversified base.
pub fn note_commit(
    diversifier: &Diversifier,
    pk_d: &EdwardsAffine,
    value: NoteValue,
    rcm: &NoteCommitTrapdoor,
) -> Option<ExtractedNoteCommitment> {
    diversifier.g_d()?;
    Some(commit_unchecked(diversifier, pk_d, value, rcm))
}

/// Commitment to a note whose address is already known to be valid
pub(crate) fn note_commit_to(
    recipient: &Address,
    value: NoteValue,
    rcm: &NoteCommitTrapdoor,
) -> ExtractedNoteCommitment {
    commit_unchecked(recipient.diversifier(), recipient.pk_d(), value, rcm)
}

fn commit_unchecked(
    diversifier: &Diversifier,
    pk_d: &EdwardsAffine,
    value: NoteValue,
    rcm: &NoteCommitTrapdoor,
) -> ExtractedNoteCommitment {
    let g = generators();
    let recipient = group::hash_to_scalar(
        NOTE_RECIPIENT_PERSONALIZATION,
        &[&diversifier.as_bytes()[..], &group::encode_point(pk_d)[..]],
    );

    let cm = g.note_value * Fr::from(value.as_u64())
        + g.note_recipient * recipient
        + g.note_randomness * rcm.0;

    ExtractedNoteCommitment::from_point(&cm.into_affine())
}

/// Value commitment trapdoor `rcv`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ValueCommitTrapdoor(pub(crate) Fr);

impl ValueCommitTrapdoor {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(group::random_scalar(rng))
    }

    pub fn zero() -> Self {
        Self(Fr::zero())
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_scalar(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_scalar(&self.0)
    }
}

impl fmt::Debug for ValueCommitTrapdoor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueCommitTrapdoor(..)")
    }
}

impl Add for ValueCommitTrapdoor {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for ValueCommitTrapdoor {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sum for ValueCommitTrapdoor {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, x| acc + x)
    }
}

/// Homomorphic value commitment `cv`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ValueCommitment(EdwardsProjective);

impl ValueCommitment {
    /// `valueCommitment(value, blinding)`
    pub fn derive(value: NoteValue, rcv: &ValueCommitTrapdoor) -> Self {
        Self::derive_signed(i128::from(value.as_u64()), rcv)
    }

    /// Commit to a signed amount, used for the transparent value balance
    pub fn derive_signed(value: i128, rcv: &ValueCommitTrapdoor) -> Self {
        let g = generators();
        Self(g.value * group::scalar_from_i128(value) + g.value_randomness * rcv.0)
    }

    /// Identity element (commitment to zero with zero randomness)
    pub fn identity() -> Self {
        Self(EdwardsProjective::zero())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_projective(&self.0)
    }

    /// Parse, checking the point lies in the prime-order subgroup
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_point(bytes).map(|p| Self(p.into()))
    }

    pub(crate) fn point(&self) -> &EdwardsProjective {
        &self.0
    }
}

impl fmt::Debug for ValueCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueCommitment({})", hex::encode(self.to_bytes()))
    }
}

impl Add for ValueCommitment {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for ValueCommitment {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for ValueCommitment {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for ValueCommitment {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for ValueCommitment {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for ValueCommitment {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::identity(), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a ValueCommitment> for ValueCommitment {
    fn sum<I: Iterator<Item = &'a ValueCommitment>>(iter: I) -> Self {
        iter.fold(Self::identity(), |acc, x| acc + *x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn commit(
        addr: &crate::address::Address,
        value: u64,
        rcm: &NoteCommitTrapdoor,
    ) -> ExtractedNoteCommitment {
        note_commit(addr.diversifier(), addr.pk_d(), NoteValue::new(value), rcm).unwrap()
    }

    fn recipient() -> crate::address::Address {
        SpendingKey::from_bytes([1u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap()
            .address(0)
    }

    #[test]
    fn test_commitment_deterministic() {
        let addr = recipient();
        let rcm = NoteCommitTrapdoor(Fr::from(42u64));

        let c1 = commit(&addr, 1000, &rcm);
        let c2 = commit(&addr, 1000, &rcm);

        assert_eq!(c1, c2, "same inputs should produce same commitment");
    }

    #[test]
    fn test_commitment_binding_random_sampling() {
        let mut rng = StdRng::seed_from_u64(7);
        let vk = SpendingKey::from_bytes([1u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap();

        let mut seen = HashSet::new();
        for i in 0..256u32 {
            let addr = vk.address(i % 8);
            let rcm = NoteCommitTrapdoor::random(&mut rng);
            let cm = commit(&addr, u64::from(i % 5), &rcm);
            assert!(seen.insert(cm), "distinct note tuples collided");
        }
    }

    #[test]
    fn test_commitment_changes_with_every_field() {
        let vk = SpendingKey::from_bytes([1u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap();
        let a = vk.address(0);
        let b = vk.address(1);
        let rcm = NoteCommitTrapdoor(Fr::from(9u64));
        let base = commit(&a, 5, &rcm);

        assert_ne!(base, commit(&a, 6, &rcm));
        assert_ne!(base, commit(&b, 5, &rcm));
        assert_ne!(base, commit(&a, 5, &NoteCommitTrapdoor(Fr::from(10u64))));
    }

    #[test]
    fn test_invalid_diversifier_has_no_commitment() {
        let addr = recipient();
        let rcm = NoteCommitTrapdoor(Fr::from(1u64));
        let bad = (0u8..=255)
            .map(|b| Diversifier([b; 11]))
            .find(|d| d.g_d().is_none())
            .expect("half of all diversifiers are invalid");
        assert!(note_commit(&bad, addr.pk_d(), NoteValue::new(1), &rcm).is_none());
    }

    /// Bit frequencies of commitments to 0 and to a large value must both sit
    /// near one half: the commitment bytes carry no signal about the value.
    #[test]
    fn test_commitment_hiding_bit_distribution() {
        let mut rng = StdRng::seed_from_u64(99);
        let addr = recipient();
        const SAMPLES: usize = 400;

        let ones = |value: u64, rng: &mut StdRng| -> f64 {
            let mut count = 0u32;
            for _ in 0..SAMPLES {
                let rcm = NoteCommitTrapdoor::random(rng);
                let cm = commit(&addr, value, &rcm);
                // top byte of a field element is biased, skip it
                count += cm.0[..31].iter().map(|b| b.count_ones()).sum::<u32>();
            }
            f64::from(count) / (SAMPLES as f64 * 31.0 * 8.0)
        };

        let zero_freq = ones(0, &mut rng);
        let big_freq = ones(1_000_000_000, &mut rng);

        assert!((zero_freq - 0.5).abs() < 0.02, "{zero_freq}");
        assert!((big_freq - 0.5).abs() < 0.02, "{big_freq}");
        assert!((zero_freq - big_freq).abs() < 0.02);
    }

    #[test]
    fn test_extracted_commitment_rejects_non_canonical() {
        assert!(ExtractedNoteCommitment::from_bytes(&[0xffu8; 32]).is_none());
        assert!(ExtractedNoteCommitment::from_bytes(&[0x01u8; 32]).is_some());
    }

    #[test]
    fn test_value_commitment_balance() {
        let mut rng = StdRng::seed_from_u64(3);
        let r1 = ValueCommitTrapdoor::random(&mut rng);
        let r2 = ValueCommitTrapdoor::random(&mut rng);

        let inputs = ValueCommitment::derive(NoteValue::new(5000), &r1)
            + ValueCommitment::derive(NoteValue::new(3000), &r2);

        let r3 = ValueCommitTrapdoor::random(&mut rng);
        let r4 = (r1 + r2) - r3;
        let outputs = ValueCommitment::derive(NoteValue::new(7000), &r3)
            + ValueCommitment::derive(NoteValue::new(1000), &r4);

        assert_eq!(inputs, outputs);
        assert_eq!(
            ValueCommitment::from_bytes(&inputs.to_bytes()),
            Some(inputs)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn value_commitment_is_homomorphic(
            a in 0u64..(1 << 62),
            b in 0u64..(1 << 62),
            r1 in any::<[u8; 32]>(),
            r2 in any::<[u8; 32]>(),
        ) {
            use ark_ff::PrimeField;
            let r1 = ValueCommitTrapdoor(Fr::from_le_bytes_mod_order(&r1));
            let r2 = ValueCommitTrapdoor(Fr::from_le_bytes_mod_order(&r2));

            let lhs = ValueCommitment::derive(NoteValue::new(a), &r1)
                + ValueCommitment::derive(NoteValue::new(b), &r2);
            let rhs = ValueCommitment::derive(NoteValue::new(a + b), &(r1 + r2));

            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn signed_commitments_cancel(v in any::<i64>(), r in any::<[u8; 32]>()) {
            use ark_ff::PrimeField;
            let rcv = ValueCommitTrapdoor(Fr::from_le_bytes_mod_order(&r));
            let pos = ValueCommitment::derive_signed(i128::from(v), &rcv);
            let neg = ValueCommitment::derive_signed(-i128::from(v), &(ValueCommitTrapdoor::zero() - rcv));
            prop_assert_eq!(pos + neg, ValueCommitment::identity());
        }
    }
}
