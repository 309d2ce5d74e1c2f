//! Generic Pedersen Commitments
//!
//! Confidential amounts for transparent-chain transfers, outside the note
//! model:
//!
//! ```text
//! C(v, b) = [v] G_p + [b] H_p
//! C(v1, b1) + C(v2, b2) = C(v1 + v2, b1 + b2)
//! ```
//!
//! The creator of a commitment keeps its opening `(v, b)`; a commitment
//! received from someone else carries only the point.

use std::fmt;
use std::ops::{Add, Sub};

use ark_ed_on_bls12_381::{EdwardsProjective, Fr};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::group::{self, generators};

/// Blinding factor of a Pedersen commitment
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Blinding(pub(crate) Fr);

impl Blinding {
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

impl Add for Blinding {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Blinding {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Debug for Blinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Blinding(..)")
    }
}

/// A Pedersen commitment with optional opening
#[derive(Clone, Copy)]
pub struct PedersenCommitment {
    point: EdwardsProjective,
    /// The committed value (private, only known to creator)
    pub value: Option<u64>,
    /// The blinding factor (private, only known to creator)
    pub blinding: Option<Blinding>,
}

impl PedersenCommitment {
    /// Commit to `value`, sampling a blinding factor if none is given
    pub fn commit<R: RngCore + CryptoRng>(
        value: u64,
        blinding: Option<Blinding>,
        rng: &mut R,
    ) -> Self {
        let blinding = blinding.unwrap_or_else(|| Blinding::random(rng));
        let g = generators();
        Self {
            point: g.pedersen_value * Fr::from(value) + g.pedersen_blinding * blinding.0,
            value: Some(value),
            blinding: Some(blinding),
        }
    }

    /// Check the commitment opens to `value` under its own blinding factor
    ///
    /// Always false for a commitment whose blinding is unknown.
    pub fn verify(commitment: &Self, value: u64) -> bool {
        match commitment.blinding {
            Some(blinding) => Self::verify_opening(commitment, value, &blinding),
            None => false,
        }
    }

    /// Check an explicit opening `(value, blinding)`
    pub fn verify_opening(commitment: &Self, value: u64, blinding: &Blinding) -> bool {
        let g = generators();
        commitment.point == g.pedersen_value * Fr::from(value) + g.pedersen_blinding * blinding.0
    }

    /// Homomorphic addition; openings combine only when both are known
    pub fn add(c1: &Self, c2: &Self) -> Self {
        Self {
            point: c1.point + c2.point,
            value: match (c1.value, c2.value) {
                (Some(v1), Some(v2)) => v1.checked_add(v2),
                _ => None,
            },
            blinding: match (c1.blinding, c2.blinding) {
                (Some(b1), Some(b2)) => Some(b1 + b2),
                _ => None,
            },
        }
    }

    /// Homomorphic subtraction; a negative value difference is dropped
    pub fn subtract(c1: &Self, c2: &Self) -> Self {
        Self {
            point: c1.point - c2.point,
            value: match (c1.value, c2.value) {
                (Some(v1), Some(v2)) => v1.checked_sub(v2),
                _ => None,
            },
            blinding: match (c1.blinding, c2.blinding) {
                (Some(b1), Some(b2)) => Some(b1 - b2),
                _ => None,
            },
        }
    }

    /// Commitment received from others (no opening)
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_point(bytes).map(|p| Self {
            point: p.into(),
            value: None,
            blinding: None,
        })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_projective(&self.point)
    }
}

impl PartialEq for PedersenCommitment {
    fn eq(&self, other: &Self) -> bool {
        self.point == other.point
    }
}

impl Eq for PedersenCommitment {}

impl fmt::Debug for PedersenCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PedersenCommitment({})", hex::encode(self.to_bytes()))
    }
}

/// Only the point is serialized; the opening stays with its creator
impl Serialize for PedersenCommitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PedersenCommitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: [u8; 32] = Deserialize::deserialize(deserializer)?;
        Self::from_bytes(&bytes).ok_or_else(|| serde::de::Error::custom("invalid commitment point"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_commit_and_verify() {
        let mut rng = StdRng::seed_from_u64(11);
        let c = PedersenCommitment::commit(1000, None, &mut rng);

        assert!(PedersenCommitment::verify(&c, 1000));
        assert!(!PedersenCommitment::verify(&c, 1001));

        let other = Blinding::random(&mut rng);
        assert!(!PedersenCommitment::verify_opening(&c, 1000, &other));
    }

    #[test]
    fn test_homomorphic_addition() {
        let mut rng = StdRng::seed_from_u64(12);
        let c1 = PedersenCommitment::commit(100, None, &mut rng);
        let c2 = PedersenCommitment::commit(200, None, &mut rng);

        let sum = PedersenCommitment::add(&c1, &c2);
        assert_eq!(sum.value, Some(300));
        assert!(PedersenCommitment::verify(&sum, 300));
    }

    #[test]
    fn test_homomorphic_subtraction() {
        let mut rng = StdRng::seed_from_u64(13);
        let c1 = PedersenCommitment::commit(500, None, &mut rng);
        let c2 = PedersenCommitment::commit(200, None, &mut rng);

        let diff = PedersenCommitment::subtract(&c1, &c2);
        assert!(PedersenCommitment::verify(&diff, 300));

        // Negative difference: point is still well defined, value is not
        let neg = PedersenCommitment::subtract(&c2, &c1);
        assert_eq!(neg.value, None);
        assert!(neg.blinding.is_some());
    }

    #[test]
    fn test_received_commitment_has_no_opening() {
        let mut rng = StdRng::seed_from_u64(14);
        let c = PedersenCommitment::commit(12345, None, &mut rng);

        let received = PedersenCommitment::from_bytes(&c.to_bytes()).unwrap();
        assert_eq!(received, c);
        assert!(!PedersenCommitment::verify(&received, 12345));
        assert!(PedersenCommitment::verify_opening(
            &received,
            12345,
            &c.blinding.unwrap()
        ));

        let combined = PedersenCommitment::add(&received, &c);
        assert_eq!(combined.value, None);
    }

    #[test]
    fn test_transaction_balance_equation() {
        let mut rng = StdRng::seed_from_u64(15);
        let input1 = PedersenCommitment::commit(5000, None, &mut rng);
        let input2 = PedersenCommitment::commit(3000, None, &mut rng);
        let total = input1.blinding.unwrap() + input2.blinding.unwrap();

        let b3 = Blinding::random(&mut rng);
        let output1 = PedersenCommitment::commit(7000, Some(b3), &mut rng);
        let output2 = PedersenCommitment::commit(1000, Some(total - b3), &mut rng);

        assert_eq!(
            PedersenCommitment::add(&input1, &input2),
            PedersenCommitment::add(&output1, &output2)
        );
    }
}
