//! Jubjub Group Primitives
//!
//! Every curve operation in the engine runs over the prime-order subgroup of
//! Jubjub (`ark-ed-on-bls12-381`). Fixed generators are obtained with a group
//! hash so that nobody knows a discrete log relation between them.
//!
//! ```text
//! GroupHash(pers, m) = [h] · Decompress(blake3_pers(m))     (h = cofactor 8)
//! ```

use std::sync::LazyLock;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, EdwardsProjective, Fq, Fr};
use ark_ff::{BigInteger, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::{CryptoRng, RngCore};

/// Hash `input` to a point of the prime-order subgroup.
///
/// Returns `None` when the digest is not the encoding of a curve point or the
/// point has small order. Roughly half of all digests succeed.
pub(crate) fn group_hash(personalization: &str, input: &[u8]) -> Option<EdwardsAffine> {
    let mut hasher = blake3::Hasher::new_derive_key(personalization);
    hasher.update(input);
    let digest = hasher.finalize();

    let candidate = EdwardsAffine::deserialize_compressed_unchecked(&digest.as_bytes()[..]).ok()?;
    let point = candidate.clear_cofactor();

    if point.into_group().is_zero() {
        None
    } else {
        Some(point)
    }
}

/// Find a generator by appending a little-endian counter to `tag` until
/// the group hash succeeds
fn find_group_hash(personalization: &str, tag: &[u8]) -> EdwardsAffine {
    let mut input = tag.to_vec();
    input.extend_from_slice(&[0u8; 4]);

    let mut counter = 0u32;
    loop {
        input[tag.len()..].copy_from_slice(&counter.to_le_bytes());
        if let Some(point) = group_hash(personalization, &input) {
            return point;
        }
        counter = counter.wrapping_add(1);
    }
}

/// Fixed, independent generators used by the engine
pub(crate) struct Generators {
    /// Spend authorization base (`ak = [ask] G_spend`)
    pub spend_auth: EdwardsAffine,
    /// Nullifier key base (`nk = [nsk] G_nf`)
    pub nullifier_key: EdwardsAffine,
    /// Value base of value commitments (the balance generator `V`)
    pub value: EdwardsAffine,
    /// Randomness base of value commitments and the binding signature (`R`)
    pub value_randomness: EdwardsAffine,
    /// Note commitment bases
    pub note_value: EdwardsAffine,
    pub note_recipient: EdwardsAffine,
    pub note_randomness: EdwardsAffine,
    /// Generic Pedersen commitment bases
    pub pedersen_value: EdwardsAffine,
    pub pedersen_blinding: EdwardsAffine,
}

const GENERATOR_PERSONALIZATION: &str = "MeshCrypt 2024 Jubjub generators v1";

static GENERATORS: LazyLock<Generators> = LazyLock::new(|| Generators {
    spend_auth: find_group_hash(GENERATOR_PERSONALIZATION, b"spend-auth"),
    nullifier_key: find_group_hash(GENERATOR_PERSONALIZATION, b"nullifier-key"),
    value: find_group_hash(GENERATOR_PERSONALIZATION, b"cv-value"),
    value_randomness: find_group_hash(GENERATOR_PERSONALIZATION, b"cv-randomness"),
    note_value: find_group_hash(GENERATOR_PERSONALIZATION, b"note-value"),
    note_recipient: find_group_hash(GENERATOR_PERSONALIZATION, b"note-recipient"),
    note_randomness: find_group_hash(GENERATOR_PERSONALIZATION, b"note-randomness"),
    pedersen_value: find_group_hash(GENERATOR_PERSONALIZATION, b"pedersen-g"),
    pedersen_blinding: find_group_hash(GENERATOR_PERSONALIZATION, b"pedersen-h"),
});

/// Generator table, computed on first use
pub(crate) fn generators() -> &'static Generators {
    &GENERATORS
}

/// Encode a point as 32 compressed bytes
pub(crate) fn encode_point(point: &EdwardsAffine) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    point
        .serialize_compressed(&mut bytes[..])
        .expect("compressed Jubjub points are 32 bytes");
    bytes
}

/// Encode a projective point as 32 compressed bytes
pub(crate) fn encode_projective(point: &EdwardsProjective) -> [u8; 32] {
    encode_point(&point.into_affine())
}

/// Decode a compressed point, checking it lies in the prime-order subgroup
pub(crate) fn decode_point(bytes: &[u8; 32]) -> Option<EdwardsAffine> {
    EdwardsAffine::deserialize_compressed(&bytes[..]).ok()
}

/// Decode a compressed point that must not be the identity
pub(crate) fn decode_nonzero_point(bytes: &[u8; 32]) -> Option<EdwardsAffine> {
    decode_point(bytes).filter(|p| !p.into_group().is_zero())
}

/// Little-endian canonical scalar encoding
pub(crate) fn encode_scalar(scalar: &Fr) -> [u8; 32] {
    let bytes = scalar.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Decode a scalar, rejecting non-canonical encodings (`>= r`)
pub(crate) fn decode_scalar(bytes: &[u8; 32]) -> Option<Fr> {
    Fr::deserialize_compressed(&bytes[..]).ok()
}

/// Little-endian canonical base field encoding
pub(crate) fn encode_base(element: &Fq) -> [u8; 32] {
    let bytes = element.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Decode a base field element, rejecting non-canonical encodings
pub(crate) fn decode_base(bytes: &[u8; 32]) -> Option<Fq> {
    Fq::deserialize_compressed(&bytes[..]).ok()
}

/// Hash arbitrary data to a uniformly distributed scalar (wide reduction)
pub(crate) fn hash_to_scalar(domain: &str, parts: &[&[u8]]) -> Fr {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Fr::from_le_bytes_mod_order(&wide)
}

/// Sample a uniformly random scalar
pub(crate) fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    Fr::from_le_bytes_mod_order(&wide)
}

/// Map a signed amount into the scalar field
pub(crate) fn scalar_from_i128(value: i128) -> Fr {
    let magnitude = Fr::from(value.unsigned_abs());
    if value < 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;

    #[test]
    fn test_generators_are_distinct_and_nonzero() {
        let g = generators();
        let all = [
            g.spend_auth,
            g.nullifier_key,
            g.value,
            g.value_randomness,
            g.note_value,
            g.note_recipient,
            g.note_randomness,
            g.pedersen_value,
            g.pedersen_blinding,
        ];

        for (i, a) in all.iter().enumerate() {
            assert!(!a.into_group().is_zero());
            assert!(a.is_in_correct_subgroup_assuming_on_curve());
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_group_hash_search_is_deterministic() {
        let a = find_group_hash("MeshCrypt test generators", b"tag");
        let b = find_group_hash("MeshCrypt test generators", b"tag");
        assert_eq!(a, b);
        assert!(a.is_in_correct_subgroup_assuming_on_curve());
        assert_ne!(a, find_group_hash("MeshCrypt test generators", b"other"));
    }

    #[test]
    fn test_point_encoding_roundtrip() {
        let p = (generators().value * Fr::from(12345u64)).into_affine();
        let bytes = encode_point(&p);
        assert_eq!(decode_point(&bytes), Some(p));
    }

    #[test]
    fn test_scalar_encoding_rejects_non_canonical() {
        let minus_one = -Fr::one();
        let mut bytes = encode_scalar(&minus_one);
        assert_eq!(decode_scalar(&bytes), Some(minus_one));

        // r itself is not canonical
        bytes[0] = bytes[0].wrapping_add(1);
        assert_eq!(decode_scalar(&bytes), None);
    }

    #[test]
    fn test_signed_scalar_mapping() {
        assert_eq!(scalar_from_i128(-5) + Fr::from(5u64), Fr::zero());
        assert_eq!(scalar_from_i128(7), Fr::from(7u64));
    }
}
