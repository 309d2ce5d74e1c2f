//! Key Hierarchy
//!
//! ```text
//! SpendingKey (sk, 32 bytes)
//!   ├── ask = ToScalar(PRF_expand(sk, 0x00))   ak  = [ask] G_spend
//!   ├── nsk = ToScalar(PRF_expand(sk, 0x01))   nk  = [nsk] G_nf
//!   └── ovk = PRF_expand(sk, 0x02)[..32]
//!
//! ViewingKey = { ak, nk, ovk, ivk }
//!   ivk = CRH_ivk(ak || nk)          (one way: ivk does not reveal ak, nk)
//!   dk  = PRF(ivk)                   (diversifier key, see address.rs)
//! ```
//!
//! Each sub-key comes from an independent, domain-separated expansion of the
//! spending key, so compromise of one derived key does not weaken another.

use std::fmt;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr};
use ark_ff::{PrimeField, Zero};
use bip39::{Language, Mnemonic};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::address::{Address, DiversifierKey};
use crate::error::{Error, Result};
use crate::group::{self, generators};
use crate::nullifier::NullifierKey;

const PRF_EXPAND_PERSONALIZATION: &str = "MeshCrypt 2024 PRF expand v1";
const SEED_PERSONALIZATION: &str = "MeshCrypt 2024 master seed v1";
const IVK_PERSONALIZATION: &str = "MeshCrypt 2024 CRH ivk v1";

const TAG_ASK: u8 = 0x00;
const TAG_NSK: u8 = 0x01;
const TAG_OVK: u8 = 0x02;

/// Domain-separated expansion of the spending key
fn prf_expand(sk: &[u8; 32], tag: &[u8]) -> [u8; 64] {
    let mut hasher = blake3::Hasher::new_derive_key(PRF_EXPAND_PERSONALIZATION);
    hasher.update(sk);
    hasher.update(tag);
    let mut out = [0u8; 64];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Derive a non-zero canonical scalar, re-deriving with a counter when the
/// candidate is zero or not below the group order.
fn derive_scalar(sk: &[u8; 32], tag: u8) -> Result<Fr> {
    (0..=u8::MAX)
        .find_map(|counter| {
            let mut candidate = [0u8; 32];
            candidate.copy_from_slice(&prf_expand(sk, &[tag, counter])[..32]);
            candidate[31] &= 0x0f;
            let scalar = group::decode_scalar(&candidate);
            candidate.zeroize();
            scalar.filter(|s| !s.is_zero())
        })
        .ok_or(Error::InvalidSpendingKey)
}

/// Spending key - root of the key hierarchy
///
/// Never transmitted. The bytes are wiped when the key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SpendingKey {
    key: [u8; 32],
}

impl SpendingKey {
    /// Generate a random spending key
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut key = [0u8; 32];
            rng.fill_bytes(&mut key);
            if let Ok(sk) = Self::from_bytes(key) {
                return sk;
            }
        }
    }

    /// Create from raw bytes; the all-zero key is rejected
    pub fn from_bytes(key: [u8; 32]) -> Result<Self> {
        if key.iter().all(|b| *b == 0) {
            return Err(Error::InvalidSpendingKey);
        }
        Ok(Self { key })
    }

    /// Create from a byte slice that must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidSpendingKey)?;
        Self::from_bytes(key)
    }

    /// Derive the spending key of `account` from a master seed
    ///
    /// The seed must carry at least 256 bits.
    pub fn from_seed(seed: &[u8], account: u32) -> Result<Self> {
        if seed.len() < 32 {
            return Err(Error::InvalidSpendingKey);
        }
        let mut hasher = blake3::Hasher::new_derive_key(SEED_PERSONALIZATION);
        hasher.update(seed);
        hasher.update(&account.to_le_bytes());
        Self::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Restore the spending key of `account` from a BIP39 recovery phrase
    ///
    /// The phrase checksum is verified; `passphrase` is the optional BIP39
    /// extension word (empty for none).
    pub fn from_mnemonic(phrase: &str, passphrase: &str, account: u32) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
        let mut seed = mnemonic.to_seed(passphrase);
        let key = Self::from_seed(&seed, account);
        seed.zeroize();
        key
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Expand into the spend authorizing and nullifier secrets
    pub fn expand(&self) -> Result<ExpandedSpendingKey> {
        let ask = derive_scalar(&self.key, TAG_ASK)?;
        let nsk = derive_scalar(&self.key, TAG_NSK)?;
        let mut ovk = [0u8; 32];
        ovk.copy_from_slice(&prf_expand(&self.key, &[TAG_OVK])[..32]);

        Ok(ExpandedSpendingKey {
            ask,
            nsk,
            ovk: OutgoingViewingKey(ovk),
        })
    }

    /// Derive the viewing key (read-only access)
    pub fn viewing_key(&self) -> Result<ViewingKey> {
        self.expand()?.viewing_key()
    }
}

impl fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpendingKey(..)")
    }
}

/// The spending key's full viewing key
pub fn derive_viewing_key(spending_key: &[u8]) -> Result<ViewingKey> {
    SpendingKey::from_slice(spending_key)?.viewing_key()
}

/// Secret scalars expanded from a spending key
pub struct ExpandedSpendingKey {
    pub(crate) ask: Fr,
    pub(crate) nsk: Fr,
    pub(crate) ovk: OutgoingViewingKey,
}

impl ExpandedSpendingKey {
    /// Spend validating key `ak`
    pub fn ak(&self) -> EdwardsAffine {
        (generators().spend_auth * self.ask).into_affine()
    }

    /// Nullifier deriving key `nk`
    pub fn nullifier_key(&self) -> NullifierKey {
        NullifierKey::from_point((generators().nullifier_key * self.nsk).into_affine())
    }

    pub fn ovk(&self) -> &OutgoingViewingKey {
        &self.ovk
    }

    /// Derive the full viewing key
    pub fn viewing_key(&self) -> Result<ViewingKey> {
        ViewingKey::from_parts(self.ak(), self.nullifier_key(), self.ovk.clone())
    }
}

impl Drop for ExpandedSpendingKey {
    fn drop(&mut self) {
        self.ask.zeroize();
        self.nsk.zeroize();
    }
}

impl fmt::Debug for ExpandedSpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExpandedSpendingKey(..)")
    }
}

/// Outgoing viewing key - lets the sender recover what they sent
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct OutgoingViewingKey(pub [u8; 32]);

impl fmt::Debug for OutgoingViewingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutgoingViewingKey(..)")
    }
}

/// Fresh 24-word English recovery phrase over 256 bits of entropy
pub fn generate_mnemonic<R: RngCore + CryptoRng>(rng: &mut R) -> Result<String> {
    let mut entropy = [0u8; 32];
    rng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    Ok(mnemonic?.to_string())
}

/// Incoming viewing key - lets the holder generate addresses and detect
/// incoming notes, nothing more
#[derive(Clone, PartialEq, Eq)]
pub struct IncomingViewingKey {
    ivk: Fr,
    dk: DiversifierKey,
}

impl IncomingViewingKey {
    /// Rebuild from the `ivk` scalar; the diversifier key follows from it
    ///
    /// A zero `ivk` maps every address to the identity and is rejected.
    pub fn from_scalar(ivk: Fr) -> Option<Self> {
        if ivk.is_zero() {
            return None;
        }
        let dk = DiversifierKey::from_ivk(&ivk);
        Some(Self { ivk, dk })
    }

    /// Decode from 32 canonical bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_scalar(bytes).and_then(Self::from_scalar)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        group::encode_scalar(&self.ivk)
    }

    pub(crate) fn scalar(&self) -> &Fr {
        &self.ivk
    }

    pub fn diversifier_key(&self) -> &DiversifierKey {
        &self.dk
    }

    /// The shielded address at diversifier `index`
    pub fn address(&self, index: u32) -> Address {
        let (diversifier, g_d) = self.dk.diversified_base(index);
        Address::diversified(diversifier, &g_d, &self.ivk)
    }
}

impl fmt::Debug for IncomingViewingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IncomingViewingKey(..)")
    }
}

/// `CRH_ivk(ak, nk)`; truncated to 251 bits so the scalar is always canonical
pub(crate) fn crh_ivk(ak: &EdwardsAffine, nk: &NullifierKey) -> Fr {
    let mut hasher = blake3::Hasher::new_derive_key(IVK_PERSONALIZATION);
    hasher.update(&group::encode_point(ak));
    hasher.update(&nk.to_bytes());
    let mut digest = *hasher.finalize().as_bytes();
    digest[31] &= 0x07;
    Fr::from_le_bytes_mod_order(&digest)
}

/// Full viewing key `{ak, nk, ovk, ivk}`
///
/// Share this with auditors for balance visibility without spend authority.
#[derive(Clone, PartialEq, Eq)]
pub struct ViewingKey {
    ak: EdwardsAffine,
    nk: NullifierKey,
    ovk: OutgoingViewingKey,
    ivk: IncomingViewingKey,
}

/// Byte length of an exported viewing key (`ak || nk || ovk || ivk`)
pub const VIEWING_KEY_SIZE: usize = 128;

impl ViewingKey {
    fn from_parts(ak: EdwardsAffine, nk: NullifierKey, ovk: OutgoingViewingKey) -> Result<Self> {
        if ak.into_group().is_zero() {
            return Err(Error::InvalidSpendingKey);
        }
        let ivk = IncomingViewingKey::from_scalar(crh_ivk(&ak, &nk))
            .ok_or(Error::InvalidSpendingKey)?;

        Ok(Self { ak, nk, ovk, ivk })
    }

    pub fn ak(&self) -> &EdwardsAffine {
        &self.ak
    }

    pub fn nk(&self) -> &NullifierKey {
        &self.nk
    }

    pub fn ovk(&self) -> &OutgoingViewingKey {
        &self.ovk
    }

    pub fn ivk(&self) -> &IncomingViewingKey {
        &self.ivk
    }

    /// Address at diversifier index `index`
    pub fn address(&self, index: u32) -> Address {
        self.ivk.address(index)
    }

    /// Serialize as `ak || nk || ovk || ivk`
    pub fn to_bytes(&self) -> [u8; VIEWING_KEY_SIZE] {
        let mut out = [0u8; VIEWING_KEY_SIZE];
        out[0..32].copy_from_slice(&group::encode_point(&self.ak));
        out[32..64].copy_from_slice(&self.nk.to_bytes());
        out[64..96].copy_from_slice(&self.ovk.0);
        out[96..128].copy_from_slice(&self.ivk.to_bytes());
        out
    }

    /// Parse an exported viewing key
    ///
    /// The embedded `ivk` must match the one recomputed from `ak` and `nk`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != VIEWING_KEY_SIZE {
            return Err(Error::InvalidEncoding(format!(
                "viewing key must be {VIEWING_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let field = |range: std::ops::Range<usize>| -> [u8; 32] {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes[range]);
            arr
        };

        let ak = group::decode_nonzero_point(&field(0..32))
            .ok_or_else(|| Error::InvalidEncoding("ak is not a valid point".into()))?;
        let nk = NullifierKey::from_bytes(&field(32..64))
            .ok_or_else(|| Error::InvalidEncoding("nk is not a valid point".into()))?;
        let ovk = OutgoingViewingKey(field(64..96));
        let key = Self::from_parts(ak, nk, ovk)?;

        if key.ivk.to_bytes() != field(96..128) {
            return Err(Error::InvalidEncoding("ivk does not match ak and nk".into()));
        }
        Ok(key)
    }

    /// Hex export for sharing with auditors
    pub fn encode_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn decode_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| Error::InvalidEncoding(format!("viewing key hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for ViewingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewingKey")
            .field("ak", &hex::encode(group::encode_point(&self.ak)))
            .finish_non_exhaustive()
    }
}
