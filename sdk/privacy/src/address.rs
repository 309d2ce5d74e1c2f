//! Diversified Shielded Addresses
//!
//! One incoming viewing key yields many unlinkable addresses:
//!
//! ```text
//! d    = DiversifierKey.derive(index)       (11 bytes)
//! g_d  = DiversifyHash(d)                   (group hash, may fail -> retry)
//! pk_d = [ivk] g_d
//!
//! text = prefix || base58(d || pk_d || SHA256d(d || pk_d)[..4])
//! ```

use std::fmt;
use std::str::FromStr;

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr};
use ark_ff::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::group;

const DIVERSIFY_PERSONALIZATION: &str = "MeshCrypt 2024 diversify hash v1";
const DIVERSIFIER_KEY_PERSONALIZATION: &str = "MeshCrypt 2024 diversifier key v1";

/// Diversifier length in bytes
pub const DIVERSIFIER_SIZE: usize = 11;
/// Raw address length: diversifier + pk_d
pub const ADDRESS_SIZE: usize = DIVERSIFIER_SIZE + 32;
/// Checksum length appended before base58 encoding
pub const CHECKSUM_SIZE: usize = 4;

/// Network an address belongs to; selects the human-readable prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Regtest];

    /// Human-readable address prefix
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "zs",
            Network::Testnet => "zt",
            Network::Regtest => "zr",
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(Error::InvalidEncoding(format!("unknown network {other}"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

/// 11-byte diversifier selecting one address branch of a viewing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diversifier(pub [u8; DIVERSIFIER_SIZE]);

impl Diversifier {
    /// The diversified base point, if this diversifier is valid
    pub fn g_d(&self) -> Option<EdwardsAffine> {
        group::group_hash(DIVERSIFY_PERSONALIZATION, &self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIVERSIFIER_SIZE] {
        &self.0
    }
}

/// Key that maps diversifier indices to diversifiers
///
/// Derived from the incoming viewing key, so anyone able to scan for a
/// wallet's notes can also enumerate its addresses.
#[derive(Clone, PartialEq, Eq)]
pub struct DiversifierKey([u8; 32]);

impl DiversifierKey {
    pub(crate) fn from_ivk(ivk: &Fr) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(DIVERSIFIER_KEY_PERSONALIZATION);
        hasher.update(&group::encode_scalar(ivk));
        Self(*hasher.finalize().as_bytes())
    }

    /// Deterministic diversifier for `index`
    ///
    /// Candidates are tried with an increasing counter until one has a valid
    /// diversified base, so the result is always usable.
    pub fn derive_diversifier(&self, index: u32) -> Diversifier {
        self.diversified_base(index).0
    }

    /// The diversifier for `index` together with its base `g_d`
    pub(crate) fn diversified_base(&self, index: u32) -> (Diversifier, EdwardsAffine) {
        let mut counter: u32 = 0;
        loop {
            let mut hasher = blake3::Hasher::new_keyed(&self.0);
            hasher.update(&index.to_le_bytes());
            hasher.update(&counter.to_le_bytes());
            let digest = hasher.finalize();

            let mut d = [0u8; DIVERSIFIER_SIZE];
            d.copy_from_slice(&digest.as_bytes()[..DIVERSIFIER_SIZE]);
            let candidate = Diversifier(d);
            if let Some(g_d) = candidate.g_d() {
                return (candidate, g_d);
            }
            counter = counter.wrapping_add(1);
        }
    }
}

impl fmt::Debug for DiversifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiversifierKey(..)")
    }
}

/// A shielded payment address `(d, pk_d)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    diversifier: Diversifier,
    pk_d: EdwardsAffine,
}

impl Address {
    /// `pk_d = [ivk] g_d`
    ///
    /// `g_d` must be the base of `diversifier` and `ivk` nonzero. Both points
    /// then lie in the prime-order subgroup, so `pk_d` is never the identity.
    pub(crate) fn diversified(diversifier: Diversifier, g_d: &EdwardsAffine, ivk: &Fr) -> Self {
        let pk_d = (*g_d * *ivk).into_affine();
        Self { diversifier, pk_d }
    }

    /// Assemble an address, rejecting invalid diversifiers and identity `pk_d`
    pub fn from_parts(diversifier: Diversifier, pk_d: EdwardsAffine) -> Option<Self> {
        diversifier.g_d()?;
        if pk_d.into_group().is_zero() {
            return None;
        }
        Some(Self { diversifier, pk_d })
    }

    pub fn diversifier(&self) -> &Diversifier {
        &self.diversifier
    }

    pub fn pk_d(&self) -> &EdwardsAffine {
        &self.pk_d
    }

    /// Diversified base; always present for a constructed address
    pub(crate) fn g_d(&self) -> Option<EdwardsAffine> {
        self.diversifier.g_d()
    }

    /// Raw 43-byte form `d || pk_d`
    pub fn to_bytes(&self) -> [u8; ADDRESS_SIZE] {
        let mut out = [0u8; ADDRESS_SIZE];
        out[..DIVERSIFIER_SIZE].copy_from_slice(&self.diversifier.0);
        out[DIVERSIFIER_SIZE..].copy_from_slice(&group::encode_point(&self.pk_d));
        out
    }

    /// Parse the raw 43-byte form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADDRESS_SIZE {
            return Err(Error::InvalidAddress(format!(
                "expected {ADDRESS_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut d = [0u8; DIVERSIFIER_SIZE];
        d.copy_from_slice(&bytes[..DIVERSIFIER_SIZE]);
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[DIVERSIFIER_SIZE..]);

        let diversifier = Diversifier(d);
        if diversifier.g_d().is_none() {
            return Err(Error::InvalidAddress("invalid diversifier".into()));
        }
        let pk_d = group::decode_nonzero_point(&pk)
            .ok_or_else(|| Error::InvalidAddress("invalid pk_d".into()))?;

        Ok(Self { diversifier, pk_d })
    }

    /// Text encoding for `network`
    pub fn encode(&self, network: Network) -> String {
        let raw = self.to_bytes();
        let mut payload = Vec::with_capacity(ADDRESS_SIZE + CHECKSUM_SIZE);
        payload.extend_from_slice(&raw);
        payload.extend_from_slice(&checksum(&raw));
        format!(
            "{}{}",
            network.address_prefix(),
            bs58::encode(payload).into_string()
        )
    }

    /// Decode an address that must belong to `network`
    pub fn decode(encoded: &str, network: Network) -> Result<Self> {
        let (found, address) = decode_address(encoded)?;
        if found != network {
            return Err(Error::InvalidAddress(format!(
                "address is for {found}, expected {network}"
            )));
        }
        Ok(address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Address::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// First four bytes of SHA256(SHA256(payload))
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&second[..CHECKSUM_SIZE]);
    out
}

/// Parse any known network's address
///
/// Every malformed input is reported as [`Error::InvalidAddress`].
pub fn decode_address(encoded: &str) -> Result<(Network, Address)> {
    let network = Network::ALL
        .into_iter()
        .find(|n| encoded.starts_with(n.address_prefix()))
        .ok_or_else(|| Error::InvalidAddress("unknown prefix".into()))?;
    let body = &encoded[network.address_prefix().len()..];

    let payload = bs58::decode(body)
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("base58: {e}")))?;
    if payload.len() != ADDRESS_SIZE + CHECKSUM_SIZE {
        return Err(Error::InvalidAddress(format!(
            "expected {} payload bytes, got {}",
            ADDRESS_SIZE + CHECKSUM_SIZE,
            payload.len()
        )));
    }

    let (raw, sum) = payload.split_at(ADDRESS_SIZE);
    if checksum(raw)[..] != *sum {
        return Err(Error::InvalidAddress("checksum mismatch".into()));
    }

    Ok((network, Address::from_bytes(raw)?))
}
