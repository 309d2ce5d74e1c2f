//! Shielded Notes
//!
//! A note represents value held privately by one shielded address.
//!
//! ```text
//! Note = {
//!     recipient: (d, pk_d),   // Diversified address of the owner
//!     value: u64,             // Amount in zatoshi (1 COIN = 10^8)
//!     rho: [u8; 32],          // Nullifier seed, chosen by the sender
//!     rcm: Fr,                // Commitment trapdoor
//!     memo: Option<Memo>,     // Up to 512 bytes
//!     position: Option<u64>,  // Position in commitment tree (set on insertion)
//! }
//! ```
//!
//! Note plaintext (596 bytes, encrypted to the recipient):
//!
//! ```text
//! 0x02 || d (11) || v (8, LE) || rcm (32) || rho (32) || memo (512)
//! ```

use std::fmt;

use ark_ed_on_bls12_381::EdwardsAffine;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::address::{Address, DIVERSIFIER_SIZE, Diversifier};
use crate::commitment::{self, ExtractedNoteCommitment, NoteCommitTrapdoor};
use crate::error::{Error, Result};
use crate::nullifier::{Nullifier, NullifierKey};

/// Zatoshi per coin
pub const COIN: u64 = 100_000_000;

/// Memo field size inside the plaintext
pub const MEMO_SIZE: usize = 512;

/// Size of the note plaintext
pub const NOTE_PLAINTEXT_SIZE: usize = 1 + DIVERSIFIER_SIZE + 8 + 32 + 32 + MEMO_SIZE;

const PLAINTEXT_LEAD_BYTE: u8 = 0x02;
const NO_MEMO_MARKER: u8 = 0xf6;

/// Note value with overflow protection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteValue(pub u64);

impl NoteValue {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Whole coins, checked
    pub fn from_coins(coins: u64) -> Option<Self> {
        coins.checked_mul(COIN).map(Self)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Checked sum of an iterator of values
    pub fn checked_sum<I: IntoIterator<Item = Self>>(values: I) -> Option<Self> {
        values
            .into_iter()
            .try_fold(Self::ZERO, |acc, v| acc.checked_add(v))
    }
}

/// Displays in coins, e.g. `9.9999`
impl fmt::Display for NoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / COIN;
        let frac = format!("{:08}", self.0 % COIN);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            write!(f, "{whole}.0")
        } else {
            write!(f, "{whole}.{frac}")
        }
    }
}

/// Nullifier seed `rho`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rho(pub [u8; 32]);

impl Rho {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut rho = [0u8; 32];
        rng.fill_bytes(&mut rho);
        Self(rho)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Memo attached to a note
///
/// Trailing zero bytes are padding and do not survive a round trip through
/// the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo(Vec<u8>);

impl Memo {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MEMO_SIZE {
            return Err(Error::InvalidEncoding(format!(
                "memo is {} bytes, max {MEMO_SIZE}",
                bytes.len()
            )));
        }
        if bytes.first() == Some(&NO_MEMO_MARKER) {
            return Err(Error::InvalidEncoding(
                "memo may not start with the empty marker".into(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy UTF-8 view
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    fn encode(memo: Option<&Memo>) -> [u8; MEMO_SIZE] {
        let mut out = [0u8; MEMO_SIZE];
        match memo {
            Some(memo) => out[..memo.0.len()].copy_from_slice(&memo.0),
            None => out[0] = NO_MEMO_MARKER,
        }
        out
    }

    fn decode(field: &[u8]) -> Option<Memo> {
        if field.first() == Some(&NO_MEMO_MARKER) {
            return None;
        }
        let end = field.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        Some(Memo(field[..end].to_vec()))
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memo({:?})", self.to_text())
    }
}

/// A shielded note representing privately held value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedNote {
    /// Address the note is paid to
    pub recipient: Address,
    /// The value (amount) held in this note
    pub value: NoteValue,
    /// Nullifier seed
    pub rho: Rho,
    /// Commitment trapdoor
    pub rcm: NoteCommitTrapdoor,
    pub memo: Option<Memo>,
    /// Position in the commitment Merkle tree (None if not yet inserted)
    pub position: Option<u64>,
}

impl ShieldedNote {
    /// Create a new note with fresh `rho` and `rcm`
    pub fn new<R: RngCore + CryptoRng>(
        recipient: Address,
        value: NoteValue,
        memo: Option<Memo>,
        rng: &mut R,
    ) -> Self {
        Self {
            recipient,
            value,
            rho: Rho::random(rng),
            rcm: NoteCommitTrapdoor::random(rng),
            memo,
            position: None,
        }
    }

    /// Compute the extracted commitment `cmu` for this note
    pub fn commitment(&self) -> ExtractedNoteCommitment {
        commitment::note_commit_to(&self.recipient, self.value, &self.rcm)
    }

    /// Derive the nullifier for spending this note
    pub fn nullifier(&self, nk: &NullifierKey) -> Nullifier {
        Nullifier::derive(nk, &self.rho)
    }

    /// Set the Merkle tree position (called after insertion)
    pub fn with_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Check if this note has been inserted into the tree
    pub fn is_inserted(&self) -> bool {
        self.position.is_some()
    }

    /// Serialize the note plaintext
    pub fn to_plaintext(&self) -> [u8; NOTE_PLAINTEXT_SIZE] {
        let mut out = [0u8; NOTE_PLAINTEXT_SIZE];
        let mut offset = 0;
        let mut put = |bytes: &[u8]| {
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
            offset += bytes.len();
        };

        put(&[PLAINTEXT_LEAD_BYTE]);
        put(self.recipient.diversifier().as_bytes());
        put(&self.value.as_u64().to_le_bytes());
        put(&self.rcm.to_bytes());
        put(self.rho.as_bytes());
        put(&Memo::encode(self.memo.as_ref()));
        out
    }
}

/// Decoded plaintext, before the recipient's `pk_d` is attached
pub(crate) struct NotePlaintext {
    pub diversifier: Diversifier,
    pub value: NoteValue,
    pub rcm: NoteCommitTrapdoor,
    pub rho: Rho,
    pub memo: Option<Memo>,
}

impl NotePlaintext {
    /// Parse, rejecting a wrong lead byte or a non-canonical `rcm`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NOTE_PLAINTEXT_SIZE || bytes[0] != PLAINTEXT_LEAD_BYTE {
            return None;
        }
        let (d, rest) = bytes[1..].split_at(DIVERSIFIER_SIZE);
        let (v, rest) = rest.split_at(8);
        let (rcm, rest) = rest.split_at(32);
        let (rho, memo) = rest.split_at(32);

        Some(Self {
            diversifier: Diversifier(d.try_into().ok()?),
            value: NoteValue(u64::from_le_bytes(v.try_into().ok()?)),
            rcm: NoteCommitTrapdoor::from_bytes(rcm.try_into().ok()?)?,
            rho: Rho(rho.try_into().ok()?),
            memo: Memo::decode(memo),
        })
    }

    /// Attach `pk_d`, yielding an unpositioned note
    pub fn into_note(self, pk_d: EdwardsAffine) -> Option<ShieldedNote> {
        let recipient = Address::from_parts(self.diversifier, pk_d)?;
        Some(ShieldedNote {
            recipient,
            value: self.value,
            rho: self.rho,
            rcm: self.rcm,
            memo: self.memo,
            position: None,
        })
    }
}
