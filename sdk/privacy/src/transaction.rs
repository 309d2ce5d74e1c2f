//! Shielded Transactions
//!
//! Wire layout (all integers little-endian):
//!
//! ```text
//! version            u32
//! n_spends           u32
//! spends[n_spends]   cv(32) anchor(32) nullifier(32) rk(32) proof spend_auth_sig(64)
//! n_outputs          u32
//! outputs[n_outputs] cv(32) cmu(32) epk(32) enc_ciphertext(612) out_ciphertext(80) proof
//! value_balance      i64
//! binding_sig        64
//!
//! proof = tag(1) || 192 bytes (Groth16) | 32 bytes (stub)
//! ```
//!
//! Balance: `sum(cv_spends) - sum(cv_outputs) - [value_balance] V = bvk`, and
//! the binding signature must verify under `bvk`.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};

use crate::commitment::{ExtractedNoteCommitment, ValueCommitTrapdoor, ValueCommitment};
use crate::encryption::{self, ENC_CIPHERTEXT_SIZE, OUT_CIPHERTEXT_SIZE, ShieldedOutput};
use crate::error::{Error, Result};
use crate::merkle::Anchor;
use crate::nullifier::Nullifier;
use crate::proof::{Proof, ProofGateway, PublicInputs};
use crate::signature::{Binding, SIGNATURE_SIZE, Signature, SpendAuth, VerificationKey};

pub const TX_VERSION: u32 = 1;

const SIGHASH_PERSONALIZATION: &str = "MeshCrypt 2024 transaction sighash v1";
const TXID_PERSONALIZATION: &str = "MeshCrypt 2024 transaction id v1";

/// Largest count preallocated while parsing
const MAX_PREALLOC: usize = 256;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    read_array::<4, R>(reader).map(u32::from_le_bytes)
}

fn read_cv<R: Read>(reader: &mut R) -> io::Result<ValueCommitment> {
    ValueCommitment::from_bytes(&read_array(reader)?).ok_or_else(|| invalid("invalid cv"))
}

/// A spend of one note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendDescription {
    pub cv: ValueCommitment,
    pub anchor: Anchor,
    pub nullifier: Nullifier,
    pub rk: VerificationKey<SpendAuth>,
    pub proof: Proof,
    pub spend_auth_sig: Signature<SpendAuth>,
}

impl SpendDescription {
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Spend {
            cv: self.cv,
            anchor: self.anchor,
            nullifier: self.nullifier,
            rk: self.rk,
        }
    }

    fn write_body<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.cv.to_bytes())?;
        writer.write_all(self.anchor.as_bytes())?;
        writer.write_all(self.nullifier.as_bytes())?;
        writer.write_all(&self.rk.to_bytes())?;
        self.proof.write(&mut *writer)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.write_body(writer)?;
        writer.write_all(&self.spend_auth_sig.to_bytes())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let cv = read_cv(reader)?;
        let anchor = Anchor::from_bytes(&read_array(reader)?)
            .ok_or_else(|| invalid("non-canonical anchor"))?;
        let nullifier = Nullifier(read_array(reader)?);
        let rk = VerificationKey::from_bytes(&read_array(reader)?)
            .ok_or_else(|| invalid("invalid rk"))?;
        let proof = Proof::read(&mut *reader)?;
        let spend_auth_sig = Signature::from_bytes(&read_array::<SIGNATURE_SIZE, R>(reader)?);

        Ok(Self {
            cv,
            anchor,
            nullifier,
            rk,
            proof,
            spend_auth_sig,
        })
    }
}

/// Creation of one note
#[derive(Clone, PartialEq, Eq)]
pub struct OutputDescription {
    pub cv: ValueCommitment,
    pub cmu: ExtractedNoteCommitment,
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: [u8; ENC_CIPHERTEXT_SIZE],
    pub out_ciphertext: [u8; OUT_CIPHERTEXT_SIZE],
    pub proof: Proof,
}

impl OutputDescription {
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Output {
            cv: self.cv,
            cmu: self.cmu,
            epk: self.ephemeral_key,
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.cv.to_bytes())?;
        writer.write_all(self.cmu.as_bytes())?;
        writer.write_all(&self.ephemeral_key)?;
        writer.write_all(&self.enc_ciphertext)?;
        writer.write_all(&self.out_ciphertext)?;
        self.proof.write(&mut *writer)
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let cv = read_cv(reader)?;
        let cmu = ExtractedNoteCommitment::from_bytes(&read_array(reader)?)
            .ok_or_else(|| invalid("non-canonical cmu"))?;
        let ephemeral_key: [u8; 32] = read_array(reader)?;
        if !encryption::is_valid_epk(&ephemeral_key) {
            return Err(invalid("invalid ephemeral key"));
        }
        let enc_ciphertext = read_array(reader)?;
        let out_ciphertext = read_array(reader)?;
        let proof = Proof::read(&mut *reader)?;

        Ok(Self {
            cv,
            cmu,
            ephemeral_key,
            enc_ciphertext,
            out_ciphertext,
            proof,
        })
    }
}

impl fmt::Debug for OutputDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDescription")
            .field("cv", &self.cv)
            .field("cmu", &self.cmu)
            .field("ephemeral_key", &hex::encode(self.ephemeral_key))
            .field("proof", &self.proof)
            .finish_non_exhaustive()
    }
}

impl ShieldedOutput for OutputDescription {
    fn ephemeral_key(&self) -> &[u8; 32] {
        &self.ephemeral_key
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

/// Transaction identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

/// A complete shielded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldedTransaction {
    pub spends: Vec<SpendDescription>,
    pub outputs: Vec<OutputDescription>,
    /// Net value leaving the shielded pool (the fee, for a pure shielded transfer)
    pub value_balance: i64,
    pub binding_sig: Signature<Binding>,
}

impl ShieldedTransaction {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.write_inner(&mut writer, true)
    }

    fn write_inner<W: Write>(&self, writer: &mut W, with_signatures: bool) -> io::Result<()> {
        writer.write_all(&TX_VERSION.to_le_bytes())?;

        writer.write_all(&count(self.spends.len())?.to_le_bytes())?;
        for spend in &self.spends {
            if with_signatures {
                spend.write(writer)?;
            } else {
                spend.write_body(writer)?;
            }
        }

        writer.write_all(&count(self.outputs.len())?.to_le_bytes())?;
        for output in &self.outputs {
            output.write(writer)?;
        }

        writer.write_all(&self.value_balance.to_le_bytes())?;
        if with_signatures {
            writer.write_all(&self.binding_sig.to_bytes())?;
        }
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = read_u32(&mut reader)?;
        if version != TX_VERSION {
            return Err(invalid(format!("unsupported transaction version {version}")));
        }

        let n_spends = read_u32(&mut reader)? as usize;
        let mut spends = Vec::with_capacity(n_spends.min(MAX_PREALLOC));
        for _ in 0..n_spends {
            spends.push(SpendDescription::read(&mut reader)?);
        }

        let n_outputs = read_u32(&mut reader)? as usize;
        let mut outputs = Vec::with_capacity(n_outputs.min(MAX_PREALLOC));
        for _ in 0..n_outputs {
            outputs.push(OutputDescription::read(&mut reader)?);
        }

        let value_balance = i64::from_le_bytes(read_array(&mut reader)?);
        let binding_sig = Signature::from_bytes(&read_array::<SIGNATURE_SIZE, R>(&mut reader)?);

        Ok(Self {
            spends,
            outputs,
            value_balance,
            binding_sig,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // A Vec sink only fails past u32::MAX descriptions, which no allocation holds
        self.write(&mut out).expect("transaction serialization failed");
        out
    }

    /// Parse, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let tx = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::InvalidEncoding(format!(
                "{} trailing bytes after transaction",
                reader.len()
            )));
        }
        Ok(tx)
    }

    /// Digest signed by every signature: the transaction with signatures
    /// omitted
    pub fn sighash(&self) -> [u8; 32] {
        let mut body = Vec::new();
        self.write_inner(&mut body, false).expect("sighash serialization failed");
        blake3::derive_key(SIGHASH_PERSONALIZATION, &body)
    }

    pub fn txid(&self) -> TxId {
        TxId(blake3::derive_key(TXID_PERSONALIZATION, &self.to_bytes()))
    }

    pub fn nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.spends.iter().map(|s| &s.nullifier)
    }

    /// `bvk = sum(cv_spends) - sum(cv_outputs) - [value_balance] V`
    pub fn binding_verification_key(&self) -> VerificationKey<Binding> {
        let spends: ValueCommitment = self.spends.iter().map(|s| &s.cv).sum();
        let outputs: ValueCommitment = self.outputs.iter().map(|o| &o.cv).sum();
        let balance = ValueCommitment::derive_signed(
            i128::from(self.value_balance),
            &ValueCommitTrapdoor::zero(),
        );
        VerificationKey::from_projective((spends - outputs - balance).point())
    }

    /// Full consensus-style check of a transaction in isolation
    ///
    /// `anchor_ok` decides which anchors are acceptable (usually
    /// [`CommitmentTree::is_known_anchor`](crate::merkle::CommitmentTree::is_known_anchor)).
    pub fn verify<G, F>(&self, gateway: &G, anchor_ok: F) -> Result<()>
    where
        G: ProofGateway + ?Sized,
        F: Fn(&Anchor) -> bool,
    {
        let mut seen = HashSet::with_capacity(self.spends.len());
        for nf in self.nullifiers() {
            if !seen.insert(*nf) {
                return Err(Error::DoubleSpendAttempt(*nf));
            }
        }

        let sighash = self.sighash();
        for spend in &self.spends {
            if !anchor_ok(&spend.anchor) {
                return Err(Error::StaleAnchor);
            }
            if !gateway.verify(&spend.proof, &spend.public_inputs()) {
                return Err(Error::InvalidProof);
            }
            spend.rk.verify(&sighash, &spend.spend_auth_sig)?;
        }

        for output in &self.outputs {
            if !gateway.verify(&output.proof, &output.public_inputs()) {
                return Err(Error::InvalidProof);
            }
        }

        self.binding_verification_key()
            .verify(&sighash, &self.binding_sig)
            .map_err(|_| Error::UnbalancedTransaction)
    }
}

fn count(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| invalid("too many descriptions"))
}
