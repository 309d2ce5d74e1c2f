//! Proof Gateway
//!
//! Boundary to the external zero-knowledge prover. The engine assembles each
//! statement (private witness + public inputs), hands it to a
//! [`ProofGateway`], and embeds whatever proof comes back. The prover is
//! untrusted and replaceable; the engine never runs a circuit itself.
//!
//! ```text
//! ┌──────────────────┐  SpendStatement / OutputStatement  ┌───────────────┐
//! │ TransactionBuilder│ ─────────────────────────────────▶ │ ProofGateway  │
//! │                   │ ◀───────────────────────────────── │ (Groth16/stub)│
//! └──────────────────┘        Proof + public signals       └───────────────┘
//! ```

use std::fmt;
use std::io::{self, Read, Write};

use ark_ec::CurveGroup;
use thiserror::Error;

use crate::commitment::{ExtractedNoteCommitment, ValueCommitTrapdoor, ValueCommitment};
use crate::encryption::EphemeralSecretKey;
use crate::group;
use crate::keys::crh_ivk;
use crate::merkle::{Anchor, Witness};
use crate::note::ShieldedNote;
use crate::nullifier::{Nullifier, NullifierKey};
use crate::signature::{Randomizer, SpendAuth, VerificationKey};

const STUB_PROVER_PERSONALIZATION: &str = "MeshCrypt 2024 stub prover key v1";

pub const GROTH16_PROOF_SIZE: usize = 192;
pub const STUB_PROOF_SIZE: usize = 32;

const TAG_GROTH16: u8 = 0x00;
const TAG_STUB: u8 = 0x01;

/// Failures reported by a prover backend
#[derive(Debug, Error)]
pub enum ProofError {
    /// The private witness does not satisfy the statement
    #[error("statement not satisfied: {0}")]
    Unsatisfied(&'static str),

    #[error("prover backend error: {0}")]
    Backend(String),
}

/// A proof as carried in a transaction
#[derive(Clone, PartialEq, Eq)]
pub enum Proof {
    Groth16([u8; GROTH16_PROOF_SIZE]),
    Stub([u8; STUB_PROOF_SIZE]),
}

impl Proof {
    /// Tag byte followed by exactly the variant's length
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        match self {
            Proof::Groth16(bytes) => {
                writer.write_all(&[TAG_GROTH16])?;
                writer.write_all(bytes)
            }
            Proof::Stub(bytes) => {
                writer.write_all(&[TAG_STUB])?;
                writer.write_all(bytes)
            }
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        match tag[0] {
            TAG_GROTH16 => {
                let mut bytes = [0u8; GROTH16_PROOF_SIZE];
                reader.read_exact(&mut bytes)?;
                Ok(Proof::Groth16(bytes))
            }
            TAG_STUB => {
                let mut bytes = [0u8; STUB_PROOF_SIZE];
                reader.read_exact(&mut bytes)?;
                Ok(Proof::Stub(bytes))
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown proof tag {other:#04x}"),
            )),
        }
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proof::Groth16(bytes) => write!(f, "Groth16({}..)", hex::encode(&bytes[..8])),
            Proof::Stub(bytes) => write!(f, "Stub({})", hex::encode(bytes)),
        }
    }
}

/// Public inputs of a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicInputs {
    Spend {
        cv: ValueCommitment,
        anchor: Anchor,
        nullifier: Nullifier,
        rk: VerificationKey<SpendAuth>,
    },
    Output {
        cv: ValueCommitment,
        cmu: ExtractedNoteCommitment,
        epk: [u8; 32],
    },
}

impl PublicInputs {
    pub fn statement_id(&self) -> &'static str {
        match self {
            PublicInputs::Spend { .. } => "meshcrypt.spend.v1",
            PublicInputs::Output { .. } => "meshcrypt.output.v1",
        }
    }

    /// Public signals in the order the circuit exposes them
    pub fn signals(&self) -> Vec<[u8; 32]> {
        match self {
            PublicInputs::Spend {
                cv,
                anchor,
                nullifier,
                rk,
            } => vec![cv.to_bytes(), *anchor.as_bytes(), *nullifier.as_bytes(), rk.to_bytes()],
            PublicInputs::Output { cv, cmu, epk } => vec![cv.to_bytes(), *cmu.as_bytes(), *epk],
        }
    }
}

/// Everything a spend proof attests to
#[derive(Debug, Clone)]
pub struct SpendStatement {
    // public
    pub cv: ValueCommitment,
    pub anchor: Anchor,
    pub nullifier: Nullifier,
    pub rk: VerificationKey<SpendAuth>,
    // private
    pub note: ShieldedNote,
    pub ak: VerificationKey<SpendAuth>,
    pub nk: NullifierKey,
    pub alpha: Randomizer,
    pub rcv: ValueCommitTrapdoor,
    pub witness: Witness,
}

impl SpendStatement {
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Spend {
            cv: self.cv,
            anchor: self.anchor,
            nullifier: self.nullifier,
            rk: self.rk,
        }
    }

    /// Check the private witness against the public inputs
    pub fn check(&self) -> Result<(), ProofError> {
        if ValueCommitment::derive(self.note.value, &self.rcv) != self.cv {
            return Err(ProofError::Unsatisfied("cv does not open to the note value"));
        }
        if self.witness.anchor != self.anchor
            || self.witness.root_for(&self.note.commitment()) != Some(self.anchor)
        {
            return Err(ProofError::Unsatisfied("note is not in the tree at the anchor"));
        }
        if Nullifier::derive(&self.nk, &self.note.rho) != self.nullifier {
            return Err(ProofError::Unsatisfied("nullifier does not match the note"));
        }
        if self.ak.randomize(&self.alpha) != self.rk {
            return Err(ProofError::Unsatisfied("rk is not a randomization of ak"));
        }
        let ivk = crh_ivk(self.ak.point(), &self.nk);
        let g_d = self
            .note
            .recipient
            .g_d()
            .ok_or(ProofError::Unsatisfied("invalid diversifier"))?;
        if (g_d * ivk).into_affine() != *self.note.recipient.pk_d() {
            return Err(ProofError::Unsatisfied("note is not owned by ak, nk"));
        }
        Ok(())
    }
}

/// Everything an output proof attests to
#[derive(Debug, Clone)]
pub struct OutputStatement {
    // public
    pub cv: ValueCommitment,
    pub cmu: ExtractedNoteCommitment,
    pub epk: [u8; 32],
    // private
    pub note: ShieldedNote,
    pub esk: EphemeralSecretKey,
    pub rcv: ValueCommitTrapdoor,
}

impl OutputStatement {
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs::Output {
            cv: self.cv,
            cmu: self.cmu,
            epk: self.epk,
        }
    }

    /// Check the private witness against the public inputs
    pub fn check(&self) -> Result<(), ProofError> {
        if ValueCommitment::derive(self.note.value, &self.rcv) != self.cv {
            return Err(ProofError::Unsatisfied("cv does not open to the note value"));
        }
        if self.note.commitment() != self.cmu {
            return Err(ProofError::Unsatisfied("cmu does not commit to the note"));
        }
        let g_d = self
            .note
            .recipient
            .g_d()
            .ok_or(ProofError::Unsatisfied("invalid diversifier"))?;
        if group::encode_projective(&(g_d * self.esk.0)) != self.epk {
            return Err(ProofError::Unsatisfied("epk is not [esk] g_d"));
        }
        Ok(())
    }
}

/// Trait for zero-knowledge proof generation and verification
pub trait ProofGateway: Send + Sync {
    fn spend_proof(&self, statement: &SpendStatement) -> Result<Proof, ProofError>;

    fn output_proof(&self, statement: &OutputStatement) -> Result<Proof, ProofError>;

    fn verify(&self, proof: &Proof, inputs: &PublicInputs) -> bool;
}

/// Deterministic stand-in for a real prover
///
/// Checks the witness exactly as a circuit would, then "proves" with a keyed
/// hash of the public signals. It never produces Groth16 proofs and rejects
/// them on verification.
#[derive(Clone)]
pub struct StubProver {
    key: [u8; 32],
}

impl StubProver {
    pub fn new() -> Self {
        Self::with_key(blake3::derive_key(STUB_PROVER_PERSONALIZATION, b"default"))
    }

    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Identifier of the key proofs verify under
    pub fn verification_key_id(&self) -> [u8; 32] {
        *blake3::hash(&self.key).as_bytes()
    }

    fn tag(&self, inputs: &PublicInputs) -> [u8; STUB_PROOF_SIZE] {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(inputs.statement_id().as_bytes());
        for signal in inputs.signals() {
            hasher.update(&signal);
        }
        *hasher.finalize().as_bytes()
    }
}

impl Default for StubProver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StubProver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubProver")
            .field("vk_id", &hex::encode(self.verification_key_id()))
            .finish()
    }
}

impl ProofGateway for StubProver {
    fn spend_proof(&self, statement: &SpendStatement) -> Result<Proof, ProofError> {
        statement.check()?;
        Ok(Proof::Stub(self.tag(&statement.public_inputs())))
    }

    fn output_proof(&self, statement: &OutputStatement) -> Result<Proof, ProofError> {
        statement.check()?;
        Ok(Proof::Stub(self.tag(&statement.public_inputs())))
    }

    fn verify(&self, proof: &Proof, inputs: &PublicInputs) -> bool {
        match proof {
            Proof::Stub(bytes) => *bytes == self.tag(inputs),
            Proof::Groth16(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use crate::merkle::CommitmentTree;
    use crate::note::NoteValue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn output_statement(rng: &mut StdRng) -> OutputStatement {
        let vk = SpendingKey::from_bytes([3u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap();
        let note = ShieldedNote::new(vk.address(0), NoteValue::new(77), None, rng);
        let rcv = ValueCommitTrapdoor::random(rng);
        let esk = EphemeralSecretKey::random(rng);
        let g_d = note.recipient.g_d().unwrap();
        OutputStatement {
            cv: ValueCommitment::derive(note.value, &rcv),
            cmu: note.commitment(),
            epk: group::encode_projective(&(g_d * esk.0)),
            note,
            esk,
            rcv,
        }
    }

    fn spend_statement(rng: &mut StdRng) -> SpendStatement {
        let sk = SpendingKey::from_bytes([4u8; 32]).unwrap();
        let expanded = sk.expand().unwrap();
        let vk = expanded.viewing_key().unwrap();

        let note = ShieldedNote::new(vk.address(2), NoteValue::new(500), None, rng);
        let mut tree = CommitmentTree::default();
        let position = tree.append_commitment(&note.commitment()).unwrap();
        let witness = tree.witness_for(position).unwrap();

        let ak = VerificationKey::<SpendAuth>::from_point(expanded.ak());
        let alpha = Randomizer::random(rng);
        let rcv = ValueCommitTrapdoor::random(rng);
        SpendStatement {
            cv: ValueCommitment::derive(note.value, &rcv),
            anchor: witness.anchor,
            nullifier: note.nullifier(vk.nk()),
            rk: ak.randomize(&alpha),
            note: note.with_position(position),
            ak,
            nk: *vk.nk(),
            alpha,
            rcv,
            witness,
        }
    }

    #[test]
    fn test_stub_proofs_verify() {
        let mut rng = StdRng::seed_from_u64(51);
        let prover = StubProver::new();

        let spend = spend_statement(&mut rng);
        let proof = prover.spend_proof(&spend).unwrap();
        assert!(prover.verify(&proof, &spend.public_inputs()));

        let output = output_statement(&mut rng);
        let proof = prover.output_proof(&output).unwrap();
        assert!(prover.verify(&proof, &output.public_inputs()));
        assert!(!prover.verify(&proof, &spend.public_inputs()));
    }

    #[test]
    fn test_unsatisfied_witness_rejected() {
        let mut rng = StdRng::seed_from_u64(52);
        let prover = StubProver::new();

        let mut spend = spend_statement(&mut rng);
        spend.nullifier = Nullifier([0u8; 32]);
        assert!(matches!(
            prover.spend_proof(&spend),
            Err(ProofError::Unsatisfied(_))
        ));

        let mut output = output_statement(&mut rng);
        output.note.value = NoteValue::new(78);
        assert!(matches!(
            prover.output_proof(&output),
            Err(ProofError::Unsatisfied(_))
        ));
    }

    #[test]
    fn test_spend_by_foreign_key_rejected() {
        let mut rng = StdRng::seed_from_u64(53);
        let mut spend = spend_statement(&mut rng);

        // Same note, nullifier key of somebody else
        let other = SpendingKey::from_bytes([5u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap();
        spend.nk = *other.nk();
        spend.nullifier = Nullifier::derive(&spend.nk, &spend.note.rho);
        assert!(spend.check().is_err());
    }

    #[test]
    fn test_groth16_not_accepted_by_stub() {
        let mut rng = StdRng::seed_from_u64(54);
        let output = output_statement(&mut rng);
        let prover = StubProver::new();
        assert!(!prover.verify(
            &Proof::Groth16([0u8; GROTH16_PROOF_SIZE]),
            &output.public_inputs()
        ));
    }

    #[test]
    fn test_different_key_rejects() {
        let mut rng = StdRng::seed_from_u64(55);
        let output = output_statement(&mut rng);
        let proof = StubProver::new().output_proof(&output).unwrap();
        assert!(!StubProver::with_key([9u8; 32]).verify(&proof, &output.public_inputs()));
    }

    #[test]
    fn test_proof_wire_format() {
        let mut buf = Vec::new();
        Proof::Stub([7u8; 32]).write(&mut buf).unwrap();
        assert_eq!(buf.len(), 33);
        assert_eq!(buf[0], TAG_STUB);
        assert_eq!(Proof::read(&buf[..]).unwrap(), Proof::Stub([7u8; 32]));

        let mut buf = Vec::new();
        Proof::Groth16([1u8; 192]).write(&mut buf).unwrap();
        assert_eq!(buf.len(), 193);

        assert!(Proof::read(&[0x05u8, 0, 0][..]).is_err());
        assert!(Proof::read(&buf[..100]).is_err());
    }
}
