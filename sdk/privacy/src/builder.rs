//! Transaction Builder
//!
//! Turns owned notes and payment requests into a signed
//! [`ShieldedTransaction`]:
//!
//! ```text
//! SelectInputs → ComputeChange → BuildSpends → BuildOutputs → Bind → Done
//! ```
//!
//! The builder only borrows the note store and the commitment tree. It hands
//! back the state transitions (nullifiers to mark spent, commitments to
//! append) and the caller applies them atomically once the transaction is
//! accepted. A failed build leaves no trace.

use std::collections::HashSet;
use std::fmt;

use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};

use crate::address::Address;
use crate::commitment::{ExtractedNoteCommitment, ValueCommitTrapdoor, ValueCommitment};
use crate::encryption::{self, EphemeralSecretKey};
use crate::error::{Error, Result};
use crate::keys::{ExpandedSpendingKey, OutgoingViewingKey};
use crate::merkle::CommitmentTree;
use crate::note::{Memo, NoteValue, ShieldedNote};
use crate::nullifier::Nullifier;
use crate::proof::{OutputStatement, ProofGateway, SpendStatement};
use crate::signature::{
    Binding, Randomizer, SIGNATURE_SIZE, Signature, SigningKey, SpendAuth, VerificationKey,
};
use crate::store::NoteStore;
use crate::transaction::{OutputDescription, ShieldedTransaction, SpendDescription};

/// A requested payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub recipient: Address,
    pub value: NoteValue,
    pub memo: Option<Memo>,
}

impl Payment {
    pub fn new(recipient: Address, value: NoteValue) -> Self {
        Self {
            recipient,
            value,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memo = Some(memo);
        self
    }
}

/// State change to apply once the transaction is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    MarkSpent(Nullifier),
    AppendCommitment(ExtractedNoteCommitment),
}

/// Output of a successful build
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub transaction: ShieldedTransaction,
    /// Spends first, then outputs in transaction order
    pub transitions: Vec<StateTransition>,
    /// Change note paid back to the sender, if any value was left over
    pub change: Option<ShieldedNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildStage {
    SelectInputs,
    ComputeChange,
    BuildSpends,
    BuildOutputs,
    Bind,
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::SelectInputs => "select-inputs",
            BuildStage::ComputeChange => "compute-change",
            BuildStage::BuildSpends => "build-spends",
            BuildStage::BuildOutputs => "build-outputs",
            BuildStage::Bind => "bind",
            BuildStage::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(stage: BuildStage) {
    log::debug!("transaction builder: {stage}");
}

/// A note chosen to fund the transaction
struct SelectedInput<'n> {
    note: &'n ShieldedNote,
    nullifier: Nullifier,
    position: u64,
}

/// Spend secrets kept until signing
struct SpendSecrets {
    alpha: Randomizer,
    rcv: ValueCommitTrapdoor,
}

pub struct TransactionBuilder<'a> {
    expsk: &'a ExpandedSpendingKey,
    store: &'a NoteStore,
    tree: &'a CommitmentTree,
    prover: &'a dyn ProofGateway,
    change_address: Address,
}

impl<'a> TransactionBuilder<'a> {
    /// `change_address` receives any value left after outputs and fee
    pub fn new(
        expsk: &'a ExpandedSpendingKey,
        store: &'a NoteStore,
        tree: &'a CommitmentTree,
        prover: &'a dyn ProofGateway,
        change_address: Address,
    ) -> Self {
        Self {
            expsk,
            store,
            tree,
            prover,
            change_address,
        }
    }

    /// Fund `outputs` plus `fee` from `inputs`, taken in order
    ///
    /// Every supplied input is checked against the spent set, including
    /// surplus inputs past the ones needed to cover the total. Passing a
    /// spent or repeated note anywhere in `inputs` fails with
    /// [`Error::DoubleSpendAttempt`] before any proof is requested.
    pub fn build<'n, I, R>(
        &self,
        inputs: I,
        outputs: &[Payment],
        fee: NoteValue,
        rng: &mut R,
    ) -> Result<BuiltTransaction>
    where
        I: IntoIterator<Item = &'n ShieldedNote>,
        R: RngCore + CryptoRng,
    {
        enter(BuildStage::SelectInputs);
        let need = NoteValue::checked_sum(outputs.iter().map(|p| p.value))
            .and_then(|total| total.checked_add(fee))
            .ok_or(Error::ValueOverflow)?;
        let value_balance = i64::try_from(fee.as_u64()).map_err(|_| Error::ValueOverflow)?;
        let (selected, total_in) = self.select_inputs(inputs, need)?;

        enter(BuildStage::ComputeChange);
        let change_value = total_in.checked_sub(need).ok_or(Error::UnbalancedTransaction)?;
        let mut notes = outputs
            .iter()
            .map(|p| ShieldedNote::new(p.recipient, p.value, p.memo.clone(), rng))
            .collect::<Vec<_>>();
        let change = (change_value > NoteValue::ZERO).then(|| {
            ShieldedNote::new(self.change_address, change_value, None, rng)
        });
        if let Some(change) = &change {
            log::debug!("change of {change_value} returned to sender");
            notes.push(change.clone());
            notes.shuffle(rng);
        }

        enter(BuildStage::BuildSpends);
        let (spends, spend_secrets) = self.build_spends(&selected, rng)?;

        enter(BuildStage::BuildOutputs);
        let (outputs, output_rcvs) = self.build_outputs(&notes, rng)?;

        enter(BuildStage::Bind);
        // Signatures are not part of the sighash, placeholders until signed
        let mut transaction = ShieldedTransaction {
            spends,
            outputs,
            value_balance,
            binding_sig: Signature::from_bytes(&[0u8; SIGNATURE_SIZE]),
        };
        let sighash = transaction.sighash();

        let ask = SigningKey::<SpendAuth>::from_scalar(self.expsk.ask);
        for (spend, secrets) in transaction.spends.iter_mut().zip(&spend_secrets) {
            spend.spend_auth_sig = ask.randomize(&secrets.alpha).sign(rng, &sighash);
        }

        let bsk = spend_secrets.iter().map(|s| s.rcv).sum::<ValueCommitTrapdoor>()
            - output_rcvs.into_iter().sum::<ValueCommitTrapdoor>();
        let bsk = SigningKey::<Binding>::from_scalar(bsk.0);
        let bvk: VerificationKey<Binding> = transaction.binding_verification_key();
        if bsk.verification_key() != bvk {
            return Err(Error::UnbalancedTransaction);
        }
        transaction.binding_sig = bsk.sign(rng, &sighash);

        let transitions = transaction
            .spends
            .iter()
            .map(|s| StateTransition::MarkSpent(s.nullifier))
            .chain(
                transaction
                    .outputs
                    .iter()
                    .map(|o| StateTransition::AppendCommitment(o.cmu)),
            )
            .collect();

        enter(BuildStage::Done);
        log::info!(
            "built transaction {} ({} spends, {} outputs, fee {fee})",
            transaction.txid(),
            transaction.spends.len(),
            transaction.outputs.len()
        );

        Ok(BuiltTransaction {
            transaction,
            transitions,
            change,
        })
    }

    /// Greedy selection in caller order
    ///
    /// Every candidate is checked against the spent set before anything is
    /// proven; unpositioned notes are not eligible.
    fn select_inputs<'n, I>(
        &self,
        inputs: I,
        need: NoteValue,
    ) -> Result<(Vec<SelectedInput<'n>>, NoteValue)>
    where
        I: IntoIterator<Item = &'n ShieldedNote>,
    {
        let nk = self.expsk.nullifier_key();
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        let mut total = NoteValue::ZERO;
        let mut eligible = NoteValue::ZERO;

        for note in inputs {
            let nullifier = note.nullifier(&nk);
            if self.store.is_spent(&nullifier) || !seen.insert(nullifier) {
                return Err(Error::DoubleSpendAttempt(nullifier));
            }
            let Some(position) = note.position else {
                log::debug!("skipping unpositioned note {nullifier}");
                continue;
            };

            eligible = eligible.checked_add(note.value).ok_or(Error::ValueOverflow)?;
            if total < need {
                total = total.checked_add(note.value).ok_or(Error::ValueOverflow)?;
                selected.push(SelectedInput {
                    note,
                    nullifier,
                    position,
                });
            }
        }

        if total < need {
            return Err(Error::InsufficientBalance {
                have: eligible,
                need,
            });
        }
        Ok((selected, total))
    }

    fn build_spends<R: RngCore + CryptoRng>(
        &self,
        selected: &[SelectedInput<'_>],
        rng: &mut R,
    ) -> Result<(Vec<SpendDescription>, Vec<SpendSecrets>)> {
        let ak = VerificationKey::<SpendAuth>::from_point(self.expsk.ak());
        let nk = self.expsk.nullifier_key();

        // Witnesses for every input before the first proof request
        let mut statements = Vec::with_capacity(selected.len());
        for input in selected {
            let witness = self.tree.witness_for(input.position)?;
            self.tree
                .validate_witness(&witness, &input.note.commitment())?;

            let alpha = Randomizer::random(rng);
            let rcv = ValueCommitTrapdoor::random(rng);
            statements.push(SpendStatement {
                cv: ValueCommitment::derive(input.note.value, &rcv),
                anchor: witness.anchor,
                nullifier: input.nullifier,
                rk: ak.randomize(&alpha),
                note: input.note.clone(),
                ak,
                nk,
                alpha,
                rcv,
                witness,
            });
        }

        let mut spends = Vec::with_capacity(statements.len());
        let mut secrets = Vec::with_capacity(statements.len());
        for statement in statements {
            let proof = self
                .prover
                .spend_proof(&statement)
                .map_err(Error::ProofGenerationFailed)?;
            spends.push(SpendDescription {
                cv: statement.cv,
                anchor: statement.anchor,
                nullifier: statement.nullifier,
                rk: statement.rk,
                proof,
                spend_auth_sig: Signature::from_bytes(&[0u8; SIGNATURE_SIZE]),
            });
            secrets.push(SpendSecrets {
                alpha: statement.alpha,
                rcv: statement.rcv,
            });
        }
        Ok((spends, secrets))
    }

    fn build_outputs<R: RngCore + CryptoRng>(
        &self,
        notes: &[ShieldedNote],
        rng: &mut R,
    ) -> Result<(Vec<OutputDescription>, Vec<ValueCommitTrapdoor>)> {
        notes
            .iter()
            .map(|note| build_output(note, self.expsk.ovk(), self.prover, rng))
            .collect::<Result<Vec<_>>>()
            .map(|built| built.into_iter().unzip())
    }
}

/// Encrypt and prove one output, returning it with its `rcv`
pub fn build_output<R: RngCore + CryptoRng>(
    note: &ShieldedNote,
    ovk: &OutgoingViewingKey,
    prover: &dyn ProofGateway,
    rng: &mut R,
) -> Result<(OutputDescription, ValueCommitTrapdoor)> {
    let rcv = ValueCommitTrapdoor::random(rng);
    let esk = EphemeralSecretKey::random(rng);
    let cv = ValueCommitment::derive(note.value, &rcv);
    let ciphertext = encryption::encrypt_note(note, &esk, ovk, &cv)?;

    let statement = OutputStatement {
        cv,
        cmu: ciphertext.cmu,
        epk: ciphertext.epk,
        note: note.clone(),
        esk,
        rcv,
    };
    let proof = prover
        .output_proof(&statement)
        .map_err(Error::ProofGenerationFailed)?;

    let output = OutputDescription {
        cv,
        cmu: ciphertext.cmu,
        ephemeral_key: ciphertext.epk,
        enc_ciphertext: ciphertext.enc_ciphertext,
        out_ciphertext: ciphertext.out_ciphertext,
        proof,
    };
    Ok((output, rcv))
}

/// Move transparent value into the pool: outputs only, negative value
/// balance
///
/// `ovk` lets the sender recover what was shielded.
pub fn shield<R: RngCore + CryptoRng>(
    payments: &[Payment],
    ovk: &OutgoingViewingKey,
    prover: &dyn ProofGateway,
    rng: &mut R,
) -> Result<BuiltTransaction> {
    let total = NoteValue::checked_sum(payments.iter().map(|p| p.value))
        .ok_or(Error::ValueOverflow)?;
    let value_balance = i64::try_from(total.as_u64())
        .map(|v| -v)
        .map_err(|_| Error::ValueOverflow)?;

    let mut outputs = Vec::with_capacity(payments.len());
    let mut bsk = ValueCommitTrapdoor::zero();
    for payment in payments {
        let note = ShieldedNote::new(payment.recipient, payment.value, payment.memo.clone(), rng);
        let (output, rcv) = build_output(&note, ovk, prover, rng)?;
        bsk = bsk - rcv;
        outputs.push(output);
    }

    let mut transaction = ShieldedTransaction {
        spends: Vec::new(),
        outputs,
        value_balance,
        binding_sig: Signature::from_bytes(&[0u8; SIGNATURE_SIZE]),
    };
    let bsk = SigningKey::<Binding>::from_scalar(bsk.0);
    if bsk.verification_key() != transaction.binding_verification_key() {
        return Err(Error::UnbalancedTransaction);
    }
    transaction.binding_sig = bsk.sign(rng, &transaction.sighash());

    log::info!("shielded {total} into {} outputs", transaction.outputs.len());
    let transitions = transaction
        .outputs
        .iter()
        .map(|o| StateTransition::AppendCommitment(o.cmu))
        .collect();
    Ok(BuiltTransaction {
        transaction,
        transitions,
        change: None,
    })
}
