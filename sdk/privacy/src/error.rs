//! Error taxonomy for the shielded engine.

use thiserror::Error;

use crate::commitment::ExtractedNoteCommitment;
use crate::note::NoteValue;
use crate::nullifier::Nullifier;
use crate::proof::ProofError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid spending key")]
    InvalidSpendingKey,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid recipient address: {0}")]
    InvalidRecipientAddress(String),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: NoteValue, need: NoteValue },

    #[error("transaction does not balance")]
    UnbalancedTransaction,

    #[error("proof generation failed")]
    ProofGenerationFailed(#[source] ProofError),

    #[error("unknown leaf {0}")]
    UnknownLeaf(u64),

    #[error("nullifier {0} is already spent")]
    DoubleSpendAttempt(Nullifier),

    #[error("anchor is no longer in the root history")]
    StaleAnchor,

    #[error("witness does not authenticate the commitment")]
    InvalidWitness,

    #[error("block {height} is below the scanned tip {tip}")]
    OutOfOrderBlock { height: u64, tip: u64 },

    #[error("block replays {0:?}, which is already in the tree")]
    DuplicateCommitment(ExtractedNoteCommitment),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("commitment tree is full")]
    TreeFull,

    #[error("value overflow")]
    ValueOverflow,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid proof")]
    InvalidProof,

    #[error("note encryption failed")]
    Encryption,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::InvalidEncoding(e.to_string())
    }
}
