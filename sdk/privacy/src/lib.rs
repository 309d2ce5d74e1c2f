//! MeshCrypt Privacy SDK
//!
//! Shielded value transfer over Jubjub: keys, diversified addresses, note
//! commitments, nullifiers, trial decryption and transaction building.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Shielded Transaction                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐ │
//! │  │    Spends    │  │   Outputs    │  │   Binding Signature   │ │
//! │  │ (nf, cv, rk) │  │ (cmu, cv,    │  │ Σcv_in − Σcv_out −    │ │
//! │  │              │  │  ciphertext) │  │ [fee] V = [bsk] R     │ │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘ │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              ProofGateway (Groth16 / stub)              │   │
//! │  │  • Note is in the tree at the anchor                    │   │
//! │  │  • Nullifier and rk derive from the owning keys         │   │
//! │  │  • cv and cmu open to the note value                    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ShieldedWalletEngine`] ties it together for one wallet identity:
//! scanning blocks into a [`NoteStore`] and a [`CommitmentTree`], and
//! building transactions from them with a [`TransactionBuilder`].

pub mod address;
pub mod builder;
pub mod commitment;
pub mod encryption;
pub mod error;
mod group;
pub mod keys;
pub mod merkle;
pub mod note;
pub mod nullifier;
pub mod pedersen;
pub mod proof;
pub mod scanner;
pub mod signature;
pub mod stealth;
pub mod store;
pub mod transaction;
pub mod wallet;

pub use address::{Address, Diversifier, Network, decode_address};
pub use builder::{BuiltTransaction, Payment, StateTransition, TransactionBuilder, shield};
pub use commitment::{ExtractedNoteCommitment, ValueCommitment, note_commit};
pub use encryption::{ShieldedOutput, encrypt_note, try_decrypt, try_output_recovery};
pub use error::{Error, Result};
pub use keys::{
    ExpandedSpendingKey, IncomingViewingKey, OutgoingViewingKey, SpendingKey, ViewingKey,
    derive_viewing_key, generate_mnemonic,
};
pub use merkle::{Anchor, CommitmentTree, MerkleHasher, RootHistory, TREE_DEPTH, Witness};
pub use note::{COIN, Memo, NoteValue, ShieldedNote};
pub use nullifier::{Nullifier, NullifierKey};
pub use pedersen::PedersenCommitment;
pub use proof::{Proof, ProofError, ProofGateway, PublicInputs, StubProver};
pub use scanner::scan_outputs;
pub use store::NoteStore;
pub use transaction::{OutputDescription, ShieldedTransaction, SpendDescription, TxId};
pub use wallet::{ChainBlock, ScanSummary, ShieldedWalletEngine, WalletSettings};
