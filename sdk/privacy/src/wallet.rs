//! Shielded Wallet Engine
//!
//! One engine per wallet identity. The note store and the commitment tree
//! sit behind a single mutex, so every block (and every applied
//! transaction) lands as one atomic step:
//!
//! ```text
//!  ChainBlock ──▶ trial decryption (rayon, no lock)
//!                     │
//!                     ▼
//!            ┌─ lock WalletState ─────────────────────────┐
//!            │ append every cmu, store owned notes,       │
//!            │ mark nullifiers spent, journal the block   │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! The journal of applied blocks is the recovery log: [`rebuild`] replays it
//! from scratch. A block that was already applied is skipped; a block that
//! repeats only some known commitments is refused before anything changes.
//!
//! [`rebuild`]: ShieldedWalletEngine::rebuild

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use meshcrypt_config::MeshCryptConfig;
use rand::{CryptoRng, RngCore};

use crate::address::{Address, Network};
use crate::builder::{BuiltTransaction, Payment, TransactionBuilder};
use crate::commitment::ExtractedNoteCommitment;
use crate::error::{Error, Result};
use crate::keys::{ExpandedSpendingKey, SpendingKey, ViewingKey};
use crate::merkle::{Anchor, CommitmentTree, DEFAULT_ROOT_HISTORY};
use crate::note::{NoteValue, ShieldedNote};
use crate::nullifier::Nullifier;
use crate::proof::ProofGateway;
use crate::scanner;
use crate::store::NoteStore;
use crate::transaction::{OutputDescription, ShieldedTransaction};

const BLOCK_ID_PERSONALIZATION: &str = "MeshCrypt 2024 block contents v1";

/// Engine settings, usually read from [`MeshCryptConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSettings {
    pub network: Network,
    pub root_history_size: usize,
    pub default_fee: NoteValue,
    pub change_index_base: u32,
    pub parallel_scan: bool,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self::try_from(&MeshCryptConfig::default()).unwrap_or(Self {
            network: Network::Testnet,
            root_history_size: DEFAULT_ROOT_HISTORY,
            default_fee: NoteValue::new(10_000),
            change_index_base: 1 << 20,
            parallel_scan: true,
        })
    }
}

impl TryFrom<&MeshCryptConfig> for WalletSettings {
    type Error = Error;

    fn try_from(config: &MeshCryptConfig) -> Result<Self> {
        Ok(Self {
            network: config.network.name.parse()?,
            root_history_size: config.wallet.root_history_size,
            default_fee: NoteValue::new(config.wallet.default_fee),
            change_index_base: config.wallet.change_index_base,
            parallel_scan: config.scanner.parallel,
        })
    }
}

/// Shielded data of one block, in chain order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub height: u64,
    pub nullifiers: Vec<Nullifier>,
    pub outputs: Vec<OutputDescription>,
}

impl ChainBlock {
    /// A block holding exactly one transaction
    pub fn from_transaction(height: u64, tx: &ShieldedTransaction) -> Self {
        Self {
            height,
            nullifiers: tx.nullifiers().copied().collect(),
            outputs: tx.outputs.clone(),
        }
    }

    /// Digest of the block's shielded contents; the height is not part of it
    pub fn content_id(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key(BLOCK_ID_PERSONALIZATION);
        hasher.update(&(self.nullifiers.len() as u64).to_le_bytes());
        for nf in &self.nullifiers {
            hasher.update(nf.as_bytes());
        }
        hasher.update(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.cmu.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    fn is_empty(&self) -> bool {
        self.nullifiers.is_empty() && self.outputs.is_empty()
    }
}

/// What a scanned block changed in the wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub height: u64,
    /// Commitments appended to the tree
    pub appended: usize,
    /// Notes received, with their positions set
    pub received: Vec<ShieldedNote>,
    /// Owned notes that became spent
    pub spent: usize,
}

struct WalletState {
    store: NoteStore,
    tree: CommitmentTree,
    journal: Vec<ChainBlock>,
    /// Content ids of non-empty journal entries
    applied: HashSet<[u8; 32]>,
    /// Every cmu in the tree
    commitments: HashSet<ExtractedNoteCommitment>,
}

impl WalletState {
    fn new(viewing_key: &ViewingKey, root_history_size: usize) -> Self {
        Self {
            store: NoteStore::new(*viewing_key.nk()),
            tree: CommitmentTree::new(root_history_size),
            journal: Vec::new(),
            applied: HashSet::new(),
            commitments: HashSet::new(),
        }
    }

    fn tip(&self) -> Option<u64> {
        self.journal.last().map(|b| b.height)
    }

    /// Apply one block
    ///
    /// Every check runs before the first append, so a refused block leaves
    /// the state as it was. Re-applying a block already in the journal is a
    /// no-op that reports nothing appended.
    fn apply(&mut self, block: ChainBlock, found: scanner::ScanResult) -> Result<ScanSummary> {
        if let Some(tip) = self.tip() {
            if block.height < tip {
                return Err(Error::OutOfOrderBlock {
                    height: block.height,
                    tip,
                });
            }
        }

        let id = block.content_id();
        if !block.is_empty() && self.applied.contains(&id) {
            log::debug!("block {} was already applied, skipping", block.height);
            return Ok(ScanSummary {
                height: block.height,
                ..ScanSummary::default()
            });
        }

        let mut incoming = HashSet::with_capacity(block.outputs.len());
        for output in &block.outputs {
            if self.commitments.contains(&output.cmu) || !incoming.insert(output.cmu) {
                return Err(Error::DuplicateCommitment(output.cmu));
            }
        }
        self.tree.ensure_capacity(block.outputs.len() as u64)?;

        let mut found = found.into_iter().peekable();
        let mut received = Vec::new();
        for (index, output) in block.outputs.iter().enumerate() {
            let position = self.tree.append_commitment(&output.cmu)?;
            if let Some((_, note)) = found.next_if(|(i, _)| *i == index) {
                let note = note.with_position(position);
                self.store.add_note(note.clone());
                received.push(note);
            }
        }

        let spent = block
            .nullifiers
            .iter()
            .filter(|nf| self.store.mark_spent(**nf))
            .count();

        let summary = ScanSummary {
            height: block.height,
            appended: block.outputs.len(),
            received,
            spent,
        };
        self.commitments.extend(incoming);
        if !block.is_empty() {
            self.applied.insert(id);
        }
        self.journal.push(block);
        Ok(summary)
    }
}

pub struct ShieldedWalletEngine {
    expsk: ExpandedSpendingKey,
    viewing_key: ViewingKey,
    settings: WalletSettings,
    state: Mutex<WalletState>,
    next_address_index: AtomicU32,
    next_change_index: AtomicU32,
}

impl ShieldedWalletEngine {
    pub fn new(spending_key: &SpendingKey, settings: WalletSettings) -> Result<Self> {
        let expsk = spending_key.expand()?;
        let viewing_key = expsk.viewing_key()?;
        let state = WalletState::new(&viewing_key, settings.root_history_size);

        log::info!(
            "wallet engine ready on {} (default address {})",
            settings.network,
            viewing_key.address(0).encode(settings.network)
        );

        Ok(Self {
            expsk,
            viewing_key,
            next_change_index: AtomicU32::new(settings.change_index_base),
            settings,
            state: Mutex::new(state),
            next_address_index: AtomicU32::new(1),
        })
    }

    pub fn from_config(spending_key: &SpendingKey, config: &MeshCryptConfig) -> Result<Self> {
        Self::new(spending_key, WalletSettings::try_from(config)?)
    }

    /// Recreate an engine from a persisted block journal
    pub fn from_journal(
        spending_key: &SpendingKey,
        settings: WalletSettings,
        journal: Vec<ChainBlock>,
    ) -> Result<Self> {
        let engine = Self::new(spending_key, settings)?;
        for block in journal {
            engine.scan_block(block)?;
        }
        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &WalletSettings {
        &self.settings
    }

    pub fn network(&self) -> Network {
        self.settings.network
    }

    pub fn viewing_key(&self) -> &ViewingKey {
        &self.viewing_key
    }

    /// Diversified address at `index`
    pub fn address(&self, index: u32) -> Address {
        self.viewing_key.address(index)
    }

    /// A fresh, never handed out address
    pub fn next_address(&self) -> Address {
        let index = self.next_address_index.fetch_add(1, Ordering::Relaxed);
        self.address(index)
    }

    pub fn balance(&self) -> Result<NoteValue> {
        self.lock().store.balance()
    }

    /// Unspent notes ordered by tree position
    pub fn unspent_notes(&self) -> Vec<ShieldedNote> {
        self.lock()
            .store
            .unspent_notes()
            .into_iter()
            .map(|(_, note)| note.clone())
            .collect()
    }

    pub fn current_root(&self) -> Anchor {
        self.lock().tree.current_root()
    }

    pub fn is_known_anchor(&self, anchor: &Anchor) -> bool {
        self.lock().tree.is_known_anchor(anchor)
    }

    /// Height of the last applied block
    pub fn tip(&self) -> Option<u64> {
        self.lock().tip()
    }

    /// Copy of the applied blocks, for persistence
    pub fn journal(&self) -> Vec<ChainBlock> {
        self.lock().journal.clone()
    }

    fn trial_decrypt(&self, outputs: &[OutputDescription]) -> scanner::ScanResult {
        let ivk = self.viewing_key.ivk();
        if self.settings.parallel_scan {
            scanner::scan_outputs(outputs, ivk)
        } else {
            scanner::scan_sequential(outputs, ivk)
        }
    }

    /// Append the block's commitments, pick up owned notes,
    /// mark nullifiers spent
    pub fn scan_block(&self, block: ChainBlock) -> Result<ScanSummary> {
        let found = self.trial_decrypt(&block.outputs);
        let summary = self.lock().apply(block, found)?;

        log::debug!(
            "scanned block {}: {} commitments, {} received, {} spent",
            summary.height,
            summary.appended,
            summary.received.len(),
            summary.spent
        );
        Ok(summary)
    }

    /// Apply an accepted transaction: its spends and outputs land together
    pub fn apply_transaction(&self, height: u64, tx: &ShieldedTransaction) -> Result<ScanSummary> {
        self.scan_block(ChainBlock::from_transaction(height, tx))
    }

    /// Build a transaction paying `payments` plus `fee` from unspent notes
    ///
    /// Wallet state is only read. Apply the result with
    /// [`apply_transaction`](Self::apply_transaction) once it is accepted.
    pub fn build_transaction<R: RngCore + CryptoRng>(
        &self,
        payments: &[Payment],
        fee: NoteValue,
        prover: &dyn ProofGateway,
        rng: &mut R,
    ) -> Result<BuiltTransaction> {
        let change_index = self.next_change_index.fetch_add(1, Ordering::Relaxed);
        let change_address = self.address(change_index);

        let state = self.lock();
        let inputs = state.store.unspent_notes();
        TransactionBuilder::new(&self.expsk, &state.store, &state.tree, prover, change_address)
            .build(inputs.into_iter().map(|(_, note)| note), payments, fee, rng)
    }

    /// Re-derive notes and tree from the journal alone
    ///
    /// The lock is held from reading the journal to swapping in the result,
    /// so blocks scanned meanwhile wait and then land on the rebuilt state.
    pub fn rebuild(&self) -> Result<()> {
        let mut state = self.lock();
        let mut fresh = WalletState::new(&self.viewing_key, self.settings.root_history_size);
        for block in &state.journal {
            let found = self.trial_decrypt(&block.outputs);
            fresh.apply(block.clone(), found)?;
        }

        log::info!(
            "rebuilt wallet state from {} blocks ({} notes)",
            fresh.journal.len(),
            fresh.store.len()
        );
        *state = fresh;
        Ok(())
    }
}

impl std::fmt::Debug for ShieldedWalletEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShieldedWalletEngine")
            .field("network", &self.settings.network)
            .field("tip", &self.tip())
            .finish_non_exhaustive()
    }
}
