//! Merkle Tree for Note Commitments
//!
//! Append-only sparse Merkle tree over extracted note commitments. Spends
//! prove membership against an anchor (a recent root) without revealing which
//! leaf they open.
//!
//! ```text
//!                    Root (anchor)
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               H0  H1 H2   H3
//!               |   |   |    |
//!             cm0 cm1 cm2  cm3  (extracted note commitments)
//! ```
//!
//! Nodes are Poseidon hashes over the BLS12-381 scalar field, the same field
//! `cmu` lives in.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::OnceLock;

use ark_bls12_381::Fr as Fq;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use serde::{Deserialize, Serialize};

use crate::commitment::ExtractedNoteCommitment;
use crate::error::{Error, Result};
use crate::group;

/// Tree depth (supports 2^32 notes)
pub const TREE_DEPTH: usize = 32;

/// Number of leaves a full tree holds
pub const TREE_CAPACITY: u64 = 1 << TREE_DEPTH;

/// Default number of recent roots accepted as anchors
pub const DEFAULT_ROOT_HISTORY: usize = 100;

/// A tree root that spends may reference
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor(pub(crate) [u8; 32]);

impl Anchor {
    /// Parse, rejecting non-canonical field elements
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        group::decode_base(bytes).map(|_| Self(*bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn from_field(f: &Fq) -> Self {
        Self(group::encode_base(f))
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anchor({})", hex::encode(self.0))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Authentication path proving inclusion of a leaf under `anchor`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// The leaf position
    pub position: u64,
    /// Root the path authenticates against
    pub anchor: Anchor,
    /// Sibling hashes from leaf to root
    pub path_elements: Vec<[u8; 32]>,
    /// Position bits (false = left, true = right)
    pub path_indices: Vec<bool>,
}

impl Witness {
    /// Root obtained by hashing `leaf` up the path
    pub fn root_for(&self, leaf: &ExtractedNoteCommitment) -> Option<Anchor> {
        if self.path_elements.len() != TREE_DEPTH || self.path_indices.len() != TREE_DEPTH {
            return None;
        }
        let siblings = self
            .path_elements
            .iter()
            .map(group::decode_base)
            .collect::<Option<Vec<_>>>()?;

        let hasher = MerkleHasher::get();
        let root = hasher.compute_root_from_path(leaf.to_field(), &siblings, &self.path_indices);
        Some(Anchor::from_field(&root))
    }

    /// Path bits must spell out `position`
    fn indices_match_position(&self) -> bool {
        self.path_indices
            .iter()
            .enumerate()
            .all(|(level, bit)| *bit == ((self.position >> level) & 1 == 1))
    }
}

/// Poseidon-based Merkle hash function
pub struct MerkleHasher {
    config: PoseidonConfig<Fq>,
    /// Precomputed empty subtree roots at each level
    empty_roots: Vec<Fq>,
}

impl MerkleHasher {
    /// Shared instance; the Poseidon parameters are expensive to generate
    pub fn get() -> &'static Self {
        static HASHER: OnceLock<MerkleHasher> = OnceLock::new();
        HASHER.get_or_init(Self::new)
    }

    fn new() -> Self {
        let config = Self::poseidon_config();
        let empty_leaf = Self::compute_empty_leaf(&config);
        let empty_roots = Self::compute_empty_roots(&config, empty_leaf);

        Self {
            config,
            empty_roots,
        }
    }

    /// Hash two children to get parent
    pub fn hash_pair(&self, left: &Fq, right: &Fq) -> Fq {
        let mut sponge = PoseidonSponge::new(&self.config);
        sponge.absorb(left);
        sponge.absorb(right);
        sponge.squeeze_field_elements::<Fq>(1)[0]
    }

    /// Get the empty root at a given depth
    pub fn empty_root(&self, depth: usize) -> Fq {
        self.empty_roots[depth]
    }

    /// Compute root from leaf and authentication path
    pub fn compute_root_from_path(&self, leaf: Fq, siblings: &[Fq], path_bits: &[bool]) -> Fq {
        siblings
            .iter()
            .zip(path_bits.iter())
            .fold(leaf, |current, (sibling, is_right)| {
                if *is_right {
                    self.hash_pair(sibling, &current)
                } else {
                    self.hash_pair(&current, sibling)
                }
            })
    }

    fn poseidon_config() -> PoseidonConfig<Fq> {
        let (ark, mds) = find_poseidon_ark_and_mds::<Fq>(255, 2, 8, 57, 0);
        PoseidonConfig::new(8, 57, 5, mds, ark, 2, 1)
    }

    fn compute_empty_leaf(config: &PoseidonConfig<Fq>) -> Fq {
        let mut sponge = PoseidonSponge::new(config);
        sponge.absorb(&Fq::from(0u64));
        sponge.squeeze_field_elements::<Fq>(1)[0]
    }

    fn compute_empty_roots(config: &PoseidonConfig<Fq>, empty_leaf: Fq) -> Vec<Fq> {
        let mut roots = Vec::with_capacity(TREE_DEPTH + 1);
        roots.push(empty_leaf);

        let mut prev = empty_leaf;
        for _ in 0..TREE_DEPTH {
            let mut sponge = PoseidonSponge::new(config);
            sponge.absorb(&prev);
            sponge.absorb(&prev);
            prev = sponge.squeeze_field_elements::<Fq>(1)[0];
            roots.push(prev);
        }

        roots
    }
}

/// Root history for the commitment tree
///
/// Stores recent roots so that transactions built against a slightly stale
/// root still verify.
#[derive(Debug, Clone)]
pub struct RootHistory {
    /// Recent roots (most recent first)
    roots: VecDeque<Anchor>,
    /// Maximum history size
    max_size: usize,
}

impl RootHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            roots: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    /// Add a new root, pruning the oldest once full
    pub fn push(&mut self, root: Anchor) {
        self.roots.push_front(root);
        self.roots.truncate(self.max_size);
    }

    /// Check if a root is valid (current or recent)
    pub fn contains(&self, root: &Anchor) -> bool {
        self.roots.contains(root)
    }

    /// Get the most recent root
    pub fn current(&self) -> Option<&Anchor> {
        self.roots.front()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Append-only commitment tree with anchor tracking
///
/// Sparse: only non-empty nodes are stored.
#[derive(Debug, Clone)]
pub struct CommitmentTree {
    /// Non-empty nodes: (level, index) -> hash
    nodes: HashMap<(usize, u64), Fq>,
    /// Next available leaf position
    next_index: u64,
    /// Current root
    root: Fq,
    history: RootHistory,
}

impl CommitmentTree {
    /// Create a new empty tree remembering `root_history_size` roots
    pub fn new(root_history_size: usize) -> Self {
        let root = MerkleHasher::get().empty_root(TREE_DEPTH);
        let mut history = RootHistory::new(root_history_size);
        history.push(Anchor::from_field(&root));

        Self {
            nodes: HashMap::new(),
            next_index: 0,
            root,
            history,
        }
    }

    /// Root of the tree as it stands
    pub fn current_root(&self) -> Anchor {
        Anchor::from_field(&self.root)
    }

    /// Number of leaves appended so far
    pub fn size(&self) -> u64 {
        self.next_index
    }

    /// Fail with `TreeFull` unless `count` more leaves fit
    pub fn ensure_capacity(&self, count: u64) -> Result<()> {
        match self.next_index.checked_add(count) {
            Some(end) if end <= TREE_CAPACITY => Ok(()),
            _ => Err(Error::TreeFull),
        }
    }

    /// Insert a leaf and return its position
    pub fn append_commitment(&mut self, cmu: &ExtractedNoteCommitment) -> Result<u64> {
        self.ensure_capacity(1)?;

        let position = self.next_index;
        self.insert_at(position, cmu.to_field());
        self.next_index += 1;
        self.history.push(self.current_root());

        log::debug!("appended commitment at position {position}");
        Ok(position)
    }

    fn insert_at(&mut self, position: u64, leaf: Fq) {
        let hasher = MerkleHasher::get();
        self.nodes.insert((0, position), leaf);

        // Update path to root
        let mut current_index = position;
        let mut current_hash = leaf;

        for level in 0..TREE_DEPTH {
            let is_right = current_index & 1 == 1;
            let sibling = self.node(level, current_index ^ 1);

            current_hash = if is_right {
                hasher.hash_pair(&sibling, &current_hash)
            } else {
                hasher.hash_pair(&current_hash, &sibling)
            };
            current_index >>= 1;

            self.nodes.insert((level + 1, current_index), current_hash);
        }

        self.root = current_hash;
    }

    fn node(&self, level: usize, index: u64) -> Fq {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or_else(|| MerkleHasher::get().empty_root(level))
    }

    /// Leaf stored at `position`
    pub fn leaf(&self, position: u64) -> Option<ExtractedNoteCommitment> {
        self.nodes
            .get(&(0, position))
            .map(|f| ExtractedNoteCommitment(group::encode_base(f)))
    }

    /// Authentication path against the current root
    pub fn witness_for(&self, position: u64) -> Result<Witness> {
        if position >= self.next_index {
            return Err(Error::UnknownLeaf(position));
        }

        let mut path_elements = Vec::with_capacity(TREE_DEPTH);
        let mut path_indices = Vec::with_capacity(TREE_DEPTH);
        let mut current_index = position;

        for level in 0..TREE_DEPTH {
            path_indices.push(current_index & 1 == 1);
            path_elements.push(group::encode_base(&self.node(level, current_index ^ 1)));
            current_index >>= 1;
        }

        Ok(Witness {
            position,
            anchor: self.current_root(),
            path_elements,
            path_indices,
        })
    }

    /// Check that `witness` authenticates `cmu` under a known anchor
    pub fn validate_witness(&self, witness: &Witness, cmu: &ExtractedNoteCommitment) -> Result<()> {
        if !self.history.contains(&witness.anchor) {
            return Err(Error::StaleAnchor);
        }
        if !witness.indices_match_position() {
            return Err(Error::InvalidWitness);
        }
        match witness.root_for(cmu) {
            Some(root) if root == witness.anchor => Ok(()),
            _ => Err(Error::InvalidWitness),
        }
    }

    /// Whether `anchor` is among the retained recent roots
    pub fn is_known_anchor(&self, anchor: &Anchor) -> bool {
        self.history.contains(anchor)
    }

    pub fn root_history(&self) -> &RootHistory {
        &self.history
    }
}

impl Default for CommitmentTree {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(byte: u8) -> ExtractedNoteCommitment {
        ExtractedNoteCommitment::from_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree = CommitmentTree::default();
        assert_eq!(tree.size(), 0);
        assert_eq!(
            tree.current_root(),
            Anchor::from_field(&MerkleHasher::get().empty_root(TREE_DEPTH))
        );
        assert!(tree.is_known_anchor(&tree.current_root()));
    }

    #[test]
    fn test_append_and_witness() {
        let mut tree = CommitmentTree::default();

        assert_eq!(tree.append_commitment(&cm(1)).unwrap(), 0);
        assert_eq!(tree.append_commitment(&cm(2)).unwrap(), 1);
        assert_eq!(tree.append_commitment(&cm(3)).unwrap(), 2);

        for (pos, leaf) in [(0, cm(1)), (1, cm(2)), (2, cm(3))] {
            let witness = tree.witness_for(pos).unwrap();
            assert_eq!(witness.anchor, tree.current_root());
            assert_eq!(witness.path_elements.len(), TREE_DEPTH);
            tree.validate_witness(&witness, &leaf).unwrap();
        }
        assert_eq!(tree.leaf(1), Some(cm(2)));
    }

    #[test]
    fn test_witness_wrong_commitment() {
        let mut tree = CommitmentTree::default();
        tree.append_commitment(&cm(1)).unwrap();

        let witness = tree.witness_for(0).unwrap();
        assert!(matches!(
            tree.validate_witness(&witness, &cm(9)),
            Err(Error::InvalidWitness)
        ));
    }

    #[test]
    fn test_witness_position_mismatch() {
        let mut tree = CommitmentTree::default();
        tree.append_commitment(&cm(1)).unwrap();
        tree.append_commitment(&cm(2)).unwrap();

        let mut witness = tree.witness_for(0).unwrap();
        witness.position = 1;
        assert!(matches!(
            tree.validate_witness(&witness, &cm(1)),
            Err(Error::InvalidWitness)
        ));
    }

    #[test]
    fn test_unknown_leaf() {
        let mut tree = CommitmentTree::default();
        assert!(matches!(tree.witness_for(0), Err(Error::UnknownLeaf(0))));

        tree.append_commitment(&cm(1)).unwrap();
        assert!(matches!(tree.witness_for(5), Err(Error::UnknownLeaf(5))));
    }

    #[test]
    fn test_root_changes() {
        let mut tree = CommitmentTree::default();
        let root0 = tree.current_root();

        tree.append_commitment(&cm(1)).unwrap();
        let root1 = tree.current_root();
        assert_ne!(root0, root1, "root should change after insert");

        tree.append_commitment(&cm(2)).unwrap();
        assert_ne!(root1, tree.current_root(), "root should change after each insert");
    }

    #[test]
    fn test_old_witness_valid_until_pruned() {
        let mut tree = CommitmentTree::new(3);
        tree.append_commitment(&cm(1)).unwrap();
        let witness = tree.witness_for(0).unwrap();

        // Two more roots: the witness anchor is still among the last three
        tree.append_commitment(&cm(2)).unwrap();
        tree.append_commitment(&cm(3)).unwrap();
        tree.validate_witness(&witness, &cm(1)).unwrap();

        tree.append_commitment(&cm(4)).unwrap();
        assert!(!tree.is_known_anchor(&witness.anchor));
        assert!(matches!(
            tree.validate_witness(&witness, &cm(1)),
            Err(Error::StaleAnchor)
        ));

        // A fresh witness for the same leaf is fine
        let fresh = tree.witness_for(0).unwrap();
        tree.validate_witness(&fresh, &cm(1)).unwrap();
    }

    #[test]
    fn test_tree_full() {
        let mut tree = CommitmentTree::default();
        tree.next_index = TREE_CAPACITY - 1;

        assert_eq!(tree.append_commitment(&cm(1)).unwrap(), TREE_CAPACITY - 1);
        assert!(matches!(tree.append_commitment(&cm(2)), Err(Error::TreeFull)));
        assert!(tree.ensure_capacity(0).is_ok());
        assert!(matches!(tree.ensure_capacity(1), Err(Error::TreeFull)));
    }

    #[test]
    fn test_root_history() {
        let mut history = RootHistory::new(2);
        let r1 = Anchor([1u8; 32]);
        let r2 = Anchor([2u8; 32]);
        let r3 = Anchor([3u8; 32]);

        history.push(r1);
        history.push(r2);
        assert!(history.contains(&r1));

        history.push(r3);
        assert!(!history.contains(&r1));
        assert!(history.contains(&r2));
        assert_eq!(history.current(), Some(&r3));
        assert_eq!(history.len(), 2);
    }
}
