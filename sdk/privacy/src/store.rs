//! Note Store
//!
//! Tracks the notes owned by one wallet identity, partitioned into unspent
//! and spent by nullifier.
//!
//! The spent set only grows. A nullifier may be marked spent before the note
//! it belongs to is known (replay out of order); the note is then spent as
//! soon as it arrives.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::note::{NoteValue, ShieldedNote};
use crate::nullifier::{Nullifier, NullifierKey};

#[derive(Debug, Clone)]
pub struct NoteStore {
    nk: NullifierKey,
    notes: HashMap<Nullifier, ShieldedNote>,
    /// Spent nullifiers (monotonic)
    spent: HashSet<Nullifier>,
}

impl NoteStore {
    pub fn new(nk: NullifierKey) -> Self {
        Self {
            nk,
            notes: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    /// Index a note under its nullifier
    ///
    /// Adding a known note again is a no-op, except that a missing position
    /// is filled in.
    pub fn add_note(&mut self, note: ShieldedNote) -> Nullifier {
        let nf = note.nullifier(&self.nk);
        match self.notes.get_mut(&nf) {
            Some(existing) => {
                if existing.position.is_none() {
                    existing.position = note.position;
                }
            }
            None => {
                log::debug!("stored note {nf} worth {}", note.value);
                self.notes.insert(nf, note);
            }
        }
        nf
    }

    /// Record a nullifier, known or not
    ///
    /// Returns `true` if the nullifier belongs to a stored note.
    pub fn mark_spent(&mut self, nf: Nullifier) -> bool {
        self.spent.insert(nf);
        self.notes.contains_key(&nf)
    }

    pub fn is_spent(&self, nf: &Nullifier) -> bool {
        self.spent.contains(nf)
    }

    pub fn note(&self, nf: &Nullifier) -> Option<&ShieldedNote> {
        self.notes.get(nf)
    }

    /// Unspent notes ordered by tree position (unpositioned last)
    pub fn unspent_notes(&self) -> Vec<(Nullifier, &ShieldedNote)> {
        let mut unspent: Vec<_> = self
            .notes
            .iter()
            .filter(|(nf, _)| !self.spent.contains(*nf))
            .map(|(nf, note)| (*nf, note))
            .collect();
        unspent.sort_by_key(|(nf, note)| (note.position.unwrap_or(u64::MAX), *nf));
        unspent
    }

    /// Sum of unspent note values
    pub fn balance(&self) -> Result<NoteValue> {
        NoteValue::checked_sum(
            self.notes
                .iter()
                .filter(|(nf, _)| !self.spent.contains(*nf))
                .map(|(_, note)| note.value),
        )
        .ok_or(Error::ValueOverflow)
    }

    /// Number of owned notes that have been spent
    pub fn spent_count(&self) -> usize {
        self.notes.keys().filter(|nf| self.spent.contains(*nf)).count()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{SpendingKey, ViewingKey};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup() -> (ViewingKey, NoteStore, StdRng) {
        let vk = SpendingKey::from_bytes([8u8; 32])
            .unwrap()
            .viewing_key()
            .unwrap();
        let store = NoteStore::new(*vk.nk());
        (vk, store, StdRng::seed_from_u64(8))
    }

    fn note(vk: &ViewingKey, value: u64, position: u64, rng: &mut StdRng) -> ShieldedNote {
        ShieldedNote::new(vk.address(0), NoteValue::new(value), None, rng).with_position(position)
    }

    #[test]
    fn test_balance_tracks_spends() {
        let (vk, mut store, mut rng) = setup();
        let nf1 = store.add_note(note(&vk, 100, 0, &mut rng));
        let _nf2 = store.add_note(note(&vk, 250, 1, &mut rng));

        assert_eq!(store.balance().unwrap(), NoteValue::new(350));
        assert!(store.mark_spent(nf1));
        assert!(store.is_spent(&nf1));
        assert_eq!(store.balance().unwrap(), NoteValue::new(250));
        assert_eq!(store.spent_count(), 1);
        assert_eq!(store.unspent_notes().len(), 1);
    }

    #[test]
    fn test_add_note_idempotent() {
        let (vk, mut store, mut rng) = setup();
        let n = note(&vk, 100, 3, &mut rng);

        let nf1 = store.add_note(n.clone());
        let nf2 = store.add_note(n);
        assert_eq!(nf1, nf2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.balance().unwrap(), NoteValue::new(100));
    }

    #[test]
    fn test_unknown_nullifier_spends_late_note() {
        let (vk, mut store, mut rng) = setup();
        let n = note(&vk, 100, 0, &mut rng);
        let nf = n.nullifier(vk.nk());

        assert!(!store.mark_spent(nf));
        store.add_note(n);
        assert_eq!(store.balance().unwrap(), NoteValue::ZERO);
        assert!(store.unspent_notes().is_empty());
    }

    #[test]
    fn test_unspent_ordered_by_position() {
        let (vk, mut store, mut rng) = setup();
        store.add_note(note(&vk, 3, 7, &mut rng));
        store.add_note(note(&vk, 1, 2, &mut rng));
        store.add_note(note(&vk, 2, 4, &mut rng));

        let values: Vec<u64> = store
            .unspent_notes()
            .iter()
            .map(|(_, n)| n.value.as_u64())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_balance_overflow() {
        let (vk, mut store, mut rng) = setup();
        store.add_note(note(&vk, u64::MAX, 0, &mut rng));
        store.add_note(note(&vk, 1, 1, &mut rng));
        assert!(matches!(store.balance(), Err(Error::ValueOverflow)));
    }
}
