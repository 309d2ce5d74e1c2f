//! Trial-decryption scanner
//!
//! Every output is tried independently against one incoming viewing key, so
//! the work splits across rayon workers when the `parallel` feature is on.
//! Results always come back in output order.

use crate::encryption::{self, ShieldedOutput};
use crate::keys::IncomingViewingKey;
use crate::note::ShieldedNote;

/// Notes found in a batch of outputs, tagged with the output index
pub type ScanResult = Vec<(usize, ShieldedNote)>;

/// scan outputs one after another
pub fn scan_sequential<O>(outputs: &[O], ivk: &IncomingViewingKey) -> ScanResult
where
    O: ShieldedOutput,
{
    outputs
        .iter()
        .enumerate()
        .filter_map(|(i, output)| encryption::try_decrypt(output, ivk).map(|note| (i, note)))
        .collect()
}

/// scan outputs on the rayon pool
#[cfg(feature = "parallel")]
pub fn scan_parallel<O>(outputs: &[O], ivk: &IncomingViewingKey) -> ScanResult
where
    O: ShieldedOutput + Sync,
{
    use rayon::prelude::*;
    outputs
        .par_iter()
        .enumerate()
        .filter_map(|(i, output)| encryption::try_decrypt(output, ivk).map(|note| (i, note)))
        .collect()
}

/// Parallel when compiled with `parallel`, sequential otherwise
pub fn scan_outputs<O>(outputs: &[O], ivk: &IncomingViewingKey) -> ScanResult
where
    O: ShieldedOutput + Sync,
{
    #[cfg(feature = "parallel")]
    {
        scan_parallel(outputs, ivk)
    }
    #[cfg(not(feature = "parallel"))]
    {
        scan_sequential(outputs, ivk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{ValueCommitTrapdoor, ValueCommitment};
    use crate::encryption::{EphemeralSecretKey, NoteCiphertext, encrypt_note};
    use crate::keys::{SpendingKey, ViewingKey};
    use crate::note::NoteValue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn viewing_key(seed: u8) -> ViewingKey {
        SpendingKey::from_bytes([seed; 32])
            .unwrap()
            .viewing_key()
            .unwrap()
    }

    fn output_to(vk: &ViewingKey, value: u64, rng: &mut StdRng) -> NoteCiphertext {
        let note = ShieldedNote::new(vk.address(value as u32 % 4), NoteValue::new(value), None, rng);
        let cv = ValueCommitment::derive(note.value, &ValueCommitTrapdoor::random(rng));
        encrypt_note(&note, &EphemeralSecretKey::random(rng), vk.ovk(), &cv).unwrap()
    }

    #[test]
    fn test_scan_finds_only_own_outputs() {
        let mut rng = StdRng::seed_from_u64(71);
        let alice = viewing_key(71);
        let bob = viewing_key(72);

        let outputs = vec![
            output_to(&bob, 1, &mut rng),
            output_to(&alice, 2, &mut rng),
            output_to(&bob, 3, &mut rng),
            output_to(&alice, 4, &mut rng),
        ];

        let found = scan_outputs(&outputs, alice.ivk());
        let indices: Vec<usize> = found.iter().map(|(i, _)| *i).collect();
        let values: Vec<u64> = found.iter().map(|(_, n)| n.value.as_u64()).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(values, vec![2, 4]);
    }

    #[test]
    fn test_scan_is_repeatable() {
        let mut rng = StdRng::seed_from_u64(73);
        let alice = viewing_key(73);
        let outputs: Vec<_> = (1..=6).map(|v| output_to(&alice, v, &mut rng)).collect();

        let first = scan_outputs(&outputs, alice.ivk());
        assert_eq!(first.len(), 6);
        assert_eq!(first, scan_sequential(&outputs, alice.ivk()));
        assert_eq!(first, scan_outputs(&outputs, alice.ivk()));
    }
}
