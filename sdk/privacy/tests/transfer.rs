use std::sync::atomic::{AtomicUsize, Ordering};

use meshcrypt_privacy::merkle::CommitmentTree;
use meshcrypt_privacy::proof::{OutputStatement, SpendStatement};
use meshcrypt_privacy::{
    Address, COIN, Error, NoteStore, NoteValue, OutgoingViewingKey, Payment, Proof, ProofError,
    ProofGateway, PublicInputs, ShieldedNote, ShieldedWalletEngine, SpendingKey, StubProver,
    TransactionBuilder, WalletSettings, shield,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

const FEE: u64 = 10_000; // 0.0001

fn wallet(seed: u8) -> ShieldedWalletEngine {
    let sk = SpendingKey::from_bytes([seed; 32]).unwrap();
    ShieldedWalletEngine::new(&sk, WalletSettings::default()).unwrap()
}

/// Shield `value` to `to` and apply the funding block to every wallet
fn fund(to: Address, value: u64, height: u64, wallets: &[&ShieldedWalletEngine], rng: &mut StdRng) {
    let funding = shield(
        &[Payment::new(to, NoteValue::new(value))],
        &OutgoingViewingKey([0u8; 32]),
        &StubProver::new(),
        rng,
    )
    .unwrap();
    for w in wallets {
        w.apply_transaction(height, &funding.transaction).unwrap();
    }
}

#[test]
fn full_spend_conserves_value() {
    let mut rng = StdRng::seed_from_u64(1);
    let alice = wallet(1);
    let bob = wallet(2);
    let prover = StubProver::new();
    fund(alice.address(0), 10 * COIN, 1, &[&alice, &bob], &mut rng);
    assert_eq!(alice.balance().unwrap().to_string(), "10.0");

    let built = alice
        .build_transaction(
            &[Payment::new(bob.address(0), NoteValue::new(10 * COIN - FEE))],
            NoteValue::new(FEE),
            &prover,
            &mut rng,
        )
        .unwrap();
    assert!(built.change.is_none());
    built
        .transaction
        .verify(&prover, |a| alice.is_known_anchor(a))
        .unwrap();

    alice.apply_transaction(2, &built.transaction).unwrap();
    bob.apply_transaction(2, &built.transaction).unwrap();

    assert_eq!(alice.balance().unwrap(), NoteValue::ZERO);
    assert_eq!(bob.balance().unwrap().to_string(), "9.9999");
    assert_eq!(alice.current_root(), bob.current_root());
}

#[test]
fn partial_spend_returns_change() {
    let mut rng = StdRng::seed_from_u64(2);
    let alice = wallet(3);
    let bob = wallet(4);
    let prover = StubProver::new();
    fund(alice.address(0), 10 * COIN, 1, &[&alice, &bob], &mut rng);

    let built = alice
        .build_transaction(
            &[Payment::new(bob.address(5), NoteValue::new(9 * COIN))],
            NoteValue::new(FEE),
            &prover,
            &mut rng,
        )
        .unwrap();
    let change = built.change.clone().unwrap();
    assert_eq!(change.value.to_string(), "0.9999");

    let summary = alice.apply_transaction(2, &built.transaction).unwrap();
    assert_eq!(summary.spent, 1);
    assert_eq!(summary.received.len(), 1);
    assert_eq!(summary.received[0].value, change.value);

    bob.apply_transaction(2, &built.transaction).unwrap();
    assert_eq!(alice.balance().unwrap().to_string(), "0.9999");
    assert_eq!(bob.balance().unwrap().to_string(), "9.0");

    // Change is spendable
    let again = alice
        .build_transaction(
            &[Payment::new(bob.address(0), NoteValue::new(COIN / 2))],
            NoteValue::new(FEE),
            &prover,
            &mut rng,
        )
        .unwrap();
    again
        .transaction
        .verify(&prover, |a| alice.is_known_anchor(a))
        .unwrap();
}

#[test]
fn insufficient_funds_reports_have_and_need() {
    let mut rng = StdRng::seed_from_u64(3);
    let alice = wallet(5);
    fund(alice.address(0), COIN, 1, &[&alice], &mut rng);

    let err = alice
        .build_transaction(
            &[Payment::new(wallet(6).address(0), NoteValue::new(2 * COIN))],
            NoteValue::ZERO,
            &StubProver::new(),
            &mut rng,
        )
        .unwrap_err();

    assert!(matches!(err, Error::InsufficientBalance { .. }));
    assert_eq!(err.to_string(), "insufficient balance: have 1.0, need 2.0");
    assert_eq!(alice.balance().unwrap(), NoteValue::new(COIN));
}

/// Counts proof requests before delegating to the stub prover
#[derive(Default)]
struct CountingProver {
    inner: StubProver,
    requests: AtomicUsize,
}

impl ProofGateway for CountingProver {
    fn spend_proof(&self, statement: &SpendStatement) -> Result<Proof, ProofError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.spend_proof(statement)
    }

    fn output_proof(&self, statement: &OutputStatement) -> Result<Proof, ProofError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.output_proof(statement)
    }

    fn verify(&self, proof: &Proof, inputs: &PublicInputs) -> bool {
        self.inner.verify(proof, inputs)
    }
}

#[test]
fn double_spend_rejected_before_any_proof() {
    let mut rng = StdRng::seed_from_u64(4);
    let expsk = SpendingKey::from_bytes([7u8; 32]).unwrap().expand().unwrap();
    let vk = expsk.viewing_key().unwrap();

    let mut tree = CommitmentTree::default();
    let mut store = NoteStore::new(*vk.nk());
    let note = ShieldedNote::new(vk.address(0), NoteValue::new(5 * COIN), None, &mut rng);
    let position = tree.append_commitment(&note.commitment()).unwrap();
    let note = note.with_position(position);
    let nf = store.add_note(note.clone());
    store.mark_spent(nf);

    let prover = CountingProver::default();
    let err = TransactionBuilder::new(&expsk, &store, &tree, &prover, vk.address(1))
        .build(
            [&note],
            &[Payment::new(vk.address(2), NoteValue::new(COIN))],
            NoteValue::new(FEE),
            &mut rng,
        )
        .unwrap_err();

    assert!(matches!(err, Error::DoubleSpendAttempt(spent) if spent == nf));
    assert_eq!(prover.requests.load(Ordering::SeqCst), 0);
}

#[test]
fn spent_surplus_input_still_rejected() {
    let mut rng = StdRng::seed_from_u64(6);
    let expsk = SpendingKey::from_bytes([9u8; 32]).unwrap().expand().unwrap();
    let vk = expsk.viewing_key().unwrap();

    let mut tree = CommitmentTree::default();
    let mut store = NoteStore::new(*vk.nk());
    let mut positioned = |value: u64, rng: &mut StdRng| {
        let note = ShieldedNote::new(vk.address(0), NoteValue::new(value), None, rng);
        let position = tree.append_commitment(&note.commitment()).unwrap();
        note.with_position(position)
    };
    let enough = positioned(5 * COIN, &mut rng);
    let surplus = positioned(COIN, &mut rng);
    store.add_note(enough.clone());
    let spent = store.add_note(surplus.clone());
    store.mark_spent(spent);

    // `enough` alone covers the payment; `surplus` is never selected
    let prover = CountingProver::default();
    let err = TransactionBuilder::new(&expsk, &store, &tree, &prover, vk.address(1))
        .build(
            [&enough, &surplus],
            &[Payment::new(vk.address(2), NoteValue::new(COIN))],
            NoteValue::new(FEE),
            &mut rng,
        )
        .unwrap_err();

    assert!(matches!(err, Error::DoubleSpendAttempt(nf) if nf == spent));
    assert_eq!(prover.requests.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_build_leaves_wallet_untouched() {
    let mut rng = StdRng::seed_from_u64(5);
    let alice = wallet(8);
    fund(alice.address(0), COIN, 1, &[&alice], &mut rng);
    let root = alice.current_root();

    let _ = alice.build_transaction(
        &[Payment::new(alice.address(1), NoteValue::new(5 * COIN))],
        NoteValue::ZERO,
        &StubProver::new(),
        &mut rng,
    );

    assert_eq!(alice.current_root(), root);
    assert_eq!(alice.unspent_notes().len(), 1);
    assert_eq!(alice.journal().len(), 1);
}
