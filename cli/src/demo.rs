//! Two-wallet walkthrough: shield into Alice, Alice pays Bob, both scan.

use anyhow::Context;
use rand::rngs::OsRng;

use meshcrypt_privacy::{
    COIN, NoteValue, OutgoingViewingKey, Payment, ShieldedWalletEngine, SpendingKey, StubProver,
    WalletSettings, shield, try_output_recovery,
};

pub fn run(settings: &WalletSettings) -> anyhow::Result<()> {
    let mut rng = OsRng;
    let prover = StubProver::new();

    let alice = ShieldedWalletEngine::new(&SpendingKey::random(&mut rng), settings.clone())?;
    let bob = ShieldedWalletEngine::new(&SpendingKey::random(&mut rng), settings.clone())?;
    let network = settings.network;

    println!("👩 Alice: {}", alice.address(0).encode(network));
    println!("👨 Bob:   {}", bob.address(0).encode(network));
    println!();

    // Value enters the pool from outside
    let funding = shield(
        &[Payment::new(alice.address(0), NoteValue::new(10 * COIN))],
        &OutgoingViewingKey([0u8; 32]),
        &prover,
        &mut rng,
    )?;
    funding
        .transaction
        .verify(&prover, |_| true)
        .context("funding transaction failed verification")?;
    alice.apply_transaction(1, &funding.transaction)?;
    bob.apply_transaction(1, &funding.transaction)?;
    println!("💰 Shielded 10 coins to Alice, balance {}", alice.balance()?);

    let payment = Payment::new(bob.next_address(), NoteValue::new(9 * COIN));
    let built = alice
        .build_transaction(&[payment], settings.default_fee, &prover, &mut rng)
        .context("Alice could not build the payment")?;
    let tx = &built.transaction;
    tx.verify(&prover, |anchor| alice.is_known_anchor(anchor))
        .context("payment failed verification")?;
    println!(
        "📤 Built {} ({} bytes, {} spends, {} outputs)",
        tx.txid(),
        tx.to_bytes().len(),
        tx.spends.len(),
        tx.outputs.len()
    );

    alice.apply_transaction(2, tx)?;
    let received = bob.apply_transaction(2, tx)?;
    println!(
        "📥 Bob received {} note(s), balance {}",
        received.received.len(),
        bob.balance()?
    );
    println!("👩 Alice balance after fee {}: {}", settings.default_fee, alice.balance()?);

    let sent: Vec<_> = tx
        .outputs
        .iter()
        .filter_map(|o| try_output_recovery(o, alice.viewing_key().ovk(), &o.cv))
        .collect();
    println!("🔎 Alice recovers {} sent note(s) with her ovk", sent.len());

    alice.rebuild()?;
    println!("♻️  Alice rebuilt from journal, balance {}", alice.balance()?);
    Ok(())
}
