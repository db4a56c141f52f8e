//! Tip transaction for the bundled fast path

use anyhow::{anyhow, Result};
use rand::seq::SliceRandom;
use solana_sdk::{
    hash::Hash,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    system_instruction,
    transaction::VersionedTransaction,
};

/// Uniformly random tip account, spreading load across the pool
pub fn choose_tip_account(accounts: &[Pubkey]) -> Option<Pubkey> {
    accounts.choose(&mut rand::thread_rng()).copied()
}

/// Unsigned v0 transaction paying `lamports` from `payer` to `tip_account`
pub fn build_tip_transaction(
    payer: &Pubkey,
    tip_account: &Pubkey,
    lamports: u64,
    recent_blockhash: Hash,
) -> Result<VersionedTransaction> {
    let tip_ix = system_instruction::transfer(payer, tip_account, lamports);

    let message = v0::Message::try_compile(payer, &[tip_ix], &[], recent_blockhash)
        .map_err(|e| anyhow!("Failed to compile tip message: {}", e))?;

    // placeholder signatures, filled in by the signer
    let signatures = vec![Signature::default(); message.header.num_required_signatures as usize];

    Ok(VersionedTransaction {
        signatures,
        message: VersionedMessage::V0(message),
    })
}
