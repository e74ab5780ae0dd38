//! Per-input verification and whole-transaction orchestration.
//!
//! Each input gets a base run of its unlocking script against the spent
//! output's locking script, then at most two bounded follow-ups: the
//! script-hash redemption run when the locking script is the P2SH template,
//! and the optional empty-unlock retry. Witness-program locking scripts are
//! rewritten to the canonical pay-to-pubkey-hash form and switch the
//! signature-hash scheme; the witness stack primes the data stack of every
//! attempt.

use crate::engine::{Engine, Execution};
use crate::script::{disassemble, p2pkh_script, p2sh_hash, witness_program, Token};
use crate::sighash::{legacy_sighash, segwit_sighash};
use crate::tx::{Transaction, TxOut};
use crate::{Error, VerifyFlags};

#[derive(Clone, Copy)]
enum SighashScheme {
    Legacy,
    Segwit,
}

/// Checks every non-coinbase input of `tx` against the transactions that
/// funded it, short-circuiting on the first failure. `prev_txs` is consulted
/// by transaction id; a referenced output that cannot be resolved is a hard
/// error, not a failed verdict.
pub fn verify_transaction(
    tx: &Transaction,
    prev_txs: &[Transaction],
    flags: VerifyFlags,
) -> Result<bool, Error> {
    for (index, input) in tx.inputs.iter().enumerate() {
        if input.is_null_outpoint() {
            continue;
        }
        let prevout = prev_txs
            .iter()
            .find(|prev| prev.txid() == input.prev_txid)
            .and_then(|prev| prev.outputs.get(input.prev_vout as usize))
            .ok_or(Error::MissingPrevout {
                input: index,
                vout: input.prev_vout,
            })?;
        if !verify_input(tx, index, prevout, flags)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Checks one input against the output it spends.
pub fn verify_input(
    tx: &Transaction,
    index: usize,
    prevout: &TxOut,
    flags: VerifyFlags,
) -> Result<bool, Error> {
    let input = tx.inputs.get(index).ok_or(Error::InputIndex(index))?;
    if input.is_null_outpoint() {
        return Ok(true);
    }
    let unlock = &input.sig_tokens;
    let lock = &prevout.pk_tokens;

    let base = run_attempt(tx, index, prevout.value, unlock, lock, flags)?;

    let mut verdict = base.success;
    if base.success && p2sh_hash(lock).is_some() {
        if let Some(redeem) = redeemable_unlock(unlock) {
            // The base run already proved the hash matches; the actual
            // authorization is the redeem script run.
            let redeem_tokens = disassemble(redeem)?;
            verdict = run_attempt(
                tx,
                index,
                prevout.value,
                &unlock[..unlock.len() - 1],
                &redeem_tokens,
                flags,
            )?
            .success;
        }
    }
    if verdict {
        return Ok(true);
    }

    // Historical leniency: some chain data validates only when the unlocking
    // script is ignored outright.
    if flags.empty_unlock_retry() && !unlock.is_empty() {
        let retry = run_attempt(tx, index, prevout.value, &[], lock, flags)?;
        return Ok(retry.success);
    }
    Ok(false)
}

/// The serialized redeem script, when every unlocking token is a data push.
/// An empty data push (`OP_FALSE`) is an opcode, not a literal, so scripts
/// using it do not qualify.
fn redeemable_unlock(unlock: &[Token]) -> Option<&[u8]> {
    let last = unlock.last()?;
    if unlock.iter().all(|token| token.literal().is_some()) {
        last.literal()
    } else {
        None
    }
}

fn run_attempt(
    tx: &Transaction,
    index: usize,
    prevout_value: i64,
    unlock: &[Token],
    lock: &[Token],
    flags: VerifyFlags,
) -> Result<Execution, Error> {
    let (lock_tokens, scheme) = match witness_program(lock) {
        Some(program) => (p2pkh_script(program), SighashScheme::Segwit),
        None => (lock.to_vec(), SighashScheme::Legacy),
    };
    let witness_stack = tx.inputs[index].witness.clone();

    Engine::new(|script_code: &[u8], hash_type: u8| match scheme {
        SighashScheme::Legacy => legacy_sighash(tx, index, script_code, hash_type),
        SighashScheme::Segwit => {
            segwit_sighash(tx, index, script_code, prevout_value, hash_type)
        }
    })
    .sentinel_fallback(flags.sentinel_message())
    .run(unlock, &lock_tokens, witness_stack)
}
