//! Signature-hash preimage construction.
//!
//! Two schemes exist. The legacy scheme re-serializes a blanked copy of the
//! whole transaction with the signed script installed on the signing input.
//! The segwit scheme (BIP143) hashes a fixed-layout preimage built from
//! double-SHA256 aggregates, and is supported for SIGHASH_ALL only, which is
//! the only type the witness path produces.

use bitcoin_hashes::{sha256d, Hash};

use crate::codec::{put_i32, put_i64, put_len_prefixed, put_u32};
use crate::tx::{DecodeMode, Transaction};
use crate::Error;

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(bytes).to_byte_array()
}

/// Digest a legacy (pre-segwit) input commits to.
///
/// `script_code` is the CODESEPARATOR-filtered sub-script active at the
/// signature check. Unrecognized hash types and SIGHASH_SINGLE without a
/// matching output are coverage gaps, reported as hard errors rather than
/// folded into the verdict.
pub fn legacy_sighash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    hash_type: u8,
) -> Result<[u8; 32], Error> {
    if input_index >= tx.inputs.len() {
        return Err(Error::InputIndex(input_index));
    }

    // Canonical blank slate: base serialization (no witness section)
    // re-decoded with every unlocking script dropped.
    let mut copy = Transaction::decode_with(&tx.encode_base(), DecodeMode::HashOnly)?;
    copy.inputs[input_index].script_sig = script_code.to_vec();

    match hash_type & 0x1f {
        SIGHASH_ALL => {}
        SIGHASH_NONE => {
            copy.outputs.clear();
            zero_other_sequences(&mut copy, input_index);
        }
        SIGHASH_SINGLE => {
            if input_index >= copy.outputs.len() {
                return Err(Error::SighashSingleOutOfRange { input: input_index });
            }
            copy.outputs.truncate(input_index + 1);
            // Earlier outputs are blanked to the -1/empty placeholder so
            // only the paired output is committed to.
            for output in &mut copy.outputs[..input_index] {
                output.value = -1;
                output.script_pubkey = Vec::new();
                output.pk_tokens = Vec::new();
            }
            zero_other_sequences(&mut copy, input_index);
        }
        _ => return Err(Error::SighashType(hash_type)),
    }

    if hash_type & SIGHASH_ANYONECANPAY != 0 {
        copy.inputs = vec![copy.inputs[input_index].clone()];
    }

    let mut preimage = copy.encode_base();
    put_u32(&mut preimage, hash_type as u32);
    Ok(double_sha256(&preimage))
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != input_index {
            input.sequence = 0;
        }
    }
}

/// BIP143 digest for a version-0 witness input. `script_code` is the
/// canonical pay-to-pubkey-hash script derived from the witness program;
/// `value` is the amount of the spent output. Only plain SIGHASH_ALL is
/// defined for this path.
pub fn segwit_sighash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    value: i64,
    hash_type: u8,
) -> Result<[u8; 32], Error> {
    if hash_type != SIGHASH_ALL {
        return Err(Error::SighashType(hash_type));
    }
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(Error::InputIndex(input_index))?;

    let mut outpoints = Vec::new();
    let mut sequences = Vec::new();
    for txin in &tx.inputs {
        outpoints.extend(txin.prev_txid.iter().rev());
        put_u32(&mut outpoints, txin.prev_vout);
        put_u32(&mut sequences, txin.sequence);
    }
    let mut outputs = Vec::new();
    for txout in &tx.outputs {
        put_i64(&mut outputs, txout.value);
        put_len_prefixed(&mut outputs, &txout.script_pubkey);
    }

    let mut preimage = Vec::new();
    put_i32(&mut preimage, tx.version);
    preimage.extend_from_slice(&double_sha256(&outpoints));
    preimage.extend_from_slice(&double_sha256(&sequences));
    preimage.extend(input.prev_txid.iter().rev());
    put_u32(&mut preimage, input.prev_vout);
    put_len_prefixed(&mut preimage, script_code);
    put_i64(&mut preimage, value);
    put_u32(&mut preimage, input.sequence);
    preimage.extend_from_slice(&double_sha256(&outputs));
    put_u32(&mut preimage, tx.lock_time);
    put_u32(&mut preimage, hash_type as u32);
    Ok(double_sha256(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{assemble, p2pkh_script};
    use crate::tx::{TxIn, TxOut};

    fn two_input_tx() -> Transaction {
        let lock = assemble(&p2pkh_script(&[0x11; 20]));
        Transaction {
            version: 1,
            segwit: false,
            inputs: vec![
                TxIn {
                    prev_txid: [0xaa; 32],
                    prev_vout: 0,
                    script_sig: Vec::new(),
                    sig_tokens: Vec::new(),
                    sequence: 0xffff_ffff,
                    witness: Vec::new(),
                },
                TxIn {
                    prev_txid: [0xbb; 32],
                    prev_vout: 1,
                    script_sig: Vec::new(),
                    sig_tokens: Vec::new(),
                    sequence: 0xffff_fffe,
                    witness: Vec::new(),
                },
            ],
            outputs: vec![
                TxOut {
                    value: 50_000,
                    script_pubkey: lock.clone(),
                    pk_tokens: p2pkh_script(&[0x11; 20]),
                },
                TxOut {
                    value: 40_000,
                    script_pubkey: lock,
                    pk_tokens: p2pkh_script(&[0x11; 20]),
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn hash_type_changes_the_digest() {
        let tx = two_input_tx();
        let code = assemble(&p2pkh_script(&[0x22; 20]));
        let all = legacy_sighash(&tx, 0, &code, SIGHASH_ALL).unwrap();
        let none = legacy_sighash(&tx, 0, &code, SIGHASH_NONE).unwrap();
        let single = legacy_sighash(&tx, 0, &code, SIGHASH_SINGLE).unwrap();
        assert_ne!(all, none);
        assert_ne!(all, single);
        assert_ne!(none, single);
    }

    #[test]
    fn unsupported_hash_types_are_hard_errors() {
        let tx = two_input_tx();
        for bad in [0x00, 0x04, 0x1f, 0x84] {
            assert!(matches!(
                legacy_sighash(&tx, 0, &[], bad),
                Err(Error::SighashType(t)) if t == bad
            ));
        }
    }

    #[test]
    fn single_without_matching_output_is_an_error() {
        let mut tx = two_input_tx();
        tx.outputs.truncate(1);
        assert!(matches!(
            legacy_sighash(&tx, 1, &[], SIGHASH_SINGLE),
            Err(Error::SighashSingleOutOfRange { input: 1 })
        ));
    }

    #[test]
    fn none_ignores_outputs() {
        let mut tx = two_input_tx();
        let before = legacy_sighash(&tx, 0, &[], SIGHASH_NONE).unwrap();
        tx.outputs[1].value = 1;
        tx.outputs[0].value = 999;
        let after = legacy_sighash(&tx, 0, &[], SIGHASH_NONE).unwrap();
        assert_eq!(before, after);
        // ...but SIGHASH_ALL commits to them
        assert_ne!(
            legacy_sighash(&two_input_tx(), 0, &[], SIGHASH_ALL).unwrap(),
            legacy_sighash(&tx, 0, &[], SIGHASH_ALL).unwrap()
        );
    }

    #[test]
    fn single_commits_only_to_the_paired_output() {
        let mut tx = two_input_tx();
        let before = legacy_sighash(&tx, 0, &[], SIGHASH_SINGLE).unwrap();
        tx.outputs[1].value = 1; // later output, not covered
        assert_eq!(
            before,
            legacy_sighash(&tx, 0, &[], SIGHASH_SINGLE).unwrap()
        );
        tx.outputs[0].value = 1; // paired output, covered
        assert_ne!(
            before,
            legacy_sighash(&tx, 0, &[], SIGHASH_SINGLE).unwrap()
        );
    }

    #[test]
    fn anyonecanpay_reduces_to_a_single_input() {
        let tx = two_input_tx();
        let mut reduced = tx.clone();
        reduced.inputs = vec![tx.inputs[1].clone()];
        let code = assemble(&p2pkh_script(&[0x22; 20]));
        assert_eq!(
            legacy_sighash(&tx, 1, &code, SIGHASH_ALL | SIGHASH_ANYONECANPAY).unwrap(),
            legacy_sighash(&reduced, 0, &code, SIGHASH_ALL | SIGHASH_ANYONECANPAY).unwrap()
        );
    }

    #[test]
    fn segwit_rejects_everything_but_plain_all() {
        let tx = two_input_tx();
        for bad in [0x00, 0x02, 0x03, 0x81] {
            assert!(matches!(
                segwit_sighash(&tx, 0, &[], 1000, bad),
                Err(Error::SighashType(t)) if t == bad
            ));
        }
    }
}
