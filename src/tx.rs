//! Transaction wire codec.
//!
//! Transactions decode into an owned tree with every script disassembled up
//! front, so later stages never re-tokenize. Previous-output ids are stored in
//! display order; the wire format carries them reversed. The segwit marker
//! (`00 01` after the version) switches on per-input witness stacks and is
//! reproduced exactly on encode.

use bitcoin_hashes::{sha256d, Hash};

use crate::codec::{put_i32, put_i64, put_len_prefixed, put_u32, put_varint, ParseError, Reader};
use crate::script::{assemble, disassemble, Token};

/// How much of the unlocking scripts to keep when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Keep and disassemble every script.
    Full,
    /// Discard unlocking scripts. Used when canonicalizing a transaction for
    /// legacy signature hashing, where every input starts out blank.
    HashOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Referenced transaction id, display order.
    pub prev_txid: [u8; 32],
    pub prev_vout: u32,
    /// Raw unlocking script. Authoritative for encoding and hashing.
    pub script_sig: Vec<u8>,
    /// Disassembled unlocking script. Empty when `prev_vout` is the
    /// 0xffffffff sentinel (coinbase scripts are opaque data) and under
    /// [`DecodeMode::HashOnly`].
    pub sig_tokens: Vec<Token>,
    pub sequence: u32,
    /// Witness stack. Empty when the transaction has no witness section.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// Coinbase inputs reference the all-zero txid with vout 0xffffffff.
    pub fn is_null_outpoint(&self) -> bool {
        self.prev_vout == u32::MAX && self.prev_txid == [0u8; 32]
    }

    /// Replaces the unlocking script, keeping bytes and tokens in step.
    pub fn set_script_sig(&mut self, tokens: Vec<Token>) {
        self.script_sig = assemble(&tokens);
        self.sig_tokens = tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Output amount in base units. Negative only in blanked
    /// SIGHASH_SINGLE placeholders.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub pk_tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    /// Whether the wire form carried the witness marker. Controls encoding.
    pub segwit: bool,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn decode(bytes: &[u8]) -> Result<Transaction, ParseError> {
        Transaction::decode_with(bytes, DecodeMode::Full)
    }

    pub fn decode_with(bytes: &[u8], mode: DecodeMode) -> Result<Transaction, ParseError> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_i32()?;

        let segwit = reader.peek(0) == Some(0x00) && reader.peek(1) == Some(0x01);
        if segwit {
            reader.skip(2)?;
        }

        let input_count = reader.read_varint()? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let mut prev_txid = [0u8; 32];
            for (i, &byte) in reader.take(32)?.iter().enumerate() {
                prev_txid[31 - i] = byte;
            }
            let prev_vout = reader.read_u32()?;
            let script_sig = reader.read_len_prefixed()?.to_vec();
            let sequence = reader.read_u32()?;

            let mut input = TxIn {
                prev_txid,
                prev_vout,
                script_sig,
                sig_tokens: Vec::new(),
                sequence,
                witness: Vec::new(),
            };
            match mode {
                DecodeMode::HashOnly => {
                    input.script_sig = Vec::new();
                }
                DecodeMode::Full => {
                    // The sentinel output index alone marks the script as
                    // opaque data; the txid is not consulted here.
                    if input.prev_vout != u32::MAX {
                        input.sig_tokens = disassemble(&input.script_sig)?;
                    }
                }
            }
            inputs.push(input);
        }

        let output_count = reader.read_varint()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = reader.read_i64()?;
            let script_pubkey = reader.read_len_prefixed()?.to_vec();
            let pk_tokens = disassemble(&script_pubkey)?;
            outputs.push(TxOut {
                value,
                script_pubkey,
                pk_tokens,
            });
        }

        if segwit {
            for input in &mut inputs {
                let item_count = reader.read_varint()? as usize;
                let mut witness = Vec::with_capacity(item_count);
                for _ in 0..item_count {
                    witness.push(reader.read_len_prefixed()?.to_vec());
                }
                input.witness = witness;
            }
        }

        let lock_time = reader.read_u32()?;
        reader.expect_end()?;

        Ok(Transaction {
            version,
            segwit,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(self.segwit)
    }

    /// Serialization without the witness section, as hashed for the txid and
    /// for legacy signature hashes.
    pub fn encode_base(&self) -> Vec<u8> {
        self.encode_with(false)
    }

    fn encode_with(&self, include_witness: bool) -> Vec<u8> {
        let mut out = Vec::new();
        put_i32(&mut out, self.version);
        if include_witness {
            out.push(0x00);
            out.push(0x01);
        }

        put_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend(input.prev_txid.iter().rev());
            put_u32(&mut out, input.prev_vout);
            put_len_prefixed(&mut out, &input.script_sig);
            put_u32(&mut out, input.sequence);
        }

        put_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            put_i64(&mut out, output.value);
            put_len_prefixed(&mut out, &output.script_pubkey);
        }

        if include_witness {
            for input in &self.inputs {
                put_varint(&mut out, input.witness.len() as u64);
                for item in &input.witness {
                    put_len_prefixed(&mut out, item);
                }
            }
        }

        put_u32(&mut out, self.lock_time);
        out
    }

    /// Transaction id, display order.
    pub fn txid(&self) -> [u8; 32] {
        let digest = sha256d::Hash::hash(&self.encode_base());
        let mut id = digest.to_byte_array();
        id.reverse();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Opcode;

    // Single-input P2PKH spend from mainnet.
    const LEGACY_TX: &str = "02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700";

    #[test]
    fn legacy_decode_round_trip() {
        let raw = hex::decode(LEGACY_TX).unwrap();
        let tx = Transaction::decode(&raw).expect("decode");
        assert_eq!(tx.version, 2);
        assert!(!tx.segwit);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.lock_time, 510_826);
        assert_eq!(tx.inputs[0].prev_vout, 0);
        // display-order txid of the spent transaction
        assert_eq!(
            hex::encode(tx.inputs[0].prev_txid),
            "95da344585fcf2e5f7d6cbf2c3df2dcce84f9196f7a7bb901a43275cd6eb7c3f"
        );
        assert_eq!(tx.inputs[0].sig_tokens.len(), 2);
        assert_eq!(tx.outputs[0].value, 20_737_411);
        assert_eq!(tx.outputs[0].pk_tokens[0], Token::Op(Opcode::Dup));
        assert_eq!(tx.encode(), raw);
    }

    #[test]
    fn hash_only_mode_blanks_unlocking_scripts() {
        let raw = hex::decode(LEGACY_TX).unwrap();
        let tx = Transaction::decode_with(&raw, DecodeMode::HashOnly).expect("decode");
        assert!(tx.inputs[0].script_sig.is_empty());
        assert!(tx.inputs[0].sig_tokens.is_empty());
        // outputs still carry their scripts
        assert_eq!(tx.outputs[0].pk_tokens.len(), 5);
    }

    #[test]
    fn segwit_round_trip_keeps_marker_and_witness() {
        let mut tx = Transaction::decode(&hex::decode(LEGACY_TX).unwrap()).unwrap();
        tx.segwit = true;
        tx.inputs[0].witness = vec![vec![0xaa; 71], vec![0xbb; 33]];
        let encoded = tx.encode();
        assert_eq!(&encoded[4..6], &[0x00, 0x01]);

        let decoded = Transaction::decode(&encoded).expect("decode");
        assert!(decoded.segwit);
        assert_eq!(decoded.inputs[0].witness, tx.inputs[0].witness);
        assert_eq!(decoded.encode(), encoded);
        // base serialization drops the marker and witness section again
        assert_eq!(
            decoded.encode_base(),
            hex::decode(LEGACY_TX).unwrap()
        );
    }

    #[test]
    fn witness_stack_count_matches_inputs() {
        let mut tx = Transaction::decode(&hex::decode(LEGACY_TX).unwrap()).unwrap();
        tx.segwit = true;
        // no witness data on the only input: an empty stack is still encoded
        let decoded = Transaction::decode(&tx.encode()).expect("decode");
        assert_eq!(decoded.inputs.len(), 1);
        assert!(decoded.inputs[0].witness.is_empty());
    }

    #[test]
    fn coinbase_script_stays_opaque() {
        let mut tx = Transaction::decode(&hex::decode(LEGACY_TX).unwrap()).unwrap();
        tx.inputs[0].prev_txid = [0u8; 32];
        tx.inputs[0].prev_vout = u32::MAX;
        // 0x05 declares a 5-byte push but only 2 bytes follow; as coinbase
        // data this must not be tokenized
        tx.inputs[0].script_sig = vec![0x05, 0x01, 0x02];
        tx.inputs[0].sig_tokens = Vec::new();
        let decoded = Transaction::decode(&tx.encode()).expect("decode");
        assert!(decoded.inputs[0].is_null_outpoint());
        assert_eq!(decoded.inputs[0].script_sig, vec![0x05, 0x01, 0x02]);
        assert!(decoded.inputs[0].sig_tokens.is_empty());
    }

    #[test]
    fn sentinel_vout_alone_keeps_script_opaque() {
        let mut tx = Transaction::decode(&hex::decode(LEGACY_TX).unwrap()).unwrap();
        // nonzero txid with the sentinel index: not a well-formed coinbase
        // outpoint, but the script is still opaque data on the wire
        tx.inputs[0].prev_txid = [0x42; 32];
        tx.inputs[0].prev_vout = u32::MAX;
        tx.inputs[0].script_sig = vec![0x05, 0x01, 0x02];
        tx.inputs[0].sig_tokens = Vec::new();
        let decoded = Transaction::decode(&tx.encode()).expect("decode");
        assert!(!decoded.inputs[0].is_null_outpoint());
        assert_eq!(decoded.inputs[0].script_sig, vec![0x05, 0x01, 0x02]);
        assert!(decoded.inputs[0].sig_tokens.is_empty());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = hex::decode(LEGACY_TX).unwrap();
        raw.push(0x00);
        assert_eq!(
            Transaction::decode(&raw),
            Err(ParseError::TrailingData { remaining: 1 })
        );
    }

    #[test]
    fn truncated_transaction_rejected() {
        let raw = hex::decode(LEGACY_TX).unwrap();
        Transaction::decode(&raw[..raw.len() - 3]).expect_err("truncated");
    }

    #[test]
    fn txid_is_display_order_double_sha() {
        let raw = hex::decode(LEGACY_TX).unwrap();
        let tx = Transaction::decode(&raw).unwrap();
        let digest = sha256d::Hash::hash(&raw);
        let mut expected = digest.to_byte_array();
        expected.reverse();
        assert_eq!(tx.txid(), expected);
    }
}
