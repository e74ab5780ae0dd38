//! Stack-machine execution of unlocking/locking script pairs.
//!
//! The engine runs the unlocking tokens followed by the locking tokens over a
//! shared data stack and reports a boolean verdict. Script-level failures
//! (disabled opcodes, failed VERIFY, stack underflow, unbalanced branches)
//! clear a result flag but let execution continue to the end of the script;
//! only hard errors from the signature-hash callback abort the run. Signature
//! checks are delegated back to the caller for preimage hashing, which keeps
//! the engine independent of the two hashing schemes.

use std::sync::OnceLock;

use bitcoin_hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};

use crate::script::{assemble, Opcode, Token};
use crate::Error;

const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
/// Operands longer than this cannot be interpreted as numbers.
const SCRIPTNUM_MAX_LEN: usize = 8;

/// Fixed message accepted as an alternative signing target when the
/// sentinel fallback is enabled.
const SENTINEL_DIGEST: [u8; 32] = [
    0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

static SECP256K1: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

fn secp() -> &'static Secp256k1<VerifyOnly> {
    SECP256K1.get_or_init(Secp256k1::verification_only)
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The verdict: no failure was recorded and the top of the final stack
    /// casts to true.
    pub success: bool,
    /// Final data stack, verdict element still on top. Kept for callers that
    /// want to inspect more than the verdict.
    pub stack: Vec<Vec<u8>>,
}

/// Script interpreter. `F` maps `(script code bytes, hash-type byte)` to the
/// 32-byte digest a signature in this context must have signed.
pub struct Engine<F> {
    stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    exec_stack: Vec<bool>,
    ok: bool,
    sentinel_fallback: bool,
    sighash: F,
}

#[derive(PartialEq, Clone, Copy)]
enum Phase {
    Unlock,
    Lock,
}

impl<F> Engine<F>
where
    F: FnMut(&[u8], u8) -> Result<[u8; 32], Error>,
{
    pub fn new(sighash: F) -> Self {
        Engine {
            stack: Vec::new(),
            alt_stack: Vec::new(),
            exec_stack: Vec::new(),
            ok: true,
            sentinel_fallback: false,
            sighash,
        }
    }

    pub fn sentinel_fallback(mut self, enabled: bool) -> Self {
        self.sentinel_fallback = enabled;
        self
    }

    /// Executes `unlock` then `lock` over `initial_stack` (the witness stack,
    /// or empty).
    pub fn run(
        mut self,
        unlock: &[Token],
        lock: &[Token],
        initial_stack: Vec<Vec<u8>>,
    ) -> Result<Execution, Error> {
        self.stack = initial_stack;
        // Locking tokens from the most recent executed OP_CODESEPARATOR
        // onward; signature checks hash against this slice.
        let mut subscript_start = 0usize;

        for (phase, tokens) in [(Phase::Unlock, unlock), (Phase::Lock, lock)] {
            for (index, token) in tokens.iter().enumerate() {
                let executing = self.exec_stack.iter().all(|&branch| branch);
                match token {
                    Token::Op(op @ (Opcode::If | Opcode::NotIf)) => {
                        if executing {
                            let condition = cast_to_bool(&self.pop());
                            self.exec_stack.push(if *op == Opcode::If {
                                condition
                            } else {
                                !condition
                            });
                        } else {
                            self.exec_stack.push(false);
                        }
                    }
                    Token::Op(Opcode::Else) => match self.exec_stack.last_mut() {
                        Some(branch) => *branch = !*branch,
                        None => self.ok = false,
                    },
                    Token::Op(Opcode::EndIf) => {
                        if self.exec_stack.pop().is_none() {
                            self.ok = false;
                        }
                    }
                    _ if !executing => {}
                    Token::Op(Opcode::CodeSeparator) => {
                        if phase == Phase::Lock {
                            subscript_start = index + 1;
                        }
                    }
                    token => {
                        let subscript = &lock[subscript_start..];
                        self.execute(token, subscript)?;
                    }
                }
            }
        }

        if !self.exec_stack.is_empty() {
            self.ok = false;
        }
        let success = self.ok
            && self
                .stack
                .last()
                .map(|top| cast_to_bool(top))
                .unwrap_or(false);
        Ok(Execution {
            success,
            stack: self.stack,
        })
    }

    /// Pops the top element. Underflow permanently fails the run and yields
    /// an empty placeholder so execution stays total.
    fn pop(&mut self) -> Vec<u8> {
        match self.stack.pop() {
            Some(item) => item,
            None => {
                self.ok = false;
                Vec::new()
            }
        }
    }

    fn pop_num(&mut self) -> i64 {
        let bytes = self.pop();
        if bytes.len() > SCRIPTNUM_MAX_LEN {
            self.ok = false;
            return 0;
        }
        decode_num(&bytes)
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { vec![1] } else { Vec::new() });
    }

    fn push_num(&mut self, value: i64) {
        self.stack.push(encode_num(value));
    }

    fn require(&mut self, depth: usize) -> bool {
        if self.stack.len() < depth {
            self.ok = false;
            false
        } else {
            true
        }
    }

    fn unary_num(&mut self, f: impl FnOnce(i64) -> i64) {
        let n = self.pop_num();
        self.push_num(f(n));
    }

    fn binary_num(&mut self, f: impl FnOnce(i64, i64) -> i64) {
        let b = self.pop_num();
        let a = self.pop_num();
        self.push_num(f(a, b));
    }

    fn compare_num(&mut self, f: impl FnOnce(i64, i64) -> bool) {
        let b = self.pop_num();
        let a = self.pop_num();
        self.push_bool(f(a, b));
    }

    fn verify_top(&mut self) {
        let top = self.pop();
        if !cast_to_bool(&top) {
            self.ok = false;
        }
    }

    fn execute(&mut self, token: &Token, subscript: &[Token]) -> Result<(), Error> {
        let op = match token {
            Token::Push(data)
            | Token::PushData1(data)
            | Token::PushData2(data)
            | Token::PushData4(data) => {
                self.stack.push(data.clone());
                return Ok(());
            }
            Token::Invalid(_) => {
                self.ok = false;
                return Ok(());
            }
            Token::Op(op) => *op,
        };

        match op {
            Opcode::False => self.stack.push(Vec::new()),
            Opcode::Neg1 => self.push_num(-1),
            op if (Opcode::Num1..=Opcode::Num16).contains(&op) => {
                self.push_num((op.to_byte() - 0x50) as i64);
            }

            Opcode::Nop
            | Opcode::Nop1
            | Opcode::CheckLockTimeVerify
            | Opcode::CheckSequenceVerify
            | Opcode::Nop4
            | Opcode::Nop5
            | Opcode::Nop6
            | Opcode::Nop7
            | Opcode::Nop8
            | Opcode::Nop9
            | Opcode::Nop10 => {}

            Opcode::Ver
            | Opcode::VerIf
            | Opcode::VerNotIf
            | Opcode::Reserved
            | Opcode::Reserved1
            | Opcode::Reserved2
            | Opcode::Return => self.ok = false,

            Opcode::Verify => self.verify_top(),

            Opcode::ToAltStack => {
                let item = self.pop();
                self.alt_stack.push(item);
            }
            Opcode::FromAltStack => match self.alt_stack.pop() {
                Some(item) => self.stack.push(item),
                None => self.ok = false,
            },

            Opcode::Drop => {
                self.pop();
            }
            Opcode::Drop2 => {
                self.pop();
                self.pop();
            }
            Opcode::Dup => {
                if self.require(1) {
                    self.stack.push(self.stack[self.stack.len() - 1].clone());
                }
            }
            Opcode::Dup2 => {
                if self.require(2) {
                    let len = self.stack.len();
                    self.stack.push(self.stack[len - 2].clone());
                    self.stack.push(self.stack[len - 1].clone());
                }
            }
            Opcode::Dup3 => {
                if self.require(3) {
                    let len = self.stack.len();
                    self.stack.push(self.stack[len - 3].clone());
                    self.stack.push(self.stack[len - 2].clone());
                    self.stack.push(self.stack[len - 1].clone());
                }
            }
            Opcode::Over => {
                if self.require(2) {
                    self.stack.push(self.stack[self.stack.len() - 2].clone());
                }
            }
            Opcode::Over2 => {
                if self.require(4) {
                    let len = self.stack.len();
                    self.stack.push(self.stack[len - 4].clone());
                    self.stack.push(self.stack[len - 3].clone());
                }
            }
            Opcode::Rot => {
                if self.require(3) {
                    let item = self.stack.remove(self.stack.len() - 3);
                    self.stack.push(item);
                }
            }
            Opcode::Rot2 => {
                if self.require(6) {
                    let first = self.stack.remove(self.stack.len() - 6);
                    let second = self.stack.remove(self.stack.len() - 5);
                    self.stack.push(first);
                    self.stack.push(second);
                }
            }
            Opcode::Swap => {
                if self.require(2) {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
            }
            Opcode::Swap2 => {
                if self.require(4) {
                    let first = self.stack.remove(self.stack.len() - 4);
                    let second = self.stack.remove(self.stack.len() - 3);
                    self.stack.push(first);
                    self.stack.push(second);
                }
            }
            Opcode::Nip => {
                if self.require(2) {
                    self.stack.remove(self.stack.len() - 2);
                }
            }
            Opcode::Tuck => {
                if self.require(2) {
                    let top = self.stack[self.stack.len() - 1].clone();
                    self.stack.insert(self.stack.len() - 2, top);
                }
            }
            Opcode::IfDup => {
                if self.require(1) {
                    let top = self.stack[self.stack.len() - 1].clone();
                    if cast_to_bool(&top) {
                        self.stack.push(top);
                    }
                }
            }
            Opcode::Depth => {
                self.push_num(self.stack.len() as i64);
            }
            Opcode::Size => {
                if self.require(1) {
                    let len = self.stack[self.stack.len() - 1].len();
                    self.push_num(len as i64);
                }
            }
            Opcode::Pick | Opcode::Roll => {
                let depth = self.pop_num();
                if depth < 0 || depth as usize >= self.stack.len() {
                    self.ok = false;
                } else {
                    let index = self.stack.len() - 1 - depth as usize;
                    let item = if op == Opcode::Roll {
                        self.stack.remove(index)
                    } else {
                        self.stack[index].clone()
                    };
                    self.stack.push(item);
                }
            }

            // Byte-string opcodes disabled by consensus. No stack effect.
            Opcode::Cat
            | Opcode::Substr
            | Opcode::Left
            | Opcode::Right
            | Opcode::Invert
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor => self.ok = false,

            Opcode::Equal | Opcode::EqualVerify => {
                let b = self.pop();
                let a = self.pop();
                self.push_bool(a == b);
                if op == Opcode::EqualVerify {
                    self.verify_top();
                }
            }

            Opcode::Add1 => self.unary_num(|n| n.wrapping_add(1)),
            Opcode::Sub1 => self.unary_num(|n| n.wrapping_sub(1)),
            Opcode::Negate => self.unary_num(|n| n.wrapping_neg()),
            Opcode::Abs => self.unary_num(|n| n.wrapping_abs()),
            Opcode::Not => {
                let n = self.pop_num();
                self.push_bool(n == 0);
            }
            Opcode::NotEqual0 => {
                let n = self.pop_num();
                self.push_bool(n != 0);
            }
            Opcode::Add => self.binary_num(i64::wrapping_add),
            Opcode::Sub => self.binary_num(i64::wrapping_sub),

            // Arithmetic opcodes disabled by consensus. They still consume
            // and produce operands before the run is marked failed.
            Opcode::Mul2 => {
                self.unary_num(|n| n.wrapping_mul(2));
                self.ok = false;
            }
            Opcode::Div2 => {
                self.unary_num(|n| n.wrapping_div(2));
                self.ok = false;
            }
            Opcode::Mul => {
                self.binary_num(i64::wrapping_mul);
                self.ok = false;
            }
            Opcode::Div => {
                self.binary_num(|a, b| if b == 0 { 0 } else { a.wrapping_div(b) });
                self.ok = false;
            }
            Opcode::Mod => {
                self.binary_num(|a, b| if b == 0 { 0 } else { a.wrapping_rem(b) });
                self.ok = false;
            }
            Opcode::LShift => {
                self.binary_num(|a, b| a.wrapping_shl(b.clamp(0, 63) as u32));
                self.ok = false;
            }
            Opcode::RShift => {
                self.binary_num(|a, b| a.wrapping_shr(b.clamp(0, 63) as u32));
                self.ok = false;
            }

            Opcode::BoolAnd => self.compare_num(|a, b| a != 0 && b != 0),
            Opcode::BoolOr => self.compare_num(|a, b| a != 0 || b != 0),
            Opcode::NumEqual => self.compare_num(|a, b| a == b),
            Opcode::NumEqualVerify => {
                self.compare_num(|a, b| a == b);
                self.verify_top();
            }
            Opcode::NumNotEqual => self.compare_num(|a, b| a != b),
            Opcode::LessThan => self.compare_num(|a, b| a < b),
            Opcode::GreaterThan => self.compare_num(|a, b| a > b),
            Opcode::LessThanOrEqual => self.compare_num(|a, b| a <= b),
            Opcode::GreaterThanOrEqual => self.compare_num(|a, b| a >= b),
            Opcode::Min => self.binary_num(i64::min),
            Opcode::Max => self.binary_num(i64::max),
            Opcode::Within => {
                let max = self.pop_num();
                let min = self.pop_num();
                let value = self.pop_num();
                self.push_bool(min <= value && value < max);
            }

            Opcode::Ripemd160 => {
                let data = self.pop();
                self.stack
                    .push(ripemd160::Hash::hash(&data).to_byte_array().to_vec());
            }
            Opcode::Sha1 => {
                let data = self.pop();
                self.stack
                    .push(sha1::Hash::hash(&data).to_byte_array().to_vec());
            }
            Opcode::Sha256 => {
                let data = self.pop();
                self.stack
                    .push(sha256::Hash::hash(&data).to_byte_array().to_vec());
            }
            Opcode::Hash160 => {
                let data = self.pop();
                self.stack
                    .push(hash160::Hash::hash(&data).to_byte_array().to_vec());
            }
            Opcode::Hash256 => {
                let data = self.pop();
                self.stack
                    .push(sha256d::Hash::hash(&data).to_byte_array().to_vec());
            }

            Opcode::CheckSig | Opcode::CheckSigVerify => {
                let key = self.pop();
                let sig = self.pop();
                let valid = self.check_signature(&sig, &key, subscript)?;
                self.push_bool(valid);
                if op == Opcode::CheckSigVerify {
                    self.verify_top();
                }
            }
            Opcode::CheckMultiSig | Opcode::CheckMultiSigVerify => {
                self.check_multisig(subscript)?;
                if op == Opcode::CheckMultiSigVerify {
                    self.verify_top();
                }
            }

            // Flow-control opcodes are consumed by the run loop.
            Opcode::If
            | Opcode::NotIf
            | Opcode::Else
            | Opcode::EndIf
            | Opcode::CodeSeparator => unreachable!(),
            Opcode::Num1
            | Opcode::Num2
            | Opcode::Num3
            | Opcode::Num4
            | Opcode::Num5
            | Opcode::Num6
            | Opcode::Num7
            | Opcode::Num8
            | Opcode::Num9
            | Opcode::Num10
            | Opcode::Num11
            | Opcode::Num12
            | Opcode::Num13
            | Opcode::Num14
            | Opcode::Num15
            | Opcode::Num16 => unreachable!("covered by the range arm"),
        }
        Ok(())
    }

    /// Pops key count, keys, signature count, signatures and the historical
    /// extra element, then matches signatures against keys in order.
    /// Signatures must appear in key order; keys may be skipped. Zero
    /// required signatures succeed unconditionally.
    fn check_multisig(&mut self, subscript: &[Token]) -> Result<(), Error> {
        let key_count = self.pop_num();
        if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
            self.ok = false;
            self.push_bool(false);
            return Ok(());
        }
        let mut keys: Vec<Vec<u8>> = (0..key_count).map(|_| self.pop()).collect();
        keys.reverse();

        let sig_count = self.pop_num();
        if sig_count < 0 || sig_count > key_count {
            self.ok = false;
            self.push_bool(false);
            return Ok(());
        }
        let mut sigs: Vec<Vec<u8>> = (0..sig_count).map(|_| self.pop()).collect();
        sigs.reverse();

        // Historical off-by-one: one extra element is always consumed.
        self.pop();

        let mut valid = true;
        let mut key_index = 0;
        for sig in &sigs {
            let mut matched = false;
            while key_index < keys.len() {
                let key = keys[key_index].clone();
                key_index += 1;
                if self.check_signature(sig, &key, subscript)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                valid = false;
                break;
            }
        }
        self.push_bool(valid);
        Ok(())
    }

    fn check_signature(
        &mut self,
        sig_bytes: &[u8],
        key_bytes: &[u8],
        subscript: &[Token],
    ) -> Result<bool, Error> {
        if sig_bytes.is_empty() {
            return Ok(false);
        }
        let Ok(pubkey) = PublicKey::from_slice(key_bytes) else {
            return Ok(false);
        };
        let (der, hash_type) = sig_bytes.split_at(sig_bytes.len() - 1);
        let Some(mut signature) = parse_signature(der) else {
            return Ok(false);
        };
        signature.normalize_s();

        let script_code: Vec<Token> = subscript
            .iter()
            .filter(|token| **token != Token::Op(Opcode::CodeSeparator))
            .cloned()
            .collect();
        let digest = (self.sighash)(&assemble(&script_code), hash_type[0])?;

        let message = Message::from_digest(digest);
        if secp().verify_ecdsa(&message, &signature, &pubkey).is_ok() {
            return Ok(true);
        }
        if self.sentinel_fallback {
            let sentinel = Message::from_digest(SENTINEL_DIGEST);
            if secp().verify_ecdsa(&sentinel, &signature, &pubkey).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Strict DER first, then lax DER, then the 64-byte compact form.
fn parse_signature(bytes: &[u8]) -> Option<Signature> {
    Signature::from_der(bytes)
        .or_else(|_| Signature::from_der_lax(bytes))
        .ok()
        .or_else(|| {
            if bytes.len() == 64 {
                Signature::from_compact(bytes).ok()
            } else {
                None
            }
        })
}

/// False iff every byte is zero, ignoring a final 0x80 sign bit. Covers the
/// single bytes 0x00 and 0x80, the negative-zero encodings.
pub(crate) fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Minimal little-endian sign-magnitude encoding; zero is the empty string.
pub(crate) fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut abs_value = value.unsigned_abs();
    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    // The high bit of the top byte is the sign; grow by a byte if the
    // magnitude already uses it.
    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if value < 0 { 0x80 } else { 0x00 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }
    result
}

pub(crate) fn decode_num(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }

    let mut magnitude: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        magnitude |= (byte as u64) << (8 * i);
    }

    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80u64 << (8 * (bytes.len() - 1)));
        -((magnitude & mask) as i64)
    } else {
        magnitude as i64
    }
}
