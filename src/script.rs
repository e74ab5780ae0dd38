//! Script tokenization.
//!
//! Scripts are stored and hashed as raw bytes but executed and pattern-matched
//! as token sequences. Disassembly keeps enough information (the PUSHDATA
//! prefix class of every push) for `assemble` to reproduce the input byte for
//! byte. Unassigned opcode bytes tokenize as [`Token::Invalid`] so that a
//! script containing them still parses; the engine fails the run if one is
//! ever executed. Truncated push payloads are malformed binary input and fail
//! disassembly outright.

use std::fmt;

use crate::codec::{put_u16, put_u32, ParseError, Reader};

/// Assigned non-push opcodes: byte 0x00 plus the contiguous 0x4f..=0xb9 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    False = 0x00,
    Neg1 = 0x4f,
    Reserved = 0x50,
    Num1 = 0x51,
    Num2 = 0x52,
    Num3 = 0x53,
    Num4 = 0x54,
    Num5 = 0x55,
    Num6 = 0x56,
    Num7 = 0x57,
    Num8 = 0x58,
    Num9 = 0x59,
    Num10 = 0x5a,
    Num11 = 0x5b,
    Num12 = 0x5c,
    Num13 = 0x5d,
    Num14 = 0x5e,
    Num15 = 0x5f,
    Num16 = 0x60,
    Nop = 0x61,
    Ver = 0x62,
    If = 0x63,
    NotIf = 0x64,
    VerIf = 0x65,
    VerNotIf = 0x66,
    Else = 0x67,
    EndIf = 0x68,
    Verify = 0x69,
    Return = 0x6a,
    ToAltStack = 0x6b,
    FromAltStack = 0x6c,
    Drop2 = 0x6d,
    Dup2 = 0x6e,
    Dup3 = 0x6f,
    Over2 = 0x70,
    Rot2 = 0x71,
    Swap2 = 0x72,
    IfDup = 0x73,
    Depth = 0x74,
    Drop = 0x75,
    Dup = 0x76,
    Nip = 0x77,
    Over = 0x78,
    Pick = 0x79,
    Roll = 0x7a,
    Rot = 0x7b,
    Swap = 0x7c,
    Tuck = 0x7d,
    Cat = 0x7e,
    Substr = 0x7f,
    Left = 0x80,
    Right = 0x81,
    Size = 0x82,
    Invert = 0x83,
    And = 0x84,
    Or = 0x85,
    Xor = 0x86,
    Equal = 0x87,
    EqualVerify = 0x88,
    Reserved1 = 0x89,
    Reserved2 = 0x8a,
    Add1 = 0x8b,
    Sub1 = 0x8c,
    Mul2 = 0x8d,
    Div2 = 0x8e,
    Negate = 0x8f,
    Abs = 0x90,
    Not = 0x91,
    NotEqual0 = 0x92,
    Add = 0x93,
    Sub = 0x94,
    Mul = 0x95,
    Div = 0x96,
    Mod = 0x97,
    LShift = 0x98,
    RShift = 0x99,
    BoolAnd = 0x9a,
    BoolOr = 0x9b,
    NumEqual = 0x9c,
    NumEqualVerify = 0x9d,
    NumNotEqual = 0x9e,
    LessThan = 0x9f,
    GreaterThan = 0xa0,
    LessThanOrEqual = 0xa1,
    GreaterThanOrEqual = 0xa2,
    Min = 0xa3,
    Max = 0xa4,
    Within = 0xa5,
    Ripemd160 = 0xa6,
    Sha1 = 0xa7,
    Sha256 = 0xa8,
    Hash160 = 0xa9,
    Hash256 = 0xaa,
    CodeSeparator = 0xab,
    CheckSig = 0xac,
    CheckSigVerify = 0xad,
    CheckMultiSig = 0xae,
    CheckMultiSigVerify = 0xaf,
    Nop1 = 0xb0,
    CheckLockTimeVerify = 0xb1,
    CheckSequenceVerify = 0xb2,
    Nop4 = 0xb3,
    Nop5 = 0xb4,
    Nop6 = 0xb5,
    Nop7 = 0xb6,
    Nop8 = 0xb7,
    Nop9 = 0xb8,
    Nop10 = 0xb9,
}

/// Opcode and mnemonic for every assigned byte in 0x4f..=0xb9, indexed by
/// `byte - 0x4f`.
const OPCODE_TABLE: [(Opcode, &str); 107] = [
    (Opcode::Neg1, "OP_1NEGATE"),
    (Opcode::Reserved, "OP_RESERVED"),
    (Opcode::Num1, "OP_1"),
    (Opcode::Num2, "OP_2"),
    (Opcode::Num3, "OP_3"),
    (Opcode::Num4, "OP_4"),
    (Opcode::Num5, "OP_5"),
    (Opcode::Num6, "OP_6"),
    (Opcode::Num7, "OP_7"),
    (Opcode::Num8, "OP_8"),
    (Opcode::Num9, "OP_9"),
    (Opcode::Num10, "OP_10"),
    (Opcode::Num11, "OP_11"),
    (Opcode::Num12, "OP_12"),
    (Opcode::Num13, "OP_13"),
    (Opcode::Num14, "OP_14"),
    (Opcode::Num15, "OP_15"),
    (Opcode::Num16, "OP_16"),
    (Opcode::Nop, "OP_NOP"),
    (Opcode::Ver, "OP_VER"),
    (Opcode::If, "OP_IF"),
    (Opcode::NotIf, "OP_NOTIF"),
    (Opcode::VerIf, "OP_VERIF"),
    (Opcode::VerNotIf, "OP_VERNOTIF"),
    (Opcode::Else, "OP_ELSE"),
    (Opcode::EndIf, "OP_ENDIF"),
    (Opcode::Verify, "OP_VERIFY"),
    (Opcode::Return, "OP_RETURN"),
    (Opcode::ToAltStack, "OP_TOALTSTACK"),
    (Opcode::FromAltStack, "OP_FROMALTSTACK"),
    (Opcode::Drop2, "OP_2DROP"),
    (Opcode::Dup2, "OP_2DUP"),
    (Opcode::Dup3, "OP_3DUP"),
    (Opcode::Over2, "OP_2OVER"),
    (Opcode::Rot2, "OP_2ROT"),
    (Opcode::Swap2, "OP_2SWAP"),
    (Opcode::IfDup, "OP_IFDUP"),
    (Opcode::Depth, "OP_DEPTH"),
    (Opcode::Drop, "OP_DROP"),
    (Opcode::Dup, "OP_DUP"),
    (Opcode::Nip, "OP_NIP"),
    (Opcode::Over, "OP_OVER"),
    (Opcode::Pick, "OP_PICK"),
    (Opcode::Roll, "OP_ROLL"),
    (Opcode::Rot, "OP_ROT"),
    (Opcode::Swap, "OP_SWAP"),
    (Opcode::Tuck, "OP_TUCK"),
    (Opcode::Cat, "OP_CAT"),
    (Opcode::Substr, "OP_SUBSTR"),
    (Opcode::Left, "OP_LEFT"),
    (Opcode::Right, "OP_RIGHT"),
    (Opcode::Size, "OP_SIZE"),
    (Opcode::Invert, "OP_INVERT"),
    (Opcode::And, "OP_AND"),
    (Opcode::Or, "OP_OR"),
    (Opcode::Xor, "OP_XOR"),
    (Opcode::Equal, "OP_EQUAL"),
    (Opcode::EqualVerify, "OP_EQUALVERIFY"),
    (Opcode::Reserved1, "OP_RESERVED1"),
    (Opcode::Reserved2, "OP_RESERVED2"),
    (Opcode::Add1, "OP_1ADD"),
    (Opcode::Sub1, "OP_1SUB"),
    (Opcode::Mul2, "OP_2MUL"),
    (Opcode::Div2, "OP_2DIV"),
    (Opcode::Negate, "OP_NEGATE"),
    (Opcode::Abs, "OP_ABS"),
    (Opcode::Not, "OP_NOT"),
    (Opcode::NotEqual0, "OP_0NOTEQUAL"),
    (Opcode::Add, "OP_ADD"),
    (Opcode::Sub, "OP_SUB"),
    (Opcode::Mul, "OP_MUL"),
    (Opcode::Div, "OP_DIV"),
    (Opcode::Mod, "OP_MOD"),
    (Opcode::LShift, "OP_LSHIFT"),
    (Opcode::RShift, "OP_RSHIFT"),
    (Opcode::BoolAnd, "OP_BOOLAND"),
    (Opcode::BoolOr, "OP_BOOLOR"),
    (Opcode::NumEqual, "OP_NUMEQUAL"),
    (Opcode::NumEqualVerify, "OP_NUMEQUALVERIFY"),
    (Opcode::NumNotEqual, "OP_NUMNOTEQUAL"),
    (Opcode::LessThan, "OP_LESSTHAN"),
    (Opcode::GreaterThan, "OP_GREATERTHAN"),
    (Opcode::LessThanOrEqual, "OP_LESSTHANOREQUAL"),
    (Opcode::GreaterThanOrEqual, "OP_GREATERTHANOREQUAL"),
    (Opcode::Min, "OP_MIN"),
    (Opcode::Max, "OP_MAX"),
    (Opcode::Within, "OP_WITHIN"),
    (Opcode::Ripemd160, "OP_RIPEMD160"),
    (Opcode::Sha1, "OP_SHA1"),
    (Opcode::Sha256, "OP_SHA256"),
    (Opcode::Hash160, "OP_HASH160"),
    (Opcode::Hash256, "OP_HASH256"),
    (Opcode::CodeSeparator, "OP_CODESEPARATOR"),
    (Opcode::CheckSig, "OP_CHECKSIG"),
    (Opcode::CheckSigVerify, "OP_CHECKSIGVERIFY"),
    (Opcode::CheckMultiSig, "OP_CHECKMULTISIG"),
    (Opcode::CheckMultiSigVerify, "OP_CHECKMULTISIGVERIFY"),
    (Opcode::Nop1, "OP_NOP1"),
    (Opcode::CheckLockTimeVerify, "OP_CHECKLOCKTIMEVERIFY"),
    (Opcode::CheckSequenceVerify, "OP_CHECKSEQUENCEVERIFY"),
    (Opcode::Nop4, "OP_NOP4"),
    (Opcode::Nop5, "OP_NOP5"),
    (Opcode::Nop6, "OP_NOP6"),
    (Opcode::Nop7, "OP_NOP7"),
    (Opcode::Nop8, "OP_NOP8"),
    (Opcode::Nop9, "OP_NOP9"),
    (Opcode::Nop10, "OP_NOP10"),
];

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        if byte == 0x00 {
            return Some(Opcode::False);
        }
        let index = (byte as usize).checked_sub(0x4f)?;
        OPCODE_TABLE.get(index).map(|&(op, _)| op)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        if self == Opcode::False {
            return "OP_FALSE";
        }
        OPCODE_TABLE[self as usize - 0x4f].1
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One element of a disassembled script. The three PUSHDATA variants preserve
/// the prefix class so reassembly is exact even for non-minimal pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Direct push, opcode byte 1..=75.
    Push(Vec<u8>),
    /// OP_PUSHDATA1 (0x4c) with a 1-byte length.
    PushData1(Vec<u8>),
    /// OP_PUSHDATA2 (0x4d) with a 2-byte length.
    PushData2(Vec<u8>),
    /// OP_PUSHDATA4 (0x4e) with a 4-byte length.
    PushData4(Vec<u8>),
    Op(Opcode),
    /// An opcode byte with no assigned meaning. Parses fine, fails when run.
    Invalid(u8),
}

impl Token {
    /// The pushed bytes, if this token is any form of data push.
    /// `OP_FALSE` pushes an empty item at run time but is not a literal here.
    pub fn literal(&self) -> Option<&[u8]> {
        match self {
            Token::Push(data)
            | Token::PushData1(data)
            | Token::PushData2(data)
            | Token::PushData4(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Push(data)
            | Token::PushData1(data)
            | Token::PushData2(data)
            | Token::PushData4(data) => f.write_str(&hex::encode(data)),
            Token::Op(op) => f.write_str(op.mnemonic()),
            Token::Invalid(byte) => write!(f, "OP_UNKNOWN(0x{byte:02x})"),
        }
    }
}

pub fn disassemble(bytes: &[u8]) -> Result<Vec<Token>, ParseError> {
    let mut reader = Reader::new(bytes);
    let mut tokens = Vec::new();
    while reader.remaining() > 0 {
        let byte = reader.read_u8()?;
        let token = match byte {
            0x00 => Token::Op(Opcode::False),
            1..=75 => Token::Push(take_push(&mut reader, byte as usize)?),
            0x4c => {
                let len = reader.read_u8()? as usize;
                Token::PushData1(take_push(&mut reader, len)?)
            }
            0x4d => {
                let len = reader.read_u16()? as usize;
                Token::PushData2(take_push(&mut reader, len)?)
            }
            0x4e => {
                let len = reader.read_u32()? as usize;
                Token::PushData4(take_push(&mut reader, len)?)
            }
            byte => match Opcode::from_byte(byte) {
                Some(op) => Token::Op(op),
                None => Token::Invalid(byte),
            },
        };
        tokens.push(token);
    }
    Ok(tokens)
}

fn take_push(reader: &mut Reader<'_>, len: usize) -> Result<Vec<u8>, ParseError> {
    if reader.remaining() < len {
        return Err(ParseError::TruncatedPush {
            declared: len,
            have: reader.remaining(),
        });
    }
    Ok(reader.take(len)?.to_vec())
}

/// Exact inverse of [`disassemble`] over its output.
pub fn assemble(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    for token in tokens {
        match token {
            Token::Push(data) => {
                out.push(data.len() as u8);
                out.extend_from_slice(data);
            }
            Token::PushData1(data) => {
                out.push(0x4c);
                out.push(data.len() as u8);
                out.extend_from_slice(data);
            }
            Token::PushData2(data) => {
                out.push(0x4d);
                put_u16(&mut out, data.len() as u16);
                out.extend_from_slice(data);
            }
            Token::PushData4(data) => {
                out.push(0x4e);
                put_u32(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
            Token::Op(op) => out.push(op.to_byte()),
            Token::Invalid(byte) => out.push(*byte),
        }
    }
    out
}

/// Renders a token sequence as asm, space separated.
pub fn to_asm(tokens: &[Token]) -> String {
    let rendered: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    rendered.join(" ")
}

/// Matches the version-0 pay-to-witness-pubkey-hash pattern
/// `OP_FALSE <20 bytes>` and returns the program.
pub fn witness_program(tokens: &[Token]) -> Option<&[u8]> {
    match tokens {
        [Token::Op(Opcode::False), Token::Push(program)] if program.len() == 20 => Some(program),
        _ => None,
    }
}

/// Matches the pay-to-script-hash pattern `OP_HASH160 <20 bytes> OP_EQUAL`
/// and returns the script hash.
pub fn p2sh_hash(tokens: &[Token]) -> Option<&[u8]> {
    match tokens {
        [Token::Op(Opcode::Hash160), Token::Push(hash), Token::Op(Opcode::Equal)]
            if hash.len() == 20 =>
        {
            Some(hash)
        }
        _ => None,
    }
}

/// Canonical pay-to-pubkey-hash locking tokens for a 20-byte key hash.
pub fn p2pkh_script(key_hash: &[u8]) -> Vec<Token> {
    vec![
        Token::Op(Opcode::Dup),
        Token::Op(Opcode::Hash160),
        Token::Push(key_hash.to_vec()),
        Token::Op(Opcode::EqualVerify),
        Token::Op(Opcode::CheckSig),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_script(s: &str) -> Vec<Token> {
        disassemble(&hex::decode(s).expect("hex")).expect("disassemble")
    }

    #[test]
    fn p2pkh_disassembles_to_five_tokens() {
        let tokens = hex_script("76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933988ac");
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], Token::Op(Opcode::Dup));
        assert_eq!(tokens[1], Token::Op(Opcode::Hash160));
        assert_eq!(tokens[2].literal().map(<[u8]>::len), Some(20));
        assert_eq!(tokens[3], Token::Op(Opcode::EqualVerify));
        assert_eq!(tokens[4], Token::Op(Opcode::CheckSig));
        assert_eq!(
            tokens,
            p2pkh_script(&hex::decode("4bfbaf6afb76cc5771bc6404810d1cc041a69339").unwrap())
        );
    }

    #[test]
    fn byte_0x50_is_reserved() {
        let tokens = disassemble(&[0x50]).expect("parses");
        assert_eq!(tokens, vec![Token::Op(Opcode::Reserved)]);
        assert_eq!(Opcode::Reserved.mnemonic(), "OP_RESERVED");
    }

    #[test]
    fn unassigned_bytes_parse_as_invalid() {
        let tokens = disassemble(&[0xba, 0xff]).expect("parses");
        assert_eq!(tokens, vec![Token::Invalid(0xba), Token::Invalid(0xff)]);
        assert_eq!(assemble(&tokens), vec![0xba, 0xff]);
    }

    #[test]
    fn pushdata_classes_survive_reassembly() {
        // the same 3-byte payload under all four push encodings
        let script = [
            &[0x03, 1, 2, 3][..],
            &[0x4c, 0x03, 1, 2, 3],
            &[0x4d, 0x03, 0x00, 1, 2, 3],
            &[0x4e, 0x03, 0x00, 0x00, 0x00, 1, 2, 3],
        ]
        .concat();
        let tokens = disassemble(&script).expect("disassemble");
        assert_eq!(
            tokens,
            vec![
                Token::Push(vec![1, 2, 3]),
                Token::PushData1(vec![1, 2, 3]),
                Token::PushData2(vec![1, 2, 3]),
                Token::PushData4(vec![1, 2, 3]),
            ]
        );
        assert_eq!(assemble(&tokens), script);
    }

    #[test]
    fn truncated_push_is_a_parse_error() {
        let err = disassemble(&[0x05, 1, 2]).expect_err("truncated");
        assert_eq!(err, ParseError::TruncatedPush { declared: 5, have: 2 });
        disassemble(&[0x4d, 0xff]).expect_err("truncated pushdata2 length");
    }

    #[test]
    fn mnemonic_table_covers_the_assigned_range() {
        for byte in 0x4f..=0xb9u8 {
            let op = Opcode::from_byte(byte).expect("assigned");
            assert_eq!(op.to_byte(), byte);
            assert!(op.mnemonic().starts_with("OP_"));
        }
        assert_eq!(Opcode::from_byte(0x4e), None);
        assert_eq!(Opcode::from_byte(0xba), None);
        assert_eq!(Opcode::from_byte(0x00), Some(Opcode::False));
    }

    #[test]
    fn template_matchers() {
        let wp = hex_script("00141d0f172a0ecb48aee1be1f2687d2963ae33f71a1");
        assert_eq!(
            witness_program(&wp),
            Some(&hex::decode("1d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap()[..])
        );
        assert_eq!(p2sh_hash(&wp), None);

        let p2sh = hex_script("a914748284390f9e263a4b766a75d0633c50426eb87587");
        assert_eq!(
            p2sh_hash(&p2sh),
            Some(&hex::decode("748284390f9e263a4b766a75d0633c50426eb875").unwrap()[..])
        );
        assert_eq!(witness_program(&p2sh), None);
    }

    #[test]
    fn asm_rendering() {
        let tokens = vec![
            Token::Op(Opcode::Dup),
            Token::Push(vec![0xde, 0xad]),
            Token::Invalid(0xba),
        ];
        assert_eq!(to_asm(&tokens), "OP_DUP dead OP_UNKNOWN(0xba)");
    }
}
