//! Transaction script and signature verification.
//!
//! The crate answers one question: is a transaction authorized to spend the
//! outputs it references? It decodes the raw transaction bytes, tokenizes the
//! scripts involved, re-derives the digest each signature committed to
//! (legacy or BIP143), and executes the unlocking/locking script pair on a
//! stack machine. Failed scripts are an `Ok(false)` verdict; bytes that
//! cannot be interpreted at all are an [`Error`].
//!
//! ```no_run
//! let spending: Vec<u8> = unimplemented!("raw transaction bytes");
//! let funding: Vec<u8> = unimplemented!("raw bytes of the spent transaction");
//! let valid = scriptcheck::verify(&spending, &[&funding]).unwrap();
//! assert!(valid);
//! ```
//!
//! Historical chain data relies on two non-standard behaviors, enabled by
//! default in [`verify`] and individually controllable through
//! [`verify_with_flags`]: a failed input is retried once with its unlocking
//! script ignored ([`VERIFY_EMPTY_UNLOCK_RETRY`]), and a signature is also
//! accepted if it signs a fixed sentinel message instead of the transaction
//! digest ([`VERIFY_SENTINEL_MESSAGE`]).

use std::fmt;

pub mod codec;
pub mod engine;
pub mod script;
pub mod sighash;
pub mod tx;
pub mod verify;

pub use codec::ParseError;
pub use engine::Execution;
pub use script::{assemble, disassemble, to_asm, Opcode, Token};
pub use tx::{DecodeMode, Transaction, TxIn, TxOut};
pub use verify::{verify_input, verify_transaction};

/// Strict verification: no historical quirks.
pub const VERIFY_NONE: u32 = 0;
/// Retry a failed input once with an empty unlocking script.
pub const VERIFY_EMPTY_UNLOCK_RETRY: u32 = 1 << 0;
/// Accept signatures over the fixed sentinel message.
pub const VERIFY_SENTINEL_MESSAGE: u32 = 1 << 1;
/// Both quirks, as required to validate historical chain data.
pub const VERIFY_CHAIN_QUIRKS: u32 = VERIFY_EMPTY_UNLOCK_RETRY | VERIFY_SENTINEL_MESSAGE;

const SUPPORTED_FLAGS: u32 = VERIFY_CHAIN_QUIRKS;

/// Validated set of `VERIFY_*` bits.
#[derive(Debug, Clone, Copy)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn empty_unlock_retry(self) -> bool {
        self.0 & VERIFY_EMPTY_UNLOCK_RETRY != 0
    }

    pub fn sentinel_message(self) -> bool {
        self.0 & VERIFY_SENTINEL_MESSAGE != 0
    }
}

/// A hard failure: the inputs could not be interpreted. Distinct from a
/// `false` verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed transaction or script bytes.
    Parse(ParseError),
    /// The requested input does not exist.
    InputIndex(usize),
    /// No supplied transaction provides the referenced output.
    MissingPrevout { input: usize, vout: u32 },
    /// Unrecognized flag bits.
    InvalidFlags(u32),
    /// A signature names a hash type outside the supported set.
    SighashType(u8),
    /// SIGHASH_SINGLE on an input with no output at the same index.
    SighashSingleOutOfRange { input: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "parse error: {err}"),
            Error::InputIndex(index) => write!(f, "input index {index} out of range"),
            Error::MissingPrevout { input, vout } => {
                write!(f, "input {input}: spent output {vout} not found")
            }
            Error::InvalidFlags(bits) => write!(f, "unknown verification flags {bits:#x}"),
            Error::SighashType(hash_type) => {
                write!(f, "unsupported signature hash type {hash_type:#04x}")
            }
            Error::SighashSingleOutOfRange { input } => {
                write!(f, "input {input}: SIGHASH_SINGLE has no matching output")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

/// Verifies raw transaction bytes against the raw transactions funding it,
/// with the historical quirks enabled.
pub fn verify(tx_bytes: &[u8], prev_tx_bytes: &[&[u8]]) -> Result<bool, Error> {
    verify_with_flags(tx_bytes, prev_tx_bytes, VERIFY_CHAIN_QUIRKS)
}

pub fn verify_with_flags(
    tx_bytes: &[u8],
    prev_tx_bytes: &[&[u8]],
    flags: u32,
) -> Result<bool, Error> {
    let flags = VerifyFlags::from_bits(flags)?;
    let tx = Transaction::decode(tx_bytes)?;
    let prev_txs = prev_tx_bytes
        .iter()
        .map(|bytes| Transaction::decode(bytes))
        .collect::<Result<Vec<_>, _>>()?;
    verify_transaction(&tx, &prev_txs, flags)
}
