use std::io;

use thiserror::Error;

/// Errors produced while decoding the headers of an image.
///
/// Every variant is terminal: a decode either yields a complete
/// [`DecodedImage`](crate::DecodedImage) or stops at the first failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer bytes were available than a fixed-size structure requires.
    #[error("truncated {structure}: expected {expected} bytes")]
    Truncated {
        structure: &'static str,
        expected: usize,
    },

    /// The DOS header does not start with the `MZ` signature.
    #[error("the file does not have a valid PE format (DOS signature {found:#06x})")]
    InvalidFormat { found: u16 },

    /// The stream could not be positioned at the NT header offset.
    #[error("unable to seek to NT header at offset {offset:#x}")]
    SeekFailed { offset: u64 },

    /// The optional header magic is neither PE32 nor PE32+.
    #[error("unrecognized optional header magic {value:#06x}")]
    UnrecognizedOptionalHeaderMagic { value: u16 },

    /// The byte source itself failed (open, read) for reasons unrelated to the format.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
