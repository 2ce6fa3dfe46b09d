//! Errors that occur during writing

use crate::write::OffsetLen;

/// An error occurred while serializing a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// An offset did not fit in its encoded width.
    ///
    /// For an `Offset16` this is recoverable: the caller can wrap the
    /// affected lookups in extension records and retry.
    OffsetOverflow {
        /// The width of the offset field.
        width: OffsetLen,
        /// The value that did not fit.
        value: u32,
    },
    /// An array was longer than its 16-bit count field allows.
    ArrayTooLong(usize),
}

impl Error {
    /// `true` if retrying with extension-wrapped lookups could succeed.
    pub fn is_extension_recoverable(&self) -> bool {
        matches!(
            self,
            Error::OffsetOverflow {
                width: OffsetLen::Offset16,
                ..
            }
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::OffsetOverflow { width, value } => {
                write!(f, "value {value:#x} does not fit in {width}")
            }
            Error::ArrayTooLong(len) => write!(f, "array of {len} items exceeds u16 count"),
        }
    }
}

impl std::error::Error for Error {}
