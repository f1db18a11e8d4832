use thiserror::Error;

/// The `Error` type for `litelog`.
#[derive(Error, Debug)]
pub enum Error {
    /// Key was not found, or has been tombstoned by a `delete`.
    #[error("key not found")]
    NotFound,

    /// The key exceeds the maximum allowed size of 65,536 bytes.
    #[error("key size exceeds the 65536 byte limit")]
    InvalidKeySize,

    /// The value exceeds the maximum allowed size of 16,777,216 bytes.
    #[error("value size exceeds the 16777216 byte limit")]
    InvalidValueSize,

    /// An on-disk structure could not be decoded: a short read, a size that
    /// violates a bound, a payload whose length disagrees with its header,
    /// or a checksum mismatch.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Any other filesystem or operating-system failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The `Result` type for `litelog`.
pub type Result<T> = std::result::Result<T, Error>;
