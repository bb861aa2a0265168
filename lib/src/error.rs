use std::io;

use thiserror::Error;

/// Errors returned by [`DecryptingSession`](crate::DecryptingSession) operations.
///
/// Raw I/O errors never escape unwrapped: each lifecycle operation wraps them
/// in the variant for that operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open encrypted stream: {0}")]
    Open(#[source] io::Error),

    #[error("failed to read encrypted stream: {0}")]
    Read(#[source] io::Error),

    #[error("ciphertext has been truncated: {remaining} declared bytes never arrived")]
    Truncated { remaining: u64 },

    #[error("failed to close encrypted stream: {0}")]
    Close(#[source] io::Error),

    #[error("session is not open")]
    NotOpen,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Cipher configuration problems. These surface before any session exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported transformation {0:?}")]
    UnsupportedTransformation(String),

    #[error("key length is {0} but should be 16, 24 or 32")]
    KeyLength(usize),

    #[error("IV length is {actual} but should be {expected}")]
    IvLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Open(inner) | Error::Read(inner) | Error::Close(inner) => inner,
            Error::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            Error::NotOpen => io::Error::new(io::ErrorKind::NotConnected, e),
            Error::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}
