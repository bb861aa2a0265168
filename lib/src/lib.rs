//! Random-access decryption of files laid out as `[IV][AES-CBC ciphertext]`.
//!
//! CBC decryption of block `k` needs the ciphertext of block `k - 1`, so a
//! [`DecryptingSession`] can start at any plaintext offset by reading one
//! extra block instead of decrypting the whole prefix. The plaintext is never
//! held in memory beyond a single 16 KiB chunk.
//!
//! ```no_run
//! use cipherseek::{CipherParameters, DataSpec, DecryptingSession, FileUpstream, SessionConfig};
//! use std::io::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let params = CipherParameters::new("AES/CBC/PKCS7Padding".parse()?, b"codingaffairscom")?;
//! let mut session = DecryptingSession::new(FileUpstream::new("video.enc"), SessionConfig::new(params));
//! session.open(DataSpec::at(5000))?;
//! let mut rest = Vec::new();
//! session.read_to_end(&mut rest)?;
//! session.close()?;
//! # Ok(())
//! # }
//! ```

mod cipher;
mod config;
mod error;
mod observer;
mod seek;
mod session;
mod source;

pub use cipher::{
    decrypt, encrypt, encrypt_with_iv, Algorithm, ChainingState, CipherParameters, DecryptReader,
    EncryptWriter, Iv, PaddingScheme, Transformation, BLOCK_LEN, CHUNK_LEN,
};
pub use config::{IvPlacement, SessionConfig, SmallSeekPolicy};
pub use error::{ConfigError, Error, Result};
pub use observer::{TransferEvent, TransferObserver};
pub use seek::{plan_seek, plan_seek_with_policy, SeekPlan};
pub use session::{
    DataSpec, DecryptingSession, ReadOutcome, Remaining, SessionFactory, SessionState,
};
pub use source::{
    BlockSource, FileUpstream, ForwardSource, ReaderUpstream, Unsized, Upstream,
    UNKNOWN_AVAILABLE,
};
