//! AES-CBC parameters, the streaming decrypt transform, and the matching
//! encrypt side for producing IV-prefixed files.

use std::fmt;
use std::io::{self, prelude::*};
use std::str::FromStr;

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{
    block_padding::{NoPadding, Padding, Pkcs7},
    consts::U16,
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use tracing::trace;

use crate::error::ConfigError;
use crate::source::{BlockSource, ForwardSource};

/// AES block size. Also the length of every IV.
pub const BLOCK_LEN: usize = 16;
/// Ciphertext is decrypted this many bytes at a time.
pub const CHUNK_LEN: usize = 16384; // 2^14

pub type Iv = [u8; BLOCK_LEN];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl Algorithm {
    fn for_key_len(len: usize) -> Result<Self, ConfigError> {
        match len {
            16 => Ok(Algorithm::Aes128),
            24 => Ok(Algorithm::Aes192),
            32 => Ok(Algorithm::Aes256),
            _ => Err(ConfigError::KeyLength(len)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaddingScheme {
    #[default]
    Pkcs7,
    None,
}

/// A parsed `ALGORITHM/MODE/PADDING` string. Only AES in CBC mode is
/// supported, so the padding is the only real choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transformation {
    pub padding: PaddingScheme,
}

impl FromStr for Transformation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || ConfigError::UnsupportedTransformation(s.to_string());
        let mut parts = s.split('/');
        let (Some(algorithm), Some(mode), Some(padding), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unsupported());
        };
        if !algorithm.eq_ignore_ascii_case("AES") || !mode.eq_ignore_ascii_case("CBC") {
            return Err(unsupported());
        }
        let padding = if padding.eq_ignore_ascii_case("PKCS7Padding")
            || padding.eq_ignore_ascii_case("PKCS5Padding")
        {
            PaddingScheme::Pkcs7
        } else if padding.eq_ignore_ascii_case("NoPadding") {
            PaddingScheme::None
        } else {
            return Err(unsupported());
        };
        Ok(Self { padding })
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.padding {
            PaddingScheme::Pkcs7 => f.write_str("AES/CBC/PKCS7Padding"),
            PaddingScheme::None => f.write_str("AES/CBC/NoPadding"),
        }
    }
}

/// Key plus transformation. Validated once, then shared by every session.
#[derive(Clone)]
pub struct CipherParameters {
    algorithm: Algorithm,
    padding: PaddingScheme,
    key: Vec<u8>,
}

impl CipherParameters {
    pub fn new(transformation: Transformation, key: &[u8]) -> Result<Self, ConfigError> {
        Ok(Self {
            algorithm: Algorithm::for_key_len(key.len())?,
            padding: transformation.padding,
            key: key.to_vec(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn padding(&self) -> PaddingScheme {
        self.padding
    }

    pub fn block_size(&self) -> u32 {
        BLOCK_LEN as u32
    }

    // Decrypts `buf` in place and returns the plaintext length, which is
    // shorter than `buf` only when `last` strips padding.
    fn decrypt_chunk(&self, iv: &Iv, buf: &mut [u8], last: bool) -> io::Result<usize> {
        if last && self.padding == PaddingScheme::Pkcs7 {
            cbc_decrypt::<Pkcs7>(self.algorithm, &self.key, iv, buf)
        } else {
            cbc_decrypt::<NoPadding>(self.algorithm, &self.key, iv, buf)
        }
    }

    // Encrypts the first `msg_len` bytes of `buf` in place and returns the
    // ciphertext length.
    fn encrypt_chunk(&self, iv: &Iv, buf: &mut [u8], msg_len: usize, last: bool) -> io::Result<usize> {
        if last && self.padding == PaddingScheme::Pkcs7 {
            cbc_encrypt::<Pkcs7>(self.algorithm, &self.key, iv, buf, msg_len)
        } else {
            cbc_encrypt::<NoPadding>(self.algorithm, &self.key, iv, buf, msg_len)
        }
    }
}

// Implement Debug explicitly, to avoid leaking keys.
impl fmt::Debug for CipherParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CipherParameters")
            .field("algorithm", &self.algorithm)
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

fn bad_key(e: cbc::cipher::InvalidLength) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
}

fn cbc_decrypt<P: Padding<U16>>(
    algorithm: Algorithm,
    key: &[u8],
    iv: &Iv,
    buf: &mut [u8],
) -> io::Result<usize> {
    let plaintext = match algorithm {
        Algorithm::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<P>(buf),
        Algorithm::Aes192 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<P>(buf),
        Algorithm::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<P>(buf),
    };
    plaintext
        .map(|plaintext| plaintext.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "ciphertext has invalid padding"))
}

fn cbc_encrypt<P: Padding<U16>>(
    algorithm: Algorithm,
    key: &[u8],
    iv: &Iv,
    buf: &mut [u8],
    msg_len: usize,
) -> io::Result<usize> {
    let ciphertext = match algorithm {
        Algorithm::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_mut::<P>(buf, msg_len),
        Algorithm::Aes192 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_mut::<P>(buf, msg_len),
        Algorithm::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_mut::<P>(buf, msg_len),
    };
    ciphertext.map(|ciphertext| ciphertext.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "plaintext is not a whole number of blocks",
        )
    })
}

fn last_block(ciphertext: &[u8]) -> Iv {
    let mut block = [0; BLOCK_LEN];
    block.copy_from_slice(&ciphertext[ciphertext.len() - BLOCK_LEN..]);
    block
}

/// The IV loaded into the cipher when a session was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainingState {
    /// Decrypting from the first ciphertext block.
    HeaderIv(Iv),
    /// Decrypting from the block after `block_offset`, whose ciphertext is `iv`.
    Chained { block_offset: u64, iv: Iv },
}

impl ChainingState {
    pub fn iv(&self) -> &Iv {
        match self {
            ChainingState::HeaderIv(iv) | ChainingState::Chained { iv, .. } => iv,
        }
    }
}

// Try to fill `buf`, potentially with multiple reads, but return early if we encounter EOF. Retry
// ErrorKind::Interrupted errors.
pub(crate) fn read_exact_or_eof(reader: &mut impl Read, mut buf: &mut [u8]) -> io::Result<usize> {
    let mut total_read = 0;
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => {
                total_read += n;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total_read)
}

/// Decrypts CBC ciphertext from a [`BlockSource`] as it is read.
///
/// The last ciphertext block of every chunk is held back until the next read
/// shows whether it was the final block, so padding is only ever stripped from
/// the true end of the stream.
pub struct DecryptReader<R> {
    source: BlockSource<R>,
    params: CipherParameters,
    // Ciphertext of the block before the next one to decrypt.
    chain: Iv,
    held: Option<Iv>,
    plaintext_buf: Vec<u8>,
    plaintext_buf_pos: usize,
    plaintext_buf_end: usize,
    at_eof: bool,
    did_error: bool, // decryption errors for this reader are unrecoverable
}

impl<R: ForwardSource> DecryptReader<R> {
    /// `source` must be positioned at the block that `iv` chains into.
    pub fn new(params: CipherParameters, source: BlockSource<R>, iv: Iv) -> Self {
        Self {
            source,
            params,
            chain: iv,
            held: None,
            plaintext_buf: vec![0; CHUNK_LEN],
            plaintext_buf_pos: 0,
            plaintext_buf_end: 0,
            at_eof: false,
            did_error: false,
        }
    }

    fn bail_if_errored_before(&self) -> io::Result<()> {
        if self.did_error {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "already encountered an error",
            ))
        } else {
            Ok(())
        }
    }

    pub fn into_source(self) -> BlockSource<R> {
        self.source
    }

    /// Decrypt and drop up to `n` bytes. Returns fewer only at end of stream.
    pub fn discard(&mut self, n: u64) -> io::Result<u64> {
        let mut scratch = [0; 4096];
        let mut discarded = 0;
        while discarded < n {
            let want = std::cmp::min(scratch.len() as u64, n - discarded) as usize;
            let read = self.read(&mut scratch[..want])?;
            if read == 0 {
                break;
            }
            discarded += read as u64;
        }
        Ok(discarded)
    }

    /// Decrypt the next chunk unless plaintext or ciphertext is already
    /// waiting. Returns false if the source had no ciphertext left at all.
    pub fn fill(&mut self) -> io::Result<bool> {
        self.bail_if_errored_before()?;
        if self.plaintext_buf_pos < self.plaintext_buf_end || self.held.is_some() {
            return Ok(true);
        }
        if self.at_eof {
            return Ok(false);
        }
        Ok(self.decrypt_next_chunk()? > 0)
    }

    /// Upper bound on the plaintext left, or `None` if the source can't say.
    /// Padding is counted, so this overshoots by up to one block.
    pub fn available_hint(&mut self) -> io::Result<Option<u64>> {
        let buffered = (self.plaintext_buf_end - self.plaintext_buf_pos) as u64;
        let held = if self.held.is_some() { BLOCK_LEN as u64 } else { 0 };
        Ok(self
            .source
            .available_hint()?
            .map(|available| available + buffered + held))
    }

    // Returns how much ciphertext was decrypted.
    fn decrypt_next_chunk(&mut self) -> io::Result<usize> {
        // Set did_error back to false if we make it to the end.
        debug_assert!(!self.did_error);
        self.did_error = true;

        self.plaintext_buf_pos = 0;
        self.plaintext_buf_end = 0;

        let mut ciphertext_array = [0; BLOCK_LEN + CHUNK_LEN];
        let held_len = match self.held.take() {
            Some(block) => {
                ciphertext_array[..BLOCK_LEN].copy_from_slice(&block);
                BLOCK_LEN
            }
            None => 0,
        };
        let read = read_exact_or_eof(
            &mut self.source,
            &mut ciphertext_array[held_len..][..CHUNK_LEN],
        )?;
        let total = held_len + read;

        let (decrypt_len, last) = if read == CHUNK_LEN {
            let keep = total - BLOCK_LEN;
            self.held = Some(last_block(&ciphertext_array[..total]));
            (keep, false)
        } else {
            self.at_eof = true;
            if total % BLOCK_LEN != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "ciphertext is not a whole number of blocks",
                ));
            }
            (total, true)
        };
        if decrypt_len == 0 {
            self.did_error = false;
            return Ok(0);
        }

        let ciphertext = &ciphertext_array[..decrypt_len];
        let next_chain = last_block(ciphertext);
        let plaintext = &mut self.plaintext_buf[..decrypt_len];
        plaintext.copy_from_slice(ciphertext);
        let written = self.params.decrypt_chunk(&self.chain, plaintext, last)?;
        self.chain = next_chain;
        self.plaintext_buf_end = written;
        trace!(
            encrypted = decrypt_len,
            decrypted = written,
            last,
            "decrypted chunk"
        );
        self.did_error = false;
        Ok(decrypt_len)
    }
}

impl<R: ForwardSource> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.bail_if_errored_before()?;
        if buf.is_empty() {
            return Ok(0);
        }

        // If the plaintext buffer is empty, and we're not at EOF, decrypt another chunk.
        if !self.at_eof && self.plaintext_buf_pos == self.plaintext_buf_end {
            self.decrypt_next_chunk()?;
        }

        // Copy as many bytes as possible into the caller's buffer.
        let available = self.plaintext_buf_end - self.plaintext_buf_pos;
        let take = std::cmp::min(buf.len(), available);
        buf[..take].copy_from_slice(&self.plaintext_buf[self.plaintext_buf_pos..][..take]);
        self.plaintext_buf_pos += take;

        Ok(take)
    }
}

impl<R> fmt::Debug for DecryptReader<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DecryptReader").finish_non_exhaustive()
    }
}

/// Streams plaintext out as `[IV][CBC ciphertext]`.
pub struct EncryptWriter<W: Write> {
    inner_writer: W,
    params: CipherParameters,
    header: Option<Iv>,
    chain: Iv,
    plaintext_buf: Vec<u8>,
    plaintext_buf_len: usize,
    did_error: bool, // write errors for this writer are unrecoverable
}

impl<W: Write> EncryptWriter<W> {
    /// Writes a random IV header ahead of the ciphertext.
    pub fn new(params: CipherParameters, inner_writer: W) -> Self {
        // NB: This is a cryptographically secure RNG.
        let iv: Iv = rand::random();
        Self::with_iv(params, iv, true, inner_writer)
    }

    /// Uses `iv` for the first block. With `write_header` false the output is
    /// bare ciphertext and the IV has to travel out of band.
    pub fn with_iv(params: CipherParameters, iv: Iv, write_header: bool, inner_writer: W) -> Self {
        Self {
            inner_writer,
            params,
            header: write_header.then_some(iv),
            chain: iv,
            plaintext_buf: vec![0; CHUNK_LEN + BLOCK_LEN],
            plaintext_buf_len: 0,
            did_error: false,
        }
    }

    fn bail_if_errored_before(&self) -> io::Result<()> {
        if self.did_error {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "already encountered an error",
            ))
        } else {
            Ok(())
        }
    }

    fn encrypt_and_write_buf(&mut self, last: bool) -> io::Result<()> {
        // Set did_error back to false if we make it to the end.
        debug_assert!(!self.did_error);
        self.did_error = true;

        if let Some(iv) = self.header.take() {
            self.inner_writer.write_all(&iv)?;
        }

        let msg_len = self.plaintext_buf_len;
        let len = self
            .params
            .encrypt_chunk(&self.chain, &mut self.plaintext_buf, msg_len, last)?;
        self.plaintext_buf_len = 0;
        if len > 0 {
            self.chain = last_block(&self.plaintext_buf[..len]);
            self.inner_writer.write_all(&self.plaintext_buf[..len])?;
        }

        self.did_error = false;
        Ok(())
    }

    /// Pads and writes the final block. Must be called exactly once.
    pub fn finalize(&mut self) -> io::Result<()> {
        self.bail_if_errored_before()?;
        self.encrypt_and_write_buf(true)
    }

    /// Consume self and return the inner writer. Note any unfinalized plaintext in internal buffer
    /// will be lost.
    pub fn into_inner(self) -> W {
        self.inner_writer
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, plaintext: &[u8]) -> io::Result<usize> {
        self.bail_if_errored_before()?;

        // Copy as many bytes as possible into the plaintext buffer.
        let want = CHUNK_LEN - self.plaintext_buf_len;
        let take = std::cmp::min(want, plaintext.len());
        self.plaintext_buf[self.plaintext_buf_len..][..take].copy_from_slice(&plaintext[..take]);
        self.plaintext_buf_len += take;

        // A full buffer is block aligned, so it can go out without padding.
        if self.plaintext_buf_len == CHUNK_LEN {
            self.encrypt_and_write_buf(false)?;
        }

        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner_writer.flush()
    }
}

// Implement Debug explicitly, to avoid leaking keys.
impl<W: Write> fmt::Debug for EncryptWriter<W> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("EncryptWriter").finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` into `[random IV][ciphertext]`.
pub fn encrypt(params: &CipherParameters, plaintext: &[u8]) -> io::Result<Vec<u8>> {
    encrypt_with_iv(params, &rand::random(), plaintext)
}

/// Encrypt `plaintext` into `[iv][ciphertext]`.
pub fn encrypt_with_iv(params: &CipherParameters, iv: &Iv, plaintext: &[u8]) -> io::Result<Vec<u8>> {
    let mut writer = EncryptWriter::with_iv(params.clone(), *iv, true, Vec::new());
    writer.write_all(plaintext)?;
    writer.finalize()?;
    Ok(writer.into_inner())
}

/// Decrypt a whole `[IV][ciphertext]` blob.
pub fn decrypt(params: &CipherParameters, blob: &[u8]) -> io::Result<Vec<u8>> {
    if blob.len() < BLOCK_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "ciphertext is missing its IV",
        ));
    }
    let (iv, ciphertext) = blob.split_at(BLOCK_LEN);
    let mut reader = DecryptReader::new(params.clone(), BlockSource::new(ciphertext), last_block(iv));
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    reader.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}
