//! The open/read/close lifecycle over one encrypted upstream.

use std::io::{self, prelude::*};

use tracing::{debug, warn};

use crate::cipher::{read_exact_or_eof, ChainingState, DecryptReader, Iv, PaddingScheme, BLOCK_LEN};
use crate::config::{IvPlacement, SessionConfig, SmallSeekPolicy};
use crate::error::{Error, Result};
use crate::observer::{Observers, TransferEvent, TransferObserver};
use crate::seek::{plan_seek_with_policy, SeekPlan};
use crate::source::{BlockSource, Upstream};

/// What the caller wants out of an `open`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataSpec {
    /// Plaintext offset to start reading from.
    pub position: u64,
    /// Plaintext bytes the caller expects, if it knows.
    pub length: Option<u64>,
    /// Passed through to observers untouched.
    pub is_network: bool,
}

impl DataSpec {
    pub fn at(position: u64) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remaining {
    Known(u64),
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Read(usize),
    EndOfStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

struct OpenStream<R> {
    reader: DecryptReader<R>,
    chaining: ChainingState,
    remaining: Remaining,
    // A declared length is a promise; a hinted one is only an upper bound.
    declared: bool,
    spec: DataSpec,
}

/// Random-access decryption of one IV-prefixed CBC upstream.
///
/// `open` positions the stream at any plaintext offset by reading a single
/// chaining block of ciphertext, and `read` then decrypts forward from there.
/// Opening an open session is a no-op, so repositioning takes a `close` first.
///
/// Sessions are single-caller. Nothing here locks.
pub struct DecryptingSession<U: Upstream> {
    upstream: U,
    config: SessionConfig,
    stream: Option<OpenStream<U::Reader>>,
    observers: Observers,
}

impl<U: Upstream> DecryptingSession<U> {
    pub fn new(upstream: U, config: SessionConfig) -> Self {
        Self {
            upstream,
            config,
            stream: None,
            observers: Observers::default(),
        }
    }

    pub fn register_observer(&mut self, observer: impl TransferObserver + Send + 'static) {
        self.observers.register(Box::new(observer));
    }

    pub fn identifier(&self) -> &str {
        self.upstream.identifier()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match self.stream {
            Some(_) => SessionState::Open,
            None => SessionState::Closed,
        }
    }

    /// `None` while closed.
    pub fn remaining(&self) -> Option<Remaining> {
        self.stream.as_ref().map(|stream| stream.remaining)
    }

    /// The IV the cipher was loaded with at open. `None` while closed.
    pub fn chaining_state(&self) -> Option<&ChainingState> {
        self.stream.as_ref().map(|stream| &stream.chaining)
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Position the session at `spec.position` and report how much plaintext
    /// is left.
    ///
    /// Any target up to and including the end of the plaintext opens. A
    /// target past the end fails with [`Error::Open`] wrapping
    /// `UnexpectedEof`, however far past it is. With
    /// [`SmallSeekPolicy::Literal`], targets in the first two blocks are not
    /// checked, since the session reads from offset 0 regardless.
    pub fn open(&mut self, spec: DataSpec) -> Result<Remaining> {
        if let Some(stream) = &self.stream {
            debug!(
                source = self.upstream.identifier(),
                requested = spec.position,
                "session already open, ignoring reopen"
            );
            return Ok(stream.remaining);
        }

        let stream = self.open_stream(spec).map_err(Error::Open)?;
        let remaining = stream.remaining;
        self.stream = Some(stream);
        self.observers.notify(
            self.upstream.identifier(),
            TransferEvent::Start {
                position: spec.position,
                length: spec.length,
                is_network: spec.is_network,
            },
        );
        Ok(remaining)
    }

    fn open_stream(&mut self, spec: DataSpec) -> io::Result<OpenStream<U::Reader>> {
        let mut source = BlockSource::new(self.upstream.open()?);
        let params = &self.config.params;
        let header_iv = match self.config.iv_placement {
            IvPlacement::Header => read_block(&mut source, "ciphertext is missing its IV")?,
            IvPlacement::Fixed(iv) => iv,
        };

        let ciphertext_start = source.position();
        let plan = plan_seek_with_policy(spec.position, params.block_size(), self.config.small_seek);
        let chaining = match plan {
            SeekPlan::HeaderIv { .. } => {
                if spec.position > 0 && self.config.small_seek == SmallSeekPolicy::Literal {
                    warn!(
                        requested = spec.position,
                        "no chaining block before the target, reading from offset 0"
                    );
                }
                ChainingState::HeaderIv(header_iv)
            }
            SeekPlan::Chained {
                chaining_block_ciphertext_offset,
                ciphertext_bytes_to_skip,
                ..
            } => {
                let skipped = source.skip(chaining_block_ciphertext_offset)?;
                if skipped < chaining_block_ciphertext_offset {
                    return Err(past_end(spec.position));
                }
                let iv = read_block(&mut source, "seek position is past the end of the ciphertext")?;
                debug_assert_eq!(source.position() - ciphertext_start, ciphertext_bytes_to_skip);
                ChainingState::Chained {
                    block_offset: chaining_block_ciphertext_offset,
                    iv,
                }
            }
        };

        let mut reader = DecryptReader::new(params.clone(), source, *chaining.iv());
        let discard = plan.plaintext_bytes_to_discard();
        if reader.discard(discard)? < discard {
            return Err(past_end(spec.position));
        }
        // A padded stream always ends inside a ciphertext block, so landing
        // on a block boundary with no ciphertext after it is past the end.
        if discard == 0
            && !plan.uses_header_iv()
            && params.padding() == PaddingScheme::Pkcs7
            && !reader.fill()?
        {
            return Err(past_end(spec.position));
        }

        let (remaining, declared) = match spec.length {
            Some(length) => (Remaining::Known(length), true),
            None => match reader.available_hint()? {
                Some(available) => (Remaining::Known(available), false),
                None => (Remaining::Unknown, false),
            },
        };
        debug!(
            source = self.upstream.identifier(),
            position = spec.position,
            header_iv = plan.uses_header_iv(),
            ?remaining,
            "opened encrypted stream"
        );

        Ok(OpenStream {
            reader,
            chaining,
            remaining,
            declared,
            spec,
        })
    }

    /// Decrypt up to `buf.len()` bytes. End of stream is a value, not an error.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read_chunk(buf)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotOpen);
        };
        if stream.remaining == Remaining::Known(0) {
            return Ok(ReadOutcome::EndOfStream);
        }
        if buf.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }

        let want = match stream.remaining {
            Remaining::Known(n) => std::cmp::min(n, buf.len() as u64) as usize,
            Remaining::Unknown => buf.len(),
        };
        let read = stream.reader.read(&mut buf[..want]).map_err(Error::Read)?;

        if read == 0 {
            if let Remaining::Known(n) = stream.remaining {
                if stream.declared {
                    return Err(Error::Truncated { remaining: n });
                }
                stream.remaining = Remaining::Known(0);
            }
            return Ok(ReadOutcome::EndOfStream);
        }

        if let Remaining::Known(n) = &mut stream.remaining {
            *n -= read as u64;
        }
        self.observers.notify(
            self.upstream.identifier(),
            TransferEvent::Bytes {
                count: read,
                is_network: stream.spec.is_network,
            },
        );
        Ok(ReadOutcome::Read(read))
    }

    /// Release the upstream. Always leaves the session closed, even when the
    /// release itself fails.
    pub fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let reader = stream.reader.into_source().into_inner();
        let released = self.upstream.release(reader);
        self.observers.notify(
            self.upstream.identifier(),
            TransferEvent::End {
                is_network: stream.spec.is_network,
            },
        );
        debug!(source = self.upstream.identifier(), "closed encrypted stream");
        released.map_err(Error::Close)
    }
}

impl<U: Upstream> Read for DecryptingSession<U> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_chunk(buf)? {
            ReadOutcome::Read(n) => Ok(n),
            ReadOutcome::EndOfStream => Ok(0),
        }
    }
}

impl<U: Upstream> std::fmt::Debug for DecryptingSession<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DecryptingSession")
            .field("source", &self.upstream.identifier())
            .field("state", &self.state())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

fn read_block(source: &mut impl Read, short_msg: &'static str) -> io::Result<Iv> {
    let mut block = [0; BLOCK_LEN];
    if read_exact_or_eof(source, &mut block)? < BLOCK_LEN {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, short_msg));
    }
    Ok(block)
}

fn past_end(position: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("seek position {position} is past the end of the ciphertext"),
    )
}

/// Makes fresh sessions that share one configuration.
pub struct SessionFactory<F> {
    config: SessionConfig,
    make_upstream: F,
}

impl<F, U> SessionFactory<F>
where
    F: Fn() -> U,
    U: Upstream,
{
    pub fn new(config: SessionConfig, make_upstream: F) -> Self {
        Self {
            config,
            make_upstream,
        }
    }

    pub fn create_session(&self) -> DecryptingSession<U> {
        DecryptingSession::new((self.make_upstream)(), self.config.clone())
    }
}
