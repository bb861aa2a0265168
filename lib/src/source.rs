//! Forward-only access to raw ciphertext, and the upstreams that hand it out.

use std::fs::File;
use std::io::{self, prelude::*, Cursor};
use std::path::{Path, PathBuf};

/// What [`ForwardSource::available`] returns when it cannot tell.
pub const UNKNOWN_AVAILABLE: u64 = u32::MAX as u64;

const SKIP_BUF_LEN: usize = 2048;

/// A readable ciphertext source with optional fast paths for skipping and
/// size probing. The defaults are always correct, just slow or uninformative.
pub trait ForwardSource: Read {
    /// Best-effort count of bytes left. May be stale by the time it's used.
    /// Returns [`UNKNOWN_AVAILABLE`] (or more) when the count isn't known.
    fn available(&mut self) -> io::Result<u64> {
        Ok(UNKNOWN_AVAILABLE)
    }

    /// Skip up to `n` bytes without reading them, returning how many were
    /// skipped. Allowed to skip fewer, including none.
    fn skip_ahead(&mut self, _n: u64) -> io::Result<u64> {
        Ok(0)
    }
}

impl ForwardSource for File {
    fn available(&mut self) -> io::Result<u64> {
        let len = self.metadata()?.len();
        let pos = self.stream_position()?;
        Ok(len.saturating_sub(pos))
    }

    fn skip_ahead(&mut self, n: u64) -> io::Result<u64> {
        let skip = n.min(self.available()?);
        self.seek(io::SeekFrom::Current(skip as i64))?;
        Ok(skip)
    }
}

impl<T: AsRef<[u8]>> ForwardSource for Cursor<T> {
    fn available(&mut self) -> io::Result<u64> {
        let len = self.get_ref().as_ref().len() as u64;
        Ok(len.saturating_sub(self.position()))
    }

    fn skip_ahead(&mut self, n: u64) -> io::Result<u64> {
        let skip = n.min(self.available()?);
        self.set_position(self.position() + skip);
        Ok(skip)
    }
}

impl ForwardSource for &[u8] {
    fn available(&mut self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn skip_ahead(&mut self, n: u64) -> io::Result<u64> {
        let skip = std::cmp::min(n, self.len() as u64) as usize;
        *self = &self[skip..];
        Ok(skip as u64)
    }
}

/// Wraps a reader whose size can't be known, like a pipe.
#[derive(Debug)]
pub struct Unsized<R>(pub R);

impl<R: Read> Read for Unsized<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> ForwardSource for Unsized<R> {}

/// Forward-only cursor over ciphertext. Tracks how many bytes it has consumed.
#[derive(Debug)]
pub struct BlockSource<R> {
    inner: R,
    position: u64,
}

impl<R: ForwardSource> BlockSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes consumed so far, by reads and skips alike.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advance by `n` bytes. Returns fewer than `n` only if the source ran out.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut skipped = self.inner.skip_ahead(n)?.min(n);
        // The fast path may under-skip. Read and discard the rest.
        let mut discard = [0; SKIP_BUF_LEN];
        while skipped < n {
            let want = std::cmp::min(SKIP_BUF_LEN as u64, n - skipped) as usize;
            match self.inner.read(&mut discard[..want]) {
                Ok(0) => break,
                Ok(read) => skipped += read as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.position += skipped;
        Ok(skipped)
    }

    /// Bytes the source says are left, or `None` if it can't say.
    pub fn available_hint(&mut self) -> io::Result<Option<u64>> {
        let available = self.inner.available()?;
        if available >= UNKNOWN_AVAILABLE {
            Ok(None)
        } else {
            Ok(Some(available))
        }
    }
}

impl<R: ForwardSource> Read for BlockSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Where a session gets its ciphertext. `open` is called once per session
/// open; `release` once per close.
pub trait Upstream {
    type Reader: ForwardSource;

    fn open(&mut self) -> io::Result<Self::Reader>;

    /// Opaque name for the source, e.g. its path.
    fn identifier(&self) -> &str;

    fn release(&mut self, reader: Self::Reader) -> io::Result<()> {
        drop(reader);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FileUpstream {
    path: PathBuf,
    identifier: String,
}

impl FileUpstream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identifier = path.display().to_string();
        Self { path, identifier }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Upstream for FileUpstream {
    type Reader = File;

    fn open(&mut self) -> io::Result<File> {
        File::open(&self.path)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Hands out one already-open reader. The bytes are gone after the first
/// session, so opening twice is an error.
#[derive(Debug)]
pub struct ReaderUpstream<R> {
    reader: Option<R>,
    identifier: String,
}

impl<R: ForwardSource> ReaderUpstream<R> {
    pub fn new(identifier: impl Into<String>, reader: R) -> Self {
        Self {
            reader: Some(reader),
            identifier: identifier.into(),
        }
    }
}

impl<R: ForwardSource> Upstream for ReaderUpstream<R> {
    type Reader = R;

    fn open(&mut self) -> io::Result<R> {
        self.reader.take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("{} has already been consumed", self.identifier),
            )
        })
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only ever returns one byte per read, and never skips on its own.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() || self.0.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    impl ForwardSource for Trickle<'_> {}

    #[test]
    fn test_skip_falls_back_to_reading() {
        let data: Vec<u8> = (0..100).collect();
        let mut source = BlockSource::new(Trickle(&data));
        assert_eq!(source.skip(37).unwrap(), 37);
        assert_eq!(source.position(), 37);
        let mut byte = [0];
        source.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 37);
        assert_eq!(source.position(), 38);
    }

    #[test]
    fn test_skip_past_end_reports_shortfall() {
        let data = [7u8; 10];
        let mut source = BlockSource::new(Trickle(&data));
        assert_eq!(source.skip(25).unwrap(), 10);
        assert_eq!(source.read(&mut [0; 4]).unwrap(), 0);
    }

    #[test]
    fn test_skip_uses_fast_path() {
        let data: Vec<u8> = (0..=255).collect();
        let mut source = BlockSource::new(Cursor::new(&data[..]));
        assert_eq!(source.skip(5000).unwrap(), 256);
        let mut source = BlockSource::new(Cursor::new(&data[..]));
        assert_eq!(source.skip(200).unwrap(), 200);
        assert_eq!(source.available_hint().unwrap(), Some(56));
    }

    #[test]
    fn test_unsized_hint_is_unknown() {
        let mut source = BlockSource::new(Unsized(&[1u8, 2, 3][..]));
        assert_eq!(source.available_hint().unwrap(), None);
        assert_eq!(source.skip(2).unwrap(), 2);
    }

    #[test]
    fn test_reader_upstream_opens_once() {
        let mut upstream = ReaderUpstream::new("stdin", &b"abc"[..]);
        assert_eq!(upstream.identifier(), "stdin");
        upstream.open().unwrap();
        upstream.open().unwrap_err();
    }
}
