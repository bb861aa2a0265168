use std::fs::File;
use std::io::{self, prelude::*, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use cipherseek::{
    CipherParameters, DataSpec, DecryptingSession, EncryptWriter, FileUpstream, IvPlacement,
    ReadOutcome, ReaderUpstream, SessionConfig, SmallSeekPolicy, Transformation, TransferEvent,
    Unsized, Upstream, CHUNK_LEN,
};
use clap::{Parser, Subcommand};
use tracing::{debug, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;

/// Encrypt to, and decrypt from, IV-prefixed AES-CBC files.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log to stderr. Repeat for more detail. RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::Args)]
struct CipherArgs {
    /// Hex-encoded 16, 24 or 32 byte key, or "zero" for 16 zero bytes
    key: String,

    #[arg(long, default_value_t = Transformation::default())]
    transformation: Transformation,

    /// Either encrypt to hex, or decrypt from hex
    #[arg(long)]
    hex: bool,

    /// Hex-encoded IV kept out of band. The ciphertext has no IV header.
    #[arg(long)]
    fixed_iv: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt stdin to stdout
    Encrypt {
        #[command(flatten)]
        cipher: CipherArgs,
    },
    /// Decrypt a file, or stdin, to stdout
    Decrypt {
        #[command(flatten)]
        cipher: CipherArgs,

        /// Plaintext offset to start from
        #[arg(long, default_value_t = 0)]
        seek: u64,

        /// Plaintext bytes to read. Fewer arriving is an error.
        #[arg(long)]
        length: Option<u64>,

        /// Start at offset 0 instead when the seek target is in the first two blocks
        #[arg(long)]
        literal_small_seek: bool,

        path: Option<PathBuf>,
    },
}

impl CipherArgs {
    fn params(&self) -> anyhow::Result<CipherParameters> {
        let key = if self.key == "zero" {
            vec![0; 16]
        } else {
            hex::decode(&self.key).context("key is not valid hex")?
        };
        Ok(CipherParameters::new(self.transformation, &key)?)
    }

    fn iv_placement(&self) -> anyhow::Result<IvPlacement> {
        let Some(iv) = &self.fixed_iv else {
            return Ok(IvPlacement::Header);
        };
        let iv = hex::decode(iv).context("IV is not valid hex")?;
        Ok(IvPlacement::fixed(&iv)?)
    }
}

// Hex-encodes everything written through it. The trailing newline is the
// caller's job.
struct HexWriter<W> {
    inner_writer: W,
}

impl<W: Write> Write for HexWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner_writer.write_all(hex::encode(buf).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner_writer.flush()
    }
}

// Decodes hex text, skipping whitespace wherever it appears. Reads a byte at
// a time, so the inner reader should be buffered.
struct HexReader<R> {
    inner_reader: R,
}

impl<R: BufRead> Read for HexReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = 2 * std::cmp::min(buf.len(), 32768);
        let mut digits = Vec::with_capacity(want);
        let mut byte = [0];
        while digits.len() < want {
            match self.inner_reader.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0].is_ascii_whitespace() => {}
                Ok(_) => digits.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        let decoded = hex::decode(&digits)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid hex: {e}")))?;
        buf[..decoded.len()].copy_from_slice(&decoded);
        Ok(decoded.len())
    }
}

fn encrypt(cipher: &CipherArgs) -> anyhow::Result<()> {
    let params = cipher.params()?;
    let stdout = io::stdout();
    let mut output: Box<dyn Write> = if cipher.hex {
        Box::new(HexWriter {
            inner_writer: stdout.lock(),
        })
    } else {
        Box::new(stdout.lock())
    };

    let mut encrypter = match cipher.iv_placement()? {
        IvPlacement::Fixed(iv) => EncryptWriter::with_iv(params, iv, false, &mut output),
        IvPlacement::Header => EncryptWriter::new(params, &mut output),
    };
    io::copy(&mut io::stdin().lock(), &mut encrypter)?;
    encrypter.finalize()?;
    drop(encrypter);
    output.flush()?;
    // Release the stdout lock before the newline below.
    drop(output);

    // The newline goes to raw stdout, not through the hex encoder.
    if cipher.hex {
        println!();
    }
    Ok(())
}

fn decrypt_from<U: Upstream>(upstream: U, config: SessionConfig, spec: DataSpec) -> anyhow::Result<()> {
    let mut session = DecryptingSession::new(upstream, config);
    session.register_observer(|source: &str, event: &TransferEvent| {
        if !matches!(event, TransferEvent::Bytes { .. }) {
            debug!(source, ?event, "transfer");
        }
    });
    session.open(spec)?;

    let mut output = io::stdout().lock();
    let mut buf = vec![0; CHUNK_LEN];
    let copied = loop {
        match session.read(&mut buf) {
            Ok(ReadOutcome::Read(n)) => output.write_all(&buf[..n])?,
            Ok(ReadOutcome::EndOfStream) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    // Release the upstream even when the read failed.
    let closed = session.close();
    output.flush()?;
    copied?;
    closed?;
    Ok(())
}

fn decrypt(
    cipher: &CipherArgs,
    seek: u64,
    length: Option<u64>,
    literal_small_seek: bool,
    path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config =
        SessionConfig::new(cipher.params()?).with_iv_placement(cipher.iv_placement()?);
    if literal_small_seek {
        config = config.with_small_seek(SmallSeekPolicy::Literal);
    }
    let mut spec = DataSpec::at(seek);
    spec.length = length;

    match (path, cipher.hex) {
        (Some(path), false) => decrypt_from(FileUpstream::new(path), config, spec),
        (Some(path), true) => {
            let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            let reader = Unsized(HexReader {
                inner_reader: BufReader::new(file),
            });
            decrypt_from(ReaderUpstream::new(path.display().to_string(), reader), config, spec)
        }
        (None, hex) => {
            let stdin = io::stdin().lock();
            if hex {
                let reader = Unsized(HexReader { inner_reader: stdin });
                decrypt_from(ReaderUpstream::new("stdin", reader), config, spec)
            } else {
                decrypt_from(ReaderUpstream::new("stdin", Unsized(stdin)), config, spec)
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    match args.command {
        Command::Encrypt { cipher } => encrypt(&cipher),
        Command::Decrypt {
            cipher,
            seek,
            length,
            literal_small_seek,
            path,
        } => decrypt(&cipher, seek, length, literal_small_seek, path),
    }
}
