use crate::cipher::{CipherParameters, BLOCK_LEN};
use crate::error::ConfigError;

/// Where the IV for the start of the ciphertext comes from.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum IvPlacement {
    /// The first block of the file is the IV.
    Header,
    /// The file is bare ciphertext and the IV is supplied out of band.
    Fixed([u8; BLOCK_LEN]),
}

impl IvPlacement {
    pub fn fixed(iv: &[u8]) -> Result<Self, ConfigError> {
        let iv: [u8; BLOCK_LEN] = iv.try_into().map_err(|_| ConfigError::IvLength {
            expected: BLOCK_LEN,
            actual: iv.len(),
        })?;
        Ok(IvPlacement::Fixed(iv))
    }
}

impl std::fmt::Debug for IvPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IvPlacement::Header => f.write_str("Header"),
            IvPlacement::Fixed(_) => f.write_str("Fixed"),
        }
    }
}

/// Behavior for targets inside the first two blocks, where there is no
/// chaining block to resume from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmallSeekPolicy {
    /// Start from the header IV and decrypt-and-discard up to the target.
    #[default]
    Exact,
    /// Start from the header IV and discard nothing. Reads begin at offset 0
    /// whatever the requested target was.
    Literal,
}

/// Everything a [`DecryptingSession`](crate::DecryptingSession) needs besides
/// its upstream. Immutable for the life of a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub params: CipherParameters,
    pub iv_placement: IvPlacement,
    pub small_seek: SmallSeekPolicy,
}

impl SessionConfig {
    pub fn new(params: CipherParameters) -> Self {
        Self {
            params,
            iv_placement: IvPlacement::Header,
            small_seek: SmallSeekPolicy::default(),
        }
    }

    pub fn with_iv_placement(mut self, iv_placement: IvPlacement) -> Self {
        self.iv_placement = iv_placement;
        self
    }

    pub fn with_small_seek(mut self, small_seek: SmallSeekPolicy) -> Self {
        self.small_seek = small_seek;
        self
    }
}
