//! Seek arithmetic for CBC ciphertext.
//!
//! Decrypting block `k` needs only the ciphertext of block `k - 1` (or the
//! header IV for `k == 0`), so landing on any plaintext offset costs one extra
//! block of ciphertext no matter how far into the stream it is.

use crate::config::SmallSeekPolicy;

/// How to reposition a fresh cipher so the next decrypted byte is the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekPlan {
    /// Decrypt from the start of the ciphertext with the header IV.
    HeaderIv {
        plaintext_bytes_to_discard_after_reinit: u64,
    },
    /// Resume mid-stream, using the ciphertext block at
    /// `chaining_block_ciphertext_offset` as the IV.
    Chained {
        chaining_block_ciphertext_offset: u64,
        /// Ciphertext consumed before the landing block, chaining block
        /// included. A session skips to the chaining block and reads it, and
        /// ends up exactly here.
        ciphertext_bytes_to_skip: u64,
        plaintext_bytes_to_discard_after_reinit: u64,
    },
}

impl SeekPlan {
    pub fn uses_header_iv(&self) -> bool {
        matches!(self, SeekPlan::HeaderIv { .. })
    }

    pub fn plaintext_bytes_to_discard(&self) -> u64 {
        match *self {
            SeekPlan::HeaderIv {
                plaintext_bytes_to_discard_after_reinit,
            }
            | SeekPlan::Chained {
                plaintext_bytes_to_discard_after_reinit,
                ..
            } => plaintext_bytes_to_discard_after_reinit,
        }
    }
}

/// Plan a seek to `target_offset`, taking the header-IV branch literally.
///
/// Any target before the start of the third block (`target_offset < 2 *
/// block_size`) yields a plan that neither skips ciphertext nor discards
/// plaintext, so a session following it starts at offset 0. Use
/// [`plan_seek_with_policy`] with [`SmallSeekPolicy::Exact`] to land on the
/// target instead.
pub fn plan_seek(target_offset: u64, block_size: u32) -> SeekPlan {
    plan_seek_with_policy(target_offset, block_size, SmallSeekPolicy::Literal)
}

pub fn plan_seek_with_policy(
    target_offset: u64,
    block_size: u32,
    policy: SmallSeekPolicy,
) -> SeekPlan {
    assert!(block_size > 0, "block size must be nonzero");
    let block_size = block_size as u64;
    let within_block = target_offset % block_size;
    let landing_block_offset = target_offset - within_block;

    match landing_block_offset.checked_sub(block_size) {
        Some(chaining_offset) if chaining_offset > 0 => SeekPlan::Chained {
            chaining_block_ciphertext_offset: chaining_offset,
            ciphertext_bytes_to_skip: landing_block_offset,
            plaintext_bytes_to_discard_after_reinit: within_block,
        },
        _ => SeekPlan::HeaderIv {
            plaintext_bytes_to_discard_after_reinit: match policy {
                SmallSeekPolicy::Literal => 0,
                SmallSeekPolicy::Exact => target_offset,
            },
        },
    }
}
