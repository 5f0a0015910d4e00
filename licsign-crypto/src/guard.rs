//! Scoped use of transient provider handles, and scratch buffers.

use std::ops::{Deref, DerefMut};

use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{SignerError, SignerResult};
use crate::provider::CryptoProvider;

/// Runs `f` with a transient key handle, then destroys the handle through
/// the provider whatever `f` returned.
pub(crate) fn with_key<P, T>(provider: &P, key: P::Key, f: impl FnOnce(&P::Key) -> T) -> T
where
    P: CryptoProvider,
{
    let result = f(&key);
    if let Err(e) = provider.destroy_key(key) {
        warn!("failed to destroy transient key: {e}");
    }
    result
}

/// Runs `f` with a hash object, then destroys it through the provider
/// whatever `f` returned.
pub(crate) fn with_hash<P, T>(
    provider: &P,
    mut hash: P::Hash,
    f: impl FnOnce(&mut P::Hash) -> T,
) -> T
where
    P: CryptoProvider,
{
    let result = f(&mut hash);
    if let Err(e) = provider.destroy_hash(hash) {
        warn!("failed to destroy hash object: {e}");
    }
    result
}

/// A scratch buffer sized by a length probe. Zeroized when dropped.
pub struct ScratchBuffer {
    bytes: Zeroizing<Vec<u8>>,
}

impl ScratchBuffer {
    /// Allocates `len` zeroed bytes, reporting allocation failure instead of aborting.
    pub fn allocate(operation: &'static str, len: usize) -> SignerResult<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| SignerError::ResourceExhaustion {
                operation,
                requested: len,
            })?;
        bytes.resize(len, 0);
        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    /// Shortens the buffer to the number of bytes actually written.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Moves the contents out, keeping them zeroize-on-drop.
    #[must_use]
    pub fn into_inner(self) -> Zeroizing<Vec<u8>> {
        self.bytes
    }
}

impl Deref for ScratchBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
