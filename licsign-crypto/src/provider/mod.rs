//! Cryptographic provider capability.
//!
//! A provider supplies persistent named key containers, RSA key generation,
//! hashing, signing and binary-to-text encoding. Handles are associated types
//! owned by the caller and handed back to the provider for release.
//!
//! Variable-length outputs (key blobs, signatures) follow a two-phase
//! protocol: call with `None` to learn the required length, then call again
//! with a buffer of at least that length.

mod software;

pub use software::{
    SoftwareContainer, SoftwareHash, SoftwareKey, SoftwareProvider, MAX_KEY_BITS, MIN_KEY_BITS,
};

use std::fmt;

use thiserror::Error;

/// Native provider error codes.
pub mod codes {
    /// The output buffer is too small.
    pub const ERROR_MORE_DATA: u32 = 0x0000_00EA;
    /// Bad key.
    pub const NTE_BAD_KEY: u32 = 0x8009_0003;
    /// Bad length.
    pub const NTE_BAD_LEN: u32 = 0x8009_0004;
    /// Bad data.
    pub const NTE_BAD_DATA: u32 = 0x8009_0005;
    /// Bad version of the key blob.
    pub const NTE_BAD_VER: u32 = 0x8009_0007;
    /// Invalid algorithm specified.
    pub const NTE_BAD_ALGID: u32 = 0x8009_0008;
    /// Invalid type specified.
    pub const NTE_BAD_TYPE: u32 = 0x8009_000A;
    /// Key not valid for use in the specified state.
    pub const NTE_BAD_KEY_STATE: u32 = 0x8009_000B;
    /// Hash not valid for use in the specified state.
    pub const NTE_BAD_HASH_STATE: u32 = 0x8009_000C;
    /// Key does not exist.
    pub const NTE_NO_KEY: u32 = 0x8009_000D;
    /// Object already exists.
    pub const NTE_EXISTS: u32 = 0x8009_000F;
    /// Access denied.
    pub const NTE_PERM: u32 = 0x8009_0010;
    /// Keyset does not exist.
    pub const NTE_BAD_KEYSET: u32 = 0x8009_0016;
    /// The keyset parameter is invalid.
    pub const NTE_BAD_KEYSET_PARAM: u32 = 0x8009_001F;
    /// An internal error occurred.
    pub const NTE_FAIL: u32 = 0x8009_0020;
}

/// An error reported by a provider call, carrying its native code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (0x{code:08x})")]
pub struct ProviderError {
    /// Native error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl ProviderError {
    /// Creates a provider error from a native code and description.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the error reports a missing key container.
    #[must_use]
    pub fn is_missing_container(&self) -> bool {
        self.code == codes::NTE_BAD_KEYSET
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Asymmetric key algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// RSA public-key signature algorithm.
    RsaSign,
}

impl KeyAlgorithm {
    /// Native algorithm identifier recorded in key blobs.
    #[must_use]
    pub fn alg_id(&self) -> u32 {
        match self {
            Self::RsaSign => 0x0000_2400,
        }
    }

    /// Looks up an algorithm by its native identifier.
    #[must_use]
    pub fn from_alg_id(id: u32) -> Option<Self> {
        match id {
            0x0000_2400 => Some(Self::RsaSign),
            _ => None,
        }
    }
}

/// Digest algorithm for hash objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1 (160-bit digest).
    Sha1,
    /// SHA-256 (256-bit digest).
    Sha256,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    #[must_use]
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => f.write_str("SHA-1"),
            Self::Sha256 => f.write_str("SHA-256"),
        }
    }
}

/// Which half of a key pair to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Public key only.
    Public,
    /// Full private key.
    Private,
}

/// Binary-to-text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// Base64 with a CRLF after every 64 characters.
    Base64,
    /// Base64 on a single line.
    Base64NoCrlf,
}

/// Flags for key generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyFlags {
    /// Whether the private key may be exported.
    pub exportable: bool,
}

impl KeyFlags {
    /// Flags for an exportable key.
    pub const EXPORTABLE: Self = Self { exportable: true };
}

/// The capability set a key manager needs from a cryptographic provider.
///
/// Calls are blocking. Handles must not outlive the container they came from.
pub trait CryptoProvider {
    /// Handle to an acquired key container.
    type Container;
    /// Handle to a key pair (generated or imported).
    type Key;
    /// Handle to a hash object.
    type Hash;

    /// Opens an existing container. Fails with `NTE_BAD_KEYSET` if it does not exist.
    fn open_container(&self, name: &str) -> ProviderResult<Self::Container>;

    /// Creates a new container. Fails with `NTE_EXISTS` if it already exists.
    fn create_container(&self, name: &str) -> ProviderResult<Self::Container>;

    /// Releases a container handle.
    fn release_container(&self, container: Self::Container) -> ProviderResult<()>;

    /// Generates a key pair inside the container, replacing its stored key.
    fn generate_key_pair(
        &self,
        container: &Self::Container,
        algorithm: KeyAlgorithm,
        bits: u32,
        flags: KeyFlags,
    ) -> ProviderResult<Self::Key>;

    /// Returns the key pair persisted in the container. Fails with `NTE_NO_KEY` if none.
    fn user_key(&self, container: &Self::Container) -> ProviderResult<Self::Key>;

    /// Exports a key blob. With `None`, returns the required length only.
    fn export_key(
        &self,
        key: &Self::Key,
        kind: BlobKind,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize>;

    /// Imports a key blob into a transient key handle.
    fn import_key(&self, container: &Self::Container, blob: &[u8]) -> ProviderResult<Self::Key>;

    /// Creates a hash object.
    fn create_hash(
        &self,
        container: &Self::Container,
        algorithm: HashAlgorithm,
    ) -> ProviderResult<Self::Hash>;

    /// Feeds bytes into a hash object.
    fn hash_data(&self, hash: &mut Self::Hash, data: &[u8]) -> ProviderResult<()>;

    /// Finishes the hash and returns the digest. No more data may be added afterwards.
    fn hash_value(&self, hash: &mut Self::Hash) -> ProviderResult<Vec<u8>>;

    /// Signs the hash with the key. With `None`, returns the signature length only.
    fn sign_hash(
        &self,
        hash: &mut Self::Hash,
        key: &Self::Key,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize>;

    /// Destroys a hash object.
    fn destroy_hash(&self, hash: Self::Hash) -> ProviderResult<()>;

    /// Destroys a key handle. Persisted key material is unaffected.
    fn destroy_key(&self, key: Self::Key) -> ProviderResult<()>;

    /// Encodes bytes as text.
    fn binary_to_text(&self, data: &[u8], encoding: TextEncoding) -> ProviderResult<String>;
}
