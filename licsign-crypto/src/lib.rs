//! Key container management and license signing.
//!
//! This crate handles:
//! - Opening (or creating on first use) a named, persistent key container
//! - Generating an exportable RSA key pair in that container
//! - Exporting key blobs as source-embeddable decimal byte lists
//! - Signing license text: SHA-1 digest, PKCS#1 v1.5 signature, base64 text
//!
//! # Design
//!
//! - **Provider seam**: all cryptography goes through [`CryptoProvider`].
//!   [`SoftwareProvider`] implements it on top of RustCrypto with file-backed
//!   containers.
//! - **Scoped handles**: the container is released when the
//!   [`LicenseSigner`] is dropped; transient keys, hash objects and scratch
//!   buffers are released on every exit path.
//! - **Two-phase outputs**: key blobs and signatures are sized with a probe
//!   call before being written.
//!
//! Signature verification is not part of this crate.
//!
//! # Example
//!
//! ```no_run
//! use licsign_crypto::{LicenseSigner, SignerConfig, SoftwareProvider};
//!
//! # fn main() -> licsign_crypto::SignerResult<()> {
//! let config = SignerConfig::default();
//! let provider = SoftwareProvider::new(&config.provider_root);
//! let signer = LicenseSigner::open(provider, &config)?;
//! signer.generate_key_pair()?;
//! println!("{}", signer.export_public_key()?);
//!
//! let private_blob = signer.export_private_key_blob()?;
//! let signature = signer.sign(&private_blob, "LICENSE-OK-12345")?;
//! println!("{signature}");
//! # Ok(())
//! # }
//! ```

pub mod blob;
mod config;
mod error;
mod guard;
pub mod provider;
mod signer;
pub mod text;

pub use config::{SignerConfig, DEFAULT_CONTAINER_NAME, DEFAULT_KEY_BITS};
pub use error::{SignerError, SignerResult};
pub use guard::ScratchBuffer;
pub use provider::{
    BlobKind, CryptoProvider, HashAlgorithm, KeyAlgorithm, KeyFlags, ProviderError,
    ProviderResult, SoftwareProvider, TextEncoding,
};
pub use signer::{signed_payload, LicenseSigner, SignerState};
pub use text::{format_byte_list, parse_byte_list};
