//! Key container lifecycle, key export and the license signing pipeline.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info, warn, Level};
use zeroize::Zeroizing;

use crate::config::SignerConfig;
use crate::error::{SignerError, SignerResult};
use crate::guard::{with_hash, with_key, ScratchBuffer};
use crate::provider::{
    BlobKind, CryptoProvider, HashAlgorithm, KeyAlgorithm, KeyFlags, ProviderError, TextEncoding,
};
use crate::text::{format_byte_list, PRIVATE_KEY_VALUES_PER_LINE, PUBLIC_KEY_VALUES_PER_LINE};

/// Lifecycle state of a [`LicenseSigner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerState {
    /// Container acquired, no key pair held.
    ContainerOpen,
    /// Container acquired and a key pair is held.
    KeyGenerated,
    /// Container released. Terminal.
    Released,
}

/// Owns one key container and the key pair generated in it.
///
/// The key handle sits behind a mutex, so a signer may be shared across
/// threads when the provider's handle types allow it. Dropping the signer
/// releases the container.
pub struct LicenseSigner<P: CryptoProvider> {
    provider: P,
    container_name: String,
    key_bits: u32,
    container: Option<P::Container>,
    key: Mutex<Option<P::Key>>,
}

impl<P: CryptoProvider> LicenseSigner<P> {
    /// Opens the configured container, creating it if the provider reports it missing.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, if opening fails for any reason
    /// other than a missing container, or if creating the container fails.
    pub fn open(provider: P, config: &SignerConfig) -> SignerResult<Self> {
        config.validate()?;
        let name = config.container_name.as_str();

        let container = match provider.open_container(name) {
            Ok(container) => {
                info!(container = %name, "key container opened");
                container
            }
            Err(e) if e.is_missing_container() => {
                warn!(container = %name, code = %native(&e), "key container missing, creating it");
                let container = provider.create_container(name).map_err(|e| {
                    error!(container = %name, code = %native(&e), "key container creation failed");
                    SignerError::provider("create key container", e)
                })?;
                info!(container = %name, "key container created");
                container
            }
            Err(e) => {
                error!(container = %name, code = %native(&e), "key container could not be opened");
                return Err(SignerError::provider("open key container", e));
            }
        };

        Ok(Self {
            provider,
            container_name: name.to_string(),
            key_bits: config.key_bits,
            container: Some(container),
            key: Mutex::new(None),
        })
    }

    /// Returns the provider backing this signer.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the container name.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Returns the modulus length used for generated key pairs.
    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SignerState {
        if self.container.is_none() {
            return SignerState::Released;
        }
        match self.key.lock() {
            Ok(slot) if slot.is_some() => SignerState::KeyGenerated,
            _ => SignerState::ContainerOpen,
        }
    }

    /// Generates a new exportable RSA key pair in the container.
    ///
    /// Any previously held key handle is dropped first; if generation fails
    /// the signer holds no key.
    pub fn generate_key_pair(&self) -> SignerResult<()> {
        let container = self.container()?;
        let mut slot = self.lock_key()?;
        // The old handle is not destroyed through the provider, which owns
        // the key material stored in the container.
        *slot = None;

        let key = self
            .provider
            .generate_key_pair(
                container,
                KeyAlgorithm::RsaSign,
                self.key_bits,
                KeyFlags::EXPORTABLE,
            )
            .map_err(|e| {
                error!(container = %self.container_name, code = %native(&e), "key generation failed");
                SignerError::provider("generate key pair", e)
            })?;
        *slot = Some(key);
        info!(container = %self.container_name, bits = self.key_bits, "key pair generated");
        Ok(())
    }

    /// Adopts the key pair already persisted in the container.
    pub fn load_key_pair(&self) -> SignerResult<()> {
        let container = self.container()?;
        let mut slot = self.lock_key()?;
        let key = self
            .provider
            .user_key(container)
            .map_err(|e| SignerError::provider("load key pair", e))?;
        *slot = Some(key);
        info!(container = %self.container_name, "stored key pair loaded");
        Ok(())
    }

    /// Adopts an externally supplied private key blob as this signer's key pair.
    pub fn import_key_pair(&self, private_key_blob: &[u8]) -> SignerResult<()> {
        let container = self.container()?;
        let mut slot = self.lock_key()?;
        let key = self
            .provider
            .import_key(container, private_key_blob)
            .map_err(|e| SignerError::provider("import key pair", e))?;
        *slot = Some(key);
        info!(container = %self.container_name, "key pair imported");
        Ok(())
    }

    /// Exports the public key as a decimal byte list, 10 values per line.
    pub fn export_public_key(&self) -> SignerResult<String> {
        let blob = self.export_blob(BlobKind::Public)?;
        Ok(format_byte_list(&blob, PUBLIC_KEY_VALUES_PER_LINE))
    }

    /// Exports the private key as a decimal byte list, 15 values per line.
    pub fn export_private_key(&self) -> SignerResult<String> {
        let blob = self.export_blob(BlobKind::Private)?;
        Ok(format_byte_list(&blob, PRIVATE_KEY_VALUES_PER_LINE))
    }

    /// Exports the raw public key blob.
    pub fn export_public_key_blob(&self) -> SignerResult<Vec<u8>> {
        Ok(self.export_blob(BlobKind::Public)?.to_vec())
    }

    /// Exports the raw private key blob.
    pub fn export_private_key_blob(&self) -> SignerResult<Zeroizing<Vec<u8>>> {
        self.export_blob(BlobKind::Private)
    }

    /// Signs `license` with the given private key blob and returns the
    /// signature as single-line base64.
    ///
    /// The blob is imported into a transient key; this signer's own key pair
    /// is not used. Only the bytes before the first NUL in `license` are
    /// signed (see [`signed_payload`]).
    pub fn sign(&self, private_key_blob: &[u8], license: &str) -> SignerResult<String> {
        let container = self.container()?;
        let payload = signed_payload(license);

        let key = self
            .provider
            .import_key(container, private_key_blob)
            .map_err(|e| SignerError::provider("import private key", e))?;
        // The hash object is destroyed before the key it was signed with.
        let signature = with_key(&self.provider, key, |key| -> SignerResult<ScratchBuffer> {
            let hash = self
                .provider
                .create_hash(container, HashAlgorithm::Sha1)
                .map_err(|e| SignerError::provider("create hash", e))?;
            with_hash(&self.provider, hash, |hash| self.sign_payload(hash, key, payload))
        })?;

        let text = self
            .provider
            .binary_to_text(&signature, TextEncoding::Base64NoCrlf)
            .map_err(|e| SignerError::provider("encode signature", e))?;
        info!(
            container = %self.container_name,
            payload_len = payload.len(),
            signature_len = signature.len(),
            "license signed"
        );
        Ok(text)
    }

    /// Releases the key handle and the container. Idempotent.
    pub fn release(&mut self) {
        let slot = match self.key.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;

        if let Some(container) = self.container.take() {
            match self.provider.release_container(container) {
                Ok(()) => debug!(container = %self.container_name, "key container released"),
                Err(e) => warn!(container = %self.container_name, "failed to release key container: {e}"),
            }
        }
    }

    fn container(&self) -> SignerResult<&P::Container> {
        self.container
            .as_ref()
            .ok_or_else(|| SignerError::InvalidState("key container has been released".into()))
    }

    fn lock_key(&self) -> SignerResult<MutexGuard<'_, Option<P::Key>>> {
        self.key
            .lock()
            .map_err(|_| SignerError::InvalidState("key handle lock poisoned".into()))
    }

    fn sign_payload(
        &self,
        hash: &mut P::Hash,
        key: &P::Key,
        payload: &[u8],
    ) -> SignerResult<ScratchBuffer> {
        self.provider
            .hash_data(hash, payload)
            .map_err(|e| SignerError::provider("hash license", e))?;

        if tracing::enabled!(Level::DEBUG) {
            match self.provider.hash_value(hash) {
                Ok(digest) => debug!(len = payload.len(), digest = %hex::encode(&digest), "license hashed"),
                Err(e) => debug!(len = payload.len(), code = %native(&e), "license hashed, digest unavailable"),
            }
        }

        let len = self
            .provider
            .sign_hash(hash, key, None)
            .map_err(|e| SignerError::provider("size signature", e))?;
        let mut signature = ScratchBuffer::allocate("sign license", len)?;
        let written = self
            .provider
            .sign_hash(hash, key, Some(&mut signature[..]))
            .map_err(|e| SignerError::provider("sign license", e))?;
        signature.truncate(written);
        Ok(signature)
    }

    fn export_blob(&self, kind: BlobKind) -> SignerResult<Zeroizing<Vec<u8>>> {
        let (probe_op, export_op) = match kind {
            BlobKind::Public => ("size public key blob", "export public key"),
            BlobKind::Private => ("size private key blob", "export private key"),
        };
        let slot = self.lock_key()?;
        let key = slot.as_ref().ok_or_else(|| {
            SignerError::InvalidState("no key pair held: generate a key pair first".into())
        })?;

        let len = self
            .provider
            .export_key(key, kind, None)
            .map_err(|e| SignerError::provider(probe_op, e))?;
        let mut blob = ScratchBuffer::allocate(export_op, len)?;
        let written = self
            .provider
            .export_key(key, kind, Some(&mut blob[..]))
            .map_err(|e| SignerError::provider(export_op, e))?;
        blob.truncate(written);
        debug!(?kind, len = written, "key blob exported");
        Ok(blob.into_inner())
    }
}

impl<P: CryptoProvider> Drop for LicenseSigner<P> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Returns the bytes of `license` that get hashed and signed: everything
/// before the first NUL byte.
///
/// Licenses with embedded NUL bytes are therefore signed only up to the NUL,
/// which keeps signatures compatible with already-issued licenses.
#[must_use]
pub fn signed_payload(license: &str) -> &[u8] {
    let bytes = license.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn native(err: &ProviderError) -> String {
    format!("0x{:08x}", err.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_stops_at_first_nul() {
        assert_eq!(signed_payload("abc\0def"), b"abc");
        assert_eq!(signed_payload("\0"), b"");
        assert_eq!(signed_payload("no nul"), b"no nul");
        assert_eq!(signed_payload(""), b"");
    }
}
