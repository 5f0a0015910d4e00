//! File-backed software provider.
//!
//! Each container is a directory under the provider root. The container's
//! signature key pair is persisted as `signature.key`: one flag byte
//! (bit 0 = exportable) followed by the private key blob.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use super::{
    codes, BlobKind, CryptoProvider, HashAlgorithm, KeyAlgorithm, KeyFlags, ProviderError,
    ProviderResult, TextEncoding,
};
use crate::blob::{self, DecodedKey};

const KEY_FILE: &str = "signature.key";
const FLAG_EXPORTABLE: u8 = 0x01;
const BASE64_LINE: usize = 64;

/// Smallest and largest modulus the provider will generate.
pub const MIN_KEY_BITS: u32 = 512;
/// See [`MIN_KEY_BITS`].
pub const MAX_KEY_BITS: u32 = 4096;

/// Software implementation of [`CryptoProvider`] on top of RustCrypto.
#[derive(Debug, Clone)]
pub struct SoftwareProvider {
    root: PathBuf,
}

/// An acquired container directory.
#[derive(Debug)]
pub struct SoftwareContainer {
    name: String,
    dir: PathBuf,
}

impl SoftwareContainer {
    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory backing this container.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

enum KeyMaterial {
    Public(RsaPublicKey),
    Private(RsaPrivateKey),
}

/// A key handle.
pub struct SoftwareKey {
    algorithm: KeyAlgorithm,
    material: KeyMaterial,
    exportable: bool,
}

impl SoftwareKey {
    /// Modulus length in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        let bytes = match &self.material {
            KeyMaterial::Public(k) => k.size(),
            KeyMaterial::Private(k) => k.size(),
        };
        bytes * 8
    }

    /// Returns true if the handle carries private key material.
    #[must_use]
    pub fn has_private(&self) -> bool {
        matches!(self.material, KeyMaterial::Private(_))
    }
}

impl std::fmt::Debug for SoftwareKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits())
            .field("private", &"[REDACTED]")
            .field("exportable", &self.exportable)
            .finish()
    }
}

#[derive(Clone)]
enum HashState {
    Sha1(Sha1),
    Sha256(Sha256),
}

/// A hash object. Once its value has been read (or it has been signed) no
/// more data may be added.
pub struct SoftwareHash {
    algorithm: HashAlgorithm,
    state: HashState,
    digest: Option<Vec<u8>>,
}

impl SoftwareHash {
    /// The digest algorithm of this hash object.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn finish(&mut self) -> &[u8] {
        let state = &self.state;
        self.digest.get_or_insert_with(|| match state.clone() {
            HashState::Sha1(h) => h.finalize().to_vec(),
            HashState::Sha256(h) => h.finalize().to_vec(),
        })
    }
}

impl std::fmt::Debug for SoftwareHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareHash")
            .field("algorithm", &self.algorithm)
            .field("finished", &self.digest.is_some())
            .finish()
    }
}

impl SoftwareProvider {
    /// Creates a provider storing containers under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory containers are stored under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, name: &str) -> ProviderResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(ProviderError::new(
                codes::NTE_BAD_KEYSET_PARAM,
                format!("invalid container name {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }

    fn persist_key(&self, container: &SoftwareContainer, key: &SoftwareKey) -> ProviderResult<()> {
        let KeyMaterial::Private(private) = &key.material else {
            return Err(ProviderError::new(codes::NTE_BAD_KEY, "only key pairs can be persisted"));
        };
        let blob = blob::encode_private(private, key.algorithm)?;
        let mut contents = Zeroizing::new(Vec::with_capacity(blob.len() + 1));
        contents.push(if key.exportable { FLAG_EXPORTABLE } else { 0 });
        contents.extend_from_slice(&blob);

        let path = container.dir.join(KEY_FILE);
        let tmp = container.dir.join(format!("{KEY_FILE}.tmp"));
        write_private_file(&tmp, &contents)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| io_error("persisting key pair", e))?;
        debug!(container = %container.name, "key pair persisted");
        Ok(())
    }
}

impl CryptoProvider for SoftwareProvider {
    type Container = SoftwareContainer;
    type Key = SoftwareKey;
    type Hash = SoftwareHash;

    fn open_container(&self, name: &str) -> ProviderResult<SoftwareContainer> {
        let dir = self.container_dir(name)?;
        if !dir.is_dir() {
            return Err(ProviderError::new(
                codes::NTE_BAD_KEYSET,
                format!("keyset {name:?} does not exist"),
            ));
        }
        debug!(container = %name, path = %dir.display(), "container opened");
        Ok(SoftwareContainer {
            name: name.to_string(),
            dir,
        })
    }

    fn create_container(&self, name: &str) -> ProviderResult<SoftwareContainer> {
        let dir = self.container_dir(name)?;
        fs::create_dir_all(&self.root).map_err(|e| io_error("creating provider root", e))?;
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ProviderError::new(
                    codes::NTE_EXISTS,
                    format!("keyset {name:?} already exists"),
                ));
            }
            Err(e) => return Err(io_error("creating container", e)),
        }
        debug!(container = %name, path = %dir.display(), "container created");
        Ok(SoftwareContainer {
            name: name.to_string(),
            dir,
        })
    }

    fn release_container(&self, container: SoftwareContainer) -> ProviderResult<()> {
        debug!(container = %container.name, "container released");
        Ok(())
    }

    fn generate_key_pair(
        &self,
        container: &SoftwareContainer,
        algorithm: KeyAlgorithm,
        bits: u32,
        flags: KeyFlags,
    ) -> ProviderResult<SoftwareKey> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) || bits % 16 != 0 {
            return Err(ProviderError::new(
                codes::NTE_BAD_LEN,
                format!("unsupported key length {bits}"),
            ));
        }
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits as usize).map_err(|e| {
            ProviderError::new(codes::NTE_FAIL, format!("RSA key generation failed: {e}"))
        })?;
        let key = SoftwareKey {
            algorithm,
            material: KeyMaterial::Private(private),
            exportable: flags.exportable,
        };
        self.persist_key(container, &key)?;
        Ok(key)
    }

    fn user_key(&self, container: &SoftwareContainer) -> ProviderResult<SoftwareKey> {
        let path = container.dir.join(KEY_FILE);
        let contents = match fs::read(&path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProviderError::new(
                    codes::NTE_NO_KEY,
                    format!("keyset {:?} holds no signature key", container.name),
                ));
            }
            Err(e) => return Err(io_error("reading key pair", e)),
        };
        let Some((&flags, blob)) = contents.split_first() else {
            return Err(ProviderError::new(codes::NTE_BAD_DATA, "stored key file is empty"));
        };
        let decoded = blob::decode(blob)?;
        let DecodedKey::Private(private) = decoded.key else {
            return Err(ProviderError::new(codes::NTE_BAD_KEY, "stored key has no private half"));
        };
        Ok(SoftwareKey {
            algorithm: decoded.algorithm,
            material: KeyMaterial::Private(private),
            exportable: flags & FLAG_EXPORTABLE != 0,
        })
    }

    fn export_key(
        &self,
        key: &SoftwareKey,
        kind: BlobKind,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize> {
        let required = match kind {
            BlobKind::Public => blob::public_blob_len(key.bits()),
            BlobKind::Private => {
                if !key.has_private() {
                    return Err(ProviderError::new(codes::NTE_BAD_KEY, "key has no private half"));
                }
                if !key.exportable {
                    return Err(ProviderError::new(
                        codes::NTE_BAD_KEY_STATE,
                        "key is not exportable",
                    ));
                }
                blob::private_blob_len(key.bits())
            }
        };
        let Some(out) = out else {
            return Ok(required);
        };
        if out.len() < required {
            return Err(more_data(required, out.len()));
        }

        let encoded = match (&key.material, kind) {
            (KeyMaterial::Public(k), BlobKind::Public) => {
                Zeroizing::new(blob::encode_public(k, key.algorithm)?)
            }
            (KeyMaterial::Private(k), BlobKind::Public) => {
                Zeroizing::new(blob::encode_public(&k.to_public_key(), key.algorithm)?)
            }
            (KeyMaterial::Private(k), BlobKind::Private) => blob::encode_private(k, key.algorithm)?,
            (KeyMaterial::Public(_), BlobKind::Private) => {
                return Err(ProviderError::new(codes::NTE_BAD_KEY, "key has no private half"));
            }
        };
        out[..encoded.len()].copy_from_slice(&encoded);
        Ok(encoded.len())
    }

    fn import_key(&self, _container: &SoftwareContainer, blob: &[u8]) -> ProviderResult<SoftwareKey> {
        let decoded = blob::decode(blob)?;
        let material = match decoded.key {
            DecodedKey::Public(k) => KeyMaterial::Public(k),
            DecodedKey::Private(k) => KeyMaterial::Private(k),
        };
        Ok(SoftwareKey {
            algorithm: decoded.algorithm,
            material,
            exportable: true,
        })
    }

    fn create_hash(
        &self,
        _container: &SoftwareContainer,
        algorithm: HashAlgorithm,
    ) -> ProviderResult<SoftwareHash> {
        let state = match algorithm {
            HashAlgorithm::Sha1 => HashState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HashState::Sha256(Sha256::new()),
        };
        Ok(SoftwareHash {
            algorithm,
            state,
            digest: None,
        })
    }

    fn hash_data(&self, hash: &mut SoftwareHash, data: &[u8]) -> ProviderResult<()> {
        if hash.digest.is_some() {
            return Err(ProviderError::new(
                codes::NTE_BAD_HASH_STATE,
                "hash value already retrieved",
            ));
        }
        match &mut hash.state {
            HashState::Sha1(h) => h.update(data),
            HashState::Sha256(h) => h.update(data),
        }
        Ok(())
    }

    fn hash_value(&self, hash: &mut SoftwareHash) -> ProviderResult<Vec<u8>> {
        Ok(hash.finish().to_vec())
    }

    fn sign_hash(
        &self,
        hash: &mut SoftwareHash,
        key: &SoftwareKey,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize> {
        let KeyMaterial::Private(private) = &key.material else {
            return Err(ProviderError::new(codes::NTE_BAD_KEY, "signing requires a private key"));
        };
        let required = private.size();
        let Some(out) = out else {
            return Ok(required);
        };
        if out.len() < required {
            return Err(more_data(required, out.len()));
        }

        let scheme = match hash.algorithm {
            HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        };
        let digest = hash.finish().to_vec();
        let mut rng = rand::thread_rng();
        let mut signature = private
            .sign_with_rng(&mut rng, scheme, &digest)
            .map_err(|e| ProviderError::new(codes::NTE_FAIL, format!("RSA signing failed: {e}")))?;
        // Signatures leave the provider in little-endian byte order.
        signature.reverse();
        out[..signature.len()].copy_from_slice(&signature);
        Ok(signature.len())
    }

    fn destroy_hash(&self, hash: SoftwareHash) -> ProviderResult<()> {
        drop(hash);
        Ok(())
    }

    fn destroy_key(&self, key: SoftwareKey) -> ProviderResult<()> {
        drop(key);
        Ok(())
    }

    fn binary_to_text(&self, data: &[u8], encoding: TextEncoding) -> ProviderResult<String> {
        let encoded = BASE64.encode(data);
        match encoding {
            TextEncoding::Base64NoCrlf => Ok(encoded),
            TextEncoding::Base64 => {
                let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 32 + 2);
                // Base64 output is ASCII, so byte chunks are valid str boundaries.
                for line in encoded.as_bytes().chunks(BASE64_LINE) {
                    wrapped.push_str(std::str::from_utf8(line).map_err(|e| {
                        ProviderError::new(codes::NTE_FAIL, format!("base64 output not ASCII: {e}"))
                    })?);
                    wrapped.push_str("\r\n");
                }
                Ok(wrapped)
            }
        }
    }
}

fn more_data(required: usize, available: usize) -> ProviderError {
    ProviderError::new(
        codes::ERROR_MORE_DATA,
        format!("buffer of {available} bytes too small, {required} required"),
    )
}

fn io_error(context: &str, err: io::Error) -> ProviderError {
    ProviderError::new(codes::NTE_FAIL, format!("{context}: {err}"))
}

fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> (tempfile::TempDir, SoftwareProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = SoftwareProvider::new(dir.path().join("containers"));
        (dir, provider)
    }

    #[test]
    fn open_missing_container_is_bad_keyset() {
        let (_dir, provider) = provider();
        let err = provider.open_container("absent").unwrap_err();
        assert_eq!(err.code, codes::NTE_BAD_KEYSET);
        assert!(err.is_missing_container());
    }

    #[test]
    fn create_then_open() {
        let (_dir, provider) = provider();
        let created = provider.create_container("c1").unwrap();
        assert!(created.path().is_dir());
        provider.release_container(created).unwrap();
        let opened = provider.open_container("c1").unwrap();
        assert_eq!(opened.name(), "c1");
    }

    #[test]
    fn create_existing_container_fails() {
        let (_dir, provider) = provider();
        provider.create_container("dup").unwrap();
        let err = provider.create_container("dup").unwrap_err();
        assert_eq!(err.code, codes::NTE_EXISTS);
    }

    #[test]
    fn invalid_container_names() {
        let (_dir, provider) = provider();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let err = provider.create_container(name).unwrap_err();
            assert_eq!(err.code, codes::NTE_BAD_KEYSET_PARAM, "name {name:?}");
        }
    }

    #[test]
    fn export_probe_then_fill() {
        let (_dir, provider) = provider();
        let container = provider.create_container("export").unwrap();
        let key = provider
            .generate_key_pair(&container, KeyAlgorithm::RsaSign, 1024, KeyFlags::EXPORTABLE)
            .unwrap();

        let len = provider.export_key(&key, BlobKind::Public, None).unwrap();
        assert_eq!(len, blob::public_blob_len(1024));

        let mut small = vec![0u8; len - 1];
        let err = provider
            .export_key(&key, BlobKind::Public, Some(&mut small))
            .unwrap_err();
        assert_eq!(err.code, codes::ERROR_MORE_DATA);

        let mut buf = vec![0u8; len];
        let written = provider.export_key(&key, BlobKind::Public, Some(&mut buf)).unwrap();
        assert_eq!(written, len);
        assert_eq!(buf[0], blob::PUBLICKEYBLOB);
    }

    #[test]
    fn non_exportable_private_key() {
        let (_dir, provider) = provider();
        let container = provider.create_container("locked").unwrap();
        let key = provider
            .generate_key_pair(&container, KeyAlgorithm::RsaSign, 512, KeyFlags::default())
            .unwrap();
        let err = provider.export_key(&key, BlobKind::Private, None).unwrap_err();
        assert_eq!(err.code, codes::NTE_BAD_KEY_STATE);
        assert!(provider.export_key(&key, BlobKind::Public, None).is_ok());
    }

    #[test]
    fn generated_key_is_persisted() {
        let (_dir, provider) = provider();
        let container = provider.create_container("persist").unwrap();
        assert_eq!(provider.user_key(&container).unwrap_err().code, codes::NTE_NO_KEY);

        let key = provider
            .generate_key_pair(&container, KeyAlgorithm::RsaSign, 512, KeyFlags::EXPORTABLE)
            .unwrap();
        let loaded = provider.user_key(&container).unwrap();

        let mut a = vec![0u8; blob::public_blob_len(512)];
        let mut b = a.clone();
        provider.export_key(&key, BlobKind::Public, Some(&mut a)).unwrap();
        provider.export_key(&loaded, BlobKind::Public, Some(&mut b)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unsupported_key_length() {
        let (_dir, provider) = provider();
        let container = provider.create_container("len").unwrap();
        for bits in [256, 1000, 8192] {
            let err = provider
                .generate_key_pair(&container, KeyAlgorithm::RsaSign, bits, KeyFlags::EXPORTABLE)
                .unwrap_err();
            assert_eq!(err.code, codes::NTE_BAD_LEN);
        }
    }

    #[test]
    fn hash_rejects_data_after_value() {
        let (_dir, provider) = provider();
        let container = provider.create_container("hash").unwrap();
        let mut hash = provider.create_hash(&container, HashAlgorithm::Sha1).unwrap();
        provider.hash_data(&mut hash, b"abc").unwrap();
        let digest = provider.hash_value(&mut hash).unwrap();
        assert_eq!(hex::encode(&digest), "a9993e364706816aba3e25717850c26c9cd0d89d");
        let err = provider.hash_data(&mut hash, b"more").unwrap_err();
        assert_eq!(err.code, codes::NTE_BAD_HASH_STATE);
    }

    #[test]
    fn sha256_digest() {
        let (_dir, provider) = provider();
        let container = provider.create_container("sha256").unwrap();
        let mut hash = provider.create_hash(&container, HashAlgorithm::Sha256).unwrap();
        provider.hash_data(&mut hash, b"abc").unwrap();
        let digest = provider.hash_value(&mut hash).unwrap();
        assert_eq!(digest.len(), HashAlgorithm::Sha256.digest_len());
        assert_eq!(
            hex::encode(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sign_with_public_only_key_fails() {
        let (_dir, provider) = provider();
        let container = provider.create_container("pub").unwrap();
        let key = provider
            .generate_key_pair(&container, KeyAlgorithm::RsaSign, 512, KeyFlags::EXPORTABLE)
            .unwrap();
        let mut public = vec![0u8; blob::public_blob_len(512)];
        provider.export_key(&key, BlobKind::Public, Some(&mut public)).unwrap();
        let public_key = provider.import_key(&container, &public).unwrap();

        let mut hash = provider.create_hash(&container, HashAlgorithm::Sha1).unwrap();
        let err = provider.sign_hash(&mut hash, &public_key, None).unwrap_err();
        assert_eq!(err.code, codes::NTE_BAD_KEY);
    }

    #[test]
    fn base64_line_wrapping() {
        let (_dir, provider) = provider();
        let data = vec![0xABu8; 100];
        let single = provider.binary_to_text(&data, TextEncoding::Base64NoCrlf).unwrap();
        assert!(!single.contains('\n'));
        assert_eq!(single.len(), 136);

        let wrapped = provider.binary_to_text(&data, TextEncoding::Base64).unwrap();
        let lines: Vec<&str> = wrapped.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 64);
        assert_eq!(lines.concat(), single);
    }
}
