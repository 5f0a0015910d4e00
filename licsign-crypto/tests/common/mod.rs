//! Shared test helpers for signer tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine};
use licsign_crypto::blob::{self, DecodedKey};
use licsign_crypto::provider::{codes, SoftwareContainer, SoftwareHash, SoftwareKey};
use licsign_crypto::{
    signed_payload, BlobKind, CryptoProvider, HashAlgorithm, KeyAlgorithm, KeyFlags,
    LicenseSigner, ProviderError, ProviderResult, SignerConfig, SoftwareProvider, TextEncoding,
};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};
use tempfile::TempDir;

/// Key length for tests that do not depend on the production default.
pub const TEST_KEY_BITS: u32 = 1024;

/// Returns a config rooted in a fresh temporary directory.
pub fn temp_config(bits: u32) -> (TempDir, SignerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = SignerConfig {
        container_name: "test-container".to_string(),
        key_bits: bits,
        provider_root: dir.path().join("containers"),
    };
    (dir, config)
}

/// Opens a signer on a software provider in a temporary directory.
pub fn temp_signer(bits: u32) -> (TempDir, LicenseSigner<SoftwareProvider>) {
    let (dir, config) = temp_config(bits);
    let provider = SoftwareProvider::new(&config.provider_root);
    let signer = LicenseSigner::open(provider, &config).unwrap();
    (dir, signer)
}

/// Checks a base64 signature against a public key blob and license text.
///
/// The provider emits signatures little-endian, so the bytes are reversed
/// before PKCS#1 v1.5 verification.
pub fn verify_signature(public_blob: &[u8], license: &str, signature_b64: &str) -> bool {
    let decoded = blob::decode(public_blob).unwrap();
    let public: RsaPublicKey = match decoded.key {
        DecodedKey::Public(k) => k,
        DecodedKey::Private(k) => k.to_public_key(),
    };
    let mut signature = STANDARD.decode(signature_b64).unwrap();
    signature.reverse();
    let digest = Sha1::digest(signed_payload(license));
    public
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
        .is_ok()
}

/// A provider call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Open,
    Create,
    Generate,
    ExportProbe,
    Export,
    Import,
    CreateHash,
    HashData,
    HashValue,
    SignProbe,
    Sign,
    Encode,
    Release,
}

/// Wraps [`SoftwareProvider`], recording calls and injecting failures.
pub struct RecordingProvider {
    inner: SoftwareProvider,
    log: Arc<Mutex<Vec<&'static str>>>,
    faults: Vec<(Step, u32)>,
}

impl RecordingProvider {
    pub fn new(inner: SoftwareProvider) -> (Self, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let provider = Self {
            inner,
            log: Arc::clone(&log),
            faults: Vec::new(),
        };
        (provider, log)
    }

    /// Makes `step` fail with the given native code.
    pub fn failing(mut self, step: Step, code: u32) -> Self {
        self.faults.push((step, code));
        self
    }

    fn enter(&self, name: &'static str, step: Step) -> ProviderResult<()> {
        self.log.lock().unwrap().push(name);
        match self.faults.iter().find(|(s, _)| *s == step) {
            Some((_, code)) => Err(ProviderError::new(*code, format!("injected {name} failure"))),
            None => Ok(()),
        }
    }
}

/// Counts how often `name` appears in a call log.
pub fn count(log: &Arc<Mutex<Vec<&'static str>>>, name: &str) -> usize {
    log.lock().unwrap().iter().filter(|n| **n == name).count()
}

impl CryptoProvider for RecordingProvider {
    type Container = SoftwareContainer;
    type Key = SoftwareKey;
    type Hash = SoftwareHash;

    fn open_container(&self, name: &str) -> ProviderResult<SoftwareContainer> {
        self.enter("open_container", Step::Open)?;
        self.inner.open_container(name)
    }

    fn create_container(&self, name: &str) -> ProviderResult<SoftwareContainer> {
        self.enter("create_container", Step::Create)?;
        self.inner.create_container(name)
    }

    fn release_container(&self, container: SoftwareContainer) -> ProviderResult<()> {
        self.enter("release_container", Step::Release)?;
        self.inner.release_container(container)
    }

    fn generate_key_pair(
        &self,
        container: &SoftwareContainer,
        algorithm: KeyAlgorithm,
        bits: u32,
        flags: KeyFlags,
    ) -> ProviderResult<SoftwareKey> {
        self.enter("generate_key_pair", Step::Generate)?;
        self.inner.generate_key_pair(container, algorithm, bits, flags)
    }

    fn user_key(&self, container: &SoftwareContainer) -> ProviderResult<SoftwareKey> {
        self.log.lock().unwrap().push("user_key");
        self.inner.user_key(container)
    }

    fn export_key(
        &self,
        key: &SoftwareKey,
        kind: BlobKind,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize> {
        match out {
            None => {
                self.enter("export_probe", Step::ExportProbe)?;
                self.inner.export_key(key, kind, None)
            }
            Some(buf) => {
                self.enter("export_key", Step::Export)?;
                self.inner.export_key(key, kind, Some(buf))
            }
        }
    }

    fn import_key(&self, container: &SoftwareContainer, blob: &[u8]) -> ProviderResult<SoftwareKey> {
        self.enter("import_key", Step::Import)?;
        self.inner.import_key(container, blob)
    }

    fn create_hash(
        &self,
        container: &SoftwareContainer,
        algorithm: HashAlgorithm,
    ) -> ProviderResult<SoftwareHash> {
        self.enter("create_hash", Step::CreateHash)?;
        self.inner.create_hash(container, algorithm)
    }

    fn hash_data(&self, hash: &mut SoftwareHash, data: &[u8]) -> ProviderResult<()> {
        self.enter("hash_data", Step::HashData)?;
        self.inner.hash_data(hash, data)
    }

    fn hash_value(&self, hash: &mut SoftwareHash) -> ProviderResult<Vec<u8>> {
        self.enter("hash_value", Step::HashValue)?;
        self.inner.hash_value(hash)
    }

    fn sign_hash(
        &self,
        hash: &mut SoftwareHash,
        key: &SoftwareKey,
        out: Option<&mut [u8]>,
    ) -> ProviderResult<usize> {
        match out {
            None => {
                self.enter("sign_probe", Step::SignProbe)?;
                self.inner.sign_hash(hash, key, None)
            }
            Some(buf) => {
                self.enter("sign_hash", Step::Sign)?;
                self.inner.sign_hash(hash, key, Some(buf))
            }
        }
    }

    fn destroy_hash(&self, hash: SoftwareHash) -> ProviderResult<()> {
        self.log.lock().unwrap().push("destroy_hash");
        self.inner.destroy_hash(hash)
    }

    fn destroy_key(&self, key: SoftwareKey) -> ProviderResult<()> {
        self.log.lock().unwrap().push("destroy_key");
        self.inner.destroy_key(key)
    }

    fn binary_to_text(&self, data: &[u8], encoding: TextEncoding) -> ProviderResult<String> {
        self.enter("binary_to_text", Step::Encode)?;
        self.inner.binary_to_text(data, encoding)
    }
}

/// A native code no fallback path treats specially.
pub const UNRELATED_CODE: u32 = codes::NTE_FAIL;
