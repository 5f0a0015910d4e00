//! RSA key blob codec.
//!
//! Key blobs use the provider's exchange layout. All integers are
//! little-endian:
//!
//! ```text
//! bType u8 | bVersion u8 | reserved u16 | aiKeyAlg u32
//! magic u32 | bitlen u32 | pubexp u32
//! modulus              bitlen/8
//! prime1, prime2       bitlen/16 each   (private only)
//! exponent1, exponent2 bitlen/16 each   (private only)
//! coefficient          bitlen/16        (private only)
//! privateExponent      bitlen/8         (private only)
//! ```

use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::provider::{codes, KeyAlgorithm, ProviderError, ProviderResult};

/// Blob type tag for a public key.
pub const PUBLICKEYBLOB: u8 = 0x06;
/// Blob type tag for a private key.
pub const PRIVATEKEYBLOB: u8 = 0x07;
/// The only supported blob version.
pub const CUR_BLOB_VERSION: u8 = 2;
/// "RSA1": public key magic.
pub const RSA1_MAGIC: u32 = 0x3141_5352;
/// "RSA2": private key magic.
pub const RSA2_MAGIC: u32 = 0x3241_5352;

const HEADER_LEN: usize = 20;

/// Length of a public key blob for a modulus of `bits` bits.
#[must_use]
pub fn public_blob_len(bits: usize) -> usize {
    HEADER_LEN + bits / 8
}

/// Length of a private key blob for a modulus of `bits` bits.
#[must_use]
pub fn private_blob_len(bits: usize) -> usize {
    HEADER_LEN + 2 * (bits / 8) + 5 * (bits / 16)
}

/// A key recovered from a blob.
#[derive(Debug, Clone)]
pub enum DecodedKey {
    /// Public half only.
    Public(RsaPublicKey),
    /// Full key pair.
    Private(RsaPrivateKey),
}

/// A decoded blob: the key plus the algorithm recorded in its header.
#[derive(Debug, Clone)]
pub struct DecodedBlob {
    /// Algorithm from the blob header.
    pub algorithm: KeyAlgorithm,
    /// The key material.
    pub key: DecodedKey,
}

/// Encodes the public half of a key.
pub fn encode_public(key: &RsaPublicKey, algorithm: KeyAlgorithm) -> ProviderResult<Vec<u8>> {
    let bits = key.size() * 8;
    let mut out = Vec::with_capacity(public_blob_len(bits));
    write_header(&mut out, PUBLICKEYBLOB, RSA1_MAGIC, algorithm, bits, key.e())?;
    put_uint(&mut out, key.n(), bits / 8)?;
    Ok(out)
}

/// Encodes a full private key. The returned buffer is zeroized on drop.
pub fn encode_private(
    key: &RsaPrivateKey,
    algorithm: KeyAlgorithm,
) -> ProviderResult<Zeroizing<Vec<u8>>> {
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(ProviderError::new(
            codes::NTE_BAD_KEY,
            format!("{}-prime keys have no blob representation", primes.len()),
        ));
    }
    let missing_crt = || ProviderError::new(codes::NTE_BAD_KEY_STATE, "CRT values not precomputed");
    let dp = key.dp().ok_or_else(missing_crt)?;
    let dq = key.dq().ok_or_else(missing_crt)?;
    let coefficient = key.crt_coefficient().ok_or_else(missing_crt)?;

    let bits = key.size() * 8;
    let half = bits / 16;
    let mut out = Zeroizing::new(Vec::with_capacity(private_blob_len(bits)));
    write_header(&mut out, PRIVATEKEYBLOB, RSA2_MAGIC, algorithm, bits, key.e())?;
    put_uint(&mut out, key.n(), bits / 8)?;
    put_uint(&mut out, &primes[0], half)?;
    put_uint(&mut out, &primes[1], half)?;
    put_uint(&mut out, dp, half)?;
    put_uint(&mut out, dq, half)?;
    put_uint(&mut out, &coefficient, half)?;
    put_uint(&mut out, key.d(), bits / 8)?;
    Ok(out)
}

/// Decodes a public or private key blob.
pub fn decode(blob: &[u8]) -> ProviderResult<DecodedBlob> {
    let mut reader = Reader::new(blob);

    let blob_type = reader.u8()?;
    if blob_type != PUBLICKEYBLOB && blob_type != PRIVATEKEYBLOB {
        return Err(ProviderError::new(
            codes::NTE_BAD_TYPE,
            format!("unsupported blob type 0x{blob_type:02x}"),
        ));
    }
    let version = reader.u8()?;
    if version != CUR_BLOB_VERSION {
        return Err(ProviderError::new(
            codes::NTE_BAD_VER,
            format!("unsupported blob version {version}"),
        ));
    }
    let _reserved = reader.u16()?;
    let alg_id = reader.u32()?;
    let algorithm = KeyAlgorithm::from_alg_id(alg_id).ok_or_else(|| {
        ProviderError::new(codes::NTE_BAD_ALGID, format!("unknown algorithm 0x{alg_id:08x}"))
    })?;

    let magic = reader.u32()?;
    let expected_magic = if blob_type == PUBLICKEYBLOB { RSA1_MAGIC } else { RSA2_MAGIC };
    if magic != expected_magic {
        return Err(ProviderError::new(
            codes::NTE_BAD_DATA,
            format!("magic 0x{magic:08x} does not match blob type"),
        ));
    }
    let bits = reader.u32()? as usize;
    if bits == 0 || bits % 16 != 0 {
        return Err(ProviderError::new(
            codes::NTE_BAD_LEN,
            format!("invalid modulus length {bits}"),
        ));
    }
    let e = BigUint::from(reader.u32()?);
    let n = reader.uint(bits / 8)?;

    let key = if blob_type == PUBLICKEYBLOB {
        let public = RsaPublicKey::new(n, e).map_err(bad_key)?;
        DecodedKey::Public(public)
    } else {
        let half = bits / 16;
        let p = reader.uint(half)?;
        let q = reader.uint(half)?;
        // CRT values are recomputed from the primes on import.
        reader.skip(3 * half)?;
        let d = reader.uint(bits / 8)?;
        let private = RsaPrivateKey::from_components(n, e, d, vec![p, q]).map_err(bad_key)?;
        DecodedKey::Private(private)
    };

    if reader.remaining() != 0 {
        return Err(ProviderError::new(
            codes::NTE_BAD_LEN,
            format!("{} trailing bytes after key blob", reader.remaining()),
        ));
    }

    Ok(DecodedBlob { algorithm, key })
}

fn bad_key(err: rsa::Error) -> ProviderError {
    ProviderError::new(codes::NTE_BAD_KEY, format!("invalid key material: {err}"))
}

fn write_header(
    out: &mut Vec<u8>,
    blob_type: u8,
    magic: u32,
    algorithm: KeyAlgorithm,
    bits: usize,
    e: &BigUint,
) -> ProviderResult<()> {
    let bitlen = u32::try_from(bits)
        .map_err(|_| ProviderError::new(codes::NTE_BAD_LEN, "modulus too large"))?;
    let e_bytes = e.to_bytes_le();
    if e_bytes.len() > 4 {
        return Err(ProviderError::new(
            codes::NTE_BAD_KEY,
            "public exponent does not fit in 32 bits",
        ));
    }
    let pubexp = e_bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));

    out.push(blob_type);
    out.push(CUR_BLOB_VERSION);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&algorithm.alg_id().to_le_bytes());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&bitlen.to_le_bytes());
    out.extend_from_slice(&pubexp.to_le_bytes());
    Ok(())
}

/// Appends `value` as a little-endian integer zero-padded to `width` bytes.
fn put_uint(out: &mut Vec<u8>, value: &BigUint, width: usize) -> ProviderResult<()> {
    let bytes = Zeroizing::new(value.to_bytes_le());
    if bytes.len() > width {
        return Err(ProviderError::new(
            codes::NTE_BAD_LEN,
            format!("integer of {} bytes exceeds field width {width}", bytes.len()),
        ));
    }
    out.extend_from_slice(&bytes);
    out.resize(out.len() + width - bytes.len(), 0);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> ProviderResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProviderError::new(
                codes::NTE_BAD_DATA,
                format!("key blob truncated at offset {}", self.pos),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> ProviderResult<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> ProviderResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ProviderResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> ProviderResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn uint(&mut self, width: usize) -> ProviderResult<BigUint> {
        Ok(BigUint::from_bytes_le(self.take(width)?))
    }
}
