//! Key encoding and decryption under recovered keys.
//!
//! PKCS#1 v1.5 decryption goes through the `rsa` crate whenever it accepts
//! the key. Recovered keys often fall outside its limits (tiny moduli, huge
//! public exponents from Wiener style attacks); those are decrypted on the
//! integers directly. Encoding writes the PKCS#1 structure without
//! validating key strength.

use num_bigint_dig::BigUint;
use rsa::pkcs1::der::Encode;
use rsa::pkcs1::der::asn1::UintRef;
use rsa::pkcs1::der::pem::{self, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde::{Deserialize, Serialize};

use crate::error::OutputError;
use crate::key::CompleteKey;

const PEM_LABEL: &str = "RSA PRIVATE KEY";

/// Minimum PKCS#1 v1.5 padding string length.
const MIN_PS_LEN: usize = 8;

/// Smallest block that holds `00 02 PS 00`.
const MIN_BLOCK_LEN: usize = MIN_PS_LEN + 3;

/// Largest public exponent the `rsa` crate accepts.
const LIBRARY_MAX_EXPONENT: u64 = (1 << 33) - 1;

/// Largest modulus the `rsa` crate accepts, in bits.
const LIBRARY_MAX_BITS: usize = 4096;

/// Padding scheme applied when decrypting ciphertexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Textbook RSA, `c^d mod n`.
    #[default]
    Raw,
    /// PKCS#1 v1.5 encryption padding.
    Pkcs1,
}

/// Private key file encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// PKCS#1 PEM (`BEGIN RSA PRIVATE KEY`).
    #[default]
    Pem,
    /// PKCS#1 DER.
    Der,
}

impl KeyFormat {
    /// File extension for keys in this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pem => "pem",
            Self::Der => "der",
        }
    }
}

/// Big-endian bytes of `value` without leading zeros; zero is empty.
#[must_use]
pub fn to_bytes(value: &BigUint) -> Vec<u8> {
    if value.bits() == 0 {
        return Vec::new();
    }
    value.to_bytes_be()
}

/// Encodes `key` as a PKCS#1 `RSAPrivateKey`.
///
/// # Errors
///
/// Returns `OutputError::Encode` if the DER or PEM encoder rejects the key.
pub fn encode_private_key(key: &CompleteKey, format: KeyFormat) -> Result<Vec<u8>, OutputError> {
    let fields = [
        key.n.to_bytes_be(),
        key.e.to_bytes_be(),
        key.d.to_bytes_be(),
        key.p.to_bytes_be(),
        key.q.to_bytes_be(),
        key.dp.to_bytes_be(),
        key.dq.to_bytes_be(),
        key.qinv.to_bytes_be(),
    ];
    let der = rsa::pkcs1::RsaPrivateKey {
        modulus: uint(&fields[0])?,
        public_exponent: uint(&fields[1])?,
        private_exponent: uint(&fields[2])?,
        prime1: uint(&fields[3])?,
        prime2: uint(&fields[4])?,
        exponent1: uint(&fields[5])?,
        exponent2: uint(&fields[6])?,
        coefficient: uint(&fields[7])?,
        other_prime_infos: None,
    }
    .to_der()
    .map_err(|e| OutputError::Encode(e.to_string()))?;

    match format {
        KeyFormat::Der => Ok(der),
        KeyFormat::Pem => pem::encode_string(PEM_LABEL, LineEnding::LF, &der)
            .map(String::into_bytes)
            .map_err(|e| OutputError::Encode(e.to_string())),
    }
}

/// Decrypts `ciphertext` under `key`.
///
/// # Errors
///
/// Returns `OutputError::Decrypt` when the ciphertext is not below `n` or,
/// for [`Padding::Pkcs1`], when the padding does not check out.
pub fn decrypt(
    ciphertext: &BigUint,
    key: &CompleteKey,
    padding: Padding,
) -> Result<Vec<u8>, OutputError> {
    if ciphertext >= &key.n {
        return Err(OutputError::Decrypt("ciphertext is not smaller than n".into()));
    }
    match padding {
        Padding::Raw => Ok(to_bytes(&ciphertext.modpow(&key.d, &key.n))),
        Padding::Pkcs1 => {
            if let Some(private) = library_key(key) {
                let block = left_pad(&ciphertext.to_bytes_be(), private.size());
                return private
                    .decrypt(Pkcs1v15Encrypt, &block)
                    .map_err(|e| OutputError::Decrypt(format!("PKCS#1 v1.5: {e}")));
            }
            let k = key.n.to_bytes_be().len();
            let plain = ciphertext.modpow(&key.d, &key.n);
            unpad_pkcs1(&left_pad(&plain.to_bytes_be(), k))
        }
    }
}

/// The key as an `rsa` crate private key, if the crate accepts it.
fn library_key(key: &CompleteKey) -> Option<RsaPrivateKey> {
    if key.e > BigUint::from(LIBRARY_MAX_EXPONENT)
        || key.n.bits() > LIBRARY_MAX_BITS
        || key.n.to_bytes_be().len() < MIN_BLOCK_LEN
    {
        tracing::debug!(bits = key.n.bits(), "key outside rsa crate limits, unpadding directly");
        return None;
    }
    let private = RsaPrivateKey::from_components(
        key.n.clone(),
        key.e.clone(),
        key.d.clone(),
        vec![key.p.clone(), key.q.clone()],
    )
    .and_then(|private| {
        private.validate()?;
        Ok(private)
    });
    match private {
        Ok(private) => Some(private),
        Err(e) => {
            tracing::debug!(error = %e, "rsa crate rejected key, unpadding directly");
            None
        }
    }
}

fn uint(bytes: &[u8]) -> Result<UintRef<'_>, OutputError> {
    UintRef::new(bytes).map_err(|e| OutputError::Encode(e.to_string()))
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

/// Strips `00 02 PS 00` from an encryption block.
fn unpad_pkcs1(block: &[u8]) -> Result<Vec<u8>, OutputError> {
    let bad = || OutputError::Decrypt("invalid PKCS#1 v1.5 padding".into());
    let rest = block.strip_prefix(&[0x00, 0x02]).ok_or_else(bad)?;
    let sep = rest.iter().position(|&b| b == 0).ok_or_else(bad)?;
    if sep < MIN_PS_LEN {
        return Err(bad());
    }
    Ok(rest[sep + 1..].to_vec())
}
