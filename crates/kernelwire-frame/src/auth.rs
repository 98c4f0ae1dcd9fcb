//! Message signing.
//!
//! A signature is an HMAC over the four serialized JSON frames in wire order
//! (header, parent header, metadata, content), rendered as lowercase hex.

use std::fmt;
use std::str::FromStr;

use hmac::digest::core_api::BlockSizeUser;
use hmac::digest::Digest;
use hmac::{Mac, SimpleHmac};

use crate::error::{FrameError, Result};
use crate::ids::to_hex;

/// Hash functions accepted as the HMAC digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
    Blake2b512,
    Blake2s256,
    Ripemd160,
}

impl SignatureScheme {
    pub const ALL: [SignatureScheme; 10] = [
        SignatureScheme::Sha1,
        SignatureScheme::Sha224,
        SignatureScheme::Sha256,
        SignatureScheme::Sha384,
        SignatureScheme::Sha512,
        SignatureScheme::Sha512_224,
        SignatureScheme::Sha512_256,
        SignatureScheme::Blake2b512,
        SignatureScheme::Blake2s256,
        SignatureScheme::Ripemd160,
    ];

    /// Connection-file name of the scheme.
    pub fn name(self) -> &'static str {
        match self {
            SignatureScheme::Sha1 => "hmac-sha1",
            SignatureScheme::Sha224 => "hmac-sha224",
            SignatureScheme::Sha256 => "hmac-sha256",
            SignatureScheme::Sha384 => "hmac-sha384",
            SignatureScheme::Sha512 => "hmac-sha512",
            SignatureScheme::Sha512_224 => "hmac-sha512-224",
            SignatureScheme::Sha512_256 => "hmac-sha512-256",
            SignatureScheme::Blake2b512 => "hmac-blake2b512",
            SignatureScheme::Blake2s256 => "hmac-blake2s256",
            SignatureScheme::Ripemd160 => "hmac-ripemd160",
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = FrameError;

    fn from_str(name: &str) -> Result<Self> {
        SignatureScheme::ALL
            .into_iter()
            .find(|scheme| scheme.name() == name)
            .ok_or_else(|| FrameError::UnsupportedScheme(name.to_string()))
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signing strategy for a session.
///
/// Every call builds a fresh MAC, so one value can be shared by all channel
/// threads without locking.
#[derive(Clone)]
pub enum Authentication {
    /// No signing: empty signatures, every message verifies.
    Disabled,
    /// HMAC with a shared key.
    Keyed {
        scheme: SignatureScheme,
        key: Vec<u8>,
    },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::Disabled => f.write_str("Authentication::Disabled"),
            Authentication::Keyed { scheme, .. } => f
                .debug_struct("Authentication::Keyed")
                .field("scheme", scheme)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

impl Authentication {
    /// Build from connection-file fields.
    ///
    /// An empty scheme or an empty key opts out of signing. An unknown scheme
    /// name is an error.
    pub fn new(scheme: &str, key: &[u8]) -> Result<Self> {
        if scheme.is_empty() {
            return Ok(Authentication::Disabled);
        }
        let scheme = scheme.parse::<SignatureScheme>()?;
        if key.is_empty() {
            return Ok(Authentication::Disabled);
        }
        Ok(Authentication::keyed(scheme, key))
    }

    pub fn keyed(scheme: SignatureScheme, key: &[u8]) -> Self {
        Authentication::Keyed {
            scheme,
            key: key.to_vec(),
        }
    }

    pub fn disabled() -> Self {
        Authentication::Disabled
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Authentication::Keyed { .. })
    }

    /// Sign the four JSON frames.
    pub fn sign(&self, header: &[u8], parent_header: &[u8], metadata: &[u8], content: &[u8]) -> String {
        let parts = [header, parent_header, metadata, content];
        match self {
            Authentication::Disabled => String::new(),
            Authentication::Keyed { scheme, key } => match scheme {
                SignatureScheme::Sha1 => sign_with::<sha1::Sha1>(key, parts),
                SignatureScheme::Sha224 => sign_with::<sha2::Sha224>(key, parts),
                SignatureScheme::Sha256 => sign_with::<sha2::Sha256>(key, parts),
                SignatureScheme::Sha384 => sign_with::<sha2::Sha384>(key, parts),
                SignatureScheme::Sha512 => sign_with::<sha2::Sha512>(key, parts),
                SignatureScheme::Sha512_224 => sign_with::<sha2::Sha512_224>(key, parts),
                SignatureScheme::Sha512_256 => sign_with::<sha2::Sha512_256>(key, parts),
                SignatureScheme::Blake2b512 => sign_with::<blake2::Blake2b512>(key, parts),
                SignatureScheme::Blake2s256 => sign_with::<blake2::Blake2s256>(key, parts),
                SignatureScheme::Ripemd160 => sign_with::<ripemd::Ripemd160>(key, parts),
            },
        }
    }

    /// Check a received hex signature against the four JSON frames.
    ///
    /// Comparison is constant time.
    pub fn verify(
        &self,
        signature: &[u8],
        header: &[u8],
        parent_header: &[u8],
        metadata: &[u8],
        content: &[u8],
    ) -> bool {
        let parts = [header, parent_header, metadata, content];
        match self {
            Authentication::Disabled => true,
            Authentication::Keyed { scheme, key } => {
                let Ok(expected) = hex::decode(signature) else {
                    return false;
                };
                match scheme {
                    SignatureScheme::Sha1 => verify_with::<sha1::Sha1>(key, parts, &expected),
                    SignatureScheme::Sha224 => verify_with::<sha2::Sha224>(key, parts, &expected),
                    SignatureScheme::Sha256 => verify_with::<sha2::Sha256>(key, parts, &expected),
                    SignatureScheme::Sha384 => verify_with::<sha2::Sha384>(key, parts, &expected),
                    SignatureScheme::Sha512 => verify_with::<sha2::Sha512>(key, parts, &expected),
                    SignatureScheme::Sha512_224 => {
                        verify_with::<sha2::Sha512_224>(key, parts, &expected)
                    }
                    SignatureScheme::Sha512_256 => {
                        verify_with::<sha2::Sha512_256>(key, parts, &expected)
                    }
                    SignatureScheme::Blake2b512 => {
                        verify_with::<blake2::Blake2b512>(key, parts, &expected)
                    }
                    SignatureScheme::Blake2s256 => {
                        verify_with::<blake2::Blake2s256>(key, parts, &expected)
                    }
                    SignatureScheme::Ripemd160 => {
                        verify_with::<ripemd::Ripemd160>(key, parts, &expected)
                    }
                }
            }
        }
    }
}

fn keyed_mac<D>(key: &[u8], parts: [&[u8]; 4]) -> Option<SimpleHmac<D>>
where
    D: Digest + BlockSizeUser,
{
    // HMAC accepts keys of any length, so this only fails on a broken digest.
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(key).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

fn sign_with<D>(key: &[u8], parts: [&[u8]; 4]) -> String
where
    D: Digest + BlockSizeUser,
{
    keyed_mac::<D>(key, parts)
        .map(|mac| to_hex(&mac.finalize().into_bytes()))
        .unwrap_or_default()
}

fn verify_with<D>(key: &[u8], parts: [&[u8]; 4], expected: &[u8]) -> bool
where
    D: Digest + BlockSizeUser,
{
    keyed_mac::<D>(key, parts).is_some_and(|mac| mac.verify_slice(expected).is_ok())
}
