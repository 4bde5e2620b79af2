//! Shared-access-signature tokens
//!
//! Both the provisioning service and the hub authenticate the device with a
//! bearer token derived from the device key:
//! - The resource scope is lowercased and URL-encoded
//! - `HMAC-SHA256(key, urlencode(scope) + "\n" + expiry)` is computed
//! - The digest is base64-encoded, then URL-encoded into `sig`
//!
//! A token is only good for its exact scope and until its expiry. A fresh one
//! is minted for every connection attempt and simply replaced, never revoked.

use core::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of every token minted for a connection attempt
pub const TOKEN_TTL_SECS: u64 = 3600;

/// Device keys are pasted from portals and build scripts; accept missing
/// padding and non-canonical trailing bits instead of rejecting the key.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Device key plus the registration id it was enrolled under.
///
/// The decoded key bytes are wiped when the credential is dropped.
#[derive(ZeroizeOnDrop)]
pub struct Credential {
    secret: Vec<u8>,
    #[zeroize(skip)]
    registration_id: String,
}

impl Credential {
    /// Decode a base64 device key.
    pub fn from_base64(key: &str, registration_id: &str) -> Result<Self> {
        let secret = decode_key(key)?;
        if registration_id.is_empty() {
            return Err(Error::Configuration("registration id is empty".into()));
        }

        Ok(Self {
            secret,
            registration_id: registration_id.to_owned(),
        })
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Sign a token for `resource_uri` valid until `expiry` (epoch seconds).
    pub fn sign(&self, resource_uri: &str, expiry: u64) -> Result<AuthToken> {
        sign(resource_uri, &self.secret, expiry)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("registration_id", &self.registration_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A signed `SharedAccessSignature` bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    resource: String,
    expiry: u64,
    value: String,
}

impl AuthToken {
    /// Lowercased resource scope the token was signed for
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Absolute expiry, epoch seconds
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for AuthToken {
    // The token is a bearer credential, keep it out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("resource", &self.resource)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Sign a token for `resource_uri` with the raw key bytes.
pub fn sign(resource_uri: &str, secret: &[u8], expiry: u64) -> Result<AuthToken> {
    let resource = resource_uri.to_lowercase();
    let encoded_resource = url_encode(resource.as_bytes());

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Configuration(format!("unusable device key: {e}")))?;
    mac.update(encoded_resource.as_bytes());
    mac.update(b"\n");
    mac.update(expiry.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();

    let signature = url_encode(STANDARD.encode(digest).as_bytes());

    let value = format!("SharedAccessSignature sr={encoded_resource}&sig={signature}&se={expiry}");

    Ok(AuthToken {
        resource,
        expiry,
        value,
    })
}

/// Decode the key first, then sign. A key that does not decode is fatal for
/// this attempt and will keep failing until the configuration changes.
pub fn sign_with_encoded_key(resource_uri: &str, key: &str, expiry: u64) -> Result<AuthToken> {
    let mut secret = decode_key(key)?;
    let token = sign(resource_uri, &secret, expiry);
    secret.zeroize();
    token
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    let secret = KEY_ENGINE
        .decode(key.trim())
        .map_err(|e| Error::Configuration(format!("device key is not base64: {e}")))?;
    if secret.is_empty() {
        return Err(Error::Configuration("device key is empty".into()));
    }
    Ok(secret)
}

/// Percent-encode everything outside `[A-Za-z0-9-_.~]` as uppercase `%XX`.
pub fn url_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";
    let mut s = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            s.push(b as char);
        } else {
            s.push('%');
            s.push(HEX_CHARS[(b >> 4) as usize] as char);
            s.push(HEX_CHARS[(b & 0x0f) as usize] as char);
        }
    }
    s
}

/// Inverse of [`url_encode`]. Returns `None` on a truncated or non-hex escape.
pub fn url_decode(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hi = (hex[0] as char).to_digit(16)?;
            let lo = (hex[1] as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}
