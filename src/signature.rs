//! Stateless signed URLs.
//!
//! A signed URL carries an HMAC-SHA256 over its path, its query parameters
//! and an optional expiration. Parameters are canonicalized before signing so
//! the signature never depends on the order a caller inserted them in.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;
use zeroize::Zeroizing;

/// Reserved parameter carrying the expiration.
pub const EXPIRATION_PARAM: &str = "exp";
/// Query parameter carrying the signature.
pub const SIGNATURE_PARAM: &str = "sig";

type HmacSha256 = Hmac<Sha256>;

/// Query parameters of a signed route.
pub type Params = HashMap<String, String>;

/// Signs and verifies URLs with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl UrlSigner {
    /// Create a new [`UrlSigner`].
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_ref().to_vec()),
        }
    }

    fn mac(&self, data: impl AsRef<[u8]>) -> Option<HmacSha256> {
        // HMAC accepts keys of any length, including an empty one.
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(data.as_ref());
        Some(mac)
    }

    /// Hex encoded HMAC-SHA256 of `data`.
    pub fn hash(&self, data: impl AsRef<[u8]>) -> String {
        self.mac(data)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Signature of `path` with `params` and an optional `expiration`.
    pub fn signature(
        &self,
        path: &str,
        params: &Params,
        expiration: Option<&str>,
    ) -> String {
        self.hash(payload(path, params, expiration))
    }

    /// Check a signature received from a client.
    ///
    /// The provided signature is percent-decoded first since clients send it
    /// query-escaped. The embedded expiration is *not* compared to the
    /// current time.
    pub fn verify(
        &self,
        path: &str,
        provided: &str,
        expiration: Option<&str>,
        params: &Params,
    ) -> bool {
        let Some(provided) = decode_component(provided)
            .and_then(|sig| hex::decode(sig).ok())
        else {
            return false;
        };
        let Some(mac) = self.mac(payload(path, params, expiration)) else {
            return false;
        };

        mac.verify_slice(&provided).is_ok()
    }

    /// Build a signed URL.
    pub fn signed_route(
        &self,
        base_url: &str,
        path: &str,
        params: &Params,
        expiration: Option<DateTime<Utc>>,
    ) -> String {
        let expiration = expiration.map(|exp| exp.timestamp().to_string());
        let query = canonical_query(params, expiration.as_deref());
        let signature =
            encode_component(&self.signature(path, params, expiration.as_deref()));

        if query.is_empty() {
            format!("{base_url}{path}?{SIGNATURE_PARAM}={signature}")
        } else {
            format!("{base_url}{path}?{query}&{SIGNATURE_PARAM}={signature}")
        }
    }

    /// Build a signed URL valid for `duration` from now.
    ///
    /// Returns `None` when the expiration does not fit in a timestamp.
    pub fn temporary_signed_route(
        &self,
        base_url: &str,
        path: &str,
        duration: Duration,
        params: &Params,
    ) -> Option<String> {
        let expiration = Utc::now().checked_add_signed(duration)?;
        Some(self.signed_route(base_url, path, params, Some(expiration)))
    }
}

/// Deterministic query string signed by [`UrlSigner`].
///
/// Keys are sorted, values are form-urlencoded and the expiration, if any,
/// always comes last. An explicit `expiration` takes precedence over an `exp`
/// entry of `params`; empty expirations are ignored.
pub fn canonical_query(params: &Params, expiration: Option<&str>) -> String {
    let expiration = expiration
        .filter(|exp| !exp.is_empty())
        .or_else(|| {
            params
                .get(EXPIRATION_PARAM)
                .map(String::as_str)
                .filter(|exp| !exp.is_empty())
        });

    let sorted: BTreeMap<&str, &str> = params
        .iter()
        .filter(|(key, _)| key.as_str() != EXPIRATION_PARAM)
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();

    let mut pairs: Vec<String> = sorted
        .into_iter()
        .map(|(key, value)| format!("{key}={}", encode_component(value)))
        .collect();

    if let Some(exp) = expiration {
        pairs.push(format!("{EXPIRATION_PARAM}={}", encode_component(exp)));
    }

    pairs.join("&")
}

fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode_component(value: &str) -> Option<String> {
    // Separators would split the component in two.
    if value.contains(['&', '=']) {
        return None;
    }

    form_urlencoded::parse(value.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
}

fn payload(path: &str, params: &Params, expiration: Option<&str>) -> String {
    format!("{path}?{}", canonical_query(params, expiration))
}
