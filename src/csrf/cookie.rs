//! `csrf-token` cookie encoding.
//!
//! The cookie holds the JSON triple percent-encoded so it survives cookie
//! value restrictions. Raw JSON is accepted on the way in as well.

use super::{CSRF_COOKIE, CsrfToken, TOKEN_TTL_MS};
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use url::form_urlencoded;

/// Percent-encode the triple for use as a cookie value.
///
/// # Errors
/// Returns an error if the triple cannot be serialized.
pub fn encode_cookie_value(token: &CsrfToken) -> serde_json::Result<String> {
    let json = serde_json::to_string(token)?;
    Ok(form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

/// Parse a cookie value back into a triple; `None` for anything malformed.
#[must_use]
pub fn decode_cookie_value(raw: &str) -> Option<CsrfToken> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        return serde_json::from_str(raw).ok();
    }
    // form_urlencoded treats '+' as space; the encoder never emits a literal '+'.
    let decoded: String = form_urlencoded::parse(format!("v={raw}").as_bytes())
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())?;
    serde_json::from_str(&decoded).ok()
}

/// `Set-Cookie` value for an issued token.
///
/// # Errors
/// Returns an error if the triple cannot be encoded into a header value.
pub fn csrf_cookie(token: &CsrfToken, secure: bool) -> Result<HeaderValue> {
    let value = encode_cookie_value(token).context("failed to encode CSRF cookie")?;
    let max_age = TOKEN_TTL_MS / 1000;
    let mut cookie =
        format!("{CSRF_COOKIE}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).context("invalid CSRF cookie header")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrfToken {
        CsrfToken {
            token: "ab".repeat(32),
            hash: "cd".repeat(32),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn encoded_value_is_cookie_safe() {
        let encoded = encode_cookie_value(&sample()).expect("encode");
        assert!(!encoded.contains(['{', '"', ',', ';', ' ']));
        assert_eq!(decode_cookie_value(&encoded), Some(sample()));
    }

    #[test]
    fn raw_json_is_accepted() {
        let raw = serde_json::to_string(&sample()).expect("json");
        assert_eq!(decode_cookie_value(&raw), Some(sample()));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(decode_cookie_value("not-json"), None);
        assert_eq!(decode_cookie_value("%7B%22token%22"), None);
        assert_eq!(decode_cookie_value(""), None);
    }

    #[test]
    fn cookie_attributes() {
        let header = csrf_cookie(&sample(), true).expect("cookie");
        let value = header.to_str().expect("ascii");
        assert!(value.starts_with("csrf-token="));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Strict"));
        assert!(value.contains("Max-Age=86400"));
        assert!(value.ends_with("; Secure"));

        let insecure = csrf_cookie(&sample(), false).expect("cookie");
        assert!(!insecure.to_str().expect("ascii").contains("Secure"));
    }
}
