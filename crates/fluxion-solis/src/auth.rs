// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Request signing for the Solis cloud API
//!
//! `Authorization: API <key>:base64(HMAC-SHA1(secret, canonical))` where the
//! canonical string is `METHOD\nContent-MD5\nContent-Type\nDate\npath`.

use crate::errors::{SolisError, SolisResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const CONTENT_TYPE: &str = "application/json";

/// Base64 of the MD5 digest of the body
pub fn content_md5(body: &str) -> String {
    STANDARD.encode(Md5::digest(body.as_bytes()))
}

/// RFC 1123 date in GMT, e.g. "Sat, 18 Oct 2025 12:00:00 GMT"
pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn canonical_string(method: &str, md5: &str, content_type: &str, date: &str, path: &str) -> String {
    format!("{method}\n{md5}\n{content_type}\n{date}\n{path}")
}

/// Base64 HMAC-SHA1 of `canonical` keyed with `secret`
pub fn sign(secret: &str, canonical: &str) -> SolisResult<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| SolisError::ConfigError(format!("Invalid API secret: {}", e)))?;
    mac.update(canonical.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Headers that accompany every signed POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub content_md5: String,
    pub date: String,
    pub content_type: &'static str,
}

pub fn sign_request(
    key_id: &str,
    secret: &str,
    body: &str,
    path: &str,
    now: DateTime<Utc>,
) -> SolisResult<SignedHeaders> {
    let md5 = content_md5(body);
    let date = rfc1123_date(now);
    let canonical = canonical_string("POST", &md5, CONTENT_TYPE, &date, path);
    let signature = sign(secret, &canonical)?;

    Ok(SignedHeaders {
        authorization: format!("API {}:{}", key_id, signature),
        content_md5: md5,
        date,
        content_type: CONTENT_TYPE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BODY: &str = r#"{"inverterSn":"1234567890","cid":"636"}"#;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_content_md5() {
        assert_eq!(content_md5(BODY), "ajq8VxFN86TUnMtOvhr56A==");
        assert_eq!(content_md5(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_rfc1123_date() {
        assert_eq!(rfc1123_date(fixed_date()), "Sat, 18 Oct 2025 12:00:00 GMT");
    }

    #[test]
    fn test_known_signature() {
        let headers =
            sign_request("key-1", "test-secret", BODY, "/v2/api/atRead", fixed_date()).unwrap();
        assert_eq!(
            headers.authorization,
            "API key-1:LO0cHEew9I0HzY/4jj5cO9HPT0Q="
        );
        assert_eq!(headers.content_md5, "ajq8VxFN86TUnMtOvhr56A==");
        assert_eq!(headers.date, "Sat, 18 Oct 2025 12:00:00 GMT");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = sign_request("k", "s", BODY, "/v2/api/control", fixed_date()).unwrap();
        let b = sign_request("k", "s", BODY, "/v2/api/control", fixed_date()).unwrap();
        assert_eq!(a, b);

        let other_path = sign_request("k", "s", BODY, "/v2/api/atRead", fixed_date()).unwrap();
        assert_ne!(a.authorization, other_path.authorization);
    }
}
