//! Portal request signature (`mtgsig`)
//!
//! Every portal call carries a signature string as a query parameter.
//! The coordinator usually supplies the last known token; when it is
//! empty one is synthesised from the current millisecond timestamp and
//! a cookie-derived suffix. The store-statistics run refreshes the
//! signature and later extractors in the same task reuse that value.

use std::collections::HashMap;

use chrono::Utc;

/// Cookie consulted for the device suffix, set by the portal's own
/// fingerprinting script
const DEVICE_COOKIE: &str = "_lxsdk_cuid";

/// Pick the signature to use: the supplied token when present,
/// otherwise a locally synthesised one.
#[must_use]
pub fn effective_signature(supplied: &str, cookies: &HashMap<String, String>) -> String {
    let trimmed = supplied.trim();
    if trimmed.is_empty() {
        synthesize_signature(cookies)
    } else {
        trimmed.to_string()
    }
}

/// Synthesise a well-formed signature from the current millisecond
/// timestamp and the device-cookie suffix.
#[must_use]
pub fn synthesize_signature(cookies: &HashMap<String, String>) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = device_suffix(cookies);
    format!("{millis}.{suffix}")
}

/// Last eight alphanumeric characters of the device cookie, zero
/// padded when the cookie is missing or short
fn device_suffix(cookies: &HashMap<String, String>) -> String {
    let raw = cookies.get(DEVICE_COOKIE).map(String::as_str).unwrap_or("");
    let alnum: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let tail: String = alnum
        .chars()
        .rev()
        .take(8)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{tail:0>8}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplied_token_wins_when_present() {
        let cookies = HashMap::new();
        assert_eq!(effective_signature("  abc123  ", &cookies), "abc123");
    }

    #[test]
    fn empty_token_synthesises_from_timestamp() {
        let cookies = HashMap::from([(
            DEVICE_COOKIE.to_string(),
            "18c9a-fe42.1.deadbeefcafe".to_string(),
        )]);
        let sig = effective_signature("", &cookies);
        let (millis, suffix) = sig.split_once('.').expect("signature has two parts");
        assert!(millis.parse::<i64>().expect("millis parse") > 1_600_000_000_000);
        assert_eq!(suffix, "beefcafe");
    }

    #[test]
    fn missing_device_cookie_pads_suffix() {
        let sig = synthesize_signature(&HashMap::new());
        let (_, suffix) = sig.split_once('.').expect("signature has two parts");
        assert_eq!(suffix, "00000000");
    }
}
