//! Merchant portal interface
//!
//! The portal is consumed two ways: page navigations through the
//! session pool (login-gated HTML) and raw JSON calls through
//! [`PortalClient`] carrying the account's cookies and the `mtgsig`
//! signature.

mod client;
mod signature;

pub use client::{DownloadEntry, PortalClient, TemplateInfo};
pub use signature::{effective_signature, synthesize_signature};

use std::collections::HashMap;

use crate::coordinator::to_cookie_header;

/// Everything a raw portal call needs for one account: identity,
/// cookie set and the current request signature.
///
/// Sessions are values. The store-statistics extractor returns a
/// refreshed session that later extractors in the same task receive by
/// argument; nothing here is process-wide state.
#[derive(Debug, Clone)]
pub struct PortalSession {
    pub account: String,
    pub cookies: HashMap<String, String>,
    pub signature: String,
}

impl PortalSession {
    /// Build a session, synthesising the signature when the supplied
    /// token is empty
    #[must_use]
    pub fn new(account: &str, cookies: HashMap<String, String>, supplied_signature: &str) -> Self {
        let signature = effective_signature(supplied_signature, &cookies);
        Self {
            account: account.to_string(),
            cookies,
            signature,
        }
    }

    /// Cookie header value for raw HTTP calls
    #[must_use]
    pub fn cookie_header(&self) -> String {
        to_cookie_header(&self.cookies)
    }

    /// Replace the signature, returning the updated session
    #[must_use]
    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = signature;
        self
    }

    /// Replace the cookie set (after a keepalive or re-login observed
    /// fresh cookies)
    #[must_use]
    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_synthesises_signature_when_token_empty() {
        let session = PortalSession::new("A1", HashMap::new(), "");
        assert!(session.signature.contains('.'));

        let session = PortalSession::new("A1", HashMap::new(), "token123");
        assert_eq!(session.signature, "token123");
    }

    #[test]
    fn cookie_header_renders_sorted_pairs() {
        let cookies = HashMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        let session = PortalSession::new("A1", cookies, "sig");
        assert_eq!(session.cookie_header(), "a=1; b=2");
    }
}
