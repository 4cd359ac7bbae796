//! Voter identity resolution
//!
//! A caller either names itself or is fingerprinted from connection
//! metadata. Neither is authenticated: the identifier only deduplicates
//! and attributes votes.

use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Prefix marking an identifier derived from connection metadata
pub const INFERRED_PREFIX: &str = "anon_";

/// Hex characters of the digest kept in an inferred identifier
const FINGERPRINT_LEN: usize = 32;

/// Connection metadata used to fingerprint callers without an identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub remote_addr: Option<SocketAddr>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub forwarded_for: Option<String>,
}

impl ConnectionMeta {
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        // Only the IP: source ports change per connection
        let addr = self.remote_addr.map(|a| a.ip().to_string());
        for part in [
            addr.as_deref(),
            self.user_agent.as_deref(),
            self.accept_language.as_deref(),
            self.forwarded_for.as_deref(),
        ] {
            hasher.update(part.unwrap_or("").as_bytes());
            hasher.update([0x1f_u8]);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..FINGERPRINT_LEN].to_string()
    }
}

/// Resolve the voter identifier for a request.
///
/// A non-blank `explicit` identifier is returned verbatim; otherwise the
/// result is a stable fingerprint of `meta`.
pub fn resolve(explicit: Option<&str>, meta: &ConnectionMeta) -> String {
    match explicit {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => format!("{}{}", INFERRED_PREFIX, meta.fingerprint()),
    }
}

/// Whether `voter_id` was produced by fingerprinting
pub fn is_inferred(voter_id: &str) -> bool {
    voter_id.starts_with(INFERRED_PREFIX)
}
