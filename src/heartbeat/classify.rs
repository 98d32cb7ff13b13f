//! Retry-or-stop decision for errors raised during a heartbeat tick.

use std::sync::OnceLock;

use aho_corasick::AhoCorasick;

use crate::error::ClientError;

/// Server error names meaning the session is gone for good.
pub const AUTH_REVOCATION_MARKERS: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
    "AUTH_KEY_INVALID",
];

/// How the heartbeat loop should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The transport failed; back off and reconnect.
    Connectivity,
    /// Unknown failure; back off and retry.
    Transient,
    /// The session was revoked; retrying cannot help.
    AuthRevoked,
}

/// Classify an error from the account client.
///
/// Typed signals win. The text heuristic only runs for errors the adapter
/// could not type, and is confined to [`has_revocation_marker`].
pub fn classify(err: &ClientError) -> ErrorClass {
    match err {
        ClientError::Connection(_) => ErrorClass::Connectivity,
        ClientError::Auth(_) | ClientError::Rpc { code: 401, .. } => ErrorClass::AuthRevoked,
        other if has_revocation_marker(&other.to_string()) => ErrorClass::AuthRevoked,
        _ => ErrorClass::Transient,
    }
}

/// Case-insensitive search for any [`AUTH_REVOCATION_MARKERS`] entry.
pub fn has_revocation_marker(text: &str) -> bool {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER
        .get_or_init(|| {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(AUTH_REVOCATION_MARKERS)
                .expect("revocation markers are plain ASCII literals")
        })
        .is_match(text)
}
