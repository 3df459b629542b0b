//! Counter key derivation.

use crate::policy::RateLimitConfig;

/// Derive the storage key for an (identifier, policy) pair.
///
/// Keys carry the application prefix and the policy name so that
/// distinct policies applied to the same identifier never share a
/// counter. Deterministic; no side effects.
pub fn derive_key(identifier: &str, config: &RateLimitConfig) -> String {
    format!("limitgate:{}:{}", config.name, sanitize(identifier))
}

/// Replace characters that are unsafe or ambiguous in store keys.
///
/// Colons are rewritten too (IPv6 addresses contain them) so an
/// identifier can never fake a policy namespace.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
