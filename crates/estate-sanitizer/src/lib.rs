//! Secret-masking helpers (spec §5: "masking helper required in any
//! diagnostic surface").
//!
//! `shipper-output-sanitizer` ships as an empty shell
//! (`Cargo.toml` only, no `src/`); the masking algorithm itself is grounded
//! on `shipper-auth::mask_token` (first 4 / last 4 chars visible), promoted
//! into its own crate because here it is needed by every adapter and by the
//! logging layer, not just one auth module.

/// Mask a secret for safe display: show the first 4 and last 4 characters,
/// asterisks between. Secrets of 8 characters or fewer are fully masked.
pub fn mask(secret: &str) -> String {
    if secret.len() <= 8 {
        return "*".repeat(secret.len());
    }
    format!("{}****{}", &secret[..4], &secret[secret.len() - 4..])
}

/// Scrub any occurrence of `secret` in `text`, replacing it with its masked
/// form. Used before logging request/response bodies or error messages that
/// might echo back a credential.
pub fn scrub(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, &mask(secret))
}

/// Scrub a whole set of known secrets from a block of text in one pass,
/// e.g. before writing a progress document's `error` field or a CI log
/// tail to disk.
pub fn scrub_all<'a>(text: &str, secrets: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = scrub(&out, secret);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_short_secret_is_fully_starred() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("abcdefgh"), "********");
    }

    #[test]
    fn mask_long_secret_keeps_ends() {
        assert_eq!(mask("ghp_abcdefghijklmnop"), "ghp_****mnop");
    }

    #[test]
    fn scrub_replaces_every_occurrence() {
        let text = "token=sk-secret123 and again sk-secret123";
        let scrubbed = scrub(text, "sk-secret123");
        assert!(!scrubbed.contains("sk-secret123"));
        assert_eq!(scrubbed.matches("****").count(), 2);
    }

    #[test]
    fn scrub_all_handles_multiple_secrets() {
        let text = "a=alpha123456 b=beta7890123";
        let out = scrub_all(text, ["alpha123456", "beta7890123"]);
        assert!(!out.contains("alpha123456"));
        assert!(!out.contains("beta7890123"));
    }

    #[test]
    fn scrub_ignores_empty_secret() {
        assert_eq!(scrub("hello", ""), "hello");
    }
}
